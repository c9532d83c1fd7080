//! # engram
//!
//! Conflict-free shared memory for agent replicas.
//!
//! Independent agents record, tag, weight and reconcile memories without a
//! coordinator. Each memory is a CRDT document from
//! [`engram-crdt`](engram_crdt); [`engram-store`](engram_store) persists
//! documents with merge-on-put; this crate adds the async
//! [`AgentMemory`] façade on top, wired to an [`EmbeddingService`] for
//! similarity recall.
//!
//! ## Quick Start
//!
//! ```
//! use engram::{AgentMemory, AgentMemoryConfig};
//! use engram_store::MemoryStore;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let memory = AgentMemory::builder(MemoryStore::new())
//!     .config(AgentMemoryConfig::for_replica("agent-1"))
//!     .build()
//!     .unwrap();
//! memory.start().await.unwrap();
//!
//! let id = memory.learn("deploys happen on tuesdays", 0.6, &["ops"]).await.unwrap();
//! let doc = memory.update(&id, Some(0.9), &["schedule"]).await.unwrap();
//! assert_eq!(doc.importance(), 0.9);
//! assert!(doc.has_tag("ops") && doc.has_tag("schedule"));
//!
//! memory.stop().await.unwrap();
//! # });
//! ```
//!
//! ## Replication
//!
//! The crate does not move bytes between replicas. Every local change is
//! appended to an outbox; a transport reads it with
//! [`AgentMemory::pending_sync`], ships the documents as JSON
//! ([`engram_store::codec`]), and the receiving replica merges them with
//! [`AgentMemory::ingest_remote`]. Batches can arrive in any order and
//! any number of times.
//!
//! ## Logging
//!
//! Operations log through `tracing`. The crate never installs a
//! subscriber.

#![warn(missing_docs)]

mod agent;
pub mod config;
pub mod embedding;
mod error;
pub mod retry;
pub mod telemetry;

pub use agent::{AgentMemory, AgentMemoryBuilder, Degraded, NewMemory, Recall, ScoredMemory};
pub use config::AgentMemoryConfig;
pub use embedding::{EmbeddingError, EmbeddingService, LocalEmbeddingIndex};
pub use error::AgentMemoryError;
pub use retry::RetryConfig;
pub use telemetry::{NoopTelemetry, OpEvent, RecordingTelemetry, TelemetrySink, TracingTelemetry};

pub use engram_crdt::{MemoryDocument, MemoryType};
pub use engram_store::{BatchReport, MemoryStorage, OutboxEntry};
