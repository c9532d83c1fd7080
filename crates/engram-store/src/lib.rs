//! # engram-store
//!
//! Persistence for [`engram-crdt`](engram_crdt) memory documents.
//!
//! Two layers:
//!
//! - Backends implement the raw [`StateStore`], [`EventStore`] and
//!   [`BatchOps`] traits: namespaced key/value state plus append-only
//!   event logs, with atomic multi-operation batches.
//! - [`MemoryStorage`] sits on any [`Backend`] and stores
//!   [`MemoryDocument`](engram_crdt::MemoryDocument)s with merge-on-put,
//!   a per-type index, and an outbox of changes for replication.
//!
//! ## Quick Start
//!
//! ```
//! use engram_crdt::{MemoryDocument, MemoryType};
//! use engram_store::{MemoryStorage, MemoryStore};
//!
//! let storage = MemoryStorage::new(MemoryStore::new(), "agent-1");
//! let doc = MemoryDocument::new("m1", "the user prefers dark mode", MemoryType::Semantic, "agent-1");
//! storage.put(&doc).unwrap();
//!
//! assert_eq!(storage.query_by_type(MemoryType::Semantic).unwrap().len(), 1);
//! assert_eq!(storage.pending_sync(10).unwrap().len(), 1);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, fault injection |
//! | `SqliteStore` | `sqlite` (default) | Single-file durable storage |
//! | `RedbStore` | `redb` | Pure-Rust storage without C deps |
//!
//! ## Formats
//!
//! Documents at rest are postcard-encoded inside a 3-byte
//! [`envelope`]. Documents crossing process boundaries use the JSON
//! functions in [`codec`].

#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
mod error;
mod locks;
mod memory;
#[cfg(feature = "redb")]
mod redb;
#[cfg(feature = "sqlite")]
mod sqlite;
mod storage;
mod traits;

pub use error::{EnvelopeError, StorageError};
pub use memory::{MemoryError, MemoryStore};
#[cfg(feature = "redb")]
pub use redb::{RedbError, RedbStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore};
pub use storage::{
    BatchReport, CachedEmbedding, MemoryStorage, OutboxEntry, PutOutcome, DOCUMENTS, EMBEDDINGS,
    OUTBOX,
};
pub use traits::{
    Backend, BackendError, BatchOps, EventStore, StateStore, StoredEvent, WriteOp,
};
