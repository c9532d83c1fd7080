//! # engram-crdt
//!
//! Conflict-free replicated data types for agent memory, and the
//! [`MemoryDocument`] built from them.
//!
//! Every type here can be updated independently on different instances.
//! Merging replicas in any order, any number of times, yields the same
//! state.
//!
//! ## `no_std` Support
//!
//! The crate builds on `alloc` alone. Disable the default `std` feature:
//!
//! ```toml
//! [dependencies]
//! engram-crdt = { version = "0.1", default-features = false }
//! ```
//!
//! Without `std` there is no wall clock, so [`MemoryDocument::new`] is
//! unavailable and documents are created with
//! [`MemoryDocument::with_timestamp`].
//!
//! ## Quick Start
//!
//! ```
//! use engram_crdt::prelude::*;
//!
//! let mut c1 = GCounter::new();
//! c1.increment("device-1");
//!
//! let mut c2 = GCounter::new();
//! c2.increment("device-2");
//!
//! c1.merge(&c2);
//! assert_eq!(c1.value(), 2);
//! ```
//!
//! ## Available types
//!
//! - [`GCounter`] - grow-only counter
//! - [`GSet`] - grow-only set
//! - [`LWWRegister`] - last-writer-wins register with writer tie-break
//! - [`ORSet`] - observed-remove set, add wins
//! - [`VectorClock`] - causal history
//! - [`MemoryDocument`] - one memory, composed of the above
//!
//! With the `serde` feature every type is serializable, and documents
//! travel as [`MemoryRecord`]s.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod crdt;
mod document;
mod gcounter;
mod gset;
mod lww_register;
mod or_set;
#[cfg(feature = "serde")]
mod record;
mod vector_clock;
mod version;

pub mod prelude;

pub use crdt::Crdt;
pub use document::{
    content_hash, DocumentError, MemoryDocument, MemoryType, ParseMemoryTypeError,
    DEFAULT_CONFIDENCE,
};
pub use gcounter::GCounter;
pub use gset::GSet;
pub use lww_register::LWWRegister;
pub use or_set::{ORSet, Tag};
#[cfg(feature = "serde")]
pub use record::{ImportanceEntry, MemoryRecord, RecordError};
pub use vector_clock::{CausalOrder, VectorClock};
pub use version::{RecordKind, Versioned};
