use engram_crdt::{DocumentError, RecordKind};

use crate::traits::BackendError;

/// Errors surfaced by [`MemoryStorage`](crate::MemoryStorage).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend failed. `transient` tells whether retrying may help.
    #[error("storage unavailable: {source}")]
    Unavailable {
        /// Backend error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        /// True for busy or locked databases.
        transient: bool,
    },
    /// A payload could not be serialized or deserialized.
    #[error("codec error: {0}")]
    Codec(String),
    /// A stored value has a bad or unsupported envelope.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Merging two documents failed.
    #[error(transparent)]
    Merge(#[from] DocumentError),
    /// No document with this id.
    #[error("document {0} not found")]
    NotFound(String),
    /// A lock in the per-document lock arena was poisoned.
    #[error("document lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Wrap a backend error, keeping its retry classification.
    pub fn backend<E: BackendError>(e: E) -> Self {
        Self::Unavailable {
            transient: e.is_transient(),
            source: Box::new(e),
        }
    }

    /// True if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Error parsing a version envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Data is too short to contain a valid envelope.
    #[error("data too short for version envelope")]
    TooShort,
    /// Missing or incorrect magic byte.
    #[error("invalid magic byte: 0x{0:02X}, expected 0xE6")]
    InvalidMagic(u8),
    /// Unknown record kind byte.
    #[error("unknown record kind: {0}")]
    UnknownKind(u8),
    /// The envelope holds a different kind than requested.
    #[error("expected {expected} record, found {found}")]
    WrongKind {
        /// Kind the caller asked for.
        expected: RecordKind,
        /// Kind in the envelope.
        found: RecordKind,
    },
    /// Written by a newer release than this one understands.
    #[error("unsupported {kind} version {found}, newest known is {supported}")]
    UnsupportedVersion {
        /// Record kind.
        kind: RecordKind,
        /// Version in the envelope.
        found: u8,
        /// Newest version this build reads.
        supported: u8,
    },
}
