//! Versioned persistence metadata.
//!
//! Stored values carry a small envelope naming their kind and schema
//! version, so a reader can reject or upgrade data written by another
//! release. The envelope itself lives in `engram-store`; this module only
//! declares what each type puts in it.

use core::fmt;

/// Kind of value stored behind a version envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// A [`MemoryDocument`](crate::MemoryDocument).
    Document = 1,
    /// A cached embedding vector.
    Embedding = 2,
}

impl RecordKind {
    /// Decode the envelope's kind byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Document),
            2 => Some(Self::Embedding),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Embedding => f.write_str("embedding"),
        }
    }
}

/// Types that are persisted behind a version envelope.
pub trait Versioned: Sized {
    /// Schema version written for new values.
    const CURRENT_VERSION: u8;

    /// Kind byte written into the envelope.
    const KIND: RecordKind;
}

impl Versioned for crate::MemoryDocument {
    const CURRENT_VERSION: u8 = 1;
    const KIND: RecordKind = RecordKind::Document;
}
