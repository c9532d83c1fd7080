//! Wire record for [`MemoryDocument`].
//!
//! The record is the document's self-describing exchange shape: every
//! field carries its full CRDT state, so a peer that receives it can merge
//! without any other context. Live tags are listed next to the tag state
//! for readers that only want the visible set.
//!
//! Only replicated state is written. Nothing local to one copy appears in
//! a record, so two replicas that hold the same state produce the same
//! bytes.
//!
//! ```text
//! {
//!   "id": "m1",
//!   "memory_type": { "value": "semantic", "timestamp": 1, "writer": "a1" },
//!   "source_instance": "a1",
//!   "content": { "value": "...", "timestamp": 1, "writer": "a1" },
//!   "content_hash": "9f86d0...",
//!   "tags": ["tag1"],
//!   "tag_state": { "adds": {...}, "tombstones": [] },
//!   "importance": { "a1": { "value": 0.5, "timestamp": 2 } },
//!   "confidence": {},
//!   "related": { "elements": [] },
//!   "parents": { "elements": [] },
//!   "evidence": { "elements": [] },
//!   "access_count": {},
//!   "clock": { "a1": 2 },
//!   "created_at": 1,
//!   "updated_at": 2
//! }
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    content_hash, GCounter, GSet, LWWRegister, MemoryDocument, MemoryType, ORSet, VectorClock,
};

/// One writer's importance or confidence rating. The writer is the map
/// key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceEntry {
    /// Rating in whatever scale the writer uses.
    pub value: f64,
    /// Timestamp of the write, microseconds.
    pub timestamp: u64,
}

/// Serializable form of a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Document id.
    pub id: String,
    /// Classification register.
    pub memory_type: LWWRegister<MemoryType>,
    /// Creating instance.
    pub source_instance: String,
    /// Content register.
    pub content: LWWRegister<String>,
    /// SHA-256 of the content, lowercase hex.
    pub content_hash: String,
    /// Live tags, sorted. Must agree with `tag_state`.
    pub tags: Vec<String>,
    /// Full tag set state, adds and tombstones.
    pub tag_state: ORSet<String>,
    /// Per-writer importance.
    pub importance: BTreeMap<String, ImportanceEntry>,
    /// Per-writer confidence.
    pub confidence: BTreeMap<String, ImportanceEntry>,
    /// Related memory ids.
    pub related: GSet<String>,
    /// Ids of the memories this one was derived from.
    pub parents: GSet<String>,
    /// Supporting evidence.
    pub evidence: GSet<String>,
    /// Per-replica access counts.
    pub access_count: GCounter,
    /// Causal history.
    pub clock: VectorClock,
    /// Creation time, microseconds.
    pub created_at: u64,
    /// Last mutation time, microseconds.
    pub updated_at: u64,
}

/// A record that cannot become a document.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    /// `tags` does not list exactly the live elements of `tag_state`.
    TagMismatch {
        /// Tags listed in the record.
        listed: Vec<String>,
        /// Tags live in the record's tag state.
        live: Vec<String>,
    },
    /// An importance entry holds NaN or infinity.
    NonFiniteImportance {
        /// Writer whose entry is invalid.
        writer: String,
    },
    /// A confidence entry holds NaN or infinity.
    NonFiniteConfidence {
        /// Writer whose entry is invalid.
        writer: String,
    },
    /// `content_hash` is not the hash of `content`.
    ContentHashMismatch {
        /// Hash listed in the record.
        listed: String,
        /// Hash of the record's content.
        actual: String,
    },
    /// `updated_at` is earlier than `created_at`.
    TimestampOrder {
        /// Creation time.
        created_at: u64,
        /// Last update time.
        updated_at: u64,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagMismatch { listed, live } => {
                write!(f, "listed tags {listed:?} do not match tag state {live:?}")
            }
            Self::NonFiniteImportance { writer } => {
                write!(f, "importance from {writer} is not finite")
            }
            Self::NonFiniteConfidence { writer } => {
                write!(f, "confidence from {writer} is not finite")
            }
            Self::ContentHashMismatch { listed, actual } => {
                write!(f, "content hash {listed} does not match content ({actual})")
            }
            Self::TimestampOrder {
                created_at,
                updated_at,
            } => write!(f, "updated_at {updated_at} precedes created_at {created_at}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RecordError {}

fn to_entries(ratings: BTreeMap<String, LWWRegister<f64>>) -> BTreeMap<String, ImportanceEntry> {
    ratings
        .into_iter()
        .map(|(writer, reg)| {
            let entry = ImportanceEntry {
                value: *reg.get(),
                timestamp: reg.get_timestamp(),
            };
            (writer, entry)
        })
        .collect()
}

/// Rebuild per-writer registers, or return the first writer whose value
/// is not finite.
fn from_entries(
    entries: BTreeMap<String, ImportanceEntry>,
) -> Result<BTreeMap<String, LWWRegister<f64>>, String> {
    let mut ratings = BTreeMap::new();
    for (writer, entry) in entries {
        if !entry.value.is_finite() {
            return Err(writer);
        }
        let reg = LWWRegister::new(entry.value, entry.timestamp, writer.clone());
        ratings.insert(writer, reg);
    }
    Ok(ratings)
}

impl From<MemoryDocument> for MemoryRecord {
    fn from(doc: MemoryDocument) -> Self {
        Self {
            tags: doc.tags.elements(),
            id: doc.id,
            memory_type: doc.memory_type,
            source_instance: doc.source_instance,
            content: doc.content,
            content_hash: doc.content_hash,
            tag_state: doc.tags,
            importance: to_entries(doc.importance),
            confidence: to_entries(doc.confidence),
            related: doc.related,
            parents: doc.parents,
            evidence: doc.evidence,
            access_count: doc.access_count,
            clock: doc.clock,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

impl TryFrom<MemoryRecord> for MemoryDocument {
    type Error = RecordError;

    fn try_from(rec: MemoryRecord) -> Result<Self, Self::Error> {
        let live = rec.tag_state.elements();
        if live != rec.tags {
            return Err(RecordError::TagMismatch {
                listed: rec.tags,
                live,
            });
        }
        if rec.updated_at < rec.created_at {
            return Err(RecordError::TimestampOrder {
                created_at: rec.created_at,
                updated_at: rec.updated_at,
            });
        }

        let actual = content_hash(rec.content.get());
        if actual != rec.content_hash {
            return Err(RecordError::ContentHashMismatch {
                listed: rec.content_hash,
                actual,
            });
        }

        let importance = from_entries(rec.importance)
            .map_err(|writer| RecordError::NonFiniteImportance { writer })?;
        let confidence = from_entries(rec.confidence)
            .map_err(|writer| RecordError::NonFiniteConfidence { writer })?;

        Ok(Self {
            id: rec.id,
            memory_type: rec.memory_type,
            source_instance: rec.source_instance,
            content: rec.content,
            content_hash: actual,
            tags: rec.tag_state,
            importance,
            confidence,
            related: rec.related,
            parents: rec.parents,
            evidence: rec.evidence,
            access_count: rec.access_count,
            clock: rec.clock,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
        })
    }
}
