//! The mergeable memory document.
//!
//! A [`MemoryDocument`] is a composite CRDT: every field is either immutable
//! after creation or backed by a primitive from this crate, and
//! [`MemoryDocument::merge`] joins the documents field by field.
//!
//! | Field | Merge |
//! |-------|-------|
//! | `content`, `memory_type` | [`LWWRegister`] |
//! | `tags` | [`ORSet`] (add-wins) |
//! | `importance`, `confidence` | per-writer [`LWWRegister`], read as the max over writers |
//! | `related`, `parents`, `evidence` | [`GSet`] |
//! | `access_count` | [`GCounter`] |
//! | `clock` | [`VectorClock`] |
//! | `created_at` / `updated_at` | min / max |
//!
//! `content_hash` is not merged: it is the SHA-256 of whichever content
//! wins, recomputed whenever the content changes.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use sha2::{Digest, Sha256};

use crate::{CausalOrder, Crdt, GCounter, GSet, LWWRegister, ORSet, Tag, VectorClock};

/// Confidence reported when no writer has rated a document.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Lowercase hex SHA-256 of `text`.
///
/// Documents carry the hash of their content; the same function keys the
/// embedding cache, so identical text is embedded once.
#[must_use]
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Classification of a memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MemoryType {
    /// Something that happened.
    #[default]
    Episodic,
    /// A fact or belief.
    Semantic,
    /// How to do something.
    Procedural,
    /// Short-lived scratch state.
    Working,
}

impl MemoryType {
    /// All variants, in declaration order.
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
        MemoryType::Working,
    ];

    /// Lowercase name used in records and indexes.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Working => "working",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown memory type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMemoryTypeError(pub String);

impl fmt::Display for ParseMemoryTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown memory type: {}", self.0)
    }
}

impl FromStr for MemoryType {
    type Err = ParseMemoryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseMemoryTypeError(s.to_string()))
    }
}

/// Errors raised by document operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// Two documents with different ids were merged. This is a caller bug
    /// and is never corrected automatically.
    IdentityMismatch {
        /// Id of the receiving document.
        left: String,
        /// Id of the document passed in.
        right: String,
    },
    /// An importance value was NaN or infinite.
    NonFiniteImportance(f64),
    /// A confidence value was NaN or infinite.
    NonFiniteConfidence(f64),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityMismatch { left, right } => {
                write!(f, "cannot merge document {left} with document {right}")
            }
            Self::NonFiniteImportance(v) => write!(f, "importance must be finite, got {v}"),
            Self::NonFiniteConfidence(v) => write!(f, "confidence must be finite, got {v}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DocumentError {}

/// A single memory, replicated and merged without coordination.
///
/// # Example
///
/// ```
/// use engram_crdt::{MemoryDocument, MemoryType};
///
/// let mut doc1 = MemoryDocument::new("shared", "likes tea", MemoryType::Semantic, "a1");
/// doc1.add_tag("tag1", "a1");
/// doc1.set_importance(0.5, "a1").unwrap();
///
/// let mut doc2 = MemoryDocument::new("shared", "likes tea", MemoryType::Semantic, "a2");
/// doc2.add_tag("tag2", "a2");
/// doc2.set_importance(0.9, "a2").unwrap();
///
/// let merged = doc1.merge(&doc2).unwrap();
/// assert!(merged.get_tags().contains(&"tag1".to_string()));
/// assert!(merged.get_tags().contains(&"tag2".to_string()));
/// assert!(merged.importance() >= 0.9);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "crate::MemoryRecord", try_from = "crate::MemoryRecord")
)]
pub struct MemoryDocument {
    pub(crate) id: String,
    pub(crate) memory_type: LWWRegister<MemoryType>,
    pub(crate) source_instance: String,
    pub(crate) content: LWWRegister<String>,
    pub(crate) content_hash: String,
    pub(crate) tags: ORSet<String>,
    pub(crate) importance: BTreeMap<String, LWWRegister<f64>>,
    pub(crate) confidence: BTreeMap<String, LWWRegister<f64>>,
    pub(crate) related: GSet<String>,
    pub(crate) parents: GSet<String>,
    pub(crate) evidence: GSet<String>,
    pub(crate) access_count: GCounter,
    pub(crate) clock: VectorClock,
    pub(crate) created_at: u64,
    pub(crate) updated_at: u64,
}

impl MemoryDocument {
    /// Create a document stamped with the current wall-clock time.
    #[cfg(feature = "std")]
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
        source_instance: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(id, content, memory_type, source_instance, now_micros())
    }

    /// Create a document with an explicit creation timestamp (microseconds).
    pub fn with_timestamp(
        id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
        source_instance: impl Into<String>,
        created_at: u64,
    ) -> Self {
        let source_instance = source_instance.into();
        let content = content.into();
        let mut clock = VectorClock::new();
        clock.tick(&source_instance);
        Self {
            id: id.into(),
            memory_type: LWWRegister::new(memory_type, created_at, source_instance.clone()),
            content_hash: content_hash(&content),
            content: LWWRegister::new(content, created_at, source_instance.clone()),
            tags: ORSet::new(source_instance.clone()),
            importance: BTreeMap::new(),
            confidence: BTreeMap::new(),
            related: GSet::new(),
            parents: GSet::new(),
            evidence: GSet::new(),
            access_count: GCounter::new(),
            clock,
            source_instance,
            created_at,
            updated_at: created_at,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Stable document id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current classification.
    #[must_use]
    pub fn memory_type(&self) -> MemoryType {
        *self.memory_type.get()
    }

    /// Instance that created the document.
    #[must_use]
    pub fn source_instance(&self) -> &str {
        &self.source_instance
    }

    /// Current content.
    #[must_use]
    pub fn content(&self) -> &str {
        self.content.get()
    }

    /// SHA-256 of the current content, lowercase hex.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The content register, including its winning writer and timestamp.
    #[must_use]
    pub fn content_register(&self) -> &LWWRegister<String> {
        &self.content
    }

    /// Live tags, sorted.
    #[must_use]
    pub fn get_tags(&self) -> Vec<String> {
        self.tags.elements()
    }

    /// True if `tag` is live.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The full tag set, including observed add tags and tombstones.
    #[must_use]
    pub fn tag_state(&self) -> &ORSet<String> {
        &self.tags
    }

    /// Visible importance: the maximum over every writer's latest value,
    /// or `0.0` if nobody has rated the document.
    #[must_use]
    pub fn importance(&self) -> f64 {
        max_rating(&self.importance).unwrap_or(0.0)
    }

    /// The latest importance written by `writer`, if any.
    #[must_use]
    pub fn importance_by(&self, writer: &str) -> Option<f64> {
        self.importance.get(writer).map(|r| *r.get())
    }

    /// Per-writer importance registers.
    pub fn importance_registers(&self) -> impl Iterator<Item = (&str, &LWWRegister<f64>)> {
        self.importance.iter().map(|(w, r)| (w.as_str(), r))
    }

    /// Visible confidence: the maximum over every writer's latest value,
    /// or [`DEFAULT_CONFIDENCE`] if nobody has rated the document.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        max_rating(&self.confidence).unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// The latest confidence written by `writer`, if any.
    #[must_use]
    pub fn confidence_by(&self, writer: &str) -> Option<f64> {
        self.confidence.get(writer).map(|r| *r.get())
    }

    /// Ids of related memories.
    #[must_use]
    pub fn related(&self) -> Vec<String> {
        self.related.elements()
    }

    /// Ids of the memories this one was derived from.
    #[must_use]
    pub fn parents(&self) -> Vec<String> {
        self.parents.elements()
    }

    /// Evidence supporting this memory.
    #[must_use]
    pub fn evidence(&self) -> Vec<String> {
        self.evidence.elements()
    }

    /// Total recorded accesses across replicas.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.value()
    }

    /// The document's causal history.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Creation time in microseconds since the Unix epoch.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Time of the latest mutation in microseconds since the Unix epoch.
    #[must_use]
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Causal relation between this document's history and `other`'s.
    #[must_use]
    pub fn causal_relation(&self, other: &Self) -> CausalOrder {
        self.clock.compare(&other.clock)
    }

    // ── Local mutations ────────────────────────────────────────────

    /// Replace the content on behalf of `writer`.
    pub fn set_content(&mut self, content: impl Into<String>, writer: &str) {
        let ts = self.stamp(writer);
        let content = content.into();
        self.content_hash = content_hash(&content);
        self.content.set(content, ts, writer);
    }

    /// Move the document to another memory type on behalf of `writer`.
    pub fn reclassify(&mut self, memory_type: MemoryType, writer: &str) {
        let ts = self.stamp(writer);
        self.memory_type.set(memory_type, ts, writer);
    }

    /// Add a tag on behalf of `writer`. Returns the add's tag.
    ///
    /// The tag's sequence is at least the mutation's timestamp, so a copy
    /// of this document built from scratch never reissues a tag that an
    /// older copy has already removed.
    pub fn add_tag(&mut self, tag: impl Into<String>, writer: &str) -> Tag {
        let ts = self.stamp(writer);
        self.tags.add_at(tag.into(), writer, ts)
    }

    /// Remove every add of `tag` this replica has observed, on behalf of
    /// `writer`. Adds made concurrently elsewhere survive the next merge.
    ///
    /// Returns the number of add tags retired.
    pub fn remove_tag(&mut self, tag: &str, writer: &str) -> usize {
        let key = String::from(tag);
        let observed = self.tags.tags_for(&key);
        if observed.is_empty() {
            return 0;
        }
        self.stamp(writer);
        self.tags.remove(&key, &observed)
    }

    /// Record `writer`'s importance rating.
    ///
    /// Only `writer`'s own register is touched, so a writer's later value
    /// always replaces its earlier one, and values from different writers
    /// combine by max.
    pub fn set_importance(&mut self, value: f64, writer: &str) -> Result<(), DocumentError> {
        if !value.is_finite() {
            return Err(DocumentError::NonFiniteImportance(value));
        }
        let ts = self.stamp(writer);
        set_rating(&mut self.importance, value, ts, writer);
        Ok(())
    }

    /// Record `writer`'s confidence in this memory. Merges like
    /// importance: per writer, read as the max.
    pub fn set_confidence(&mut self, value: f64, writer: &str) -> Result<(), DocumentError> {
        if !value.is_finite() {
            return Err(DocumentError::NonFiniteConfidence(value));
        }
        let ts = self.stamp(writer);
        set_rating(&mut self.confidence, value, ts, writer);
        Ok(())
    }

    /// Link another memory.
    pub fn add_related(&mut self, memory_id: impl Into<String>, writer: &str) {
        self.stamp(writer);
        self.related.add(memory_id.into());
    }

    /// Record that this memory was derived from `memory_id`.
    pub fn add_parent(&mut self, memory_id: impl Into<String>, writer: &str) {
        self.stamp(writer);
        self.parents.add(memory_id.into());
    }

    /// Attach a piece of supporting evidence.
    pub fn add_evidence(&mut self, evidence: impl Into<String>, writer: &str) {
        self.stamp(writer);
        self.evidence.add(evidence.into());
    }

    /// Count one access by `replica`. Does not advance `updated_at`.
    pub fn record_access(&mut self, replica: &str) {
        self.access_count.increment(replica);
    }

    /// Drop tag add records that are fully retired. Housekeeping only;
    /// visible tags do not change.
    pub fn compact_tags(&mut self) -> usize {
        self.tags.compact()
    }

    /// Next local timestamp: wall-clock time, but always past the latest
    /// mutation so a writer's stamps never repeat within a document.
    fn stamp(&mut self, writer: &str) -> u64 {
        let ts = now_micros().max(self.updated_at.saturating_add(1));
        self.updated_at = ts;
        self.clock.tick(writer);
        ts
    }

    // ── Merge ──────────────────────────────────────────────────────

    /// Join two replicas of the same document into a new document.
    ///
    /// Neither operand is modified. Fails with
    /// [`DocumentError::IdentityMismatch`] if the ids differ.
    pub fn merge(&self, other: &Self) -> Result<Self, DocumentError> {
        let mut out = self.clone();
        out.merge_into(other)?;
        Ok(out)
    }

    /// In-place variant of [`merge`](Self::merge).
    pub fn merge_into(&mut self, other: &Self) -> Result<(), DocumentError> {
        if self.id != other.id {
            return Err(DocumentError::IdentityMismatch {
                left: self.id.clone(),
                right: other.id.clone(),
            });
        }

        if self.content != other.content {
            self.content.merge(&other.content);
            self.content_hash = content_hash(self.content.get());
        }
        self.memory_type.merge(&other.memory_type);
        self.tags.merge(&other.tags);
        merge_ratings(&mut self.importance, &other.importance);
        merge_ratings(&mut self.confidence, &other.confidence);
        self.related.merge(&other.related);
        self.parents.merge(&other.parents);
        self.evidence.merge(&other.evidence);
        self.access_count.merge(&other.access_count);
        self.clock.merge(&other.clock);

        // Earliest creation wins, with its creator.
        if (other.created_at, other.source_instance.as_str())
            < (self.created_at, self.source_instance.as_str())
        {
            self.created_at = other.created_at;
            self.source_instance.clone_from(&other.source_instance);
        }
        self.updated_at = self.updated_at.max(other.updated_at);
        Ok(())
    }
}

fn set_rating(
    ratings: &mut BTreeMap<String, LWWRegister<f64>>,
    value: f64,
    ts: u64,
    writer: &str,
) {
    match ratings.get_mut(writer) {
        Some(reg) => reg.set(value, ts, writer),
        None => {
            ratings.insert(String::from(writer), LWWRegister::new(value, ts, writer));
        }
    }
}

fn merge_ratings(
    ours: &mut BTreeMap<String, LWWRegister<f64>>,
    theirs: &BTreeMap<String, LWWRegister<f64>>,
) {
    for (writer, reg) in theirs {
        match ours.get_mut(writer) {
            Some(mine) => mine.merge(reg),
            None => {
                ours.insert(writer.clone(), reg.clone());
            }
        }
    }
}

fn max_rating(ratings: &BTreeMap<String, LWWRegister<f64>>) -> Option<f64> {
    ratings
        .values()
        .map(|r| *r.get())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// Wall-clock microseconds, strictly increasing across the process.
#[cfg(feature = "std")]
fn now_micros() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static LAST: AtomicU64 = AtomicU64::new(0);
    let wall = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let prev = LAST
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(wall.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    wall.max(prev + 1)
}

#[cfg(not(feature = "std"))]
fn now_micros() -> u64 {
    0 // no wall clock; stamps fall back to updated_at + 1
}
