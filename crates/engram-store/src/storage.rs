//! Durable document storage with merge-on-put.
//!
//! [`MemoryStorage`] keeps one [`MemoryDocument`] per id on top of any
//! [`Backend`]. Writing a document never overwrites: the incoming value is
//! merged with whatever is stored, and the join is persisted. Because the
//! merge is a semilattice join, replicas can apply each other's documents
//! in any order, any number of times, and end up with the same state.
//!
//! Layout inside the backend:
//!
//! | Namespace / log | Key | Value |
//! |-----------------|-----|-------|
//! | `memories` | document id | enveloped document |
//! | `type:<memory_type>` | document id | empty (type index) |
//! | `outbox` (log) | sequence | enveloped document after each change |
//! | `embeddings` | content hash | enveloped [`CachedEmbedding`] |
//!
//! The document, its index entry and its outbox event are written in one
//! atomic batch, so a failed put leaves the previous state untouched.
//! Cached embeddings are local to the replica and never published.

use std::time::{Duration, Instant};

use engram_crdt::{CausalOrder, DocumentError, MemoryDocument, MemoryType, RecordKind, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::envelope;
use crate::error::StorageError;
use crate::locks::{LockArena, DEFAULT_STRIPES};
use crate::traits::{now_micros, Backend, WriteOp};

/// Namespace holding the documents.
pub const DOCUMENTS: &str = "memories";

/// Log holding changes not yet pushed to other replicas.
pub const OUTBOX: &str = "outbox";

/// Namespace caching embedding vectors by content hash.
pub const EMBEDDINGS: &str = "embeddings";

fn type_namespace(memory_type: MemoryType) -> String {
    format!("type:{memory_type}")
}

/// Result of a [`MemoryStorage::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// The document as stored after the merge.
    pub document: MemoryDocument,
    /// No document with this id existed before.
    pub created: bool,
    /// The stored value changed.
    pub changed: bool,
    /// The incoming and stored histories were concurrent.
    pub concurrent: bool,
}

/// A change waiting in the outbox.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Position in the outbox; pass to
    /// [`mark_synced`](MemoryStorage::mark_synced) once delivered.
    pub sequence: u64,
    /// Document state right after the change.
    pub document: MemoryDocument,
    /// When the change was recorded, microseconds.
    pub recorded_at: u64,
    /// Replica that stored the change.
    pub origin: String,
}

/// Summary of [`MemoryStorage::apply_remote_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Records that changed the stored state.
    pub applied: usize,
    /// Records already contained in the stored state.
    pub unchanged: usize,
    /// Records that could not be decoded.
    pub rejected: usize,
    /// Records whose history was concurrent with the stored one.
    pub conflicts: usize,
    /// Wall time spent on the batch.
    pub elapsed: Duration,
}

/// An embedding vector cached under the hash of the text it embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    /// [`content_hash`](engram_crdt::content_hash) of the embedded text.
    pub text_hash: String,
    /// The vector.
    pub vector: Vec<f32>,
    /// Model that produced the vector.
    pub model: String,
    /// When the vector was cached, microseconds.
    pub created_at: u64,
}

impl CachedEmbedding {
    /// Cache entry for `vector`, the embedding of `text` by `model`.
    pub fn new(text: &str, vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            text_hash: engram_crdt::content_hash(text),
            vector,
            model: model.into(),
            created_at: now_micros(),
        }
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

impl Versioned for CachedEmbedding {
    const CURRENT_VERSION: u8 = 1;
    const KIND: RecordKind = RecordKind::Embedding;
}

impl BatchReport {
    fn record(&mut self, outcome: PutOutcome) {
        if outcome.changed {
            self.applied += 1;
        } else {
            self.unchanged += 1;
        }
        if outcome.concurrent {
            self.conflicts += 1;
        }
    }
}

/// Merge-on-put document store.
///
/// # Example
///
/// ```
/// use engram_crdt::{MemoryDocument, MemoryType};
/// use engram_store::{MemoryStorage, MemoryStore};
///
/// let storage = MemoryStorage::new(MemoryStore::new(), "a1");
///
/// let mut doc1 = MemoryDocument::new("shared", "likes tea", MemoryType::Semantic, "a1");
/// doc1.add_tag("tag1", "a1");
/// let mut doc2 = MemoryDocument::new("shared", "likes tea", MemoryType::Semantic, "a2");
/// doc2.add_tag("tag2", "a2");
///
/// storage.put(&doc1).unwrap();
/// storage.put(&doc2).unwrap();
///
/// let stored = storage.get("shared").unwrap().unwrap();
/// assert_eq!(stored.get_tags(), vec!["tag1".to_string(), "tag2".to_string()]);
/// ```
pub struct MemoryStorage<S: Backend> {
    store: S,
    locks: LockArena,
    replica_id: String,
}

impl<S: Backend> MemoryStorage<S> {
    /// Wrap `store`. `replica_id` names this instance in the outbox.
    pub fn new(store: S, replica_id: impl Into<String>) -> Self {
        Self::with_lock_stripes(store, replica_id, DEFAULT_STRIPES)
    }

    /// Like [`new`](Self::new) with an explicit number of lock stripes.
    pub fn with_lock_stripes(store: S, replica_id: impl Into<String>, stripes: usize) -> Self {
        Self {
            store,
            locks: LockArena::new(stripes),
            replica_id: replica_id.into(),
        }
    }

    /// The underlying backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// This instance's replica id.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Merge `doc` into the stored document with the same id and persist
    /// the result.
    ///
    /// The read-merge-write runs under the document's lock, so concurrent
    /// puts to one id never lose each other's changes. Storing a document
    /// the store already contains writes nothing.
    #[instrument(level = "debug", skip(self, doc), fields(id = %doc.id()))]
    pub fn put(&self, doc: &MemoryDocument) -> Result<PutOutcome, StorageError> {
        let _guard = self.locks.lock(doc.id())?;

        let Some(existing) = self.load(doc.id())? else {
            self.write(None, doc, true)?;
            debug!(memory_type = %doc.memory_type(), "stored new document");
            return Ok(PutOutcome {
                document: doc.clone(),
                created: true,
                changed: true,
                concurrent: false,
            });
        };

        let concurrent = existing.causal_relation(doc) == CausalOrder::Concurrent;
        let merged = existing.merge(doc)?;
        let changed = merged != existing;
        if changed {
            self.write(Some(&existing), &merged, true)?;
        }
        debug!(changed, concurrent, "merged document");
        Ok(PutOutcome {
            document: merged,
            created: false,
            changed,
            concurrent,
        })
    }

    /// Store `seed` if its id is new, otherwise apply `f` to the stored
    /// document. Either way the check and the write happen under one lock.
    ///
    /// Use this instead of [`put`](Self::put) when a caller rebuilds a
    /// document from scratch for an id that may already exist: `f` edits
    /// the stored copy, so its tags and ratings see the full history.
    pub fn upsert<F>(&self, seed: &MemoryDocument, f: F) -> Result<PutOutcome, StorageError>
    where
        F: FnOnce(&mut MemoryDocument) -> Result<(), DocumentError>,
    {
        let _guard = self.locks.lock(seed.id())?;
        let Some(existing) = self.load(seed.id())? else {
            self.write(None, seed, true)?;
            debug!(id = seed.id(), "stored new document");
            return Ok(PutOutcome {
                document: seed.clone(),
                created: true,
                changed: true,
                concurrent: false,
            });
        };

        let mut next = existing.clone();
        f(&mut next)?;
        let merged = existing.merge(&next)?;
        let changed = merged != existing;
        if changed {
            self.write(Some(&existing), &merged, true)?;
            debug!(id = seed.id(), "updated existing document");
        }
        Ok(PutOutcome {
            document: merged,
            created: false,
            changed,
            concurrent: false,
        })
    }

    /// Apply local mutations to a stored document atomically.
    ///
    /// `f` runs on a copy of the stored document while its lock is held;
    /// the result is merged back and persisted. Keep `f` short and free of
    /// I/O. Fails with [`StorageError::NotFound`] if `id` is not stored.
    pub fn update<F>(&self, id: &str, f: F) -> Result<MemoryDocument, StorageError>
    where
        F: FnOnce(&mut MemoryDocument) -> Result<(), DocumentError>,
    {
        let _guard = self.locks.lock(id)?;
        let existing = self
            .load(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let mut next = existing.clone();
        f(&mut next)?;
        let merged = existing.merge(&next)?;
        if merged != existing {
            self.write(Some(&existing), &merged, true)?;
            debug!(id, "updated document");
        }
        Ok(merged)
    }

    /// Decode and merge a batch of JSON records from another replica.
    ///
    /// Undecodable records are counted as rejected and skipped. A storage
    /// failure aborts the batch; records applied before it stay applied,
    /// and re-sending the whole batch is safe.
    #[instrument(level = "debug", skip_all)]
    pub fn apply_remote_batch<I, R>(&self, records: I) -> Result<BatchReport, StorageError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        let started = Instant::now();
        let mut report = BatchReport::default();

        for (index, record) in records.into_iter().enumerate() {
            match codec::from_json(record.as_ref()) {
                Ok(doc) => report.record(self.put(&doc)?),
                Err(e) => {
                    warn!(index, error = %e, "rejected remote record");
                    report.rejected += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        debug!(
            applied = report.applied,
            rejected = report.rejected,
            conflicts = report.conflicts,
            "applied remote batch"
        );
        Ok(report)
    }

    /// Merge already-decoded documents, for instance a collection
    /// exported by another replica.
    pub fn merge_collection<'a, I>(&self, docs: I) -> Result<BatchReport, StorageError>
    where
        I: IntoIterator<Item = &'a MemoryDocument>,
    {
        let started = Instant::now();
        let mut report = BatchReport::default();
        for doc in docs {
            report.record(self.put(doc)?);
        }
        report.elapsed = started.elapsed();
        debug!(applied = report.applied, "merged collection");
        Ok(report)
    }

    /// Every stored document as a JSON record, ordered by id. Feeding the
    /// result to another replica's
    /// [`apply_remote_batch`](Self::apply_remote_batch) brings it up to
    /// date without the outbox.
    pub fn export_collection(&self) -> Result<Vec<String>, StorageError> {
        self.all()?.iter().map(codec::to_json).collect()
    }

    // ── Embedding cache ────────────────────────────────────────────

    /// Cache `embedding` under its text hash, replacing any previous
    /// entry.
    pub fn put_embedding(&self, embedding: &CachedEmbedding) -> Result<(), StorageError> {
        let bytes = envelope::encode(embedding)?;
        self.store
            .put(EMBEDDINGS, &embedding.text_hash, &bytes)
            .map_err(StorageError::backend)
    }

    /// The cached embedding of the text hashing to `text_hash`, if any.
    pub fn get_embedding_by_hash(
        &self,
        text_hash: &str,
    ) -> Result<Option<CachedEmbedding>, StorageError> {
        match self
            .store
            .get(EMBEDDINGS, text_hash)
            .map_err(StorageError::backend)?
        {
            Some(bytes) => Ok(Some(envelope::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a document from this replica only.
    ///
    /// This is housekeeping, not a distributed delete: the removal is not
    /// published, and any later merge of the same id from another replica
    /// brings the document back. Returns `false` if `id` was not stored.
    pub fn purge_local(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.locks.lock(id)?;
        let Some(existing) = self.load(id)? else {
            return Ok(false);
        };
        let index = type_namespace(existing.memory_type());
        self.store
            .apply_batch(&[
                WriteOp::Delete {
                    namespace: DOCUMENTS,
                    key: id,
                },
                WriteOp::Delete {
                    namespace: &index,
                    key: id,
                },
            ])
            .map_err(StorageError::backend)?;
        info!(id, "purged document locally");
        Ok(true)
    }

    /// Drop fully retired tag records from one document. Visible state is
    /// unchanged and nothing is published. Returns the number of records
    /// dropped.
    pub fn compact_tombstones(&self, id: &str) -> Result<usize, StorageError> {
        let _guard = self.locks.lock(id)?;
        let existing = self
            .load(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let mut compacted = existing.clone();
        let dropped = compacted.compact_tags();
        if dropped > 0 {
            self.write(Some(&existing), &compacted, false)?;
            debug!(id, dropped, "compacted tag state");
        }
        Ok(dropped)
    }

    /// Make all completed writes durable.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.store.flush().map_err(StorageError::backend)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// The stored document for `id`, if any.
    pub fn get(&self, id: &str) -> Result<Option<MemoryDocument>, StorageError> {
        self.load(id)
    }

    /// Every document currently classified as `memory_type`.
    pub fn query_by_type(
        &self,
        memory_type: MemoryType,
    ) -> Result<Vec<MemoryDocument>, StorageError> {
        let ids = self
            .store
            .list_keys(&type_namespace(memory_type))
            .map_err(StorageError::backend)?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load(&id)? {
                if doc.memory_type() == memory_type {
                    docs.push(doc);
                }
            }
        }
        Ok(docs)
    }

    /// Every stored document, ordered by id.
    pub fn all(&self) -> Result<Vec<MemoryDocument>, StorageError> {
        let ids = self
            .store
            .list_keys(DOCUMENTS)
            .map_err(StorageError::backend)?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load(&id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Number of stored documents.
    pub fn count(&self) -> Result<usize, StorageError> {
        Ok(self
            .store
            .list_keys(DOCUMENTS)
            .map_err(StorageError::backend)?
            .len())
    }

    /// Documents carrying the live tag `tag`.
    pub fn query_by_tag(&self, tag: &str) -> Result<Vec<MemoryDocument>, StorageError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|d| d.has_tag(tag))
            .collect())
    }

    /// Documents with importance of at least `min`, most important first.
    pub fn query_by_importance(&self, min: f64) -> Result<Vec<MemoryDocument>, StorageError> {
        let mut docs: Vec<_> = self
            .all()?
            .into_iter()
            .filter(|d| d.importance() >= min)
            .collect();
        docs.sort_by(|a, b| b.importance().total_cmp(&a.importance()));
        Ok(docs)
    }

    /// The `limit` most recently updated documents, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<MemoryDocument>, StorageError> {
        let mut docs = self.all()?;
        docs.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        docs.truncate(limit);
        Ok(docs)
    }

    /// The `limit` most important documents.
    pub fn most_important(&self, limit: usize) -> Result<Vec<MemoryDocument>, StorageError> {
        let mut docs = self.query_by_importance(f64::NEG_INFINITY)?;
        docs.truncate(limit);
        Ok(docs)
    }

    // ── Outbox ─────────────────────────────────────────────────────

    /// Up to `limit` changes not yet marked as synced, oldest first.
    pub fn pending_sync(&self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError> {
        let events = self
            .store
            .events_since(OUTBOX, 0, limit)
            .map_err(StorageError::backend)?;
        events
            .into_iter()
            .map(|event| {
                Ok(OutboxEntry {
                    sequence: event.sequence,
                    document: envelope::decode(&event.data)?,
                    recorded_at: event.timestamp,
                    origin: event.node_id,
                })
            })
            .collect()
    }

    /// Drop outbox entries up to and including `through_sequence`.
    /// Returns how many were dropped.
    pub fn mark_synced(&self, through_sequence: u64) -> Result<u64, StorageError> {
        let removed = self
            .store
            .truncate_events_through(OUTBOX, through_sequence)
            .map_err(StorageError::backend)?;
        debug!(through_sequence, removed, "outbox truncated");
        Ok(removed)
    }

    /// Number of changes waiting in the outbox.
    pub fn outbox_len(&self) -> Result<u64, StorageError> {
        self.store
            .event_count(OUTBOX)
            .map_err(StorageError::backend)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn load(&self, id: &str) -> Result<Option<MemoryDocument>, StorageError> {
        match self
            .store
            .get(DOCUMENTS, id)
            .map_err(StorageError::backend)?
        {
            Some(bytes) => Ok(Some(envelope::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist `next` with its type index entry, and optionally an outbox
    /// event, in one batch.
    fn write(
        &self,
        previous: Option<&MemoryDocument>,
        next: &MemoryDocument,
        publish: bool,
    ) -> Result<(), StorageError> {
        let id = next.id();
        let bytes = envelope::encode(next)?;
        let index = type_namespace(next.memory_type());
        let stale_index = previous
            .map(|p| type_namespace(p.memory_type()))
            .filter(|ns| *ns != index);

        let mut ops = vec![
            WriteOp::Put {
                namespace: DOCUMENTS,
                key: id,
                value: &bytes,
            },
            WriteOp::Put {
                namespace: &index,
                key: id,
                value: &[],
            },
        ];
        if let Some(stale) = &stale_index {
            ops.push(WriteOp::Delete {
                namespace: stale,
                key: id,
            });
        }
        if publish {
            ops.push(WriteOp::Append {
                log: OUTBOX,
                entity_id: id,
                data: &bytes,
                timestamp: now_micros(),
                node_id: &self.replica_id,
            });
        }
        self.store.apply_batch(&ops).map_err(StorageError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn storage() -> MemoryStorage<MemoryStore> {
        MemoryStorage::new(MemoryStore::new(), "local")
    }

    fn doc(id: &str, memory_type: MemoryType, source: &str) -> MemoryDocument {
        MemoryDocument::with_timestamp(id, "content", memory_type, source, 1)
    }

    #[test]
    fn put_then_get() {
        let s = storage();
        let outcome = s.put(&doc("m1", MemoryType::Episodic, "a")).unwrap();
        assert!(outcome.created && outcome.changed);
        assert_eq!(s.get("m1").unwrap().unwrap().id(), "m1");
        assert!(s.get("missing").unwrap().is_none());
    }

    #[test]
    fn repeated_put_writes_nothing() {
        let s = storage();
        let d = doc("m1", MemoryType::Episodic, "a");
        s.put(&d).unwrap();
        let again = s.put(&d).unwrap();
        assert!(!again.changed);
        assert_eq!(s.outbox_len().unwrap(), 1);
    }

    #[test]
    fn reclassify_moves_type_index() {
        let s = storage();
        s.put(&doc("m1", MemoryType::Episodic, "a")).unwrap();
        s.update("m1", |d| {
            d.reclassify(MemoryType::Semantic, "local");
            Ok(())
        })
        .unwrap();

        assert!(s.query_by_type(MemoryType::Episodic).unwrap().is_empty());
        let semantic = s.query_by_type(MemoryType::Semantic).unwrap();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].id(), "m1");
    }

    #[test]
    fn update_missing_is_not_found() {
        let s = storage();
        let err = s.update("nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(id) if id == "nope"));
    }

    #[test]
    fn update_error_leaves_document_untouched() {
        let s = storage();
        s.put(&doc("m1", MemoryType::Episodic, "a")).unwrap();
        let err = s
            .update("m1", |d| {
                d.add_tag("half-done", "a");
                d.set_importance(f64::NAN, "local")
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Merge(_)));
        assert!(s.get("m1").unwrap().unwrap().get_tags().is_empty());
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let s = storage();
        s.put(&doc("m1", MemoryType::Episodic, "a")).unwrap();

        let mut changed = doc("m1", MemoryType::Episodic, "b");
        changed.add_tag("new", "b");
        s.store().fail_next_writes(1);
        let err = s.put(&changed).unwrap_err();
        assert!(err.is_transient());

        let stored = s.get("m1").unwrap().unwrap();
        assert!(stored.get_tags().is_empty());
        assert_eq!(s.outbox_len().unwrap(), 1);
    }

    #[test]
    fn outbox_tracks_changes_until_synced() {
        let s = storage();
        s.put(&doc("m1", MemoryType::Episodic, "a")).unwrap();
        s.put(&doc("m2", MemoryType::Working, "a")).unwrap();

        let pending = s.pending_sync(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].document.id(), "m1");
        assert_eq!(pending[1].origin, "local");

        assert_eq!(s.mark_synced(pending[0].sequence).unwrap(), 1);
        let pending = s.pending_sync(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].document.id(), "m2");
    }

    #[test]
    fn purge_is_local_and_merge_resurrects() {
        let s = storage();
        let d = doc("m1", MemoryType::Procedural, "a");
        s.put(&d).unwrap();

        assert!(s.purge_local("m1").unwrap());
        assert!(!s.purge_local("m1").unwrap());
        assert!(s.get("m1").unwrap().is_none());
        assert!(s.query_by_type(MemoryType::Procedural).unwrap().is_empty());

        s.put(&d).unwrap();
        assert!(s.get("m1").unwrap().is_some());
    }

    #[test]
    fn compaction_keeps_visible_tags() {
        let s = storage();
        let mut d = doc("m1", MemoryType::Semantic, "a");
        d.add_tag("keep", "a");
        d.add_tag("drop", "a");
        d.remove_tag("drop", "a");
        s.put(&d).unwrap();

        assert_eq!(s.compact_tombstones("m1").unwrap(), 1);
        assert_eq!(s.compact_tombstones("m1").unwrap(), 0);
        let stored = s.get("m1").unwrap().unwrap();
        assert_eq!(stored.get_tags(), vec!["keep".to_string()]);

        // A peer still holding the retired add cannot revive it.
        s.put(&d).unwrap();
        assert_eq!(s.get("m1").unwrap().unwrap().get_tags(), vec!["keep".to_string()]);
    }

    #[test]
    fn ordering_queries() {
        let s = storage();
        for (id, importance) in [("a", 0.2), ("b", 0.9), ("c", 0.5)] {
            let mut d = doc(id, MemoryType::Semantic, "w");
            d.set_importance(importance, "w").unwrap();
            s.put(&d).unwrap();
        }

        let ids = |docs: Vec<MemoryDocument>| {
            docs.iter().map(|d| d.id().to_string()).collect::<Vec<_>>()
        };
        assert_eq!(ids(s.most_important(2).unwrap()), vec!["b", "c"]);
        assert_eq!(ids(s.query_by_importance(0.4).unwrap()), vec!["b", "c"]);
        assert_eq!(s.count().unwrap(), 3);
        assert_eq!(s.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn query_by_tag_sees_only_live_tags() {
        let s = storage();
        let mut d1 = doc("m1", MemoryType::Semantic, "a");
        d1.add_tag("rust", "a");
        let mut d2 = doc("m2", MemoryType::Semantic, "a");
        d2.add_tag("rust", "a");
        d2.remove_tag("rust", "a");
        s.put(&d1).unwrap();
        s.put(&d2).unwrap();

        let hits = s.query_by_tag("rust").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), "m1");
    }

    #[test]
    fn upsert_stores_seed_for_new_id() {
        let s = storage();
        let seed = doc("m1", MemoryType::Working, "local");
        let outcome = s.upsert(&seed, |_| panic!("nothing stored yet")).unwrap();
        assert!(outcome.created);
        assert_eq!(s.get("m1").unwrap().unwrap(), seed);
    }

    #[test]
    fn upsert_edits_the_stored_copy() {
        let s = storage();
        let mut first = doc("m1", MemoryType::Semantic, "local");
        first.add_tag("old", "local");
        s.put(&first).unwrap();
        s.update("m1", |d| {
            d.remove_tag("old", "local");
            Ok(())
        })
        .unwrap();

        let seed = doc("m1", MemoryType::Semantic, "local");
        let outcome = s
            .upsert(&seed, |d| {
                d.add_tag("new", "local");
                Ok(())
            })
            .unwrap();
        assert!(!outcome.created && outcome.changed);
        let stored = s.get("m1").unwrap().unwrap();
        assert_eq!(stored.get_tags(), vec!["new".to_string()]);
    }

    #[test]
    fn embedding_cache_round_trip() {
        let s = storage();
        assert!(s.get_embedding_by_hash("nope").unwrap().is_none());

        let cached = CachedEmbedding::new("hello", vec![0.5, -0.25], "test-model");
        s.put_embedding(&cached).unwrap();
        let hash = engram_crdt::content_hash("hello");
        let back = s.get_embedding_by_hash(&hash).unwrap().unwrap();
        assert_eq!(back, cached);
        assert_eq!(back.dimensions(), 2);
        assert_eq!(s.outbox_len().unwrap(), 0);
        assert_eq!(s.count().unwrap(), 0);
    }

    #[test]
    fn exported_collection_rebuilds_a_replica() {
        let s = storage();
        let mut d1 = doc("m1", MemoryType::Semantic, "a");
        d1.add_tag("x", "a");
        s.put(&d1).unwrap();
        s.put(&doc("m2", MemoryType::Working, "a")).unwrap();

        let exported = s.export_collection().unwrap();
        assert_eq!(exported.len(), 2);

        let other = storage();
        let report = other.apply_remote_batch(&exported).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(other.all().unwrap(), s.all().unwrap());

        let again = other.merge_collection(&s.all().unwrap()).unwrap();
        assert_eq!(again.unchanged, 2);
    }

    #[test]
    fn remote_batch_reports_outcomes() {
        let s = storage();
        let base = doc("m1", MemoryType::Semantic, "origin");
        s.put(&base).unwrap();

        let mut local = base.clone();
        local.add_tag("mine", "local");
        s.put(&local).unwrap();

        let mut remote = base.clone();
        remote.add_tag("theirs", "remote");
        let records = vec![
            codec::to_json(&remote).unwrap(),
            "not json".to_string(),
            codec::to_json(&remote).unwrap(),
        ];

        let report = s.apply_remote_batch(&records).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.conflicts, 1);

        let tags = s.get("m1").unwrap().unwrap().get_tags();
        assert_eq!(tags, vec!["mine".to_string(), "theirs".to_string()]);
    }
}
