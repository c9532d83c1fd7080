//! The async [`AgentMemory`] façade.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use engram_crdt::{MemoryDocument, MemoryType};
use engram_store::{
    Backend, BatchReport, CachedEmbedding, MemoryStorage, OutboxEntry, StorageError,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::AgentMemoryConfig;
use crate::embedding::{EmbeddingError, EmbeddingService, LocalEmbeddingIndex};
use crate::error::AgentMemoryError;
use crate::retry::retry_async;
use crate::telemetry::{OpEvent, TelemetrySink, TracingTelemetry};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// A memory to store with [`AgentMemory::learn_memory`].
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    /// Id to use; a random UUID if `None`.
    pub id: Option<String>,
    /// Text of the memory.
    pub content: String,
    /// Type; the configured default if `None`.
    pub memory_type: Option<MemoryType>,
    /// Initial importance from this replica.
    pub importance: f64,
    /// Initial tags.
    pub tags: Vec<String>,
}

impl NewMemory {
    /// A memory with `content` and everything else defaulted.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Use a caller-chosen id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the memory type.
    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    /// Set the initial importance.
    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A recalled memory with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    /// The stored document.
    pub document: MemoryDocument,
    /// Similarity reported by the embedding service.
    pub score: f32,
}

/// Why a recall returned fewer results than it could have.
#[derive(Debug, Clone, PartialEq)]
pub enum Degraded {
    /// `embed` failed.
    EmbeddingUnavailable(String),
    /// `embed` did not answer in time.
    EmbeddingTimeout,
    /// `similarity_search` failed.
    SearchUnavailable(String),
    /// `similarity_search` did not answer in time.
    SearchTimeout,
}

/// Result of [`AgentMemory::recall`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recall {
    /// Matching memories, best first.
    pub memories: Vec<ScoredMemory>,
    /// Set when the embedding service was unavailable.
    pub degraded: Option<Degraded>,
}

impl Recall {
    /// True if the embedding service was unavailable.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Builder for [`AgentMemory`].
pub struct AgentMemoryBuilder<S: Backend> {
    store: S,
    config: AgentMemoryConfig,
    embedder: Option<Arc<dyn EmbeddingService>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl<S: Backend> AgentMemoryBuilder<S> {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: AgentMemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `embedder` instead of a [`LocalEmbeddingIndex`].
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use `telemetry` instead of [`TracingTelemetry`].
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Validate the configuration and assemble the façade. Nothing is
    /// opened until [`AgentMemory::start`].
    pub fn build(self) -> Result<AgentMemory<S>, AgentMemoryError> {
        self.config.validate()?;
        let storage = MemoryStorage::with_lock_stripes(
            self.store,
            self.config.replica_id.clone(),
            self.config.lock_stripes,
        );
        Ok(AgentMemory {
            storage: Arc::new(storage),
            embedder: self
                .embedder
                .unwrap_or_else(|| Arc::new(LocalEmbeddingIndex::default())),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(TracingTelemetry)),
            config: self.config,
            state: AtomicU8::new(IDLE),
        })
    }
}

/// Shared, conflict-free memory for one agent replica.
///
/// Combines a [`MemoryStorage`] with an [`EmbeddingService`]. Every
/// dependency is passed in through [`AgentMemory::builder`].
///
/// Storage calls run on the blocking thread pool and are retried on
/// transient failures. Embedding calls are bounded by timeouts and never
/// run while a document lock is held. When the embedding service is down,
/// [`learn`](Self::learn) still persists the document and
/// [`recall`](Self::recall) returns a degraded result.
///
/// # Example
///
/// ```
/// use engram::{AgentMemory, AgentMemoryConfig};
/// use engram_store::MemoryStore;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let memory = AgentMemory::builder(MemoryStore::new())
///     .config(AgentMemoryConfig::for_replica("agent-1"))
///     .build()
///     .unwrap();
/// memory.start().await.unwrap();
///
/// let id = memory.learn("the user prefers dark mode", 0.8, &["ui"]).await.unwrap();
/// let recall = memory.recall("dark mode", 5).await.unwrap();
/// assert_eq!(recall.memories[0].document.id(), id);
///
/// memory.stop().await.unwrap();
/// # });
/// ```
pub struct AgentMemory<S: Backend> {
    storage: Arc<MemoryStorage<S>>,
    embedder: Arc<dyn EmbeddingService>,
    telemetry: Arc<dyn TelemetrySink>,
    config: AgentMemoryConfig,
    state: AtomicU8,
}

impl<S: Backend> AgentMemory<S> {
    /// Start building a façade over `store`.
    pub fn builder(store: S) -> AgentMemoryBuilder<S> {
        AgentMemoryBuilder {
            store,
            config: AgentMemoryConfig::default(),
            embedder: None,
            telemetry: None,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &AgentMemoryConfig {
        &self.config
    }

    /// The underlying storage.
    pub fn storage(&self) -> &MemoryStorage<S> {
        &self.storage
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn ensure_running(&self) -> Result<(), AgentMemoryError> {
        match self.state.load(Ordering::Acquire) {
            RUNNING => Ok(()),
            IDLE => Err(AgentMemoryError::NotStarted),
            _ => Err(AgentMemoryError::Stopped),
        }
    }

    fn emit(
        &self,
        op: &'static str,
        started: Instant,
        success: bool,
        conflicts: usize,
        degraded: bool,
    ) {
        self.telemetry.record(OpEvent {
            op,
            duration: started.elapsed(),
            success,
            conflicts,
            degraded,
        });
    }

    async fn with_deadline<T>(
        after: Duration,
        fut: impl Future<Output = Result<T, EmbeddingError>>,
    ) -> Result<T, CallFailure> {
        match timeout(after, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallFailure::Failed(e)),
            Err(_) => Err(CallFailure::TimedOut),
        }
    }
}

/// Failure of one bounded embedding-service call.
enum CallFailure {
    Failed(EmbeddingError),
    TimedOut,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => fmt::Display::fmt(e, f),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

impl<S: Backend + 'static> AgentMemory<S> {
    // ── Lifecycle ──────────────────────────────────────────────────

    /// Open the embedding service and accept operations.
    ///
    /// A failing embedding service does not prevent start-up: operations
    /// run degraded until it recovers.
    pub async fn start(&self) -> Result<(), AgentMemoryError> {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) => return Ok(()),
            Err(_) => return Err(AgentMemoryError::Stopped),
        }

        let lifecycle = self.config.embed_timeout();
        if let Err(failure) = Self::with_deadline(lifecycle, self.embedder.start()).await {
            warn!(reason = %failure, "embedding service failed to start; running degraded");
        }
        info!(replica_id = %self.config.replica_id, "agent memory started");
        Ok(())
    }

    /// Flush storage, close the embedding service and reject further
    /// operations. A stopped instance cannot be restarted.
    pub async fn stop(&self) -> Result<(), AgentMemoryError> {
        self.ensure_running()?;
        let flushed = self.storage_call(|s| s.flush()).await;
        self.state.store(STOPPED, Ordering::Release);

        let lifecycle = self.config.embed_timeout();
        if let Err(failure) = Self::with_deadline(lifecycle, self.embedder.stop()).await {
            warn!(reason = %failure, "embedding service failed to stop cleanly");
        }
        info!(replica_id = %self.config.replica_id, "agent memory stopped");
        flushed
    }

    // ── Core operations ────────────────────────────────────────────

    /// Store a new memory and index its embedding. Returns the new id.
    pub async fn learn(
        &self,
        content: &str,
        importance: f64,
        tags: &[&str],
    ) -> Result<String, AgentMemoryError> {
        let mut memory = NewMemory::new(content).importance(importance);
        memory.tags = tags.iter().map(|t| t.to_string()).collect();
        self.learn_memory(memory).await
    }

    /// Store a memory described by `memory`. Returns its id.
    ///
    /// If `memory.id` is already stored, the new content, type, tags and
    /// importance are applied to the stored document as local edits
    /// rather than written as a fresh copy.
    ///
    /// The document is persisted even if embedding fails or times out;
    /// the vector is then simply missing from the index. If persisting
    /// fails the error is returned and the call can be retried.
    #[instrument(skip(self, memory), fields(replica = %self.config.replica_id))]
    pub async fn learn_memory(&self, memory: NewMemory) -> Result<String, AgentMemoryError> {
        self.ensure_running()?;
        let started = Instant::now();

        let id = memory
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let replica = self.config.replica_id.clone();
        let memory_type = memory.memory_type.unwrap_or(self.config.default_memory_type);
        let mut seed = MemoryDocument::new(id.clone(), memory.content, memory_type, &replica);
        for tag in &memory.tags {
            seed.add_tag(tag.clone(), &replica);
        }
        if let Err(e) = seed.set_importance(memory.importance, &replica) {
            self.emit("learn", started, false, 0, false);
            return Err(e.into());
        }

        let text = seed.content().to_string();
        let vector = self.embed_cached(&id, &text).await;
        let content = text.clone();
        let tags = memory.tags;
        let importance = memory.importance;

        let upserted = self
            .storage_call(move |s| {
                s.upsert(&seed, |doc| {
                    if doc.content() != content {
                        doc.set_content(content.clone(), &replica);
                    }
                    if doc.memory_type() != memory_type {
                        doc.reclassify(memory_type, &replica);
                    }
                    for tag in &tags {
                        doc.add_tag(tag.clone(), &replica);
                    }
                    doc.set_importance(importance, &replica)
                })
            })
            .await;
        let outcome = match upserted {
            Ok(outcome) => outcome,
            Err(e) => {
                self.emit("learn", started, false, 0, vector.is_none());
                return Err(e);
            }
        };

        let mut degraded = vector.is_none();
        if let Some(vector) = vector {
            degraded = !self.index(&id, &text, vector).await;
        }

        debug!(%id, created = outcome.created, "learned memory");
        self.emit("learn", started, true, 0, degraded);
        Ok(id)
    }

    /// Embed `text`, reusing a cached vector of identical text from the
    /// same model. `None` if the service failed or timed out.
    async fn embed_cached(&self, id: &str, text: &str) -> Option<Vec<f32>> {
        let hash = engram_crdt::content_hash(text);
        let model = self.embedder.model().to_string();
        match self
            .storage_call(move |s| s.get_embedding_by_hash(&hash))
            .await
        {
            Ok(Some(cached)) if cached.model == model => {
                debug!(%id, "embedding cache hit");
                return Some(cached.vector);
            }
            Ok(_) => {}
            Err(e) => warn!(%id, error = %e, "embedding cache lookup failed"),
        }

        match Self::with_deadline(self.config.embed_timeout(), self.embedder.embed(text)).await {
            Ok(vector) => Some(vector),
            Err(failure) => {
                warn!(%id, reason = %failure, "embedding unavailable; storing without vector");
                None
            }
        }
    }

    /// Index `vector` under `id` and cache it for `text`. Returns false if
    /// the index did not take it.
    async fn index(&self, id: &str, text: &str, vector: Vec<f32>) -> bool {
        let entry = CachedEmbedding::new(text, vector.clone(), self.embedder.model());
        if let Err(e) = self.storage_call(move |s| s.put_embedding(&entry)).await {
            warn!(%id, error = %e, "failed to cache embedding");
        }

        match Self::with_deadline(
            self.config.embed_timeout(),
            self.embedder.upsert(id, vector),
        )
        .await
        {
            Ok(()) => true,
            Err(failure) => {
                warn!(
                    %id,
                    reason = %failure,
                    "vector upsert failed; memory stored without index entry"
                );
                false
            }
        }
    }

    /// Up to `limit` stored memories most similar to `query`.
    ///
    /// Embedding-service failures and timeouts produce an empty, degraded
    /// result unless `strict_recall` is configured, in which case they are
    /// errors. Ids the index returns that are no longer stored are
    /// skipped.
    pub async fn recall(&self, query: &str, limit: usize) -> Result<Recall, AgentMemoryError> {
        self.recall_inner(query, limit, self.config.strict_recall).await
    }

    /// Like [`recall`](Self::recall), but embedding-service failures and
    /// timeouts are always errors.
    pub async fn recall_strict(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, AgentMemoryError> {
        Ok(self.recall_inner(query, limit, true).await?.memories)
    }

    #[instrument(skip(self, query), fields(replica = %self.config.replica_id))]
    async fn recall_inner(
        &self,
        query: &str,
        limit: usize,
        strict: bool,
    ) -> Result<Recall, AgentMemoryError> {
        self.ensure_running()?;
        let started = Instant::now();
        if limit == 0 {
            self.emit("recall", started, true, 0, false);
            return Ok(Recall::default());
        }

        let vector = match Self::with_deadline(
            self.config.embed_timeout(),
            self.embedder.embed(query),
        )
        .await
        {
            Ok(v) => v,
            Err(failure) => {
                let degraded = match failure {
                    CallFailure::Failed(e) if strict => {
                        self.emit("recall", started, false, 0, true);
                        return Err(e.into());
                    }
                    CallFailure::TimedOut if strict => {
                        self.emit("recall", started, false, 0, true);
                        return Err(AgentMemoryError::RecallTimeout {
                            operation: "embed",
                            after: self.config.embed_timeout(),
                        });
                    }
                    CallFailure::Failed(e) => Degraded::EmbeddingUnavailable(e.to_string()),
                    CallFailure::TimedOut => Degraded::EmbeddingTimeout,
                };
                return Ok(self.degraded_recall(started, degraded));
            }
        };

        let k = limit.saturating_mul(self.config.recall_oversample);
        let hits = match Self::with_deadline(
            self.config.search_timeout(),
            self.embedder.similarity_search(&vector, k),
        )
        .await
        {
            Ok(hits) => hits,
            Err(failure) => {
                let degraded = match failure {
                    CallFailure::Failed(e) if strict => {
                        self.emit("recall", started, false, 0, true);
                        return Err(e.into());
                    }
                    CallFailure::TimedOut if strict => {
                        self.emit("recall", started, false, 0, true);
                        return Err(AgentMemoryError::RecallTimeout {
                            operation: "similarity_search",
                            after: self.config.search_timeout(),
                        });
                    }
                    CallFailure::Failed(e) => Degraded::SearchUnavailable(e.to_string()),
                    CallFailure::TimedOut => Degraded::SearchTimeout,
                };
                return Ok(self.degraded_recall(started, degraded));
            }
        };

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let docs = match self
            .storage_call(move |s| ids.iter().map(|id| s.get(id)).collect::<Result<Vec<_>, _>>())
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                self.emit("recall", started, false, 0, false);
                return Err(e);
            }
        };

        let mut memories = Vec::with_capacity(limit);
        for ((id, score), doc) in hits.into_iter().zip(docs) {
            match doc {
                Some(document) => memories.push(ScoredMemory { document, score }),
                None => debug!(%id, "search hit no longer stored; skipping"),
            }
            if memories.len() == limit {
                break;
            }
        }

        self.emit("recall", started, true, 0, false);
        Ok(Recall {
            memories,
            degraded: None,
        })
    }

    fn degraded_recall(&self, started: Instant, degraded: Degraded) -> Recall {
        warn!(reason = ?degraded, "recall degraded");
        self.emit("recall", started, true, 0, true);
        Recall {
            memories: Vec::new(),
            degraded: Some(degraded),
        }
    }

    /// Raise or lower this replica's importance for `id` and add tags.
    /// Returns the stored document after the merge.
    #[instrument(skip(self, tags_add), fields(replica = %self.config.replica_id))]
    pub async fn update(
        &self,
        id: &str,
        importance: Option<f64>,
        tags_add: &[&str],
    ) -> Result<MemoryDocument, AgentMemoryError> {
        let tags: Vec<String> = tags_add.iter().map(|t| t.to_string()).collect();
        self.mutate("update", id, move |doc, replica| {
            if let Some(value) = importance {
                doc.set_importance(value, replica)?;
            }
            for tag in &tags {
                doc.add_tag(tag.clone(), replica);
            }
            Ok(())
        })
        .await
    }

    // ── Extras ─────────────────────────────────────────────────────

    /// Remove every add of `tag` this replica has seen on `id`.
    pub async fn forget_tag(
        &self,
        id: &str,
        tag: &str,
    ) -> Result<MemoryDocument, AgentMemoryError> {
        let tag = tag.to_string();
        self.mutate("forget_tag", id, move |doc, replica| {
            doc.remove_tag(&tag, replica);
            Ok(())
        })
        .await
    }

    /// Move `id` to another memory type.
    pub async fn reclassify(
        &self,
        id: &str,
        memory_type: MemoryType,
    ) -> Result<MemoryDocument, AgentMemoryError> {
        self.mutate("reclassify", id, move |doc, replica| {
            doc.reclassify(memory_type, replica);
            Ok(())
        })
        .await
    }

    /// The stored document for `id`, if any.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryDocument>, AgentMemoryError> {
        self.ensure_running()?;
        let id = id.to_string();
        self.storage_call(move |s| s.get(&id)).await
    }

    /// Every stored memory of `memory_type`.
    pub async fn query_by_type(
        &self,
        memory_type: MemoryType,
    ) -> Result<Vec<MemoryDocument>, AgentMemoryError> {
        self.ensure_running()?;
        self.storage_call(move |s| s.query_by_type(memory_type))
            .await
    }

    /// Merge a batch of JSON documents received from another replica.
    #[instrument(skip_all, fields(replica = %self.config.replica_id, records = records.len()))]
    pub async fn ingest_remote(
        &self,
        records: Vec<String>,
    ) -> Result<BatchReport, AgentMemoryError> {
        self.ensure_running()?;
        let started = Instant::now();
        let result = self
            .storage_call(move |s| s.apply_remote_batch(records.iter()))
            .await;
        match &result {
            Ok(report) => self.emit("ingest_remote", started, true, report.conflicts, false),
            Err(_) => self.emit("ingest_remote", started, false, 0, false),
        }
        result
    }

    /// Up to `limit` local changes not yet delivered to other replicas.
    pub async fn pending_sync(&self, limit: usize) -> Result<Vec<OutboxEntry>, AgentMemoryError> {
        self.ensure_running()?;
        self.storage_call(move |s| s.pending_sync(limit)).await
    }

    /// Acknowledge delivery of outbox entries up to `through_sequence`.
    pub async fn mark_synced(&self, through_sequence: u64) -> Result<u64, AgentMemoryError> {
        self.ensure_running()?;
        self.storage_call(move |s| s.mark_synced(through_sequence))
            .await
    }

    /// Delete `id` from this replica only, and drop its vector.
    ///
    /// Not a distributed delete: the next merge of `id` from another
    /// replica restores it.
    pub async fn purge_local(&self, id: &str) -> Result<bool, AgentMemoryError> {
        self.ensure_running()?;
        let started = Instant::now();
        let owned = id.to_string();
        let removed = match self.storage_call(move |s| s.purge_local(&owned)).await {
            Ok(removed) => removed,
            Err(e) => {
                self.emit("purge_local", started, false, 0, false);
                return Err(e);
            }
        };

        let mut degraded = false;
        if removed {
            let deadline = self.config.embed_timeout();
            if let Err(failure) = Self::with_deadline(deadline, self.embedder.remove(id)).await {
                warn!(%id, reason = %failure, "failed to drop vector of purged memory");
                degraded = true;
            }
        }
        self.emit("purge_local", started, true, 0, degraded);
        Ok(removed)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Apply `f` to the stored document under its lock, with this
    /// replica as writer.
    async fn mutate<F>(
        &self,
        op: &'static str,
        id: &str,
        f: F,
    ) -> Result<MemoryDocument, AgentMemoryError>
    where
        F: Fn(&mut MemoryDocument, &str) -> Result<(), engram_crdt::DocumentError>
            + Send
            + Sync
            + 'static,
    {
        self.ensure_running()?;
        let started = Instant::now();
        let id = id.to_string();
        let replica = self.config.replica_id.clone();

        let result = self
            .storage_call(move |s| s.update(&id, |doc| f(doc, &replica)))
            .await;
        self.emit(op, started, result.is_ok(), 0, false);
        result
    }

    /// Run `f` against storage on the blocking pool, retrying transient
    /// failures.
    async fn storage_call<T, F>(&self, f: F) -> Result<T, AgentMemoryError>
    where
        T: Send + 'static,
        F: Fn(&MemoryStorage<S>) -> Result<T, StorageError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        retry_async(
            &self.config.retry,
            || {
                let storage = Arc::clone(&self.storage);
                let f = Arc::clone(&f);
                async move {
                    tokio::task::spawn_blocking(move || (*f)(&storage))
                        .await
                        .map_err(|e| AgentMemoryError::Task(e.to_string()))?
                        .map_err(AgentMemoryError::from)
                }
            },
            AgentMemoryError::is_transient,
        )
        .await
    }
}
