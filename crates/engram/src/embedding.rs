//! Embedding and similarity-search collaborator.
//!
//! [`AgentMemory`](crate::AgentMemory) never computes vectors itself. It
//! talks to an [`EmbeddingService`], which owns both the embedding model
//! and the id-to-vector index. [`LocalEmbeddingIndex`] is an in-process
//! implementation good enough for offline use and tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// Error type for embedding operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    /// The service is not running.
    #[error("embedding service is not running")]
    NotRunning,
    /// The backend failed.
    #[error("embedding backend error: {0}")]
    Backend(String),
    /// A vector of the wrong size was supplied.
    #[error("vector has {actual} dimensions, expected {expected}")]
    Dimensions {
        /// Size the index was built for.
        expected: usize,
        /// Size supplied.
        actual: usize,
    },
}

/// Embedding model plus vector index.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Open connections. Called by [`AgentMemory::start`](crate::AgentMemory::start).
    async fn start(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    /// Release connections. Called by [`AgentMemory::stop`](crate::AgentMemory::stop).
    async fn stop(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    /// Name of the model behind [`embed`](Self::embed). Vectors cached
    /// under another model's name are not reused.
    fn model(&self) -> &str {
        "default"
    }

    /// Compute the embedding of `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Associate `vector` with memory `id`, replacing any previous vector.
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), EmbeddingError>;

    /// The `k` ids closest to `vector`, best first, with their scores.
    async fn similarity_search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>, EmbeddingError>;

    /// Forget the vector for `id`.
    async fn remove(&self, _id: &str) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

/// Cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0]; 0.0 for empty, mismatched or zero
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Default vector size of [`LocalEmbeddingIndex`].
pub const DEFAULT_DIMENSIONS: usize = 256;

/// In-process embedder and brute-force cosine index.
///
/// Text is embedded by feature hashing: each lowercase alphanumeric token
/// is hashed to one signed bucket, and the result is L2-normalized. Texts
/// sharing words score higher; there is no semantic model behind it.
pub struct LocalEmbeddingIndex {
    dims: usize,
    model: String,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl Default for LocalEmbeddingIndex {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl LocalEmbeddingIndex {
    /// Create an empty index producing `dims`-dimensional vectors.
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model: format!("feature-hash-{dims}"),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Vector size.
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Number of indexed vectors.
    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    /// True if nothing is indexed.
    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }

    fn hash_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbeddingIndex {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.hash_text(text))
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), EmbeddingError> {
        if vector.len() != self.dims {
            return Err(EmbeddingError::Dimensions {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.vectors.write().await.insert(id.to_string(), vector);
        Ok(())
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>, EmbeddingError> {
        let vectors = self.vectors.read().await;
        let mut scored: Vec<(String, f32)> = vectors
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        debug!(candidates = vectors.len(), returned = scored.len(), "local search");
        Ok(scored)
    }

    async fn remove(&self, id: &str) -> Result<(), EmbeddingError> {
        self.vectors.write().await.remove(id);
        Ok(())
    }
}
