/// A stored event from an append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Monotonically increasing sequence number within the log.
    pub sequence: u64,
    /// The log this event belongs to.
    pub log: String,
    /// The entity the event describes.
    pub entity_id: String,
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Microseconds since the Unix epoch when the event was appended.
    pub timestamp: u64,
    /// Instance that produced the event.
    pub node_id: String,
}

/// Errors produced by a storage backend.
pub trait BackendError: std::error::Error + Send + Sync + 'static {
    /// True if retrying the same operation may succeed (busy database,
    /// lock contention).
    fn is_transient(&self) -> bool {
        false
    }
}

/// Core trait for state persistence.
///
/// Every backend implements this trait. It provides simple key-value
/// operations scoped by a namespace (analogous to a table).
///
/// Data is stored as opaque bytes; the store does not interpret the
/// documents. Backends synchronize internally, so every method takes
/// `&self` and a store can be shared across threads.
pub trait StateStore: Send + Sync {
    /// Error type for this backend.
    type Error: BackendError;

    /// Store a value under `(namespace, key)`.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Retrieve a value by `(namespace, key)`.
    /// Returns `None` if the key does not exist.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Delete a value by `(namespace, key)`. Deleting a missing key is not
    /// an error.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), Self::Error>;

    /// List all keys in a namespace, sorted.
    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error>;

    /// Check if a key exists in a namespace.
    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Self::Error> {
        Ok(self.get(namespace, key)?.is_some())
    }

    /// Make every completed write durable. Backends that commit
    /// synchronously have nothing to do.
    fn flush(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Extension trait for backends that support append-only event logs.
///
/// Sequence numbers are global to a log and never reused, even after
/// truncation.
pub trait EventStore: StateStore {
    /// Append an event to `log`. Returns the assigned sequence number.
    fn append_event(
        &self,
        log: &str,
        entity_id: &str,
        data: &[u8],
        timestamp: u64,
        node_id: &str,
    ) -> Result<u64, Self::Error>;

    /// Read up to `limit` events with a sequence greater than
    /// `since_sequence`, in sequence order.
    fn events_since(
        &self,
        log: &str,
        since_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, Self::Error>;

    /// Count events currently held in `log`.
    fn event_count(&self, log: &str) -> Result<u64, Self::Error>;

    /// Delete every event with a sequence `<= through_sequence`.
    /// Returns the number of events removed.
    fn truncate_events_through(&self, log: &str, through_sequence: u64)
        -> Result<u64, Self::Error>;
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, Copy)]
pub enum WriteOp<'a> {
    /// Insert or overwrite a value.
    Put {
        /// Target namespace.
        namespace: &'a str,
        /// Target key.
        key: &'a str,
        /// New value.
        value: &'a [u8],
    },
    /// Remove a value if present.
    Delete {
        /// Target namespace.
        namespace: &'a str,
        /// Target key.
        key: &'a str,
    },
    /// Append an event to a log.
    Append {
        /// Target log.
        log: &'a str,
        /// Entity the event describes.
        entity_id: &'a str,
        /// Event payload.
        data: &'a [u8],
        /// Event time, microseconds.
        timestamp: u64,
        /// Producing instance.
        node_id: &'a str,
    },
}

/// Extension trait for atomic multi-key writes.
pub trait BatchOps: EventStore {
    /// Apply every operation or none of them.
    fn apply_batch(&self, ops: &[WriteOp<'_>]) -> Result<(), Self::Error>;
}

/// Everything [`MemoryStorage`](crate::MemoryStorage) needs from a backend.
pub trait Backend: BatchOps {}

impl<T: BatchOps> Backend for T {}

pub(crate) fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
