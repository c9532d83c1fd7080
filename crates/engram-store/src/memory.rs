use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::traits::{BackendError, BatchOps, EventStore, StateStore, StoredEvent, WriteOp};

/// In-memory storage backend.
///
/// All data is stored in `BTreeMap`s behind one mutex; nothing touches
/// disk. Ideal for testing and prototyping.
///
/// The store can also simulate outages: [`fail_next_writes`] makes the
/// next writes fail with a transient error, and [`set_offline`] fails
/// every operation until cleared.
///
/// [`fail_next_writes`]: MemoryStore::fail_next_writes
/// [`set_offline`]: MemoryStore::set_offline
///
/// # Example
///
/// ```
/// use engram_store::{MemoryStore, StateStore};
///
/// let store = MemoryStore::new();
/// store.put("memories", "m1", b"payload").unwrap();
///
/// let data = store.get("memories", "m1").unwrap().unwrap();
/// assert_eq!(data, b"payload");
/// ```
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// State store: (namespace, key) -> value
    state: BTreeMap<(String, String), Vec<u8>>,
    /// Event logs: log -> events in sequence order
    events: BTreeMap<String, Vec<StoredEvent>>,
    /// Last sequence handed out per log
    sequences: BTreeMap<String, u64>,
    fail_writes: u32,
    offline: bool,
}

/// Error type for the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// A simulated transient failure.
    #[error("memory store busy")]
    Busy,
    /// A simulated outage.
    #[error("memory store offline")]
    Offline,
    /// Lock poisoned.
    #[error("memory store lock poisoned")]
    LockPoisoned,
}

impl BackendError for MemoryError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail with [`MemoryError::Busy`].
    pub fn fail_next_writes(&self, n: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = n;
        }
    }

    /// Fail every operation with [`MemoryError::Offline`] while `offline`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline = offline;
        }
    }

    /// Returns the total number of state entries across all namespaces.
    pub fn state_count(&self) -> usize {
        self.inner.lock().map(|i| i.state.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<MutexGuard<'_, Inner>, MemoryError> {
        let inner = self.inner.lock().map_err(|_| MemoryError::LockPoisoned)?;
        if inner.offline {
            return Err(MemoryError::Offline);
        }
        Ok(inner)
    }

    fn write(&self) -> Result<MutexGuard<'_, Inner>, MemoryError> {
        let mut inner = self.read()?;
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(MemoryError::Busy);
        }
        Ok(inner)
    }

    fn ns_key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_string(), key.to_string())
    }
}

impl Inner {
    fn append(
        &mut self,
        log: &str,
        entity_id: &str,
        data: &[u8],
        timestamp: u64,
        node_id: &str,
    ) -> u64 {
        let seq = self.sequences.entry(log.to_string()).or_insert(0);
        *seq += 1;
        let sequence = *seq;

        self.events
            .entry(log.to_string())
            .or_default()
            .push(StoredEvent {
                sequence,
                log: log.to_string(),
                entity_id: entity_id.to_string(),
                data: data.to_vec(),
                timestamp,
                node_id: node_id.to_string(),
            });
        sequence
    }
}

impl StateStore for MemoryStore {
    type Error = MemoryError;

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        self.write()?
            .state
            .insert(Self::ns_key(namespace, key), value.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.read()?.state.get(&Self::ns_key(namespace, key)).cloned())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), Self::Error> {
        self.write()?.state.remove(&Self::ns_key(namespace, key));
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error> {
        let keys = self
            .read()?
            .state
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect();
        Ok(keys)
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Self::Error> {
        Ok(self
            .read()?
            .state
            .contains_key(&Self::ns_key(namespace, key)))
    }
}

impl EventStore for MemoryStore {
    fn append_event(
        &self,
        log: &str,
        entity_id: &str,
        data: &[u8],
        timestamp: u64,
        node_id: &str,
    ) -> Result<u64, Self::Error> {
        Ok(self.write()?.append(log, entity_id, data, timestamp, node_id))
    }

    fn events_since(
        &self,
        log: &str,
        since_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, Self::Error> {
        let events = self
            .read()?
            .events
            .get(log)
            .map(|evts| {
                evts.iter()
                    .filter(|e| e.sequence > since_sequence)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

    fn event_count(&self, log: &str) -> Result<u64, Self::Error> {
        Ok(self
            .read()?
            .events
            .get(log)
            .map_or(0, |evts| evts.len() as u64))
    }

    fn truncate_events_through(
        &self,
        log: &str,
        through_sequence: u64,
    ) -> Result<u64, Self::Error> {
        let mut inner = self.write()?;
        let Some(events) = inner.events.get_mut(log) else {
            return Ok(0);
        };
        let before_len = events.len();
        events.retain(|e| e.sequence > through_sequence);
        Ok((before_len - events.len()) as u64)
    }
}

impl BatchOps for MemoryStore {
    fn apply_batch(&self, ops: &[WriteOp<'_>]) -> Result<(), Self::Error> {
        // The single lock makes the batch atomic.
        let mut inner = self.write()?;
        for op in ops {
            match *op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    inner.state.insert(Self::ns_key(namespace, key), value.to_vec());
                }
                WriteOp::Delete { namespace, key } => {
                    inner.state.remove(&Self::ns_key(namespace, key));
                }
                WriteOp::Append {
                    log,
                    entity_id,
                    data,
                    timestamp,
                    node_id,
                } => {
                    inner.append(log, entity_id, data, timestamp, node_id);
                }
            }
        }
        Ok(())
    }
}
