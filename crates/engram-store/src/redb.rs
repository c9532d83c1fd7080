//! Pure-Rust key-value backend using [`redb`](https://docs.rs/redb).
//!
//! No C dependencies, for targets where cross-compiling SQLite is a pain or
//! a fully Rust-native stack is wanted.
//!
//! Enable with `features = ["redb"]`.
//!
//! ```no_run
//! use engram_store::{RedbStore, StateStore};
//!
//! let store = RedbStore::open("/tmp/engram.redb").unwrap();
//! store.put("memories", "m1", b"payload").unwrap();
//! ```

use std::path::Path;

use redb::{Database, ReadableTable, Table, TableDefinition};

use crate::traits::{BackendError, BatchOps, EventStore, StateStore, StoredEvent, WriteOp};

// ── Table definitions ───────────────────────────────────────────────

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("engram_state");
const EVENT_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("engram_events");
const META_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("engram_meta");

type BytesTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

// ── Error type ──────────────────────────────────────────────────────

/// Errors returned by [`RedbStore`] operations.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RedbError(String);

impl BackendError for RedbError {}

fn err(e: impl std::fmt::Display) -> RedbError {
    RedbError(e.to_string())
}

// ── Store ───────────────────────────────────────────────────────────

/// A pure-Rust persistence backend built on [`redb`].
///
/// Uses three internal tables: state, events, and metadata (per-log
/// sequence counters). Every operation runs in its own redb transaction;
/// [`BatchOps::apply_batch`] runs the whole batch in one.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RedbError> {
        let db = Database::create(path).map_err(err)?;
        Self::init(db)
    }

    /// Create an in-memory redb database (for testing).
    pub fn open_in_memory() -> Result<Self, RedbError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, RedbError> {
        // Ensure tables exist by opening a write txn.
        let txn = db.begin_write().map_err(err)?;
        txn.open_table(STATE_TABLE).map_err(err)?;
        txn.open_table(EVENT_TABLE).map_err(err)?;
        txn.open_table(META_TABLE).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(Self { db })
    }
}

// ── StateStore ──────────────────────────────────────────────────────

impl StateStore for RedbStore {
    type Error = RedbError;

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut table = txn.open_table(STATE_TABLE).map_err(err)?;
            table
                .insert(state_key(namespace, key).as_slice(), value)
                .map_err(err)?;
        }
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(STATE_TABLE).map_err(err)?;
        let value = table
            .get(state_key(namespace, key).as_slice())
            .map_err(err)?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut table = txn.open_table(STATE_TABLE).map_err(err)?;
            table
                .remove(state_key(namespace, key).as_slice())
                .map_err(err)?;
        }
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(STATE_TABLE).map_err(err)?;

        let prefix = prefix_lower(namespace);
        let upper = prefix_upper(namespace);
        let range = table
            .range(prefix.as_slice()..upper.as_slice())
            .map_err(err)?;

        let mut keys = Vec::new();
        for item in range {
            let (key_guard, _) = item.map_err(err)?;
            if let Some((_, k)) = parse_state_key(key_guard.value()) {
                keys.push(k.to_string());
            }
        }
        Ok(keys)
    }
}

// ── EventStore ──────────────────────────────────────────────────────

impl EventStore for RedbStore {
    fn append_event(
        &self,
        log: &str,
        entity_id: &str,
        data: &[u8],
        timestamp: u64,
        node_id: &str,
    ) -> Result<u64, RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        let seq = {
            let mut meta = txn.open_table(META_TABLE).map_err(err)?;
            let mut events = txn.open_table(EVENT_TABLE).map_err(err)?;
            append_in(&mut meta, &mut events, log, entity_id, data, timestamp, node_id)?
        };
        txn.commit().map_err(err)?;
        Ok(seq)
    }

    fn events_since(
        &self,
        log: &str,
        since_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(EVENT_TABLE).map_err(err)?;

        let start = event_key(log, since_sequence.saturating_add(1));
        let end = event_key(log, u64::MAX);
        let range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(err)?;

        let mut events = Vec::new();
        for item in range.take(limit) {
            let (key_guard, val_guard) = item.map_err(err)?;
            let Some(sequence) = parse_event_key(key_guard.value()) else {
                continue;
            };
            let Some((timestamp, node_id, entity_id, data)) = decode_event_value(val_guard.value())
            else {
                return Err(RedbError(format!("corrupt event {log}#{sequence}")));
            };
            events.push(StoredEvent {
                sequence,
                log: log.to_string(),
                entity_id,
                data,
                timestamp,
                node_id,
            });
        }
        Ok(events)
    }

    fn event_count(&self, log: &str) -> Result<u64, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(EVENT_TABLE).map_err(err)?;

        let start = event_key(log, 0);
        let end = event_key(log, u64::MAX);
        let range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(err)?;

        let mut count = 0u64;
        for item in range {
            item.map_err(err)?;
            count += 1;
        }
        Ok(count)
    }

    fn truncate_events_through(&self, log: &str, through_sequence: u64) -> Result<u64, RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        let removed = {
            let mut table = txn.open_table(EVENT_TABLE).map_err(err)?;

            // Collect keys to remove (can't mutate while iterating).
            let start = event_key(log, 0);
            let end = event_key(log, through_sequence);
            let mut doomed: Vec<Vec<u8>> = Vec::new();
            for item in table
                .range(start.as_slice()..=end.as_slice())
                .map_err(err)?
            {
                let (key_guard, _) = item.map_err(err)?;
                doomed.push(key_guard.value().to_vec());
            }

            for key in &doomed {
                table.remove(key.as_slice()).map_err(err)?;
            }
            doomed.len() as u64
        };
        txn.commit().map_err(err)?;
        Ok(removed)
    }
}

// ── BatchOps ────────────────────────────────────────────────────────

impl BatchOps for RedbStore {
    fn apply_batch(&self, ops: &[WriteOp<'_>]) -> Result<(), RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut state = txn.open_table(STATE_TABLE).map_err(err)?;
            let mut meta = txn.open_table(META_TABLE).map_err(err)?;
            let mut events = txn.open_table(EVENT_TABLE).map_err(err)?;
            for op in ops {
                match *op {
                    WriteOp::Put {
                        namespace,
                        key,
                        value,
                    } => {
                        state
                            .insert(state_key(namespace, key).as_slice(), value)
                            .map_err(err)?;
                    }
                    WriteOp::Delete { namespace, key } => {
                        state
                            .remove(state_key(namespace, key).as_slice())
                            .map_err(err)?;
                    }
                    WriteOp::Append {
                        log,
                        entity_id,
                        data,
                        timestamp,
                        node_id,
                    } => {
                        append_in(&mut meta, &mut events, log, entity_id, data, timestamp, node_id)?;
                    }
                }
            }
        }
        // An error above drops `txn` uncommitted, which aborts it.
        txn.commit().map_err(err)?;
        Ok(())
    }
}

fn append_in(
    meta: &mut BytesTable<'_>,
    events: &mut BytesTable<'_>,
    log: &str,
    entity_id: &str,
    data: &[u8],
    timestamp: u64,
    node_id: &str,
) -> Result<u64, RedbError> {
    let meta_key = seq_meta_key(log);
    let current = match meta.get(meta_key.as_slice()).map_err(err)? {
        Some(guard) => u64::from_be_bytes(
            guard
                .value()
                .try_into()
                .map_err(|_| RedbError("invalid seq".into()))?,
        ),
        None => 0,
    };
    let seq = current + 1;

    let ek = event_key(log, seq);
    let ev = encode_event_value(timestamp, node_id, entity_id, data);
    events.insert(ek.as_slice(), ev.as_slice()).map_err(err)?;
    meta.insert(meta_key.as_slice(), seq.to_be_bytes().as_slice())
        .map_err(err)?;
    Ok(seq)
}

// ── Key encoding helpers ────────────────────────────────────────────

/// State key: `namespace \0 key`
fn state_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(namespace.len() + 1 + key.len());
    k.extend_from_slice(namespace.as_bytes());
    k.push(0);
    k.extend_from_slice(key.as_bytes());
    k
}

/// Lower bound for all keys under a namespace or log.
fn prefix_lower(name: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 1);
    k.extend_from_slice(name.as_bytes());
    k.push(0);
    k
}

/// Upper bound (exclusive) for all keys under a namespace or log.
fn prefix_upper(name: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(name.len() + 1);
    k.extend_from_slice(name.as_bytes());
    k.push(1); // \x01 > \x00, captures everything in range
    k
}

/// Parse a state key back into `(namespace, key)`.
fn parse_state_key(key: &[u8]) -> Option<(&str, &str)> {
    let pos = key.iter().position(|&b| b == 0)?;
    let ns = std::str::from_utf8(&key[..pos]).ok()?;
    let k = std::str::from_utf8(&key[pos + 1..]).ok()?;
    Some((ns, k))
}

/// Event key: `log \0 sequence_be(8)`
fn event_key(log: &str, sequence: u64) -> Vec<u8> {
    let mut k = prefix_lower(log);
    k.extend_from_slice(&sequence.to_be_bytes());
    k
}

/// Sequence number from an event key.
fn parse_event_key(key: &[u8]) -> Option<u64> {
    let tail = key.len().checked_sub(8)?;
    Some(u64::from_be_bytes(key[tail..].try_into().ok()?))
}

/// Meta key for a log's sequence counter.
fn seq_meta_key(log: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(4 + log.len());
    k.extend_from_slice(b"seq:");
    k.extend_from_slice(log.as_bytes());
    k
}

// ── Value encoding helpers ──────────────────────────────────────────

/// Encode an event value:
/// `timestamp(8) + node_len(2) + node_id + entity_len(2) + entity_id + data`
fn encode_event_value(timestamp: u64, node_id: &str, entity_id: &str, data: &[u8]) -> Vec<u8> {
    let nid = node_id.as_bytes();
    let eid = entity_id.as_bytes();
    let mut v = Vec::with_capacity(12 + nid.len() + eid.len() + data.len());
    v.extend_from_slice(&timestamp.to_be_bytes());
    v.extend_from_slice(&(nid.len() as u16).to_be_bytes());
    v.extend_from_slice(nid);
    v.extend_from_slice(&(eid.len() as u16).to_be_bytes());
    v.extend_from_slice(eid);
    v.extend_from_slice(data);
    v
}

/// Decode an event value into `(timestamp, node_id, entity_id, data)`.
fn decode_event_value(value: &[u8]) -> Option<(u64, String, String, Vec<u8>)> {
    let timestamp = u64::from_be_bytes(value.get(..8)?.try_into().ok()?);
    let (node_id, rest) = read_str(&value[8..])?;
    let (entity_id, data) = read_str(rest)?;
    Some((timestamp, node_id, entity_id, data.to_vec()))
}

/// Read a `len(2) + utf8` string, returning it and the remaining bytes.
fn read_str(bytes: &[u8]) -> Option<(String, &[u8])> {
    let len = u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?) as usize;
    let s = std::str::from_utf8(bytes.get(2..2 + len)?).ok()?;
    Some((s.to_string(), &bytes[2 + len..]))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store() -> RedbStore {
        RedbStore::open_in_memory().unwrap()
    }

    #[test]
    fn state_put_get_delete() {
        let store = new_store();
        store.put("ns", "k1", b"hello").unwrap();
        assert_eq!(store.get("ns", "k1").unwrap(), Some(b"hello".to_vec()));

        store.delete("ns", "k1").unwrap();
        assert_eq!(store.get("ns", "k1").unwrap(), None);
    }

    #[test]
    fn state_list_keys() {
        let store = new_store();
        store.put("ns", "b", b"2").unwrap();
        store.put("ns", "a", b"1").unwrap();
        store.put("ns", "c", b"3").unwrap();
        store.put("other", "x", b"4").unwrap();

        let keys = store.list_keys("ns").unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]); // sorted by redb
    }

    #[test]
    fn events_round_trip_through_encoding() {
        let store = new_store();
        let s1 = store.append_event("log", "e1", b"op1", 100, "node-a").unwrap();
        let s2 = store.append_event("log", "e2", b"", 101, "node-b").unwrap();
        assert_eq!((s1, s2), (1, 2));

        let events = store.events_since("log", 0, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_id, "e1");
        assert_eq!(events[0].data, b"op1");
        assert_eq!(events[1].node_id, "node-b");
        assert!(events[1].data.is_empty());
    }

    #[test]
    fn logs_do_not_bleed_into_each_other() {
        let store = new_store();
        store.append_event("out", "e", b"1", 1, "n").unwrap();
        store.append_event("outbox", "e", b"2", 2, "n").unwrap();

        assert_eq!(store.event_count("out").unwrap(), 1);
        assert_eq!(store.event_count("outbox").unwrap(), 1);
    }

    #[test]
    fn truncate_then_append_continues_sequence() {
        let store = new_store();
        for i in 0..3 {
            store.append_event("log", "e", b"op", i, "n").unwrap();
        }
        assert_eq!(store.truncate_events_through("log", 2).unwrap(), 2);
        assert_eq!(store.append_event("log", "e", b"op", 9, "n").unwrap(), 4);

        let seqs: Vec<u64> = store
            .events_since("log", 0, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn batch_writes_state_and_log_together() {
        let store = new_store();
        store
            .apply_batch(&[
                WriteOp::Put {
                    namespace: "ns",
                    key: "a",
                    value: b"1",
                },
                WriteOp::Append {
                    log: "log",
                    entity_id: "a",
                    data: b"1",
                    timestamp: 1,
                    node_id: "n",
                },
                WriteOp::Delete {
                    namespace: "ns",
                    key: "missing",
                },
            ])
            .unwrap();

        assert!(store.exists("ns", "a").unwrap());
        assert_eq!(store.event_count("log").unwrap(), 1);
    }

    #[test]
    fn file_based_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.put("ns", "key", b"persisted").unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("ns", "key").unwrap(), Some(b"persisted".to_vec()));
    }
}
