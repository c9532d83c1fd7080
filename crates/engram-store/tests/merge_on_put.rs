use std::sync::Arc;
use std::thread;

use engram_crdt::{MemoryDocument, MemoryType};
use engram_store::{codec, Backend, MemoryStorage, MemoryStore};

fn doc(id: &str, source: &str, created_at: u64) -> MemoryDocument {
    MemoryDocument::with_timestamp(id, "shared fact", MemoryType::Semantic, source, created_at)
}

/// Two instances write the same memory id with different tags; the store
/// keeps both.
fn scenario_two_instances<S: Backend>(storage: &MemoryStorage<S>) {
    let mut doc1 = doc("shared-memory", "agent-1", 10);
    doc1.add_tag("tag1", "agent-1");
    let mut doc2 = doc("shared-memory", "agent-2", 20);
    doc2.add_tag("tag2", "agent-2");

    storage.put(&doc1).unwrap();
    let outcome = storage.put(&doc2).unwrap();
    assert!(outcome.changed);
    assert!(outcome.concurrent);

    let stored = storage.get("shared-memory").unwrap().unwrap();
    assert_eq!(stored.get_tags(), vec!["tag1".to_string(), "tag2".to_string()]);
    assert_eq!(stored.source_instance(), "agent-1");
    assert_eq!(stored.created_at(), 10);
}

#[test]
fn two_instances_memory_backend() {
    scenario_two_instances(&MemoryStorage::new(MemoryStore::new(), "local"));
}

#[cfg(feature = "sqlite")]
#[test]
fn two_instances_sqlite_backend() {
    let store = engram_store::SqliteStore::open_in_memory().unwrap();
    scenario_two_instances(&MemoryStorage::new(store, "local"));
}

#[cfg(feature = "redb")]
#[test]
fn two_instances_redb_backend() {
    let store = engram_store::RedbStore::open_in_memory().unwrap();
    scenario_two_instances(&MemoryStorage::new(store, "local"));
}

#[test]
fn put_order_does_not_matter() {
    let mut a = doc("m", "a", 1);
    a.add_tag("alpha", "a");
    a.set_importance(0.3, "a").unwrap();
    let mut b = doc("m", "b", 2);
    b.add_tag("beta", "b");
    b.set_importance(0.8, "b").unwrap();
    let mut c = doc("m", "c", 3);
    c.set_content("rewritten", "c");
    c.record_access("c");

    let orders: [[&MemoryDocument; 3]; 3] = [[&a, &b, &c], [&c, &a, &b], [&b, &c, &a]];
    let mut results = Vec::new();
    for order in orders {
        let storage = MemoryStorage::new(MemoryStore::new(), "local");
        for d in order {
            storage.put(d).unwrap();
        }
        results.push(storage.get("m").unwrap().unwrap());
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert_eq!(results[0].importance(), 0.8);
    assert_eq!(results[0].access_count(), 1);
}

#[test]
fn put_order_yields_identical_records() {
    let mut doc1 = doc("m", "a1", 1);
    doc1.add_tag("tag1", "a1");
    let mut doc2 = doc("m", "a2", 1);
    doc2.add_tag("tag2", "a2");

    let forward = MemoryStorage::new(MemoryStore::new(), "left");
    forward.put(&doc1).unwrap();
    forward.put(&doc2).unwrap();
    let backward = MemoryStorage::new(MemoryStore::new(), "right");
    backward.put(&doc2).unwrap();
    backward.put(&doc1).unwrap();

    let j1 = codec::to_json(&forward.get("m").unwrap().unwrap()).unwrap();
    let j2 = codec::to_json(&backward.get("m").unwrap().unwrap()).unwrap();
    assert_eq!(j1, j2);
    assert_eq!(forward.export_collection().unwrap(), backward.export_collection().unwrap());
}

#[test]
fn rebuilt_document_keeps_its_new_tag() {
    let storage = MemoryStorage::new(MemoryStore::new(), "local");
    let mut first = doc("m", "local", 1);
    first.add_tag("old", "local");
    storage.put(&first).unwrap();
    storage
        .update("m", |d| {
            d.remove_tag("old", "local");
            Ok(())
        })
        .unwrap();

    let mut rebuilt = doc("m", "local", 1);
    rebuilt.add_tag("new", "local");
    storage.put(&rebuilt).unwrap();

    let stored = storage.get("m").unwrap().unwrap();
    assert_eq!(stored.get_tags(), vec!["new".to_string()]);
}

#[test]
fn concurrent_puts_lose_nothing() {
    let storage = Arc::new(MemoryStorage::new(MemoryStore::new(), "local"));
    storage.put(&doc("hot", "origin", 1)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                let writer = format!("agent-{i}");
                let mut d = doc("hot", "origin", 1);
                d.add_tag(format!("tag-{i}"), &writer);
                d.record_access(&writer);
                storage.put(&d).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stored = storage.get("hot").unwrap().unwrap();
    assert_eq!(stored.get_tags().len(), 8);
    assert_eq!(stored.access_count(), 8);
}

#[test]
fn concurrent_updates_lose_nothing() {
    let storage = Arc::new(MemoryStorage::new(MemoryStore::new(), "local"));
    storage.put(&doc("hot", "origin", 1)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                storage
                    .update("hot", |d| {
                        d.add_tag(format!("tag-{i}"), "local");
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(storage.get("hot").unwrap().unwrap().get_tags().len(), 8);
}

#[test]
fn outbox_feeds_another_replica() {
    let left = MemoryStorage::new(MemoryStore::new(), "left");
    let right = MemoryStorage::new(MemoryStore::new(), "right");

    let mut d = doc("m1", "left", 1);
    d.add_tag("from-left", "left");
    left.put(&d).unwrap();
    left.update("m1", |d| d.set_importance(0.7, "left")).unwrap();

    let pending = left.pending_sync(100).unwrap();
    assert_eq!(pending.len(), 2);
    let records: Vec<String> = pending
        .iter()
        .map(|e| codec::to_json(&e.document).unwrap())
        .collect();

    let report = right.apply_remote_batch(&records).unwrap();
    assert_eq!(report.rejected, 0);
    assert_eq!(report.applied, 2);

    let last = pending.last().map(|e| e.sequence).unwrap();
    left.mark_synced(last).unwrap();
    assert!(left.pending_sync(100).unwrap().is_empty());

    assert_eq!(right.get("m1").unwrap(), left.get("m1").unwrap());
}

#[test]
fn purged_document_returns_on_sync() {
    let storage = MemoryStorage::new(MemoryStore::new(), "local");
    let d = doc("m1", "peer", 1);
    storage.put(&d).unwrap();
    assert!(storage.purge_local("m1").unwrap());
    assert_eq!(storage.count().unwrap(), 0);

    let report = storage
        .apply_remote_batch([codec::to_json(&d).unwrap()])
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(storage.count().unwrap(), 1);
}

#[test]
fn offline_backend_fails_without_partial_state() {
    let storage = MemoryStorage::new(MemoryStore::new(), "local");
    storage.store().set_offline(true);
    let err = storage.put(&doc("m1", "a", 1)).unwrap_err();
    assert!(!err.is_transient());

    storage.store().set_offline(false);
    assert!(storage.get("m1").unwrap().is_none());
    assert_eq!(storage.outbox_len().unwrap(), 0);
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.db");

    {
        let storage = MemoryStorage::new(engram_store::SqliteStore::open(&path).unwrap(), "local");
        let mut d = doc("m1", "local", 1);
        d.add_tag("durable", "local");
        storage.put(&d).unwrap();
        storage.flush().unwrap();
    }

    let storage = MemoryStorage::new(engram_store::SqliteStore::open(&path).unwrap(), "local");
    let stored = storage.get("m1").unwrap().unwrap();
    assert_eq!(stored.get_tags(), vec!["durable".to_string()]);
    assert_eq!(storage.query_by_type(MemoryType::Semantic).unwrap().len(), 1);
    assert_eq!(storage.pending_sync(10).unwrap().len(), 1);
}
