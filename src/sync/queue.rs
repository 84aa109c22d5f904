use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::{LocalStore, MilkRecord, Note};

use super::entity::Syncable;

/// Local storage namespaces, one per queue.
const RECORDS_KEY: &str = "dairy_pending_records";
const NOTES_KEY: &str = "dairy_pending_notes";
const DELETED_KEY: &str = "dairy_pending_deleted";

/// Durable queue of entities awaiting an idempotent remote upsert.
///
/// One entry per identifier: a later local mutation replaces the queued
/// snapshot in place instead of appending, so the queue always holds the
/// latest local value and nothing else.
pub struct UpsertQueue<T> {
    key: &'static str,
    store: Arc<dyn LocalStore>,
    items: Mutex<Vec<T>>,
}

impl<T: Syncable> UpsertQueue<T> {
    fn load(store: Arc<dyn LocalStore>, key: &'static str) -> Self {
        let items = read_namespace(store.as_ref(), key);
        Self {
            key,
            store,
            items: Mutex::new(items),
        }
    }

    /// Insert or replace by identifier, forcing the pending marker on.
    pub fn upsert(&self, mut entity: T) {
        entity.set_pending(true);
        let mut items = self.items.lock().unwrap();
        match items.iter_mut().find(|e| e.id() == entity.id()) {
            Some(slot) => *slot = entity,
            None => items.push(entity),
        }
        self.persist(&items);
    }

    /// Evict an entry that should never sync. Returns whether one existed.
    pub fn cancel(&self, id: &str) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|e| e.id() != id);
        let removed = items.len() != before;
        if removed {
            self.persist(&items);
        }
        removed
    }

    pub fn list(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.lock().unwrap().iter().any(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Retire entries confirmed by a drain.
    ///
    /// An entry is removed only while it still equals the drained
    /// snapshot; a mutation queued mid-drain compares unequal and
    /// survives for the next attempt. The write-back is subtractive,
    /// never a wholesale replacement.
    pub fn retire(&self, drained: &[T]) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|current| !drained.iter().any(|d| d.id() == current.id() && d == current));
        let changed = items.len() != before;
        if changed {
            self.persist(&items);
        }
        changed
    }

    fn persist(&self, items: &[T]) {
        persist_namespace(self.store.as_ref(), self.key, items);
    }
}

/// A deletion awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeletion {
    pub id: String,
    pub path: String,
}

/// Durable queue of path-addressed remote deletions, shared by all
/// entity kinds.
pub struct DeletionQueue {
    key: &'static str,
    store: Arc<dyn LocalStore>,
    items: Mutex<Vec<PendingDeletion>>,
}

impl DeletionQueue {
    fn load(store: Arc<dyn LocalStore>, key: &'static str) -> Self {
        let items = read_namespace(store.as_ref(), key);
        Self {
            key,
            store,
            items: Mutex::new(items),
        }
    }

    /// Queue a remote deletion. Duplicates of an already-queued pair are
    /// dropped; the delete is idempotent either way.
    pub fn push(&self, id: &str, path: String) {
        let mut items = self.items.lock().unwrap();
        if items.iter().any(|d| d.id == id && d.path == path) {
            return;
        }
        items.push(PendingDeletion {
            id: id.to_string(),
            path,
        });
        self.persist(&items);
    }

    pub fn list(&self) -> Vec<PendingDeletion> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Identifiers queued for deletion under a collection path. The merge
    /// view subtracts these from the remote mirror.
    pub fn ids_under(&self, collection: &str) -> HashSet<String> {
        let prefix = format!("{}/", collection);
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.path.starts_with(&prefix))
            .map(|d| d.id.clone())
            .collect()
    }

    /// Remove deletions confirmed by a drain.
    pub fn retire(&self, done: &[PendingDeletion]) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|current| !done.contains(current));
        let changed = items.len() != before;
        if changed {
            self.persist(&items);
        }
        changed
    }

    fn persist(&self, items: &[PendingDeletion]) {
        persist_namespace(self.store.as_ref(), self.key, items);
    }
}

/// The three durable queues, loaded once per store instance.
pub struct PendingQueues {
    pub records: UpsertQueue<MilkRecord>,
    pub notes: UpsertQueue<Note>,
    pub deletions: DeletionQueue,
}

impl PendingQueues {
    pub fn load(store: Arc<dyn LocalStore>) -> Self {
        Self {
            records: UpsertQueue::load(Arc::clone(&store), RECORDS_KEY),
            notes: UpsertQueue::load(Arc::clone(&store), NOTES_KEY),
            deletions: DeletionQueue::load(store, DELETED_KEY),
        }
    }
}

fn read_namespace<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Vec<T> {
    let Some(raw) = store.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("queue {}: discarding corrupt entries: {}", key, e);
            Vec::new()
        }
    }
}

fn persist_namespace<T: Serialize>(store: &dyn LocalStore, key: &str, items: &[T]) {
    match serde_json::to_string(items) {
        Ok(raw) => {
            if let Err(e) = store.set(key, &raw) {
                // Non-fatal: the mutation stays visible in memory for
                // this session, it just will not survive a restart.
                log::warn!("queue {}: persistence failed: {}", key, e);
            }
        }
        Err(e) => log::warn!("queue {}: serialization failed: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, RecordInput};

    fn record(date: &str) -> MilkRecord {
        MilkRecord::new(RecordInput {
            date: date.parse().unwrap(),
            quantity: 10.0,
            total_price: 500.0,
            shift: None,
            status: None,
        })
    }

    fn queues() -> (Arc<MemoryStore>, PendingQueues) {
        let store = Arc::new(MemoryStore::new());
        let queues = PendingQueues::load(Arc::clone(&store) as Arc<dyn LocalStore>);
        (store, queues)
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let (_, queues) = queues();
        let mut a = record("2024-01-05");
        queues.records.upsert(a.clone());

        a.total_price = 600.0;
        queues.records.upsert(a.clone());

        let items = queues.records.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].total_price, 600.0);
        assert!(items[0].pending);
    }

    #[test]
    fn test_retire_is_subtractive() {
        let (_, queues) = queues();
        let a = record("2024-01-05");
        let b = record("2024-01-06");
        queues.records.upsert(a.clone());
        queues.records.upsert(b.clone());

        // Drain confirmed only A; B queued before the drain finished.
        let mut drained = a.clone();
        drained.pending = true;
        queues.records.retire(&[drained]);

        let items = queues.records.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, b.id);
    }

    #[test]
    fn test_retire_keeps_superseded_entry() {
        let (_, queues) = queues();
        let a = record("2024-01-05");
        queues.records.upsert(a.clone());

        let drained = queues.records.list();

        // A newer mutation lands while the drain is in flight.
        let mut newer = a.clone();
        newer.total_price = 999.0;
        queues.records.upsert(newer);

        queues.records.retire(&drained);
        let items = queues.records.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].total_price, 999.0);
    }

    #[test]
    fn test_queues_survive_reload() {
        let (store, queues) = queues();
        let a = record("2024-01-05");
        queues.records.upsert(a.clone());
        queues.deletions.push("x", "milkData/u1/milkRecords/x".to_string());
        drop(queues);

        let reloaded = PendingQueues::load(store as Arc<dyn LocalStore>);
        assert_eq!(reloaded.records.list().len(), 1);
        assert_eq!(reloaded.records.list()[0].id, a.id);
        assert_eq!(reloaded.deletions.len(), 1);
    }

    #[test]
    fn test_deletion_queue_dedupes() {
        let (_, queues) = queues();
        queues.deletions.push("x", "r/milkRecords/x".to_string());
        queues.deletions.push("x", "r/milkRecords/x".to_string());
        assert_eq!(queues.deletions.len(), 1);
    }

    #[test]
    fn test_ids_under_collection() {
        let (_, queues) = queues();
        queues.deletions.push("a", "r/milkRecords/a".to_string());
        queues.deletions.push("b", "r/notes/b".to_string());

        let deleted = queues.deletions.ids_under("r/milkRecords");
        assert!(deleted.contains("a"));
        assert!(!deleted.contains("b"));
    }

    #[test]
    fn test_corrupt_namespace_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(RECORDS_KEY, "not json").unwrap();
        let queues = PendingQueues::load(store as Arc<dyn LocalStore>);
        assert!(queues.records.is_empty());
    }
}
