use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::storage::{MilkRecord, Note};

use super::cache::MirrorCache;
use super::entity::Syncable;
use super::paths::PathBuilder;
use super::queue::{PendingDeletion, PendingQueues, UpsertQueue};
use super::remote::RemoteStore;
use super::view::{self, StoreListeners};

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    pub records_pushed: usize,
    pub notes_pushed: usize,
    pub deletions_applied: usize,
    pub failed: usize,
}

/// Flushes the pending queues against the remote store.
///
/// The only component that writes to the remote. Every remote failure is
/// converted into "stay queued"; nothing surfaces to consumers except
/// through the merged views and the pending markers they carry.
pub struct SyncEngine {
    queues: Arc<PendingQueues>,
    records_cache: Arc<MirrorCache<MilkRecord>>,
    notes_cache: Arc<MirrorCache<Note>>,
    listeners: Arc<StoreListeners>,
    remote: Arc<dyn RemoteStore>,
    paths: PathBuilder,
    online: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        queues: Arc<PendingQueues>,
        records_cache: Arc<MirrorCache<MilkRecord>>,
        notes_cache: Arc<MirrorCache<Note>>,
        listeners: Arc<StoreListeners>,
        remote: Arc<dyn RemoteStore>,
        paths: PathBuilder,
    ) -> Self {
        Self {
            queues,
            records_cache,
            notes_cache,
            listeners,
            remote,
            paths,
            online: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn online_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.online)
    }

    /// One attempt to flush everything queued: record upserts, then note
    /// upserts, then deletions.
    ///
    /// Queues are snapshotted up front and written back subtractively, so
    /// a mutation that lands mid-drain is never lost. Overlapping drains
    /// are harmless rather than prevented: every write is a full
    /// overwrite keyed by the entity's identifier.
    pub async fn drain(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();
        if !self.is_online() {
            return summary;
        }

        let (pushed, failed) = self
            .drain_upserts(&self.queues.records, |id| self.paths.record(id))
            .await;
        summary.records_pushed = pushed;
        summary.failed += failed;

        let (pushed, failed) = self
            .drain_upserts(&self.queues.notes, |id| self.paths.note(id))
            .await;
        summary.notes_pushed = pushed;
        summary.failed += failed;

        let (applied, failed) = self.drain_deletions().await;
        summary.deletions_applied = applied;
        summary.failed += failed;

        if summary.records_pushed > 0 || summary.notes_pushed > 0 || summary.deletions_applied > 0
        {
            // Republish so confirmed entries lose their pending badge.
            view::publish_records(&self.queues, &self.records_cache, &self.listeners, &self.paths);
            view::publish_notes(&self.queues, &self.notes_cache, &self.listeners, &self.paths);
            log::info!(
                "sync: drained {} record(s), {} note(s), {} deletion(s), {} left queued",
                summary.records_pushed,
                summary.notes_pushed,
                summary.deletions_applied,
                summary.failed,
            );
        }

        summary
    }

    async fn drain_upserts<T: Syncable>(
        &self,
        queue: &UpsertQueue<T>,
        path_of: impl Fn(&str) -> String,
    ) -> (usize, usize) {
        let snapshot = queue.list();
        if snapshot.is_empty() {
            return (0, 0);
        }

        let mut confirmed: Vec<T> = Vec::new();
        let mut failed = 0;

        for entity in snapshot {
            // The pending marker never travels; serialization drops it
            // once cleared.
            let mut clean = entity.clone();
            clean.set_pending(false);
            let value = match serde_json::to_value(&clean) {
                Ok(value) => value,
                Err(e) => {
                    log::error!(
                        "sync: cannot serialize {} {}: {}",
                        T::COLLECTION,
                        entity.id(),
                        e
                    );
                    failed += 1;
                    continue;
                }
            };

            match self.remote.write(&path_of(entity.id()), value).await {
                Ok(()) => confirmed.push(entity),
                Err(e) => {
                    failed += 1;
                    log::debug!(
                        "sync: {} {} stays queued: {}",
                        T::COLLECTION,
                        entity.id(),
                        e
                    );
                }
            }
        }

        let pushed = confirmed.len();
        if pushed > 0 {
            queue.retire(&confirmed);
        }
        (pushed, failed)
    }

    async fn drain_deletions(&self) -> (usize, usize) {
        let snapshot = self.queues.deletions.list();
        if snapshot.is_empty() {
            return (0, 0);
        }

        let mut confirmed: Vec<PendingDeletion> = Vec::new();
        let mut failed = 0;

        for deletion in snapshot {
            match self.remote.delete(&deletion.path).await {
                Ok(()) => confirmed.push(deletion),
                Err(e) => {
                    failed += 1;
                    log::debug!("sync: deletion of {} stays queued: {}", deletion.path, e);
                }
            }
        }

        let applied = confirmed.len();
        if applied > 0 {
            // Evict confirmed deletions from the mirrors before the
            // queue entries stop hiding them; otherwise a stale mirror
            // would resurrect the entity until the next snapshot.
            let records_prefix = format!("{}/", self.paths.records());
            let notes_prefix = format!("{}/", self.paths.notes());
            for deletion in &confirmed {
                if deletion.path.starts_with(&records_prefix) {
                    self.records_cache.evict(&deletion.id);
                } else if deletion.path.starts_with(&notes_prefix) {
                    self.notes_cache.evict(&deletion.id);
                }
            }
            self.queues.deletions.retire(&confirmed);
        }
        (applied, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStore, MemoryStore, RecordInput};
    use crate::sync::remote::{MemoryRemote, RemoteError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use tokio::sync::mpsc;

    fn record(date: &str) -> MilkRecord {
        MilkRecord::new(RecordInput {
            date: date.parse().unwrap(),
            quantity: 10.0,
            total_price: 500.0,
            shift: None,
            status: None,
        })
    }

    fn engine_with(
        remote: Arc<dyn RemoteStore>,
    ) -> (Arc<PendingQueues>, Arc<MirrorCache<MilkRecord>>, Arc<SyncEngine>) {
        let local = Arc::new(MemoryStore::new());
        let queues = Arc::new(PendingQueues::load(local as Arc<dyn LocalStore>));
        let records_cache = Arc::new(MirrorCache::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queues),
            Arc::clone(&records_cache),
            Arc::new(MirrorCache::new()),
            Arc::new(StoreListeners::new()),
            remote,
            PathBuilder::new("milkData/u1"),
        ));
        engine.online_flag().store(true, AtomicOrdering::SeqCst);
        (queues, records_cache, engine)
    }

    #[tokio::test]
    async fn test_drain_pushes_clean_entities() {
        let remote = Arc::new(MemoryRemote::new());
        let (queues, _caches, engine) = engine_with(Arc::clone(&remote) as Arc<dyn RemoteStore>);

        let a = record("2024-01-05");
        queues.records.upsert(a.clone());

        let summary = engine.drain().await;
        assert_eq!(summary.records_pushed, 1);
        assert_eq!(summary.failed, 0);
        assert!(queues.records.is_empty());

        let stored = remote
            .value_at(&format!("milkData/u1/milkRecords/{}", a.id))
            .unwrap();
        assert!(!stored.as_object().unwrap().contains_key("pendingSync"));
        assert_eq!(stored["id"], a.id.as_str());
    }

    #[tokio::test]
    async fn test_retried_drain_converges() {
        let remote = Arc::new(MemoryRemote::new());
        let (queues, _caches, engine) = engine_with(Arc::clone(&remote) as Arc<dyn RemoteStore>);

        let a = record("2024-01-05");
        queues.records.upsert(a.clone());
        engine.drain().await;

        // Simulate a retry of the same upsert after the queue was already
        // drained once.
        queues.records.upsert(a.clone());
        engine.drain().await;

        assert_eq!(remote.len(), 1);
        let stored = remote
            .value_at(&format!("milkData/u1/milkRecords/{}", a.id))
            .unwrap();
        assert_eq!(stored["totalPrice"], 500.0);
    }

    #[tokio::test]
    async fn test_failed_writes_stay_queued() {
        let remote = Arc::new(MemoryRemote::new());
        let (queues, _caches, engine) = engine_with(Arc::clone(&remote) as Arc<dyn RemoteStore>);

        queues.records.upsert(record("2024-01-05"));
        queues.deletions.push("x", "milkData/u1/milkRecords/x".to_string());

        remote.set_failing(true);
        let summary = engine.drain().await;
        assert_eq!(summary.records_pushed, 0);
        assert_eq!(summary.deletions_applied, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(queues.records.len(), 1);
        assert_eq!(queues.deletions.len(), 1);

        remote.set_failing(false);
        let summary = engine.drain().await;
        assert_eq!(summary.records_pushed, 1);
        assert_eq!(summary.deletions_applied, 1);
        assert!(queues.records.is_empty());
        assert!(queues.deletions.is_empty());
    }

    #[tokio::test]
    async fn test_drain_is_noop_offline() {
        let remote = Arc::new(MemoryRemote::new());
        let (queues, _caches, engine) = engine_with(Arc::clone(&remote) as Arc<dyn RemoteStore>);
        engine.online_flag().store(false, AtomicOrdering::SeqCst);

        queues.records.upsert(record("2024-01-05"));
        let summary = engine.drain().await;
        assert_eq!(summary, DrainSummary::default());
        assert_eq!(queues.records.len(), 1);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_deletion_evicts_stale_mirror_entry() {
        let remote = Arc::new(MemoryRemote::new());
        let (queues, records_cache, engine) =
            engine_with(Arc::clone(&remote) as Arc<dyn RemoteStore>);

        // Restart shape: the mirror was refreshed from a snapshot that
        // still holds the record, while the durable deletion queue says
        // it is gone.
        let mut a = record("2024-01-05");
        a.pending = false;
        records_cache.replace(vec![a.clone()]);
        queues
            .deletions
            .push(&a.id, format!("milkData/u1/milkRecords/{}", a.id));

        let summary = engine.drain().await;
        assert_eq!(summary.deletions_applied, 1);
        assert!(queues.deletions.is_empty());
        assert!(!records_cache.contains(&a.id));
    }

    /// Remote whose writes block until the test releases them, to pin
    /// down what happens to mutations that land mid-drain.
    struct GatedRemote {
        gate: tokio::sync::Semaphore,
        entered: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl RemoteStore for GatedRemote {
        async fn write(&self, _path: &str, _value: Value) -> Result<(), RemoteError> {
            if let Some(tx) = self.entered.lock().unwrap().take() {
                let _ = tx.send(());
            }
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            Ok(())
        }

        async fn delete(&self, _path: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        fn subscribe(&self, _collection_path: &str) -> mpsc::Receiver<Value> {
            mpsc::channel(1).1
        }
    }

    #[tokio::test]
    async fn test_mutation_during_drain_is_not_lost() {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let gated = Arc::new(GatedRemote {
            gate: tokio::sync::Semaphore::new(0),
            entered: std::sync::Mutex::new(Some(entered_tx)),
        });
        let (queues, _caches, engine) = engine_with(Arc::clone(&gated) as Arc<dyn RemoteStore>);

        let a = record("2024-01-05");
        queues.records.upsert(a.clone());

        let draining = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.drain().await })
        };

        // Wait until the drain has snapshotted the queue and is blocked
        // inside the write, then land two mutations: a brand new record
        // and a supersession of the in-flight one.
        entered_rx.await.unwrap();
        let b = record("2024-01-06");
        queues.records.upsert(b.clone());
        let mut newer = a.clone();
        newer.total_price = 999.0;
        queues.records.upsert(newer.clone());

        gated.gate.add_permits(8);
        let summary = draining.await.unwrap();
        assert_eq!(summary.records_pushed, 1);

        // B was queued after the snapshot and must still be there; A was
        // superseded mid-drain and must survive for the next pass.
        let remaining = queues.records.list();
        assert!(remaining.iter().any(|r| r.id == b.id));
        assert!(remaining
            .iter()
            .any(|r| r.id == a.id && r.total_price == 999.0));
    }
}
