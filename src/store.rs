use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::{
    price_per_liter, LocalStore, MilkRecord, Note, NoteInput, PaymentStatus, RecordInput,
    TrashedRecord,
};
use crate::sync::cache::MirrorCache;
use crate::sync::connectivity::{self, ConnectivityMonitor};
use crate::sync::engine::{DrainSummary, SyncEngine};
use crate::sync::entity::entities_from_snapshot;
use crate::sync::paths::PathBuilder;
use crate::sync::queue::PendingQueues;
use crate::sync::remote::RemoteStore;
use crate::sync::view::{self, StoreListeners, Subscription};

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Remote path prefix all collections live under, typically scoped
    /// to the signed-in user (e.g. `milkData/<uid>`).
    pub root: String,
}

/// Online state and queue depths, for sync badges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub pending_records: usize,
    pub pending_notes: usize,
    pub pending_deletions: usize,
}

/// The store facade the UI layer consumes.
///
/// Owns the durable pending queues, the remote mirrors and the observer
/// sets, and holds the only remote handle. Every mutation is
/// fire-and-continue: it updates the queue, republishes the merged view
/// so the change shows immediately, and lets the sync engine reconcile
/// with the remote store when connectivity allows. Consumers never see a
/// sync error; an entity that keeps its pending marker is the signal.
pub struct MilkStore {
    queues: Arc<PendingQueues>,
    records_cache: Arc<MirrorCache<MilkRecord>>,
    notes_cache: Arc<MirrorCache<Note>>,
    trash_cache: Arc<MirrorCache<TrashedRecord>>,
    listeners: Arc<StoreListeners>,
    engine: Arc<SyncEngine>,
    connectivity: ConnectivityMonitor,
    remote: Arc<dyn RemoteStore>,
    paths: PathBuilder,
}

impl MilkStore {
    /// Wire up a store over the two storage boundaries.
    ///
    /// Must be called within a tokio runtime: the snapshot listeners and
    /// the connectivity watcher are spawned here. The store starts
    /// offline until the host reports otherwise.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: StoreConfig,
    ) -> Self {
        let paths = PathBuilder::new(config.root);
        let queues = Arc::new(PendingQueues::load(local));
        let records_cache = Arc::new(MirrorCache::new());
        let notes_cache = Arc::new(MirrorCache::new());
        let trash_cache = Arc::new(MirrorCache::new());
        let listeners = Arc::new(StoreListeners::new());

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queues),
            Arc::clone(&records_cache),
            Arc::clone(&notes_cache),
            Arc::clone(&listeners),
            Arc::clone(&remote),
            paths.clone(),
        ));
        let connectivity = connectivity::start(Arc::clone(&engine));

        let store = Self {
            queues,
            records_cache,
            notes_cache,
            trash_cache,
            listeners,
            engine,
            connectivity,
            remote,
            paths,
        };
        store.spawn_snapshot_listeners();
        store
    }

    fn spawn_snapshot_listeners(&self) {
        {
            let mut rx = self.remote.subscribe(&self.paths.records());
            let queues = Arc::clone(&self.queues);
            let cache = Arc::clone(&self.records_cache);
            let listeners = Arc::clone(&self.listeners);
            let paths = self.paths.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    cache.replace(entities_from_snapshot::<MilkRecord>(&snapshot));
                    view::publish_records(&queues, &cache, &listeners, &paths);
                }
            });
        }
        {
            let mut rx = self.remote.subscribe(&self.paths.notes());
            let queues = Arc::clone(&self.queues);
            let cache = Arc::clone(&self.notes_cache);
            let listeners = Arc::clone(&self.listeners);
            let paths = self.paths.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    cache.replace(entities_from_snapshot::<Note>(&snapshot));
                    view::publish_notes(&queues, &cache, &listeners, &paths);
                }
            });
        }
        {
            let mut rx = self.remote.subscribe(&self.paths.trash_bin());
            let cache = Arc::clone(&self.trash_cache);
            let listeners = Arc::clone(&self.listeners);
            tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    cache.replace(entities_from_snapshot::<TrashedRecord>(&snapshot));
                    view::publish_trash(&cache, &listeners);
                }
            });
        }
    }

    // ===== Records =====

    /// Create a record. Returns the stored entity; its identifier is
    /// permanent and never changes when the record later syncs.
    pub fn add_record(&self, input: RecordInput) -> MilkRecord {
        let record = MilkRecord::new(input);
        self.queues.records.upsert(record.clone());
        self.publish_records();
        self.maybe_drain();
        record
    }

    /// Replace a record wholesale. The derived unit price is recomputed.
    pub fn update_record(&self, mut record: MilkRecord) {
        record.price_per_liter = price_per_liter(record.quantity, record.total_price);
        self.queues.records.upsert(record);
        self.publish_records();
        self.maybe_drain();
    }

    /// Set the payment status on a batch of records.
    ///
    /// The pending entry is the authoritative base when one exists, so
    /// overlapping bulk calls resolve to whichever ran last locally, no
    /// matter how their remote writes complete.
    pub fn set_records_status(&self, ids: &[String], status: PaymentStatus) {
        let mut touched = false;
        for id in ids {
            let base = self
                .queues
                .records
                .get(id)
                .or_else(|| self.records_cache.get(id));
            let Some(mut record) = base else {
                log::debug!("status change skipped, unknown record {}", id);
                continue;
            };
            record.status = status;
            self.queues.records.upsert(record);
            touched = true;
        }
        if touched {
            self.publish_records();
            self.maybe_drain();
        }
    }

    /// Move a record to the trash.
    ///
    /// A record the remote has never seen is simply evicted from the
    /// upsert queue; nothing is queued against a path that does not
    /// exist. Otherwise the active-collection deletion is queued and,
    /// while online, a trash copy is written so the record can be
    /// restored.
    pub fn soft_delete_record(&self, record: &MilkRecord) {
        let in_mirror = self.records_cache.contains(&record.id);
        let was_queued = self.queues.records.cancel(&record.id);
        let never_synced = was_queued && !in_mirror;

        if !never_synced {
            self.queues
                .deletions
                .push(&record.id, self.paths.record(&record.id));
            self.records_cache.evict(&record.id);
        }
        self.publish_records();

        if never_synced || !self.connectivity.is_online() {
            return;
        }

        let remote = Arc::clone(&self.remote);
        let engine = Arc::clone(&self.engine);
        let path = self.paths.trash(&record.id);
        let mut clean = record.clone();
        clean.pending = false;
        let trashed = TrashedRecord {
            record: clean,
            deleted_at: Utc::now().timestamp_millis(),
        };
        tokio::spawn(async move {
            match serde_json::to_value(&trashed) {
                Ok(value) => {
                    if let Err(e) = remote.write(&path, value).await {
                        log::warn!("trash copy at {} failed: {}", path, e);
                    }
                }
                Err(e) => log::error!("cannot serialize trash copy: {}", e),
            }
            engine.drain().await;
        });
    }

    /// Restore a trashed record into the active collection.
    ///
    /// Online only: a queued restore would keep the identifier visible
    /// in both the active and trash views until the next drain.
    pub fn restore_record(&self, trashed: &TrashedRecord) {
        if !self.connectivity.is_online() {
            log::debug!("restore of {} skipped while offline", trashed.record.id);
            return;
        }

        let remote = Arc::clone(&self.remote);
        let record_path = self.paths.record(&trashed.record.id);
        let trash_path = self.paths.trash(&trashed.record.id);
        let mut clean = trashed.record.clone();
        clean.pending = false;
        tokio::spawn(async move {
            let value = match serde_json::to_value(&clean) {
                Ok(value) => value,
                Err(e) => {
                    log::error!("cannot serialize restored record: {}", e);
                    return;
                }
            };
            if let Err(e) = remote.write(&record_path, value).await {
                log::warn!("restore write to {} failed: {}", record_path, e);
                return;
            }
            if let Err(e) = remote.delete(&trash_path).await {
                log::warn!("restore cleanup of {} failed: {}", trash_path, e);
            }
        });
    }

    /// Permanently delete a record.
    ///
    /// An identifier that only lives in the pending-upsert queue is
    /// evicted locally; otherwise the trash entry's deletion is queued
    /// and drained like any other.
    pub fn hard_delete_record(&self, id: &str) {
        if self.queues.records.cancel(id) {
            self.publish_records();
            return;
        }
        self.queues.deletions.push(id, self.paths.trash(id));
        self.trash_cache.evict(id);
        view::publish_trash(&self.trash_cache, &self.listeners);
        self.maybe_drain();
    }

    // ===== Notes =====

    pub fn add_note(&self, input: NoteInput) -> Note {
        let note = Note::new(input);
        self.queues.notes.upsert(note.clone());
        self.publish_notes();
        self.maybe_drain();
        note
    }

    pub fn update_note(&self, note: Note) {
        self.queues.notes.upsert(note);
        self.publish_notes();
        self.maybe_drain();
    }

    /// Delete a note. A note the remote has never seen is evicted from
    /// the upsert queue; a synced one gets a queued remote deletion.
    pub fn delete_note(&self, id: &str) {
        let in_mirror = self.notes_cache.contains(id);
        let was_queued = self.queues.notes.cancel(id);
        let never_synced = was_queued && !in_mirror;

        if !never_synced {
            self.queues.deletions.push(id, self.paths.note(id));
            self.notes_cache.evict(id);
        }
        self.publish_notes();
        self.maybe_drain();
    }

    // ===== Subscriptions and views =====

    /// Observe the merged records view. Every registered listener is
    /// re-notified on subscribe, so the new one starts with current
    /// state.
    pub fn subscribe_records(
        &self,
        listener: impl Fn(&[MilkRecord]) + Send + Sync + 'static,
    ) -> Subscription<MilkRecord> {
        let subscription = self.listeners.records.subscribe(listener);
        self.publish_records();
        subscription
    }

    pub fn subscribe_notes(
        &self,
        listener: impl Fn(&[Note]) + Send + Sync + 'static,
    ) -> Subscription<Note> {
        let subscription = self.listeners.notes.subscribe(listener);
        self.publish_notes();
        subscription
    }

    pub fn subscribe_trash(
        &self,
        listener: impl Fn(&[TrashedRecord]) + Send + Sync + 'static,
    ) -> Subscription<TrashedRecord> {
        let subscription = self.listeners.trash.subscribe(listener);
        view::publish_trash(&self.trash_cache, &self.listeners);
        subscription
    }

    /// Current merged records view, for pull-style consumers.
    pub fn records_view(&self) -> Vec<MilkRecord> {
        view::records_view(&self.queues, &self.records_cache, &self.paths)
    }

    pub fn notes_view(&self) -> Vec<Note> {
        view::notes_view(&self.queues, &self.notes_cache, &self.paths)
    }

    pub fn trash_view(&self) -> Vec<TrashedRecord> {
        let mut view = self.trash_cache.list();
        view::sort_view(&mut view);
        view
    }

    // ===== Sync control =====

    /// Report the host's connectivity signal. An offline to online
    /// transition triggers a drain.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Flush the pending queues now.
    pub async fn drain(&self) -> DrainSummary {
        self.engine.drain().await
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            online: self.connectivity.is_online(),
            pending_records: self.queues.records.len(),
            pending_notes: self.queues.notes.len(),
            pending_deletions: self.queues.deletions.len(),
        }
    }

    fn maybe_drain(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.drain().await;
        });
    }

    fn publish_records(&self) {
        view::publish_records(&self.queues, &self.records_cache, &self.listeners, &self.paths);
    }

    fn publish_notes(&self) {
        view::publish_notes(&self.queues, &self.notes_cache, &self.listeners, &self.paths);
    }
}
