use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use crate::storage::{MilkRecord, Note, TrashedRecord};

use super::cache::MirrorCache;
use super::entity::Syncable;
use super::paths::PathBuilder;
use super::queue::PendingQueues;

/// Combine the remote mirror and the pending queue into the one ordered
/// list consumers observe.
///
/// Remote entries go in first, minus identifiers with a queued deletion;
/// pending entries overlay by identifier and always win. Precedence is
/// explicit and nothing depends on map iteration order: the output is
/// sorted by the kind's key descending, identifier ascending on ties.
pub fn merge<T: Syncable>(remote: &[T], pending: &[T], deleted: &HashSet<String>) -> Vec<T> {
    let mut by_id: HashMap<String, T> = HashMap::with_capacity(remote.len() + pending.len());
    for entity in remote {
        if deleted.contains(entity.id()) {
            continue;
        }
        by_id.insert(entity.id().to_string(), entity.clone());
    }
    for entity in pending {
        by_id.insert(entity.id().to_string(), entity.clone());
    }

    let mut merged: Vec<T> = by_id.into_values().collect();
    sort_view(&mut merged);
    merged
}

/// Newest first, stable across runs.
pub fn sort_view<T: Syncable>(entities: &mut [T]) {
    entities.sort_by(|a, b| {
        b.sort_key()
            .cmp(&a.sort_key())
            .then_with(|| a.id().cmp(b.id()))
    });
}

type Callback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An observer set owned by its store, not by the module.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&[T]) + Send + Sync + 'static) -> Subscription<T> {
        let mut set = self.inner.lock().unwrap();
        let id = set.next_id;
        set.next_id += 1;
        set.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every registered observer with the given view, in
    /// registration order. Callbacks run outside the set lock so an
    /// observer may subscribe or cancel reentrantly.
    pub fn notify(&self, view: &[T]) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(view);
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registered observer. The observer lives until
/// `cancel` is called or its store is dropped.
pub struct Subscription<T> {
    id: u64,
    set: Weak<Mutex<ListenerSet<T>>>,
}

impl<T> Subscription<T> {
    pub fn cancel(self) {
        if let Some(set) = self.set.upgrade() {
            set.lock().unwrap().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Per-kind observer sets, shared by the store facade and the sync
/// engine so both can republish after a state change.
pub struct StoreListeners {
    pub records: Listeners<MilkRecord>,
    pub notes: Listeners<Note>,
    pub trash: Listeners<TrashedRecord>,
}

impl StoreListeners {
    pub fn new() -> Self {
        Self {
            records: Listeners::new(),
            notes: Listeners::new(),
            trash: Listeners::new(),
        }
    }
}

impl Default for StoreListeners {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn records_view(
    queues: &PendingQueues,
    cache: &MirrorCache<MilkRecord>,
    paths: &PathBuilder,
) -> Vec<MilkRecord> {
    let deleted = queues.deletions.ids_under(&paths.records());
    merge(&cache.list(), &queues.records.list(), &deleted)
}

pub(crate) fn notes_view(
    queues: &PendingQueues,
    cache: &MirrorCache<Note>,
    paths: &PathBuilder,
) -> Vec<Note> {
    let deleted = queues.deletions.ids_under(&paths.notes());
    merge(&cache.list(), &queues.notes.list(), &deleted)
}

pub(crate) fn publish_records(
    queues: &PendingQueues,
    cache: &MirrorCache<MilkRecord>,
    listeners: &StoreListeners,
    paths: &PathBuilder,
) {
    let view = records_view(queues, cache, paths);
    listeners.records.notify(&view);
}

pub(crate) fn publish_notes(
    queues: &PendingQueues,
    cache: &MirrorCache<Note>,
    listeners: &StoreListeners,
    paths: &PathBuilder,
) {
    let view = notes_view(queues, cache, paths);
    listeners.notes.notify(&view);
}

pub(crate) fn publish_trash(cache: &MirrorCache<TrashedRecord>, listeners: &StoreListeners) {
    let mut view = cache.list();
    sort_view(&mut view);
    listeners.trash.notify(&view);
}
