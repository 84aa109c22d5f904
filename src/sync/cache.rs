use std::sync::Mutex;

use super::entity::Syncable;

/// Last known remote state for one collection.
///
/// Replaced wholesale on every subscription snapshot. Never cleared on
/// disconnect: a stale mirror is last-known-good state, not an empty
/// collection.
pub struct MirrorCache<T> {
    entries: Mutex<Vec<T>>,
}

impl<T: Syncable> MirrorCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn replace(&self, entries: Vec<T>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn list(&self) -> Vec<T> {
        self.entries.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e.id() == id)
    }

    /// Drop one entry ahead of the remote catching up.
    ///
    /// Used by the delete transitions so a removed entity cannot flicker
    /// back in between its deletion being confirmed and the next
    /// snapshot arriving.
    pub fn evict(&self, id: &str) {
        self.entries.lock().unwrap().retain(|e| e.id() != id);
    }
}

impl<T: Syncable> Default for MirrorCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
