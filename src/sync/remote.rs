use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("permission denied at {0}")]
    Denied(String),

    #[error("remote error: {status} - {message}")]
    Server { status: u16, message: String },
}

/// Path-addressable document store boundary.
///
/// Writes are full overwrites keyed by path, never merges, so a retried
/// write converges to the same state as a single one. `subscribe`
/// delivers full collection snapshots (an `{identifier: entity}` object,
/// null when empty); dropping the receiver unsubscribes.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError>;
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;
    fn subscribe(&self, collection_path: &str) -> mpsc::Receiver<Value>;
}

/// In-memory remote for tests and offline development.
///
/// Mirrors the document-store contract: paths map to values, every write
/// fans a fresh collection snapshot out to subscribers, and a failure
/// switch simulates an outage without tearing subscriptions down.
pub struct MemoryRemote {
    tree: Mutex<BTreeMap<String, Value>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
    failing: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every write and delete fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current value at a path, if any.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        self.tree.lock().unwrap().get(path).cloned()
    }

    /// Number of stored documents, across all collections.
    pub fn len(&self) -> usize {
        self.tree.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.lock().unwrap().is_empty()
    }

    fn snapshot_of(&self, collection: &str) -> Value {
        let prefix = format!("{}/", collection);
        let tree = self.tree.lock().unwrap();
        let mut map = serde_json::Map::new();
        for (path, value) in tree.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            let id = &path[prefix.len()..];
            if id.contains('/') {
                continue;
            }
            map.insert(id.to_string(), value.clone());
        }
        if map.is_empty() {
            Value::Null
        } else {
            Value::Object(map)
        }
    }

    async fn broadcast(&self, collection: &str) {
        let snapshot = self.snapshot_of(collection);
        let senders: Vec<mpsc::Sender<Value>> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers.get(collection).cloned().unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(snapshot.clone()).await;
        }
        self.subscribers
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .retain(|sender| !sender.is_closed());
    }

    fn collection_of(path: &str) -> &str {
        path.rsplit_once('/').map(|(collection, _)| collection).unwrap_or(path)
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("simulated outage".to_string()));
        }
        self.tree.lock().unwrap().insert(path.to_string(), value);
        self.broadcast(Self::collection_of(path)).await;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("simulated outage".to_string()));
        }
        self.tree.lock().unwrap().remove(path);
        self.broadcast(Self::collection_of(path)).await;
        Ok(())
    }

    fn subscribe(&self, collection_path: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(16);
        // Fire with current state immediately, like a live subscription.
        let _ = tx.try_send(self.snapshot_of(collection_path));
        self.subscribers
            .lock()
            .unwrap()
            .entry(collection_path.to_string())
            .or_default()
            .push(tx);
        rx
    }
}
