use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use super::engine::SyncEngine;

/// Host-facing handle for the runtime's online/offline signal.
///
/// Purely event-driven: each offline to online transition triggers
/// exactly one drain. A failed drain waits for the next transition or
/// the next local mutation's opportunistic attempt; there is no retry
/// timer and no polling. Dropping the monitor ends the watcher task.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
    online: Arc<AtomicBool>,
}

impl ConnectivityMonitor {
    /// Report the current connectivity state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        let _ = self.tx.send(online);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Start watching for connectivity transitions.
pub fn start(engine: Arc<SyncEngine>) -> ConnectivityMonitor {
    let (tx, mut rx) = watch::channel(false);
    let online = engine.online_flag();

    tokio::spawn(async move {
        let mut was_online = false;
        while rx.changed().await.is_ok() {
            let now_online = *rx.borrow_and_update();
            if now_online && !was_online {
                log::info!("connectivity: online, draining pending queues");
                engine.drain().await;
            }
            was_online = now_online;
        }
    });

    ConnectivityMonitor { tx, online }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStore, MemoryStore, MilkRecord, RecordInput};
    use crate::sync::cache::MirrorCache;
    use crate::sync::paths::PathBuilder;
    use crate::sync::queue::PendingQueues;
    use crate::sync::remote::{MemoryRemote, RemoteStore};
    use crate::sync::view::StoreListeners;
    use std::time::Duration;

    #[tokio::test]
    async fn test_online_transition_triggers_drain() {
        let local = Arc::new(MemoryStore::new());
        let queues = Arc::new(PendingQueues::load(local as Arc<dyn LocalStore>));
        let remote = Arc::new(MemoryRemote::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queues),
            Arc::new(MirrorCache::new()),
            Arc::new(MirrorCache::new()),
            Arc::new(StoreListeners::new()),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            PathBuilder::new("milkData/u1"),
        ));
        let monitor = start(Arc::clone(&engine));

        let record = MilkRecord::new(RecordInput {
            date: "2024-01-05".parse().unwrap(),
            quantity: 10.0,
            total_price: 500.0,
            shift: None,
            status: None,
        });
        queues.records.upsert(record.clone());
        assert!(!monitor.is_online());

        monitor.set_online(true);

        let path = format!("milkData/u1/milkRecords/{}", record.id);
        for _ in 0..200 {
            if remote.value_at(&path).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(remote.value_at(&path).is_some());
        assert!(queues.records.is_empty());
    }
}
