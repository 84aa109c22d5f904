pub mod cache;
pub mod connectivity;
pub mod engine;
pub mod entity;
pub mod http;
pub mod ids;
pub mod paths;
pub mod queue;
pub mod remote;
pub mod view;

pub use cache::MirrorCache;
pub use connectivity::ConnectivityMonitor;
pub use engine::{DrainSummary, SyncEngine};
pub use entity::Syncable;
pub use http::HttpRemote;
pub use paths::PathBuilder;
pub use queue::{DeletionQueue, PendingDeletion, PendingQueues, UpsertQueue};
pub use remote::{MemoryRemote, RemoteError, RemoteStore};
pub use view::{Listeners, StoreListeners, Subscription};
