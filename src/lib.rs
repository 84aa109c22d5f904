//! Offline-first sync core for a dairy production record keeper.
//!
//! Records and notes are created, edited and deleted against durable
//! local queues, shown immediately through merged views, and reconciled
//! with a remote path-addressable document store once connectivity
//! returns. Writes are idempotent overwrites keyed by entity identifier;
//! deletions never resurrect and retries never duplicate.

pub mod storage;
pub mod store;
pub mod sync;

pub use storage::{
    FileStore, LocalStore, MemoryStore, MilkRecord, Note, NoteInput, PaymentStatus, RecordInput,
    Shift, StorageError, TrashedRecord,
};
pub use store::{MilkStore, StoreConfig, SyncStatus};
pub use sync::{
    DrainSummary, HttpRemote, MemoryRemote, PathBuilder, RemoteError, RemoteStore, Subscription,
    SyncEngine,
};
