mod local_store;
mod models;

pub use local_store::{FileStore, LocalStore, MemoryStore, StorageError};
pub use models::*;
