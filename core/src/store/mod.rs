// Store module: persistence for pool, swarms, cursors, dedup hashes and paths

pub mod backend;
pub mod database;
pub mod seen;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use database::{KvDatabase, SnodeDatabase};
pub use seen::SeenHashes;
