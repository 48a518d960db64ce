//! Persistence: storage adapters and the manager that writes selected
//! sub-trees of the state to them.
//!
//! # Invariants
//! - Storage failures never escape `PersistenceManager`; they are logged and
//!   reported as `false` / `None`.
//! - A disabled manager never touches its adapter.
//! - Persisted text is the plain JSON of the (filtered) tree.

mod config;
mod manager;
mod store;

pub use config::{ConfigError, PersistenceConfig, StorageKind, DEFAULT_STORAGE_KEY};
pub use manager::PersistenceManager;
pub use store::{LocalStorage, MemoryStorage, SessionStorage, StorageAdapter, StorageError};
