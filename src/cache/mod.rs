//! Response cache buckets for offline support.
//!
//! This module provides:
//! - Named buckets mapping normalized request keys to response snapshots
//! - SQLite persistence (plus an in-memory backend)
//! - A cache layer combining storage with network fetches

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{key_hash, request_key, CachedResponse, ResponseSource};
