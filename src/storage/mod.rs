//! Storage used by the runtime itself
//!
//! Key-value stores hold the reload snapshot and the persisted entries that
//! memory cleanup purges. In-process caches are registered for trimming.

pub mod cache;
pub mod persistence;

pub use cache::{CacheRole, TransientCache, TrimLevel, TrimReport, Trimmable};
pub use persistence::{InMemoryStore, KeyValueStore, SledStore, StoreError};
