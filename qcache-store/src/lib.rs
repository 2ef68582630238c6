//! qcache-store - Transactional Store Backends for the Query-Result Cache
//!
//! Defines the store capability the cache protocol runs on (optimistic
//! transactions, ordered ranges, per-key watches) and two implementations:
//! an in-memory store used as the reference backend and in tests, and a
//! persistent LMDB-backed store via heed. The [`runtime`] module owns the
//! once-per-process store lifecycle.

pub mod lmdb;
pub mod memory;
mod mutation;
pub mod runtime;
pub mod traits;
pub mod watch;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;
pub use runtime::{RuntimeConfig, RuntimeError, StoreRuntime};
pub use traits::{KeyValue, RangeOptions, StoreTransaction, TransactionalStore};
pub use watch::{KeyWatch, WatchHub};
