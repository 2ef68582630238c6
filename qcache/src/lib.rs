//! qcache - Shared Transactional Query-Result Cache
//!
//! Memoizes expensive remote query results in a shared, transactional
//! key-value store and deduplicates concurrent identical fetches, so that
//! many independent callers requesting the same computation observe exactly
//! one in-flight fetch.
//!
//! # Protocol
//!
//! A caller derives a [`QueryHash`] from the query text and asks
//! [`QueryCache::get_status`] for the key's state:
//!
//! - Granted a claim (`Fetch`), the caller performs the external fetch and
//!   calls [`QueryCache::populate`] to store the rows and release waiters.
//! - Offered a fresh result (`Ready`), the caller reads it with
//!   [`QueryCache::retrieve`].
//! - Racing against another session's claim, the caller blocks on a watch
//!   until the claim is released, then re-reads.
//!
//! Stampede prevention comes from the store's optimistic commit: of any set
//! of sessions racing to claim one key, exactly one commit is admitted.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use qcache::{QueryCache, StatusOutcome};
//! use qcache_core::{now_micros, QueryHash};
//! use qcache_store::MemoryStore;
//!
//! let cache = QueryCache::with_defaults(Arc::new(MemoryStore::new()));
//! let query = "SELECT count(*) FROM events";
//! let hash = QueryHash::of_query_text(query);
//!
//! match cache.get_status(&hash, now_micros(), Duration::from_secs(60), query).await {
//!     StatusOutcome::Fetch { claim_ts } => {
//!         let rows = run_remote_query(query).await;
//!         cache.populate(&hash, claim_ts, &rows).await;
//!     }
//!     StatusOutcome::Ready { ts, .. } => {
//!         let rows = cache.retrieve(&hash, ts).await?;
//!     }
//!     StatusOutcome::Exhausted => { /* fall back to the remote */ }
//! }
//! ```

pub mod admin;
pub mod config;
pub mod coordinator;
pub mod tuples;

pub use admin::{InspectEntry, InspectSnapshot};
pub use config::CacheConfig;
pub use coordinator::QueryCache;

// Re-export the protocol vocabulary so callers need one import path.
pub use qcache_core::{
    now_micros, PopulateOutcome, QueryHash, QueryStatus, RetrieveError, RetryPolicy,
    StatusOutcome, StatusRecord, StoreError, Timestamp,
};
pub use qcache_store::{
    KeyWatch, LmdbStore, MemoryStore, RuntimeConfig, RuntimeError, StoreRuntime,
    TransactionalStore,
};
