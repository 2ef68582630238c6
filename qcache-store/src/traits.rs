//! Transactional store capability traits.
//!
//! This is the full capability the cache protocol requires from its store:
//! optimistic transactions over opaque byte keys and values, ordered range
//! reads, and a per-key watch primitive. The coordinator is generic over
//! [`TransactionalStore`], so it can run against the in-memory store in
//! tests and a persistent backend in production.
//!
//! # Transaction Contract
//!
//! - Writes are buffered and become visible only on a successful commit.
//! - Reads record a footprint; `commit` fails with
//!   [`StoreError::Conflict`](qcache_core::StoreError::Conflict) if another
//!   transaction committed a write to any read key or range after this
//!   transaction began. Reads are mutually consistent only for transactions
//!   that commit successfully, so read-only callers that need a consistent
//!   multi-read snapshot must still commit.
//! - Dropping a transaction without committing aborts it; no partial state
//!   is ever visible.

use async_trait::async_trait;
use qcache_core::StoreError;

use crate::watch::KeyWatch;

/// One key/value entry returned by a range read.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Options for a range read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOptions {
    /// Maximum number of entries to return. `None` returns the whole range.
    pub limit: Option<usize>,
}

impl RangeOptions {
    pub fn limited(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// One optimistic transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Point-read one key.
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Ordered read of `[begin, end)`. Returns the entries and whether the
    /// range holds more entries past the requested limit.
    async fn range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        opts: RangeOptions,
    ) -> Result<(Vec<KeyValue>, bool), StoreError>;

    /// Buffer a write of `key`.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffer a deletion of `key`.
    fn clear(&mut self, key: &[u8]);

    /// Buffer a deletion of every key in `[begin, end)`.
    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Register a watch on `key`.
    ///
    /// The watch resolves once the key's value changes relative to what this
    /// transaction has observed; a change that committed between this
    /// transaction's read and the registration resolves the watch
    /// immediately. Deletion is a change.
    fn watch(&mut self, key: &[u8]) -> KeyWatch;

    /// Validate reads and apply buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Handle capable of starting transactions.
pub trait TransactionalStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}
