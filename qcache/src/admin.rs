//! Administrative surface: invalidation and inspection.
//!
//! Direct pass-throughs over the protocol's store entries, for operators
//! and tests. Inspection is a diagnostic tool bounded by a single
//! range-read batch, not a production scan path.

use serde::Serialize;
use tracing::{debug, warn};

use qcache_core::{
    row_range, status_namespace_range, QueryHash, QueryStatus, StatusKey, StatusRecord,
    StoreError, Timestamp,
};
use qcache_store::{KeyWatch, RangeOptions, StoreTransaction, TransactionalStore};

use crate::QueryCache;

/// One decoded status entry from an inspection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectEntry {
    pub hash: QueryHash,
    pub ts: Timestamp,
    pub status: QueryStatus,
    pub query_text: String,
}

/// Lazy, finite, non-restartable sequence of status entries taken from one
/// snapshot.
pub struct InspectSnapshot {
    entries: std::vec::IntoIter<InspectEntry>,
    truncated: bool,
}

impl InspectSnapshot {
    /// Whether the namespace held more entries than the snapshot limit.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl Iterator for InspectSnapshot {
    type Item = InspectEntry;

    fn next(&mut self) -> Option<InspectEntry> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for InspectSnapshot {}

impl<S: TransactionalStore> QueryCache<S> {
    /// Clear the status entry and the full row range of one hash in one
    /// atomic transaction. The deletion wakes any watcher blocked on the
    /// key.
    pub async fn invalidate(&self, hash: &QueryHash) -> Result<(), StoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.config().retry.is_exhausted(attempt) {
                warn!(%hash, attempts = attempt - 1, "invalidate attempts exhausted");
                return Err(StoreError::Timeout {
                    operation: "invalidate".to_string(),
                });
            }
            match self.invalidate_attempt(hash).await {
                Ok(()) => {
                    debug!(%hash, "cache entry invalidated");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!(%hash, attempt, error = %e, "transient store error, restarting");
                    tokio::time::sleep(self.config().retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn invalidate_attempt(&self, hash: &QueryHash) -> Result<(), StoreError> {
        let mut tx = self.store().begin()?;
        let (row_begin, row_end) = row_range(*hash);
        tx.clear_range(&row_begin, &row_end);
        tx.clear(&StatusKey::new(*hash).encode());
        tx.commit().await
    }

    /// One-snapshot scan of the whole status namespace.
    ///
    /// Entries whose key or record no longer decodes are skipped with a
    /// warning rather than failing the snapshot.
    pub async fn inspect(&self) -> Result<InspectSnapshot, StoreError> {
        let mut tx = self.store().begin()?;
        let (begin, end) = status_namespace_range();
        let (entries, truncated) = tx
            .range(begin, end, RangeOptions::limited(self.config().inspect_limit))
            .await?;
        tx.commit().await?;

        let mut decoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(status_key) = StatusKey::decode(&key) else {
                warn!(key = %hex::encode(&key), "skipping malformed status key");
                continue;
            };
            match StatusRecord::decode(&value) {
                Ok(record) => decoded.push(InspectEntry {
                    hash: status_key.hash(),
                    ts: record.ts,
                    status: record.status,
                    query_text: record.query_text,
                }),
                Err(e) => {
                    warn!(hash = %status_key.hash(), error = %e, "skipping undecodable status record");
                }
            }
        }
        Ok(InspectSnapshot {
            entries: decoded.into_iter(),
            truncated,
        })
    }

    /// Administrative override: write or clear one status record directly.
    ///
    /// Bypasses the claim protocol; single transaction, no retry.
    pub async fn force_set(
        &self,
        hash: &QueryHash,
        record: Option<&StatusRecord>,
    ) -> Result<(), StoreError> {
        let mut tx = self.store().begin()?;
        let key = StatusKey::new(*hash).encode();
        match record {
            Some(record) => tx.set(&key, &record.encode()),
            None => tx.clear(&key),
        }
        tx.commit().await
    }

    /// Watch one status entry's next change.
    pub async fn raw_watch(&self, hash: &QueryHash) -> Result<KeyWatch, StoreError> {
        let mut tx = self.store().begin()?;
        let watch = tx.watch(&StatusKey::new(*hash).encode());
        tx.commit().await?;
        Ok(watch)
    }
}
