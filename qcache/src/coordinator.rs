//! Cache coordinator: the claim/fetch/wait state machine.
//!
//! [`QueryCache::get_status`] is the entry point of the protocol. For one
//! content hash it decides, under the store's optimistic concurrency,
//! whether the caller owns the fetch (claim granted), can use a ready
//! result, or must wait for another session's in-flight fetch. When two
//! sessions race to claim the same key the store's commit validation admits
//! exactly one; the loser re-reads and becomes a watcher. At most one
//! active claim exists per key at any instant.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use qcache_core::{
    QueryHash, QueryStatus, StatusKey, StatusOutcome, StatusRecord, StoreError, Timestamp,
};
use qcache_store::{KeyWatch, StoreTransaction, TransactionalStore};

use crate::config::CacheConfig;

/// Coordinated query-result cache over an injected transactional store.
pub struct QueryCache<S: TransactionalStore> {
    store: Arc<S>,
    config: CacheConfig,
}

impl<S: TransactionalStore> QueryCache<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve the status of one cached query.
    ///
    /// - `Fetch { claim_ts }`: the caller was granted the claim and must
    ///   perform the fetch, then call
    ///   [`populate`](QueryCache::populate) with `claim_ts` as the epoch.
    /// - `Ready { rows, ts }`: a result fresh within `timeout` of `now`
    ///   exists; read it with [`retrieve`](QueryCache::retrieve) and `ts`.
    /// - `Exhausted`: the bounded retry loop ran out of attempts.
    ///
    /// A key is claimable when its status entry is absent or when the stored
    /// timestamp is stale (`stored_ts + timeout < now`), whether the stale
    /// entry is ready or an abandoned claim. A fresh claim held by another
    /// session blocks the caller on a watch until the claim is released or
    /// the watch wait times out.
    pub async fn get_status(
        &self,
        hash: &QueryHash,
        now: Timestamp,
        timeout: Duration,
        query_text: &str,
    ) -> StatusOutcome {
        let staleness = duration_micros(timeout);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.config.retry.is_exhausted(attempt) {
                warn!(%hash, attempts = attempt - 1, "get_status attempts exhausted");
                return StatusOutcome::Exhausted;
            }
            match self.status_attempt(hash, now, staleness, query_text).await {
                Ok(Attempt::Done(outcome)) => return outcome,
                Ok(Attempt::Wait(watch)) => {
                    debug!(%hash, attempt, "waiting for claim release");
                    self.wait_for_release(watch).await;
                }
                Err(e) if e.is_transient() => {
                    debug!(%hash, attempt, error = %e, "transient store error, restarting");
                    tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "get_status failed on unrecoverable store error");
                    return StatusOutcome::Exhausted;
                }
            }
        }
    }

    /// One transaction of the state machine.
    async fn status_attempt(
        &self,
        hash: &QueryHash,
        now: Timestamp,
        staleness: i64,
        query_text: &str,
    ) -> Result<Attempt, StoreError> {
        let mut tx = self.store.begin()?;
        let status_key = StatusKey::new(*hash).encode();

        let record = match tx.get(&status_key).await? {
            Some(bytes) => Some(decode_record(&bytes)?),
            None => None,
        };

        match record {
            Some(record) if record.ts.saturating_add(staleness) >= now => match record.status {
                QueryStatus::Ready(rows) => {
                    tx.commit().await?;
                    debug!(%hash, rows, ts = record.ts, "ready result");
                    Ok(Attempt::Done(StatusOutcome::Ready {
                        rows,
                        ts: record.ts,
                    }))
                }
                QueryStatus::Fetching => {
                    let watch = tx.watch(&status_key);
                    tx.commit().await?;
                    Ok(Attempt::Wait(watch))
                }
            },
            // Absent, or stale in any state: take the claim.
            _ => {
                tx.set(&status_key, &StatusRecord::claim(now, query_text).encode());
                tx.commit().await?;
                debug!(%hash, claim_ts = now, "claim granted");
                Ok(Attempt::Done(StatusOutcome::Fetch { claim_ts: now }))
            }
        }
    }

    async fn wait_for_release(&self, watch: KeyWatch) {
        match self.config.watch_timeout {
            Some(bound) => {
                if tokio::time::timeout(bound, watch.changed()).await.is_err() {
                    debug!("watch wait timed out, re-reading status");
                }
            }
            None => {
                // A lost watch also re-enters the loop.
                let _ = watch.changed().await;
            }
        }
    }
}

enum Attempt {
    Done(StatusOutcome),
    Wait(KeyWatch),
}

/// Decode a persisted status record, reporting corruption as a
/// non-transient store failure.
pub(crate) fn decode_record(bytes: &[u8]) -> Result<StatusRecord, StoreError> {
    StatusRecord::decode(bytes).map_err(|e| StoreError::Backend {
        reason: format!("corrupt status record: {e}"),
    })
}

/// Saturating conversion of a staleness window to protocol microseconds.
pub(crate) fn duration_micros(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX)
}
