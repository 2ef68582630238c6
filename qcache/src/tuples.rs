//! Tuple store: populate and retrieve the row set of one cached query.
//!
//! Rows and status commit in one atomic transaction, so no partial cache
//! state is ever externally observable. The status overwrite in populate is
//! what releases watchers blocked in the coordinator.

use tracing::{debug, warn};

use qcache_core::{
    row_range, PopulateOutcome, QueryHash, QueryStatus, RetrieveError, RowKey, StatusKey,
    StatusRecord, StoreError, Timestamp,
};
use qcache_store::{RangeOptions, StoreTransaction, TransactionalStore};

use crate::coordinator::decode_record;
use crate::QueryCache;

impl<S: TransactionalStore> QueryCache<S> {
    /// Write the fetched rows and release the claim taken at epoch `ts`.
    ///
    /// The two permanent outcomes are never retried: `Vanished` means the
    /// status entry disappeared mid-fetch (invalidated), `Superseded` means
    /// a newer claim owns the key and this attempt's rows must be
    /// discarded. Transient commit conflicts are retried under the shared
    /// policy.
    pub async fn populate(
        &self,
        hash: &QueryHash,
        ts: Timestamp,
        rows: &[Vec<u8>],
    ) -> PopulateOutcome {
        if i32::try_from(rows.len()).is_err() {
            warn!(%hash, rows = rows.len(), "row set exceeds representable count");
            return PopulateOutcome::TooLarge;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.config().retry.is_exhausted(attempt) {
                warn!(%hash, attempts = attempt - 1, "populate attempts exhausted");
                return PopulateOutcome::Exhausted;
            }
            match self.populate_attempt(hash, ts, rows).await {
                Ok(outcome) => return outcome,
                Err(e) if e.is_transient() => {
                    debug!(%hash, attempt, error = %e, "transient store error, restarting");
                    tokio::time::sleep(self.config().retry.backoff(attempt)).await;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "populate failed on unrecoverable store error");
                    return PopulateOutcome::Exhausted;
                }
            }
        }
    }

    async fn populate_attempt(
        &self,
        hash: &QueryHash,
        ts: Timestamp,
        rows: &[Vec<u8>],
    ) -> Result<PopulateOutcome, StoreError> {
        let mut tx = self.store().begin()?;
        let status_key = StatusKey::new(*hash).encode();

        let Some(bytes) = tx.get(&status_key).await? else {
            debug!(%hash, claim_ts = ts, "status vanished mid-fetch");
            return Ok(PopulateOutcome::Vanished);
        };
        let record = decode_record(&bytes)?;
        if record.ts > ts {
            debug!(%hash, claim_ts = ts, stored_ts = record.ts, "claim superseded");
            return Ok(PopulateOutcome::Superseded);
        }

        let (row_begin, row_end) = row_range(*hash);
        tx.clear_range(&row_begin, &row_end);
        for (seq, row) in rows.iter().enumerate() {
            tx.set(&RowKey::new(*hash, seq as u32).encode(), row);
        }
        let count = rows.len() as i32;
        tx.set(
            &status_key,
            &StatusRecord::ready(ts, count, record.query_text).encode(),
        );
        tx.commit().await?;

        debug!(%hash, rows = count, ts, "rows populated, claim released");
        Ok(PopulateOutcome::Stored { rows: count })
    }

    /// Read the row set stored by the populate of epoch `ts`.
    ///
    /// Single transaction, no retry loop; retrying on a transient
    /// [`RetrieveError::Store`] is the caller's decision. The epoch guard
    /// rejects rows from a different fetch than the one the caller
    /// observed.
    pub async fn retrieve(
        &self,
        hash: &QueryHash,
        ts: Timestamp,
    ) -> Result<Vec<Vec<u8>>, RetrieveError> {
        let mut tx = self.store().begin()?;
        let status_key = StatusKey::new(*hash).encode();

        let bytes = tx
            .get(&status_key)
            .await?
            .ok_or(RetrieveError::Absent)?;
        let record = StatusRecord::decode(&bytes)?;
        if record.ts != ts {
            return Err(RetrieveError::EpochMismatch {
                expected: ts,
                stored: record.ts,
            });
        }
        let expected = match record.status {
            QueryStatus::Fetching => return Err(RetrieveError::StillFetching),
            QueryStatus::Ready(rows) => rows,
        };

        let (row_begin, row_end) = row_range(*hash);
        let (entries, _more) = tx
            .range(&row_begin, &row_end, RangeOptions::default())
            .await?;
        tx.commit().await?;

        if entries.len() != expected as usize {
            warn!(
                %hash,
                expected,
                actual = entries.len(),
                "row range does not match status row count"
            );
            return Err(RetrieveError::RowCountMismatch {
                expected,
                actual: entries.len(),
            });
        }
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }
}
