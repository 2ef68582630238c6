//! Persisted status model and per-operation outcomes.
//!
//! The persisted status is a disjoint enum: a key is either mid-fetch or
//! ready with a row count. Failure conditions are modeled as out-of-band
//! outcome variants and are never written to the store, so they cannot
//! collide with persisted codes.

use crate::error::{CodecError, StoreError};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire code marking a claimed key whose fetch is in progress.
pub const FETCHING_CODE: i32 = -1;

/// Persistable state of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    /// A session holds the claim and is fetching.
    Fetching,
    /// The fetch completed; the row range holds exactly this many entries.
    Ready(i32),
}

impl QueryStatus {
    /// The int32 wire representation.
    pub fn wire_code(self) -> i32 {
        match self {
            QueryStatus::Fetching => FETCHING_CODE,
            QueryStatus::Ready(rows) => rows,
        }
    }

    /// Parse the int32 wire representation.
    ///
    /// Negative codes other than the fetching marker are failure sentinels
    /// that must never be persisted; reading one back is a codec error.
    pub fn from_wire(code: i32) -> Result<Self, CodecError> {
        match code {
            FETCHING_CODE => Ok(QueryStatus::Fetching),
            rows if rows >= 0 => Ok(QueryStatus::Ready(rows)),
            _ => Err(CodecError::StatusOutOfBand { code }),
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self, QueryStatus::Fetching)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, QueryStatus::Ready(_))
    }

    /// Row count for a ready status.
    pub fn row_count(&self) -> Option<i32> {
        match self {
            QueryStatus::Ready(rows) => Some(*rows),
            QueryStatus::Fetching => None,
        }
    }
}

/// Result of one `get_status` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The caller was granted the claim and must perform the fetch.
    /// `claim_ts` is the fetch epoch for the later populate/retrieve calls.
    Fetch { claim_ts: Timestamp },
    /// The key is ready: `rows` entries were stored at `ts`.
    Ready { rows: i32, ts: Timestamp },
    /// The bounded retry loop ran out of attempts.
    Exhausted,
}

impl StatusOutcome {
    pub fn is_fetch(&self) -> bool {
        matches!(self, StatusOutcome::Fetch { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StatusOutcome::Ready { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, StatusOutcome::Exhausted)
    }
}

/// Result of one `populate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// Rows and status committed; watchers are released.
    Stored { rows: i32 },
    /// A newer claim owns the key; this attempt's results were discarded.
    /// Never retried.
    Superseded,
    /// The status entry disappeared mid-fetch (invalidated). Never retried.
    Vanished,
    /// The row set exceeds the representable row count. Rejected before any
    /// store call; never retried.
    TooLarge,
    /// Transient commit conflicts outlasted the retry cap.
    Exhausted,
}

impl PopulateOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PopulateOutcome::Stored { .. })
    }

    /// Whether retrying the same populate call can ever succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PopulateOutcome::Superseded | PopulateOutcome::Vanished | PopulateOutcome::TooLarge
        )
    }
}

/// Failures of one `retrieve` call.
///
/// Retrieve runs a single transaction with no retry loop; retrying is the
/// caller's decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// No status entry exists for the hash.
    #[error("No status entry for this hash")]
    Absent,

    /// The stored record belongs to a different fetch epoch.
    #[error("Fetch epoch mismatch: expected {expected}, stored {stored}")]
    EpochMismatch {
        expected: Timestamp,
        stored: Timestamp,
    },

    /// The fetch has not completed; rows are not yet readable.
    #[error("Fetch still in progress")]
    StillFetching,

    /// The row range does not hold the number of entries the status
    /// promises. Fatal consistency violation for this call.
    #[error("Row count mismatch: status says {expected}, range returned {actual}")]
    RowCountMismatch { expected: i32, actual: usize },

    /// The stored status record could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
