//! Error taxonomy for the cache protocol.
//!
//! Every store-layer failure is converted into [`StoreError`] at the backend
//! boundary; no raw backend error type crosses a component boundary. The
//! [`StoreError::is_transient`] classification drives the shared retry
//! policy: transient errors are retried up to the attempt cap, everything
//! else fails the operation immediately.

use thiserror::Error;

/// Failures reported by the transactional store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic commit validation failed: another transaction wrote a key
    /// this transaction read.
    #[error("Transaction conflict")]
    Conflict,

    /// The store did not answer within its own deadline.
    #[error("Store operation timed out: {operation}")]
    Timeout { operation: String },

    /// The store is temporarily unreachable.
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Backend-reported failure that retrying will not fix.
    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    /// A registered watch can no longer be delivered.
    #[error("Watch lost: {reason}")]
    WatchLost { reason: String },

    /// The store handle has been shut down.
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    /// Whether a fresh transaction attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict
                | StoreError::Timeout { .. }
                | StoreError::Unavailable { .. }
                | StoreError::WatchLost { .. }
        )
    }
}

/// Failures decoding a persisted status record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer is shorter than the fixed record header.
    #[error("Status record truncated: need at least {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    /// The text-length field is negative.
    #[error("Status record has negative text length {got}")]
    NegativeTextLength { got: i32 },

    /// The buffer length does not match the encoded text length.
    #[error("Status record length mismatch: header says {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// The terminating nul byte after the text is missing.
    #[error("Status record text is not nul-terminated")]
    MissingNul,

    /// The stored text is not valid UTF-8.
    #[error("Status record text is not UTF-8: {reason}")]
    InvalidText { reason: String },

    /// The status code is neither a row count nor the fetching marker.
    #[error("Status code {code} is not a persistable status")]
    StatusOutOfBand { code: i32 },
}
