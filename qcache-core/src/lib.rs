//! qcache-core - Wire Types for the Shared Query-Result Cache
//!
//! Pure data layer for the qcache protocol: content hash, binary key and
//! value codecs, the persisted status model, per-operation outcome types,
//! the error taxonomy, and the shared retry policy. Store backends live in
//! `qcache-store`; the coordination protocol lives in `qcache`.
//!
//! # Persisted Byte Layout
//!
//! | Entry | Bytes |
//! |---|---|
//! | status key | tag `PGCQ` + 20-byte SHA-1 digest (24 bytes) |
//! | status value | LE i64 ts + LE i32 status + LE i32 text length L + (L+1) bytes nul-terminated text |
//! | row key | tag `TUPL` + 20-byte SHA-1 digest + BE u32 sequence (28 bytes) |
//! | row value | opaque caller-defined payload |

pub mod error;
pub mod hash;
pub mod keys;
pub mod record;
pub mod retry;
pub mod status;

pub use error::{CodecError, StoreError};
pub use hash::{HashError, QueryHash, HASH_LEN};
pub use keys::{
    row_range, status_namespace_range, RowKey, StatusKey, ROW_KEY_LEN, ROW_TAG, STATUS_KEY_LEN,
    STATUS_TAG, STATUS_TAG_END,
};
pub use record::StatusRecord;
pub use retry::RetryPolicy;
pub use status::{
    PopulateOutcome, QueryStatus, RetrieveError, StatusOutcome, FETCHING_CODE,
};

/// Microseconds since the Unix epoch.
///
/// The protocol never interprets timestamps beyond ordering and addition of
/// a staleness window; callers supply `now` and receive it back as the fetch
/// epoch.
pub type Timestamp = i64;

/// Current wall-clock time as a protocol timestamp.
pub fn now_micros() -> Timestamp {
    chrono::Utc::now().timestamp_micros()
}
