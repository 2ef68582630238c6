//! Variable-length status value codec.
//!
//! # Binary Format
//!
//! The status value encodes to `16 + L + 1` bytes:
//! - Bytes 0-7: timestamp, little-endian i64 (claim or freshness time)
//! - Bytes 8-11: status code, little-endian i32
//! - Bytes 12-15: text length `L`, little-endian i32
//! - Bytes 16..16+L: diagnostic query text
//! - Byte 16+L: terminating nul
//!
//! Integer fields are little-endian, bit-exact with the original struct
//! image this format is interchange-compatible with.

use crate::error::CodecError;
use crate::status::QueryStatus;
use crate::Timestamp;

/// Fixed header length preceding the text.
const HEADER_LEN: usize = 16;

/// One decoded status entry: timestamp, status, and the query text kept for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    /// Claim time while fetching; freshness time once ready.
    pub ts: Timestamp,
    pub status: QueryStatus,
    pub query_text: String,
}

impl StatusRecord {
    /// Record written when a session takes the claim.
    pub fn claim(ts: Timestamp, query_text: impl Into<String>) -> Self {
        Self {
            ts,
            status: QueryStatus::Fetching,
            query_text: query_text.into(),
        }
    }

    /// Record written when a fetch completes with `rows` entries.
    pub fn ready(ts: Timestamp, rows: i32, query_text: impl Into<String>) -> Self {
        Self {
            ts,
            status: QueryStatus::Ready(rows),
            query_text: query_text.into(),
        }
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Vec<u8> {
        let text = self.query_text.as_bytes();
        let mut bytes = Vec::with_capacity(HEADER_LEN + text.len() + 1);
        bytes.extend_from_slice(&self.ts.to_le_bytes());
        bytes.extend_from_slice(&self.status.wire_code().to_le_bytes());
        bytes.extend_from_slice(&(text.len() as i32).to_le_bytes());
        bytes.extend_from_slice(text);
        bytes.push(0);
        bytes
    }

    /// Decode from the wire form, validating the full layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN + 1 {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN + 1,
                got: bytes.len(),
            });
        }

        let ts = read_le_i64(&bytes[0..8]);
        let code = read_le_i32(&bytes[8..12]);
        let txt_len = read_le_i32(&bytes[12..16]);

        if txt_len < 0 {
            return Err(CodecError::NegativeTextLength { got: txt_len });
        }
        let txt_len = txt_len as usize;

        let expected = HEADER_LEN + txt_len + 1;
        if bytes.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected,
                got: bytes.len(),
            });
        }
        if bytes[expected - 1] != 0 {
            return Err(CodecError::MissingNul);
        }

        let status = QueryStatus::from_wire(code)?;
        let query_text = std::str::from_utf8(&bytes[HEADER_LEN..HEADER_LEN + txt_len])
            .map_err(|e| CodecError::InvalidText {
                reason: e.to_string(),
            })?
            .to_string();

        Ok(Self {
            ts,
            status,
            query_text,
        })
    }
}

/// Read a little-endian i64 from an exactly 8-byte slice.
fn read_le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

/// Read a little-endian i32 from an exactly 4-byte slice.
fn read_le_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    i32::from_le_bytes(buf)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn status_strategy() -> impl Strategy<Value = QueryStatus> {
        prop_oneof![
            Just(QueryStatus::Fetching),
            (0..i32::MAX).prop_map(QueryStatus::Ready),
        ]
    }

    proptest! {
        /// Encode/decode roundtrip preserves the record.
        #[test]
        fn prop_roundtrip(
            ts in any::<i64>(),
            status in status_strategy(),
            text in ".{0,200}",
        ) {
            let record = StatusRecord { ts, status, query_text: text };
            let decoded = StatusRecord::decode(&record.encode());
            prop_assert_eq!(decoded, Ok(record));
        }

        /// Encoded length is exactly header + text + nul.
        #[test]
        fn prop_encoded_length(
            ts in any::<i64>(),
            status in status_strategy(),
            text in ".{0,200}",
        ) {
            let record = StatusRecord { ts, status, query_text: text };
            let text_len = record.query_text.len();
            prop_assert_eq!(record.encode().len(), 16 + text_len + 1);
        }
    }
}
