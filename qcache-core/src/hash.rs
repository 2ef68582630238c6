//! Content hash identifying one cached query.
//!
//! A [`QueryHash`] is the SHA-1 digest of the query text and is the sole
//! identity of a cache entry. The newtype makes malformed hashes
//! unrepresentable: every constructor validates length and encoding before
//! the value can reach a store key.

use sha1::{Digest, Sha1};
use std::fmt;
use thiserror::Error;

/// Length of a query content hash in bytes (SHA-1 digest).
pub const HASH_LEN: usize = 20;

/// Errors from constructing a [`QueryHash`] out of untrusted input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HashError {
    /// The byte slice was not exactly [`HASH_LEN`] bytes.
    #[error("Hash must be {HASH_LEN} bytes, got {got}")]
    WrongLength { got: usize },

    /// The hex string could not be decoded.
    #[error("Invalid hex hash: {reason}")]
    InvalidHex { reason: String },
}

/// 160-bit content hash of a query text.
///
/// Identity of one cache entry: status entry and row entries for a query are
/// associated only by sharing this digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHash([u8; HASH_LEN]);

impl QueryHash {
    /// Hash a query text.
    pub fn of_query_text(query: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(query.as_bytes());
        let digest = hasher.finalize();
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&digest);
        Self(hash)
    }

    /// Build a hash from raw digest bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != HASH_LEN {
            return Err(HashError::WrongLength { got: bytes.len() });
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(bytes);
        Ok(Self(hash))
    }

    /// Build a hash from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHex {
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for QueryHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for QueryHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
