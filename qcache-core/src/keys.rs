//! Binary key codec for status and row entries.
//!
//! # Binary Format
//!
//! Status key, fixed 24 bytes:
//! - Bytes 0-3: namespace tag `PGCQ`
//! - Bytes 4-23: SHA-1 digest of the query text
//!
//! Row key, fixed 28 bytes:
//! - Bytes 0-3: namespace tag `TUPL`
//! - Bytes 4-23: SHA-1 digest of the query text
//! - Bytes 24-27: sequence number, big-endian u32
//!
//! The sequence number is big-endian so the store's lexicographic key order
//! equals numeric sequence order: a range scan over one hash returns rows in
//! sequence order without sorting.

use crate::hash::{QueryHash, HASH_LEN};

/// Namespace tag prefixing every status key.
pub const STATUS_TAG: &[u8; 4] = b"PGCQ";

/// Exclusive upper bound for scanning the whole status namespace.
pub const STATUS_TAG_END: &[u8; 4] = b"PGCZ";

/// Namespace tag prefixing every row key.
pub const ROW_TAG: &[u8; 4] = b"TUPL";

/// Encoded status key length.
pub const STATUS_KEY_LEN: usize = 4 + HASH_LEN;

/// Encoded row key length.
pub const ROW_KEY_LEN: usize = 4 + HASH_LEN + 4;

/// Key of the status entry for one cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusKey {
    hash: QueryHash,
}

impl StatusKey {
    pub fn new(hash: QueryHash) -> Self {
        Self { hash }
    }

    pub fn hash(&self) -> QueryHash {
        self.hash
    }

    /// Encode to the fixed 24-byte wire form.
    pub fn encode(&self) -> [u8; STATUS_KEY_LEN] {
        let mut bytes = [0u8; STATUS_KEY_LEN];
        bytes[0..4].copy_from_slice(STATUS_TAG);
        bytes[4..].copy_from_slice(self.hash.as_bytes());
        bytes
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if the length or namespace tag is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != STATUS_KEY_LEN || &bytes[0..4] != STATUS_TAG {
            return None;
        }
        let hash = QueryHash::from_bytes(&bytes[4..]).ok()?;
        Some(Self { hash })
    }
}

/// Key of one row entry of one cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowKey {
    hash: QueryHash,
    seq: u32,
}

impl RowKey {
    pub fn new(hash: QueryHash, seq: u32) -> Self {
        Self { hash, seq }
    }

    pub fn hash(&self) -> QueryHash {
        self.hash
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Encode to the fixed 28-byte wire form.
    pub fn encode(&self) -> [u8; ROW_KEY_LEN] {
        let mut bytes = [0u8; ROW_KEY_LEN];
        bytes[0..4].copy_from_slice(ROW_TAG);
        bytes[4..4 + HASH_LEN].copy_from_slice(self.hash.as_bytes());
        bytes[4 + HASH_LEN..].copy_from_slice(&self.seq.to_be_bytes());
        bytes
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if the length or namespace tag is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ROW_KEY_LEN || &bytes[0..4] != ROW_TAG {
            return None;
        }
        let hash = QueryHash::from_bytes(&bytes[4..4 + HASH_LEN]).ok()?;
        let seq = u32::from_be_bytes(bytes[4 + HASH_LEN..].try_into().ok()?);
        Some(Self { hash, seq })
    }
}

/// Scan bounds covering every status entry: `["PGCQ", "PGCZ")`.
pub fn status_namespace_range() -> (&'static [u8], &'static [u8]) {
    (STATUS_TAG, STATUS_TAG_END)
}

/// Scan bounds covering every row of one hash.
///
/// Begin is sequence 0; end is the same prefix followed by `0xFFFFFFFF`, an
/// exclusive "all sequences" upper bound. Sequence `u32::MAX` is therefore
/// reserved and never assigned to a row.
pub fn row_range(hash: QueryHash) -> ([u8; ROW_KEY_LEN], [u8; ROW_KEY_LEN]) {
    let begin = RowKey::new(hash, 0).encode();
    let mut end = begin;
    end[4 + HASH_LEN..].copy_from_slice(&[0xFF; 4]);
    (begin, end)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn hash_strategy() -> impl Strategy<Value = QueryHash> {
        any::<[u8; HASH_LEN]>()
            .prop_map(|bytes| QueryHash::from_bytes(&bytes).expect("fixed-size digest"))
    }

    proptest! {
        /// Encode/decode roundtrip preserves the original key.
        #[test]
        fn prop_status_key_roundtrip(hash in hash_strategy()) {
            let key = StatusKey::new(hash);
            prop_assert_eq!(StatusKey::decode(&key.encode()), Some(key));
        }

        /// Encode/decode roundtrip preserves the original row key.
        #[test]
        fn prop_row_key_roundtrip(hash in hash_strategy(), seq in any::<u32>()) {
            let key = RowKey::new(hash, seq);
            prop_assert_eq!(RowKey::decode(&key.encode()), Some(key));
        }

        /// Encoding is injective over (hash, seq).
        #[test]
        fn prop_row_key_injective(
            h1 in hash_strategy(),
            h2 in hash_strategy(),
            s1 in any::<u32>(),
            s2 in any::<u32>(),
        ) {
            let k1 = RowKey::new(h1, s1);
            let k2 = RowKey::new(h2, s2);
            if k1 == k2 {
                prop_assert_eq!(k1.encode(), k2.encode());
            } else {
                prop_assert_ne!(k1.encode(), k2.encode());
            }
        }

        /// Lexicographic order of encoded row keys equals numeric sequence order.
        #[test]
        fn prop_row_key_order_matches_sequence(
            hash in hash_strategy(),
            s1 in 0..u32::MAX - 1,
            s2 in 0..u32::MAX - 1,
        ) {
            let k1 = RowKey::new(hash, s1).encode();
            let k2 = RowKey::new(hash, s2).encode();
            prop_assert_eq!(k1.cmp(&k2), s1.cmp(&s2));
        }

        /// Every assignable row key falls inside its hash's row range and
        /// outside every other hash's row range.
        #[test]
        fn prop_row_range_isolation(
            h1 in hash_strategy(),
            h2 in hash_strategy(),
            seq in 0..u32::MAX - 1,
        ) {
            let key = RowKey::new(h1, seq).encode();
            let (begin, end) = row_range(h1);
            prop_assert!(key[..] >= begin[..] && key[..] < end[..]);

            if h1 != h2 {
                let (begin, end) = row_range(h2);
                prop_assert!(key[..] < begin[..] || key[..] >= end[..]);
            }
        }
    }
}
