// SPDX-License-Identifier: Apache-2.0
//! Disk-backed content-addressed asset store for Atrium.
//!
//! `atrium-cas` stores opaque blobs in a flat directory, each file named by
//! the lowercase hex of its SHA-256. Identity is content-only: two blobs
//! with identical bytes are the same asset regardless of what any mapping
//! calls them, and deduplication falls out of the naming scheme.
//!
//! # Concurrency Model
//!
//! Content files are immutable once written — a file named by a hash either
//! holds exactly the bytes that hash to its name or is mid-overwrite by a
//! writer producing those same bytes. Readers therefore take no locks.
//! Concurrent writers of the same hash race benignly (last writer wins with
//! identical content); [`ContentStore::put`] verifies on read-back before
//! reporting success.
//!
//! # Determinism Invariant
//!
//! [`ContentStore::list_all_hashes`] returns a `BTreeSet`, so enumeration
//! order is the hash order, never directory order.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]

mod range;
mod store;

pub use range::ByteRange;
pub use store::ContentStore;

use sha2::{Digest, Sha256};

/// Raw length of a SHA-256 digest in bytes.
pub const SHA256_HASH_LENGTH: usize = 32;

/// Length of a SHA-256 digest in lowercase hex characters.
pub const SHA256_HASH_HEX_LENGTH: usize = 64;

/// A 32-byte SHA-256 content hash.
///
/// Thin newtype over `[u8; 32]`; the inner bytes are public for zero-cost
/// access and the `Display` impl renders lowercase hex, which is also the
/// on-disk file name of the content.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AssetHash(pub [u8; 32]);

impl AssetHash {
    /// View the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (the content file name).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string. Accepts either case, stores canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::InvalidHash`] unless the input is exactly 64 hex
    /// characters.
    pub fn from_hex(input: &str) -> Result<Self, CasError> {
        if input.len() != SHA256_HASH_HEX_LENGTH {
            return Err(CasError::InvalidHash {
                input: input.to_owned(),
            });
        }
        let mut raw = [0u8; SHA256_HASH_LENGTH];
        hex::decode_to_slice(input, &mut raw).map_err(|_| CasError::InvalidHash {
            input: input.to_owned(),
        })?;
        Ok(Self(raw))
    }
}

impl std::fmt::Display for AssetHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AssetHash {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Compute the SHA-256 content hash of `bytes`.
pub fn hash_data(bytes: &[u8]) -> AssetHash {
    let digest = Sha256::digest(bytes);
    let mut raw = [0u8; SHA256_HASH_LENGTH];
    raw.copy_from_slice(&digest);
    AssetHash(raw)
}

/// True if `input` parses as a 64-character hex hash.
pub fn is_valid_hash(input: &str) -> bool {
    input.len() == SHA256_HASH_HEX_LENGTH
        && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Errors that can occur during content store operations.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// A hash string failed the 64-hex check.
    #[error("[CAS_INVALID_HASH] not a 64-hex SHA-256 hash: {input:?}")]
    InvalidHash {
        /// The rejected input.
        input: String,
    },
    /// No content file exists for the hash.
    #[error("[CAS_NOT_FOUND] no content file for {hash}")]
    NotFound {
        /// The missing hash.
        hash: AssetHash,
    },
    /// A byte range cannot be satisfied against the file size.
    #[error("[CAS_INVALID_RANGE] range {from}..{to} cannot be served from {size} bytes")]
    InvalidRange {
        /// Requested start (signed; negative is end-relative).
        from: i64,
        /// Requested end (exclusive).
        to: i64,
        /// Actual file size.
        size: u64,
    },
    /// Bytes read back from disk did not hash to the expected name.
    #[error("[CAS_HASH_MISMATCH] expected {expected}, computed {computed}")]
    HashMismatch {
        /// The hash the file is named by.
        expected: AssetHash,
        /// The hash actually computed from its bytes.
        computed: AssetHash,
    },
    /// Underlying filesystem failure.
    #[error("[CAS_STORAGE_IO] {context}: {source}")]
    StorageIo {
        /// What the store was doing.
        context: &'static str,
        /// The propagated I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl CasError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::StorageIo { context, source }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. hash_data matches the SHA-256 test vector ─────────────────────

    #[test]
    fn hash_data_known_vector() {
        let hash = hash_data(b"hello");
        assert_eq!(
            hash.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    // ── 2. hex round-trip, case-insensitive parse ────────────────────────

    #[test]
    fn hex_round_trip() {
        let hash = hash_data(b"round trip");
        let parsed = AssetHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(parsed, hash);
        let upper = hash.to_hex().to_uppercase();
        assert_eq!(AssetHash::from_hex(&upper).unwrap(), hash);
    }

    // ── 3. Display renders lowercase hex ─────────────────────────────────

    #[test]
    fn display_is_lowercase_hex() {
        let hash = AssetHash([0xAB; 32]);
        let rendered = hash.to_string();
        assert_eq!(rendered.len(), SHA256_HASH_HEX_LENGTH);
        assert_eq!(rendered, "ab".repeat(32));
        assert_eq!(rendered, hash.to_hex());
    }

    // ── 4. hash validation boundaries ────────────────────────────────────

    #[test]
    fn hash_validation() {
        assert!(is_valid_hash(&"a1".repeat(32)));
        assert!(is_valid_hash(&"F0".repeat(32)));
        assert!(!is_valid_hash(""));
        assert!(!is_valid_hash("not-a-valid-hash"));
        assert!(!is_valid_hash(&"a1".repeat(31)));
        assert!(!is_valid_hash(&format!("{}g", "a".repeat(63))));
        assert!(AssetHash::from_hex("zz").is_err());
    }
}
