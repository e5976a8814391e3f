//! Content addressing for rescued memories.
//!
//! The commit hash is the SHA-256 of the memory text and nothing else. It is the
//! dedup key on every backend and the storage identity of a record.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex-encoded SHA-256 digest of a memory's text.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    /// Hash the given text.
    #[must_use]
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    /// Borrow the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic UUID for stores that require UUID point ids.
    ///
    /// Built from the first 16 digest bytes, so equal hashes always map to the same point.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        let mut bytes = [0_u8; 16];
        if let Ok(decoded) = hex::decode(&self.0) {
            for (slot, byte) in bytes.iter_mut().zip(decoded) {
                *slot = byte;
            }
        }
        Uuid::from_bytes(bytes)
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
