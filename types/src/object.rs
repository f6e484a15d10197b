//! Object identifier for big objects (block hashes, transaction ids).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque string key identifying one big object, both for chunked transport
/// and for storage.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id from a 32-byte hash, hex encoded.
    pub fn from_hash(hash: &[u8; 32]) -> Self {
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hash_is_lowercase_hex() {
        let id = ObjectId::from_hash(&[0xab; 32]);
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().starts_with("abab"));
    }

    #[test]
    fn bincode_roundtrip() {
        let id = ObjectId::new("block-1");
        let bytes = bincode::serialize(&id).unwrap();
        let back: ObjectId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, id);
    }
}
