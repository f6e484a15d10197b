//! Caller-owned metadata attached to stored objects.
//!
//! The transport core never interprets metadata; it is persisted as opaque
//! bytes next to the object id.

use chainwire_types::ObjectId;
use serde::{de::DeserializeOwned, Serialize};

use crate::StoreError;

/// Storage for opaque metadata keyed by object id.
pub trait MetadataStore: Send + Sync {
    /// Store metadata for an object, replacing any previous value.
    fn save_metadata(&self, id: &ObjectId, metadata: &[u8]) -> Result<(), StoreError>;

    /// Retrieve metadata, `None` if nothing is attached.
    fn get_metadata(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove metadata. Removing missing metadata is not an error.
    fn remove_metadata(&self, id: &ObjectId) -> Result<(), StoreError>;
}

/// Encode a caller metadata value into opaque bytes.
pub fn encode_metadata<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode bytes produced by [`encode_metadata`].
pub fn decode_metadata<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
