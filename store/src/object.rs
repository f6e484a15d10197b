//! Object storage trait.

use chainwire_types::ObjectId;

use crate::StoreError;

/// Key-based storage for big objects (blocks, transactions).
///
/// Follows the shared service life-cycle: `stop` keeps configuration and
/// contents, `destroy` is terminal.
pub trait ObjectStore: Send + Sync {
    fn start(&self) -> Result<(), StoreError>;

    fn stop(&self) -> Result<(), StoreError>;

    /// Release every retained resource. The store cannot be started again.
    fn destroy(&self) -> Result<(), StoreError>;

    /// Store an object, replacing any previous value under the same id.
    fn save(&self, id: &ObjectId, object: &[u8]) -> Result<(), StoreError>;

    /// Remove an object. Removing a missing id is not an error.
    fn remove(&self, id: &ObjectId) -> Result<(), StoreError>;

    /// Retrieve a whole object.
    fn get(&self, id: &ObjectId) -> Result<Vec<u8>, StoreError>;

    fn contains(&self, id: &ObjectId) -> Result<bool, StoreError>;

    /// Remove every object.
    fn clear(&self) -> Result<(), StoreError>;

    /// Reclaim space. Backends without compaction keep the default.
    fn compact(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Size of a stored object in bytes.
    fn size(&self, id: &ObjectId) -> Result<u64, StoreError> {
        Ok(self.get(id)?.len() as u64)
    }

    /// Read at most `len` bytes starting at `offset`.
    ///
    /// The default loads the whole object; backends able to seek should
    /// override it so cursors stay within their memory window.
    fn read_range(&self, id: &ObjectId, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
        let object = self.get(id)?;
        let start = (offset as usize).min(object.len());
        let end = start.saturating_add(len).min(object.len());
        Ok(object[start..end].to_vec())
    }
}
