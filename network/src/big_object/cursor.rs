//! Bounded-memory reads over a stored object.

use std::sync::Arc;

use chainwire_store::{ObjectStore, StoreError};
use chainwire_types::ObjectId;

use super::chunk::BigCollectionChunk;

/// Walks a stored object window by window, never holding more than one
/// window in memory (given a store that implements `read_range`).
pub struct ObjectCursor {
    store: Arc<dyn ObjectStore>,
    id: ObjectId,
    window: usize,
    size: u64,
    offset: u64,
    next_ordinal: u32,
}

impl ObjectCursor {
    /// Fails with [`StoreError::NotFound`] if the object is not stored.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        id: ObjectId,
        window: usize,
    ) -> Result<Self, StoreError> {
        let size = store.size(&id)?;
        Ok(Self {
            store,
            id,
            window: window.max(1),
            size,
            offset: 0,
            next_ordinal: 0,
        })
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}

impl Iterator for ObjectCursor {
    type Item = Result<BigCollectionChunk<u8>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.size {
            return None;
        }
        let items = match self.store.read_range(&self.id, self.offset, self.window) {
            Ok(items) => items,
            Err(e) => {
                self.offset = self.size;
                return Some(Err(e));
            }
        };
        if items.is_empty() {
            // object shrank underneath us
            self.offset = self.size;
            return None;
        }
        self.offset += items.len() as u64;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Some(Ok(BigCollectionChunk { items, ordinal }))
    }
}
