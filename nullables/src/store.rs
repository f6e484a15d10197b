//! Nullable store: a [`MemoryStore`] with fault injection and call counting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chainwire_store::{MemoryStore, MetadataStore, ObjectStore, StoreError};
use chainwire_types::{ObjectId, Service, ServiceState};

/// An in-memory [`ObjectStore`] + [`MetadataStore`] for testing.
///
/// `set_fail_saves(true)` makes every save return a backend error, and
/// `range_reads` counts `read_range` calls so cursor tests can check they
/// stayed windowed.
#[derive(Default)]
pub struct NullStore {
    inner: MemoryStore,
    fail_saves: AtomicBool,
    range_reads: AtomicUsize,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn range_reads(&self) -> usize {
        self.range_reads.load(Ordering::SeqCst)
    }
}

impl Service for NullStore {
    fn service_name(&self) -> &str {
        "null-store"
    }

    fn service_state(&self) -> ServiceState {
        self.inner.service_state()
    }
}

impl ObjectStore for NullStore {
    fn start(&self) -> Result<(), StoreError> {
        self.inner.start()
    }

    fn stop(&self) -> Result<(), StoreError> {
        self.inner.stop()
    }

    fn destroy(&self) -> Result<(), StoreError> {
        self.inner.destroy()
    }

    fn save(&self, id: &ObjectId, object: &[u8]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("save disabled".into()));
        }
        self.inner.save(id, object)
    }

    fn remove(&self, id: &ObjectId) -> Result<(), StoreError> {
        self.inner.remove(id)
    }

    fn get(&self, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
        self.inner.get(id)
    }

    fn contains(&self, id: &ObjectId) -> Result<bool, StoreError> {
        self.inner.contains(id)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }

    fn size(&self, id: &ObjectId) -> Result<u64, StoreError> {
        self.inner.size(id)
    }

    fn read_range(&self, id: &ObjectId, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
        self.range_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_range(id, offset, len)
    }
}

impl MetadataStore for NullStore {
    fn save_metadata(&self, id: &ObjectId, metadata: &[u8]) -> Result<(), StoreError> {
        self.inner.save_metadata(id, metadata)
    }

    fn get_metadata(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get_metadata(id)
    }

    fn remove_metadata(&self, id: &ObjectId) -> Result<(), StoreError> {
        self.inner.remove_metadata(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_saves_leave_the_store_untouched() {
        let store = NullStore::new();
        store.set_fail_saves(true);
        assert!(matches!(
            store.save(&ObjectId::new("a"), b"1"),
            Err(StoreError::Backend(_))
        ));
        assert!(store.is_empty());
        store.set_fail_saves(false);
        store.save(&ObjectId::new("a"), b"1").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn range_reads_are_counted() {
        let store = NullStore::new();
        let id = ObjectId::new("obj");
        store.save(&id, b"abcdef").unwrap();
        store.read_range(&id, 0, 2).unwrap();
        store.read_range(&id, 2, 2).unwrap();
        assert_eq!(store.range_reads(), 2);
        assert_eq!(store.get(&id).unwrap(), b"abcdef");
    }

    #[test]
    fn stopped_store_reports_not_running() {
        let store = NullStore::new();
        store.stop().unwrap();
        assert_eq!(store.get(&ObjectId::new("a")), Err(StoreError::NotRunning));
        assert_eq!(store.service_state(), ServiceState::Stopped);
    }
}
