//! Thread-safe in-memory object and metadata storage.
//!
//! Contents live as long as the store; a daemon using it starts empty after
//! every restart of the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chainwire_types::{Lifecycle, ObjectId, Service, ServiceError, ServiceState};

use crate::{MetadataStore, ObjectStore, StoreError};

#[derive(Default)]
struct Contents {
    objects: HashMap<ObjectId, Vec<u8>>,
    metadata: HashMap<ObjectId, Vec<u8>>,
}

/// An [`ObjectStore`] + [`MetadataStore`] held in process memory.
///
/// Starts in RUNNING. `stop` keeps the contents; `destroy` drops them.
pub struct MemoryStore {
    lifecycle: Mutex<Lifecycle>,
    contents: Mutex<Contents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut lifecycle = Lifecycle::new();
        let _ = lifecycle.begin_start();
        let _ = lifecycle.mark_running();
        Self {
            lifecycle: Mutex::new(lifecycle),
            contents: Mutex::new(Contents::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.contents().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contents(&self) -> MutexGuard<'_, Contents> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_running(&self) -> Result<(), StoreError> {
        match self.lifecycle().state() {
            ServiceState::Running => Ok(()),
            ServiceState::Destroyed => Err(StoreError::Destroyed),
            _ => Err(StoreError::NotRunning),
        }
    }
}

fn lifecycle_error(e: ServiceError) -> StoreError {
    match e {
        ServiceError::Destroyed => StoreError::Destroyed,
        other => StoreError::Backend(other.to_string()),
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for MemoryStore {
    fn service_name(&self) -> &str {
        "memory-store"
    }

    fn service_state(&self) -> ServiceState {
        self.lifecycle().state()
    }
}

impl ObjectStore for MemoryStore {
    fn start(&self) -> Result<(), StoreError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.begin_start().map_err(lifecycle_error)? {
            lifecycle
                .mark_running()
                .map_err(lifecycle_error)?;
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), StoreError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.begin_stop().map_err(lifecycle_error)? {
            lifecycle
                .mark_stopped()
                .map_err(lifecycle_error)?;
        }
        Ok(())
    }

    fn destroy(&self) -> Result<(), StoreError> {
        self.lifecycle().destroy();
        *self.contents() = Contents::default();
        Ok(())
    }

    fn save(&self, id: &ObjectId, object: &[u8]) -> Result<(), StoreError> {
        self.ensure_running()?;
        self.contents().objects.insert(id.clone(), object.to_vec());
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> Result<(), StoreError> {
        self.ensure_running()?;
        self.contents().objects.remove(id);
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
        self.ensure_running()?;
        self.contents()
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn contains(&self, id: &ObjectId) -> Result<bool, StoreError> {
        self.ensure_running()?;
        Ok(self.contents().objects.contains_key(id))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.ensure_running()?;
        *self.contents() = Contents::default();
        Ok(())
    }

    fn size(&self, id: &ObjectId) -> Result<u64, StoreError> {
        self.ensure_running()?;
        self.contents()
            .objects
            .get(id)
            .map(|o| o.len() as u64)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn read_range(&self, id: &ObjectId, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
        self.ensure_running()?;
        let contents = self.contents();
        let object = contents
            .objects
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(object.len());
        let end = start.saturating_add(len).min(object.len());
        Ok(object[start..end].to_vec())
    }
}

impl MetadataStore for MemoryStore {
    fn save_metadata(&self, id: &ObjectId, metadata: &[u8]) -> Result<(), StoreError> {
        self.ensure_running()?;
        self.contents().metadata.insert(id.clone(), metadata.to_vec());
        Ok(())
    }

    fn get_metadata(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_running()?;
        Ok(self.contents().metadata.get(id).cloned())
    }

    fn remove_metadata(&self, id: &ObjectId) -> Result<(), StoreError> {
        self.ensure_running()?;
        self.contents().metadata.remove(id);
        Ok(())
    }
}
