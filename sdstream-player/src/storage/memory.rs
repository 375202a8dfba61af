//! In-memory storage for tests and demos

use super::{StorageEntry, StorageHandle, StorageReader};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
struct Blob {
    data: Arc<[u8]>,
    /// Reads that would cross this offset fail
    fail_at: Option<usize>,
}

/// Named byte blobs served through the storage traits
///
/// Tracks how many handles are currently open so tests can check that the
/// producer closes what it opens.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<BTreeMap<String, Blob>>>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.insert_blob(name.into(), data.into(), None);
    }

    /// Insert a blob whose reads fail once they would cross offset `fail_at`
    pub fn insert_failing(&self, name: impl Into<String>, data: impl Into<Vec<u8>>, fail_at: usize) {
        self.insert_blob(name.into(), data.into(), Some(fail_at));
    }

    fn insert_blob(&self, name: String, data: Vec<u8>, fail_at: Option<usize>) {
        let blob = Blob {
            data: Arc::from(data.into_boxed_slice()),
            fail_at,
        };
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, blob);
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl StorageReader for MemoryStorage {
    fn open(&self, id: &str) -> Result<Box<dyn StorageHandle>> {
        let blob = self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::StorageOpen(format!("{}: not found", id)))?;

        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            blob,
            position: 0,
            open: true,
            open_handles: Arc::clone(&self.open_handles),
        }))
    }

    fn list(&self) -> Result<Vec<StorageEntry>> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, blob)| StorageEntry {
                name: name.clone(),
                size: blob.data.len() as u64,
            })
            .collect())
    }
}

struct MemoryHandle {
    blob: Blob,
    position: usize,
    open: bool,
    open_handles: Arc<AtomicUsize>,
}

impl StorageHandle for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::Storage("Read from closed handle".to_string()));
        }
        if let Some(fail_at) = self.blob.fail_at {
            if self.position + buf.len() > fail_at {
                return Err(Error::Storage("Injected read failure".to_string()));
            }
        }

        let end = (self.position + buf.len()).min(self.blob.data.len());
        let count = end - self.position;
        buf[..count].copy_from_slice(&self.blob.data[self.position..end]);
        self.position = end;
        Ok(count)
    }

    fn size(&self) -> u64 {
        self.blob.data.len() as u64
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.close();
    }
}
