//! Block storage access
//!
//! The streaming pipeline reads compressed bytes through these traits so the
//! same scheduler runs against a real folder ([`FsStorage`]) or in-memory
//! blobs ([`MemoryStorage`]).
//!
//! Contract: `read` fills as much of the buffer as it can; a read returning
//! fewer bytes than requested means end-of-data, not an error.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use crate::error::Result;

/// One entry in a storage listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub size: u64,
}

/// Opens named resources on block storage
pub trait StorageReader: Send + Sync {
    /// Open a resource for sequential reading
    ///
    /// # Errors
    /// `Error::StorageOpen` if the resource is missing or unreadable.
    fn open(&self, id: &str) -> Result<Box<dyn StorageHandle>>;

    /// Resources available at the storage root, sorted by name
    fn list(&self) -> Result<Vec<StorageEntry>>;
}

/// An open resource. Owned by the producer context only.
pub trait StorageHandle: Send {
    /// Read up to `buf.len()` bytes. Short reads signal end-of-data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Total size in bytes
    fn size(&self) -> u64;

    /// Release the resource. Further reads fail; calling twice is harmless.
    fn close(&mut self);
}
