//! Filesystem-backed storage rooted at the media folder

use super::{StorageEntry, StorageHandle, StorageReader};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Storage over a directory tree
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a resource id to a path, refusing anything that escapes the root
    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if id.is_empty() || escapes {
            return Err(Error::StorageOpen(format!("Invalid resource name: {}", id)));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageReader for FsStorage {
    fn open(&self, id: &str) -> Result<Box<dyn StorageHandle>> {
        let path = self.resolve(id)?;
        let file = File::open(&path)
            .map_err(|e| Error::StorageOpen(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .map_err(|e| Error::StorageOpen(format!("{}: {}", path.display(), e)))?
            .len();

        debug!("Opened {} ({} bytes)", path.display(), size);
        Ok(Box::new(FsHandle {
            file: Some(file),
            size,
        }))
    }

    fn list(&self) -> Result<Vec<StorageEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(StorageEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

struct FsHandle {
    file: Option<File>,
    size: u64,
}

impl StorageHandle for FsHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Storage("Read from closed handle".to_string()))?;

        // Loop so that a short count really means end-of-file
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Storage(e.to_string())),
            }
        }
        Ok(total)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&mut self) {
        self.file = None;
    }
}
