//! Filesystem storage adapter.
//!
//! Maps the [`StoragePort`] onto a host directory tree: one directory per
//! experiment, one file per record, mirroring the SD card layout used on
//! the device. Writes are flushed before success is reported so the
//! logger's append-after-durable-write contract holds.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use log::warn;

use crate::app::ports::StoragePort;
use crate::error::StorageError;

/// [`StoragePort`] backed by a root directory.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl StoragePort for FsStorage {
    fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                warn!("Could not create {}", parent.display());
                return Err(StorageError::Unavailable);
            }
        }
        let mut file = fs::File::create(&path).map_err(|e| {
            warn!("Create failed for {}: {e}", path.display());
            StorageError::WriteFailed
        })?;
        file.write_all(contents)
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                warn!("Write failed for {}: {e}", path.display());
                StorageError::WriteFailed
            })
    }
}
