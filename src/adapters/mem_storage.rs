//! In-memory storage adapter with failure injection.
//!
//! The host-side stand-in for the SD card: files live in a map, and tests
//! can script write failures to exercise the logger's health counter and
//! the supervisor's run-halt gate.

use std::collections::BTreeMap;

use crate::app::ports::StoragePort;
use crate::error::StorageError;

/// Memory-backed [`StoragePort`].
pub struct MemStorage {
    files: BTreeMap<String, Vec<u8>>,
    /// Remaining injected failures; each write attempt consumes one.
    fail_budget: u32,
    /// When set, every write fails regardless of the budget.
    offline: bool,
    writes_attempted: u64,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            fail_budget: 0,
            offline: false,
            writes_attempted: 0,
        }
    }

    /// Fail the next `n` write attempts.
    pub fn fail_next(&mut self, n: u32) {
        self.fail_budget = n;
    }

    /// Take the medium offline (every write fails) or back online.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Stored contents of `path`, if the file exists.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Paths of every stored file, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Total write attempts, including failed ones.
    pub fn writes_attempted(&self) -> u64 {
        self.writes_attempted
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePort for MemStorage {
    fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        self.writes_attempted += 1;
        if self.offline {
            return Err(StorageError::Unavailable);
        }
        if self.fail_budget > 0 {
            self.fail_budget -= 1;
            return Err(StorageError::WriteFailed);
        }
        self.files.insert(name.to_string(), contents.to_vec());
        Ok(())
    }
}
