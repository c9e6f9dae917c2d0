//! store.rs
//!
//! Whole-file UTF-8 read/write behind a trait so the heal loop can run
//! against an in-memory store in tests.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for StoreError {}

pub trait FileStore: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, StoreError>;
    fn write(&self, path: &Path, text: &str) -> Result<(), StoreError>;
}

pub struct FsStore;

impl FileStore for FsStore {
    fn read(&self, path: &Path) -> Result<String, StoreError> {
        fs::read_to_string(path).map_err(|e| StoreError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), StoreError> {
        fs::write(path, text).map_err(|e| StoreError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
