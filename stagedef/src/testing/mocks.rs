//! In-memory file system.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::io;

use crate::fs::{normalize_path, FileSystem};

/// A [`FileSystem`] holding files in memory.
///
/// Directories are implied by the files below them and can also be added
/// explicitly. Every read is recorded.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    reads: Mutex<Vec<String>>,
}

impl MemoryFileSystem {
    /// Creates an empty file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<str>, contents: impl Into<String>) -> Self {
        self.files
            .insert(normalize_path(path.as_ref()), contents.into());
        self
    }

    /// Adds an empty directory.
    #[must_use]
    pub fn with_dir(mut self, path: impl AsRef<str>) -> Self {
        self.dirs.insert(normalize_path(path.as_ref()));
        self
    }

    /// Returns the paths read so far, in order.
    #[must_use]
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().clone()
    }

    /// Returns how many times `path` was read.
    #[must_use]
    pub fn read_count(&self, path: &str) -> usize {
        let path = normalize_path(path);
        self.reads.lock().iter().filter(|read| **read == path).count()
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.files.contains_key(&path) || self.is_dir(&path)
    }

    fn is_dir(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let prefix = format!("{path}/");
        self.dirs.contains(&path) || self.files.keys().any(|file| file.starts_with(&prefix))
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let path = normalize_path(path);
        self.reads.lock().push(path.clone());
        self.files.get(&path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
        })
    }
}
