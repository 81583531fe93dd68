//! Directory-backed [`Storage`] implementation.
//!
//! Layout: one subdirectory per column family under a root directory, with
//! the column's sorted run files (`*.sst`) inside. Files are produced by the
//! external engine (or by tests through [`sstable::Writer`]); this store only
//! ever reads them.

use std::path::PathBuf;

use itertools::Itertools;

use super::sstable::Reader;
use super::Storage;
use crate::error::Result;

/// A read-only view over a directory tree of sorted run files.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens a store rooted at `root`. The directory is created if absent so
    /// an engine can start populating it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory holding `column`'s run files.
    pub fn column_path(&self, column: &str) -> PathBuf {
        self.root.join(column)
    }
}

impl Storage for DirStore {
    fn list_files(&self, column: &str) -> Result<Vec<String>> {
        let dir = self.column_path(column);
        let files: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension().is_some_and(|ext| ext == "sst") {
                    Some(path.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .sorted()
            .collect();
        tracing::debug!(column, count = files.len(), "listed run files");
        Ok(files)
    }

    fn scan_file(
        &self,
        path: &str,
        value: &str,
        range_start: &str,
        range_end: &str,
    ) -> Result<Vec<String>> {
        let reader = Reader::open(path)?;
        let mut keys = Vec::new();
        for entry in reader.scan(range_start, range_end)? {
            let (key, stored) = entry?;
            if stored == value {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn point_get(&self, column: &str, key: &str) -> Result<Option<String>> {
        for path in self.list_files(column)? {
            if let Some(value) = Reader::open(&path)?.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn iterate_file(
        &self,
        path: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(String, String)>> + Send>> {
        let reader = Reader::open(path)?;
        Ok(Box::new(reader.iter()?))
    }
}
