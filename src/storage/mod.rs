//! Access to the external sorted-file engine.
//!
//! The index consumes exactly four capabilities of the engine that produced
//! the data files: enumerating a column family's files, iterating a file in
//! key order, scanning a file for keys holding a given value, and point
//! lookups by (column, key). Anything satisfying [`Storage`] can back an
//! index; [`DirStore`] implements it over a directory of sorted run files.

pub mod dir;
pub mod sstable;

pub use dir::DirStore;

use crate::error::Result;

/// A source of sorted immutable key/value files, one series per column
/// family. Implementations must tolerate concurrent read calls from multiple
/// worker threads.
pub trait Storage: Send + Sync + 'static {
    /// Ordered list of file paths holding the column family's records.
    fn list_files(&self, column: &str) -> Result<Vec<String>>;

    /// Keys in `[range_start, range_end]` (inclusive; empty string meaning
    /// unbounded on that side) whose stored value equals `value`.
    fn scan_file(
        &self,
        path: &str,
        value: &str,
        range_start: &str,
        range_end: &str,
    ) -> Result<Vec<String>>;

    /// The value stored for `key` in `column`, if any.
    fn point_get(&self, column: &str, key: &str) -> Result<Option<String>>;

    /// Ordered (key, value) stream over a whole file. Used by the index
    /// builder when partitioning.
    fn iterate_file(
        &self,
        path: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(String, String)>> + Send>>;
}
