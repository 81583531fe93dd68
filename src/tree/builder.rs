//! Bulk construction of a column's index tree from its sorted files.

use std::sync::Arc;
use std::time::Instant;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::filter::BloomFilter;
use crate::storage::Storage;
use crate::tree::node::Node;
use crate::tree::BloomTree;

/// Builds [`BloomTree`]s by partitioning each source file into runs of
/// `partition_size` records and composing the resulting leaves by `fanout`.
///
/// Partitioning runs one task per file on the blocking pool; composition is
/// sequential once all file tasks have joined. A file that cannot be opened
/// or iterated is logged and skipped; it contributes no leaves and does not
/// fail the build.
pub struct TreeBuilder {
    config: IndexConfig,
}

impl TreeBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    /// Builds the index tree over `files`, then persists each leaf filter to
    /// a `"<file>_<startKey>_<endKey>"` sidecar for caching and inspection.
    ///
    /// Sidecar names embed raw keys; keys containing path separators are the
    /// caller's responsibility. Sidecar write failures are logged and
    /// non-fatal since sidecars never influence query results.
    pub async fn build<S: Storage>(&self, files: &[String], storage: &Arc<S>) -> Result<BloomTree> {
        let started = Instant::now();

        let mut handles = Vec::with_capacity(files.len());
        for path in files {
            let storage = Arc::clone(storage);
            let config = self.config.clone();
            let path = path.clone();
            handles.push((
                path.clone(),
                tokio::task::spawn_blocking(move || partition_file(storage.as_ref(), &path, &config)),
            ));
        }

        let mut leaves = Vec::new();
        for (path, handle) in handles {
            match handle.await? {
                Ok(nodes) => leaves.extend(nodes),
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "skipping unreadable source file");
                }
            }
        }

        let tree = BloomTree::compose(
            leaves,
            self.config.bloom_bits,
            self.config.hash_count,
            self.config.fanout,
        )?;

        for &id in tree.leaves() {
            let node = tree.node(id);
            if let Some(file) = node.file() {
                let sidecar = format!("{}_{}_{}", file, node.start_key, node.end_key);
                if let Err(e) = node.filter.save(&sidecar) {
                    tracing::warn!(sidecar = %sidecar, error = %e, "failed to persist leaf filter");
                }
            }
        }

        tracing::info!(
            files = files.len(),
            leaves = tree.leaves().len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "built bloom index tree"
        );
        Ok(tree)
    }
}

/// Partitions one sorted file into leaves of up to `partition_size` records.
///
/// Records are consumed in key order; each partition inserts record *values*
/// into a fresh filter while tracking the first and last *key* as its
/// inclusive range. A non-empty trailing partition is emitted as a final
/// leaf.
fn partition_file<S: Storage>(storage: &S, path: &str, config: &IndexConfig) -> Result<Vec<Node>> {
    let mut leaves = Vec::new();
    let mut filter = BloomFilter::new(config.bloom_bits, config.hash_count);
    let mut start_key: Option<String> = None;
    let mut end_key = String::new();
    let mut count = 0;

    for entry in storage.iterate_file(path)? {
        let (key, value) = entry?;
        if start_key.is_none() {
            start_key = Some(key.clone());
        }
        filter.insert(&value);
        end_key = key;
        count += 1;

        if count >= config.partition_size {
            let full = std::mem::replace(
                &mut filter,
                BloomFilter::new(config.bloom_bits, config.hash_count),
            );
            leaves.push(Node::leaf(
                full,
                path.to_string(),
                start_key.take().unwrap_or_default(),
                end_key.clone(),
            ));
            count = 0;
        }
    }

    if count > 0 {
        leaves.push(Node::leaf(
            filter,
            path.to_string(),
            start_key.unwrap_or_default(),
            end_key,
        ));
    }

    Ok(leaves)
}
