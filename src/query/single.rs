//! Single-hierarchy query: candidate selection through one column's tree,
//! verification of the remaining columns by point lookup.
//!
//! Semantically identical to the multi-column engine, but only column 0's
//! index narrows the disk work: every candidate file is scanned for column
//! 0's value, and each surviving row key is then verified against columns
//! `1..n` with point gets. The trade-off between the two engines is the
//! subject of evaluation, not correctness.

use std::sync::Arc;
use std::time::Instant;

use crate::errinput;
use crate::error::Result;
use crate::query::QueryMetrics;
use crate::storage::Storage;
use crate::tree::BloomTree;

/// Returns the row keys whose column-`i` value equals `values[i]` for every
/// `i`, using only `tree` (column 0's index) for candidate pruning.
///
/// A column that cannot be read for a key (absent column family, absent
/// key, failed get) makes that key a non-match; it never fails the query.
/// `metrics` is reset on entry and readable after return.
pub async fn single_column_query<S: Storage>(
    tree: &BloomTree,
    columns: &[String],
    values: &[String],
    storage: &Arc<S>,
    metrics: &QueryMetrics,
) -> Result<Vec<String>> {
    if columns.is_empty() || columns.len() != values.len() {
        return errinput!(
            "columns ({}) and values ({}) must match and be non-empty",
            columns.len(),
            values.len()
        );
    }

    let started = Instant::now();
    metrics.reset();

    let candidates: Vec<(String, String, String)> = tree
        .query_nodes(&values[0], "", "", metrics)
        .into_iter()
        .filter_map(|node| {
            node.file()
                .map(|file| (file.to_string(), node.start_key.clone(), node.end_key.clone()))
        })
        .collect();

    if candidates.is_empty() {
        tracing::info!(
            elapsed_us = started.elapsed().as_micros() as u64,
            value = %values[0],
            "single-column query found no candidate leaves"
        );
        return Ok(Vec::new());
    }

    metrics.record_file_scans(candidates.len() as u64);

    // Stage one: scan every candidate file for column 0's value in parallel.
    let mut scan_handles = Vec::with_capacity(candidates.len());
    for (file, start_key, end_key) in candidates {
        let storage = Arc::clone(storage);
        let value = values[0].clone();
        scan_handles.push(tokio::task::spawn_blocking(move || {
            storage.scan_file(&file, &value, &start_key, &end_key)
        }));
    }

    let mut candidate_keys = Vec::new();
    for handle in scan_handles {
        candidate_keys.extend(handle.await??);
    }

    // Stage two: verify the remaining columns for each key in parallel.
    let mut verify_handles = Vec::with_capacity(candidate_keys.len());
    for key in candidate_keys {
        let storage = Arc::clone(storage);
        let columns = columns.to_vec();
        let values = values.to_vec();
        verify_handles.push(tokio::task::spawn_blocking(move || -> Option<String> {
            for (column, expected) in columns.iter().zip(&values).skip(1) {
                match storage.point_get(column, &key) {
                    Ok(Some(found)) if found == *expected => {}
                    Ok(_) => return None,
                    Err(e) => {
                        tracing::debug!(
                            column = %column,
                            key = %key,
                            error = %e,
                            "point get failed, treating key as non-match"
                        );
                        return None;
                    }
                }
            }
            Some(key)
        }));
    }

    let mut matches = Vec::new();
    for handle in verify_handles {
        if let Some(key) = handle.await? {
            matches.push(key);
        }
    }

    tracing::info!(
        elapsed_us = started.elapsed().as_micros() as u64,
        matches = matches.len(),
        filter_probes = metrics.filter_probes(),
        leaf_probes = metrics.leaf_probes(),
        file_scans = metrics.file_scans(),
        "single-column query complete"
    );
    Ok(matches)
}
