//! Coordinated multi-column query over per-column index trees.
//!
//! The engine co-descends one tree per column. At every level it intersects
//! the columns' key ranges, since a combination of nodes can only hold a
//! matching row where their ranges overlap, and consults bloom filters to
//! discard subtrees that cannot contain the requested value. Only
//! combinations that survive both tests all the way down to leaves trigger
//! disk scans, which run in parallel per column and are intersected exactly.
//!
//! Pruning is multiplicative across columns: a combination survives only if
//! every column has at least one filter-positive child overlapping the
//! tightened window. Bloom false positives cost extra scans, never wrong
//! results.

use std::cmp::{max, min};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::errdata;
use crate::errinput;
use crate::error::Result;
use crate::query::QueryMetrics;
use crate::storage::Storage;
use crate::tree::{BloomTree, NodeId};

/// One node per column plus the joint key range the combined query is
/// restricted to. The range is the intersection of the participating nodes'
/// ranges and any caller-supplied global bounds; combinations whose range is
/// empty are pruned.
struct Combo {
    nodes: Vec<NodeId>,
    range_start: String,
    range_end: String,
}

/// Returns the row keys whose stored value equals `values[i]` in every
/// column `i`, optionally restricted to `[global_start, global_end]` (empty
/// strings meaning unbounded). The result set is exact and unordered.
///
/// `trees[i]` must be the index for the column `values[i]` refers to;
/// `metrics` is reset on entry and readable after return.
pub async fn multi_column_query<S: Storage>(
    trees: &[BloomTree],
    values: &[String],
    global_start: &str,
    global_end: &str,
    storage: &Arc<S>,
    metrics: &QueryMetrics,
) -> Result<Vec<String>> {
    if trees.is_empty() || trees.len() != values.len() {
        return errinput!(
            "column trees ({}) and values ({}) must match and be non-empty",
            trees.len(),
            values.len()
        );
    }

    let started = Instant::now();
    metrics.reset();

    // Seed range: global bounds (root span of the first tree when absent)
    // intersected with every root's span.
    let first_root = trees[0].node(trees[0].root());
    let mut range_start = if global_start.is_empty() {
        first_root.start_key.clone()
    } else {
        global_start.to_string()
    };
    let mut range_end = if global_end.is_empty() {
        first_root.end_key.clone()
    } else {
        global_end.to_string()
    };
    for tree in trees {
        let root = tree.node(tree.root());
        if root.start_key > range_start {
            range_start = root.start_key.clone();
        }
        if root.end_key < range_end {
            range_end = root.end_key.clone();
        }
    }

    // Probe each root once; any miss ends the query immediately.
    for (tree, value) in trees.iter().zip(values) {
        metrics.record_probe(false);
        if !tree.node(tree.root()).filter.exists(value) {
            tracing::info!(
                elapsed_us = started.elapsed().as_micros() as u64,
                "multi-column query ended on root filter miss"
            );
            return Ok(Vec::new());
        }
    }

    let seed = Combo {
        nodes: trees.iter().map(|tree| tree.root()).collect(),
        range_start,
        range_end,
    };

    let mut matches = Vec::new();
    let mut stack = vec![seed];
    while let Some(combo) = stack.pop() {
        if combo.range_start > combo.range_end {
            continue;
        }

        let all_leaves = combo
            .nodes
            .iter()
            .zip(trees)
            .all(|(&id, tree)| tree.node(id).is_leaf());
        if all_leaves {
            matches.extend(scan_and_intersect(trees, &combo, values, storage, metrics).await?);
            continue;
        }

        expand(trees, &combo, values, metrics, &mut stack);
    }

    tracing::info!(
        elapsed_us = started.elapsed().as_micros() as u64,
        matches = matches.len(),
        filter_probes = metrics.filter_probes(),
        leaf_probes = metrics.leaf_probes(),
        file_scans = metrics.file_scans(),
        "multi-column query complete"
    );
    Ok(matches)
}

/// Expands `combo` one level: per column, collect the filter-positive
/// sub-nodes overlapping the progressively tightened window, then push every
/// cross-column assignment whose running range intersection stays non-empty.
fn expand(
    trees: &[BloomTree],
    combo: &Combo,
    values: &[String],
    metrics: &QueryMetrics,
    stack: &mut Vec<Combo>,
) {
    let n = combo.nodes.len();
    let mut options: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    let mut tight_start = combo.range_start.clone();
    let mut tight_end = combo.range_end.clone();

    for i in 0..n {
        let tree = &trees[i];
        let node = tree.node(combo.nodes[i]);

        // Interior nodes offer their children; a leaf stands for itself
        // until every column has reached a leaf.
        let candidates: &[NodeId] = if node.is_leaf() {
            std::slice::from_ref(&combo.nodes[i])
        } else {
            &node.children
        };

        let mut col_span: Option<(String, String)> = None;
        for &candidate_id in candidates {
            let candidate = tree.node(candidate_id);
            if candidate.end_key < tight_start || candidate.start_key > tight_end {
                continue;
            }
            metrics.record_probe(candidate.is_leaf());
            if !candidate.filter.exists(&values[i]) {
                continue;
            }
            options[i].push(candidate_id);
            col_span = Some(match col_span.take() {
                None => (candidate.start_key.clone(), candidate.end_key.clone()),
                Some((lo, hi)) => (
                    min(lo, candidate.start_key.clone()),
                    max(hi, candidate.end_key.clone()),
                ),
            });
        }

        // A column with no surviving candidate kills the whole combination.
        let Some((col_min, col_max)) = col_span else {
            return;
        };

        // Tightening is the cross-column lever: the span of this column's
        // survivors bounds what later columns may pick.
        if i + 1 < n {
            tight_start = max(tight_start, col_min);
            tight_end = min(tight_end, col_max);
            if tight_start > tight_end {
                return;
            }
        }
    }

    let mut chosen = vec![0; n];
    cross_product(
        trees,
        &options,
        0,
        &mut chosen,
        &combo.range_start,
        &combo.range_end,
        stack,
    );
}

/// Enumerates one candidate per column, carrying the running intersection of
/// picked ranges; assignments that empty the intersection are skipped before
/// descending further.
fn cross_product(
    trees: &[BloomTree],
    options: &[Vec<NodeId>],
    idx: usize,
    chosen: &mut Vec<NodeId>,
    current_start: &str,
    current_end: &str,
    stack: &mut Vec<Combo>,
) {
    if idx == options.len() {
        stack.push(Combo {
            nodes: chosen.clone(),
            range_start: current_start.to_string(),
            range_end: current_end.to_string(),
        });
        return;
    }

    for &candidate_id in &options[idx] {
        let candidate = trees[idx].node(candidate_id);
        let next_start = max(current_start, candidate.start_key.as_str());
        let next_end = min(current_end, candidate.end_key.as_str());
        if next_start <= next_end {
            chosen[idx] = candidate_id;
            cross_product(trees, options, idx + 1, chosen, next_start, next_end, stack);
        }
    }
}

/// Scans every column's leaf in parallel for keys holding that column's
/// value inside the combination's window, then intersects the per-column key
/// sets in declaration order, short-circuiting once empty.
async fn scan_and_intersect<S: Storage>(
    trees: &[BloomTree],
    combo: &Combo,
    values: &[String],
    storage: &Arc<S>,
    metrics: &QueryMetrics,
) -> Result<Vec<String>> {
    let n = combo.nodes.len();
    metrics.record_file_scans(n as u64);

    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let node = trees[i].node(combo.nodes[i]);
        let Some(file) = node.file() else {
            return errdata!("interior node reached the scan stage");
        };

        let file = file.to_string();
        let value = values[i].clone();
        let scan_start = max(combo.range_start.as_str(), node.start_key.as_str()).to_string();
        let scan_end = min(combo.range_end.as_str(), node.end_key.as_str()).to_string();
        let storage = Arc::clone(storage);

        handles.push(tokio::task::spawn_blocking(move || -> Result<HashSet<String>> {
            let keys = storage.scan_file(&file, &value, &scan_start, &scan_end)?;
            Ok(keys.into_iter().collect())
        }));
    }

    let mut sets = Vec::with_capacity(n);
    for handle in handles {
        sets.push(handle.await??);
    }

    let mut sets = sets.into_iter();
    let mut result = sets.next().unwrap_or_default();
    for set in sets {
        result.retain(|key| set.contains(key));
        if result.is_empty() {
            break;
        }
    }
    Ok(result.into_iter().collect())
}
