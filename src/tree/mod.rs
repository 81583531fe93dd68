//! Per-column hierarchical bloom filter index.
//!
//! Each column family gets one [`BloomTree`]: a balanced fan-out tree whose
//! leaves summarize contiguous partitions of the column's sorted files and
//! whose interior nodes summarize the union of their descendants.
//!
//! ```text
//!                      +----------------+
//!                      |      root      |   filter = union of all leaves
//!                      +----------------+   range  = span of all leaves
//!                     /        |         \
//!            +--------+   +--------+   +--------+
//!            | interior|  | interior|  | interior|
//!            +--------+   +--------+   +--------+
//!            /   |   \        ...          ...
//!      +-----+ +-----+ +-----+
//!      |leaf | |leaf | |leaf |   one leaf per partition of N records,
//!      +-----+ +-----+ +-----+   tagged with its source file path
//! ```
//!
//! A membership query descends from the root, pruning subtrees whose key
//! range misses the query window or whose filter rejects the value, and
//! returns the surviving leaves. Because interior filters are bitwise unions
//! and interior ranges are min/max spans, pruning can never lose a true
//! match; false positives only cost extra descent.
//!
//! Trees are built once by [`TreeBuilder`] and read-only afterwards. The
//! tree exclusively owns its nodes in an arena; children are referenced by
//! index and queries borrow nodes immutably.

pub mod builder;
pub mod node;

pub use builder::TreeBuilder;
pub use node::{Node, NodeId, Source};

use crate::error::Result;
use crate::errinput;
use crate::filter::BloomFilter;
use crate::query::QueryMetrics;

/// A read-only bloom filter index over one column family.
pub struct BloomTree {
    /// All nodes; leaves first, then each composed level, the root last.
    arena: Vec<Node>,
    root: NodeId,
    /// Leaf ids in the order they entered composition. Kept for diagnostics,
    /// space accounting, and sidecar serialization.
    leaves: Vec<NodeId>,
}

impl BloomTree {
    /// Composes a tree bottom-up from pre-built leaves.
    ///
    /// The current level is grouped into consecutive runs of `fanout` (the
    /// last run may be shorter), one parent per run, until a single root
    /// remains. A parent's filter is the union of its children's and its
    /// range is their min-start/max-end span, so sibling ranges may overlap
    /// when leaves arrive out of global key order; queries only ever rely on
    /// the span, never on disjointness.
    pub(crate) fn compose(
        leaves: Vec<Node>,
        bloom_bits: u64,
        hash_count: u32,
        fanout: usize,
    ) -> Result<Self> {
        if leaves.is_empty() {
            return errinput!("cannot compose an index tree from zero leaves");
        }

        let mut arena = leaves;
        let leaf_ids: Vec<NodeId> = (0..arena.len()).collect();

        let mut level = leaf_ids.clone();
        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len().div_ceil(fanout));
            for group in level.chunks(fanout) {
                let mut filter = BloomFilter::new(bloom_bits, hash_count);
                let mut start_key = arena[group[0]].start_key.clone();
                let mut end_key = arena[group[0]].end_key.clone();

                for &child in group {
                    let node = &arena[child];
                    if node.start_key < start_key {
                        start_key = node.start_key.clone();
                    }
                    if node.end_key > end_key {
                        end_key = node.end_key.clone();
                    }
                    filter.merge(&node.filter)?;
                }

                let mut parent = Node::interior(filter, start_key, end_key);
                parent.children = group.to_vec();
                arena.push(parent);
                parents.push(arena.len() - 1);
            }
            level = parents;
        }

        Ok(Self {
            root: level[0],
            arena,
            leaves: leaf_ids,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    /// Leaf ids in composition order.
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// Source file paths of the leaves that may hold `value` within
    /// `[q_start, q_end]` (empty strings meaning unbounded). Every filter
    /// consultation is counted into `metrics`.
    pub fn query(
        &self,
        value: &str,
        q_start: &str,
        q_end: &str,
        metrics: &QueryMetrics,
    ) -> Vec<String> {
        let mut out = Vec::new();
        self.search(self.root, value, q_start, q_end, metrics, &mut out);
        out.iter()
            .filter_map(|&id| self.arena[id].file().map(String::from))
            .collect()
    }

    /// Like [`query`](Self::query) but returns the surviving leaf nodes
    /// themselves, for callers that need their key ranges.
    pub fn query_nodes(
        &self,
        value: &str,
        q_start: &str,
        q_end: &str,
        metrics: &QueryMetrics,
    ) -> Vec<&Node> {
        let mut out = Vec::new();
        self.search(self.root, value, q_start, q_end, metrics, &mut out);
        out.iter().map(|&id| &self.arena[id]).collect()
    }

    fn search(
        &self,
        id: NodeId,
        value: &str,
        q_start: &str,
        q_end: &str,
        metrics: &QueryMetrics,
        out: &mut Vec<NodeId>,
    ) {
        let node = &self.arena[id];

        let overlaps = (q_end.is_empty() || node.start_key.as_str() <= q_end)
            && (q_start.is_empty() || node.end_key.as_str() >= q_start);
        if !overlaps {
            return;
        }

        metrics.record_probe(node.is_leaf());
        if !node.filter.exists(value) {
            return;
        }

        if node.is_leaf() {
            out.push(id);
        } else {
            for &child in &node.children {
                self.search(child, value, q_start, q_end, metrics, out);
            }
        }
    }

    /// Aggregate serialized size of interior-node filters: what the tree
    /// costs to hold in memory beyond its persisted leaves.
    pub fn memory_size(&self) -> u64 {
        self.arena
            .iter()
            .filter(|node| !node.is_leaf())
            .map(|node| node.filter.serialized_len())
            .sum()
    }

    /// Aggregate serialized size of leaf filters, the ones persisted to
    /// sidecar files.
    pub fn disk_size(&self) -> u64 {
        self.leaves
            .iter()
            .map(|&id| self.arena[id].filter.serialized_len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: u64 = 1 << 14;
    const HASHES: u32 = 3;

    /// A leaf whose filter holds the given values.
    fn leaf(file: &str, start: &str, end: &str, values: &[&str]) -> Node {
        let mut filter = BloomFilter::new(BITS, HASHES);
        for value in values {
            filter.insert(value);
        }
        Node::leaf(filter, file.to_string(), start.to_string(), end.to_string())
    }

    fn five_leaf_tree() -> BloomTree {
        let leaves = vec![
            leaf("f1.sst", "k00", "k09", &["a"]),
            leaf("f1.sst", "k10", "k19", &["b"]),
            leaf("f1.sst", "k20", "k29", &["c"]),
            leaf("f2.sst", "k30", "k39", &["d"]),
            leaf("f2.sst", "k40", "k49", &["e"]),
        ];
        BloomTree::compose(leaves, BITS, HASHES, 3).unwrap()
    }

    #[test]
    fn test_compose_shape() {
        let tree = five_leaf_tree();
        // 5 leaves group into 2 parents (3 + 2), then 1 root: 8 nodes total.
        assert_eq!(tree.arena.len(), 8);
        assert_eq!(tree.leaves().len(), 5);

        let root = tree.node(tree.root());
        assert!(!root.is_leaf());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.start_key, "k00");
        assert_eq!(root.end_key, "k49");
    }

    #[test]
    fn test_interior_range_spans_descendants() {
        let tree = five_leaf_tree();
        for node in &tree.arena {
            if node.is_leaf() {
                continue;
            }
            let min = node
                .children
                .iter()
                .map(|&c| tree.node(c).start_key.as_str())
                .min()
                .unwrap();
            let max = node
                .children
                .iter()
                .map(|&c| tree.node(c).end_key.as_str())
                .max()
                .unwrap();
            assert_eq!(node.start_key, min);
            assert_eq!(node.end_key, max);
        }
    }

    #[test]
    fn test_interior_filter_is_union() {
        let tree = five_leaf_tree();
        let root = tree.node(tree.root());
        for value in ["a", "b", "c", "d", "e"] {
            assert!(root.filter.exists(value));
        }
    }

    #[test]
    fn test_compose_out_of_order_leaves_overlap() {
        // Leaves arriving out of global key order still compose correctly:
        // parents span their children even when sibling ranges overlap.
        let leaves = vec![
            leaf("f2.sst", "k30", "k39", &["d"]),
            leaf("f1.sst", "k00", "k09", &["a"]),
            leaf("f2.sst", "k40", "k49", &["e"]),
            leaf("f1.sst", "k10", "k19", &["b"]),
        ];
        let tree = BloomTree::compose(leaves, BITS, HASHES, 3).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.start_key, "k00");
        assert_eq!(root.end_key, "k49");

        let metrics = QueryMetrics::new();
        assert_eq!(tree.query("b", "", "", &metrics), vec!["f1.sst"]);
    }

    #[test]
    fn test_compose_zero_leaves() {
        assert!(BloomTree::compose(Vec::new(), BITS, HASHES, 3).is_err());
    }

    #[test]
    fn test_single_leaf_root() {
        let tree = BloomTree::compose(vec![leaf("f.sst", "k0", "k9", &["a"])], BITS, HASHES, 3)
            .unwrap();
        assert_eq!(tree.root(), 0);
        assert!(tree.node(tree.root()).is_leaf());
        assert_eq!(tree.memory_size(), 0);
    }

    #[test]
    fn test_query_prunes_by_range() {
        let tree = five_leaf_tree();
        let metrics = QueryMetrics::new();

        // "c" lives in [k20, k29]; a window past it finds nothing.
        assert!(tree.query("c", "k30", "k49", &metrics).is_empty());
        // A window covering it does.
        assert_eq!(tree.query("c", "k15", "k25", &metrics), vec!["f1.sst"]);
        // Unbounded finds it too.
        assert_eq!(tree.query("c", "", "", &metrics), vec!["f1.sst"]);
    }

    #[test]
    fn test_query_counts_probes() {
        let tree = five_leaf_tree();
        let metrics = QueryMetrics::new();

        tree.query("c", "", "", &metrics);
        // Root + both interior children probe; only the matching subtree's
        // leaves are consulted: 3 leaf probes at most, and the counters only
        // ever grow.
        let total = metrics.filter_probes();
        let leaves = metrics.leaf_probes();
        assert!(total >= 1 + leaves);
        assert!(leaves >= 1);

        tree.query("zzz", "", "", &metrics);
        assert!(metrics.filter_probes() >= total);
    }

    #[test]
    fn test_query_nodes_returns_leaves() {
        let tree = five_leaf_tree();
        let metrics = QueryMetrics::new();
        let nodes = tree.query_nodes("d", "", "", &metrics);
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_leaf());
        assert_eq!(nodes[0].file(), Some("f2.sst"));
        assert_eq!(nodes[0].start_key, "k30");
    }

    #[test]
    fn test_space_accounting() {
        let tree = five_leaf_tree();
        let per_filter = 12 + BITS.div_ceil(8);
        // 5 leaves persisted to disk, 3 interior nodes held in memory.
        assert_eq!(tree.disk_size(), 5 * per_filter);
        assert_eq!(tree.memory_size(), 3 * per_filter);
    }
}
