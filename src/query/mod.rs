//! Query engines over per-column index trees.
//!
//! Two strategies answer the same question (which row keys hold
//! `values[i]` in column `i` for every column) with different disk-work
//! profiles:
//!
//! - [`multi_column_query`] co-descends all column trees at once, pruning by
//!   cross-column key-range intersection and bloom membership at every
//!   level before any disk scan is issued.
//! - [`single_column_query`] prunes with column 0's tree only, then verifies
//!   surviving keys against the remaining columns by point lookup.
//!
//! Both reset and populate a caller-owned [`QueryMetrics`], return exact
//! unordered key sets, and fan scan work out to the blocking pool.

pub mod metrics;
pub mod multi;
pub mod single;

pub use metrics::QueryMetrics;
pub use multi::multi_column_query;
pub use single::single_column_query;
