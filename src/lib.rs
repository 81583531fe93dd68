pub mod config;
pub mod error;
pub mod filter;
pub mod query;
pub mod storage;
pub mod tmpfs;
pub mod tree;

pub use config::IndexConfig;
pub use error::Error;
pub use filter::BloomFilter;
pub use query::{multi_column_query, single_column_query, QueryMetrics};
pub use storage::{DirStore, Storage};
pub use tree::{BloomTree, TreeBuilder};
