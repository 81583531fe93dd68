/// Configuration for building a bloom filter index tree.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Target number of records summarized per leaf partition (default: 100,000)
    pub partition_size: usize,

    /// Bit-array length of every filter in the tree (default: 1Mi bits)
    pub bloom_bits: u64,

    /// Number of seeded hash functions per filter (default: 3)
    pub hash_count: u32,

    /// Maximum child count of interior nodes (default: 3)
    pub fanout: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            partition_size: 100_000,
            bloom_bits: 1 << 20, // 1Mi bits
            hash_count: 3,
            fanout: 3,
        }
    }
}

impl IndexConfig {
    /// Create a new config with default tuning values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target leaf partition size in records
    pub fn partition_size(mut self, records: usize) -> Self {
        self.partition_size = records;
        self
    }

    /// Set the filter bit-array length
    pub fn bloom_bits(mut self, bits: u64) -> Self {
        self.bloom_bits = bits;
        self
    }

    /// Set the number of hash functions per filter
    pub fn hash_count(mut self, count: u32) -> Self {
        self.hash_count = count;
        self
    }

    /// Set the interior-node fan-out
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }
}
