//! Bloom filter summarizing the values of one leaf partition or the union of
//! a subtree's partitions.
//!
//! Every filter in a tree shares the same geometry: a bit-array length `m`
//! fixed at construction and a hash count `k`. Insertion sets `k` bits chosen
//! by `k` independently seeded 32-bit hashes reduced modulo `m`; membership
//! tests report true only when all `k` bits are set, so false positives are
//! possible but false negatives are not. With `n` inserted values the
//! expected false-positive probability is `(1 - e^(-k*n/m))^k`.
//!
//! Filters are mutated only while an index is being built (inserts, or a
//! bitwise-OR merge into a parent) and are read-only afterwards.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use twox_hash::XxHash32;

use crate::error::Result;
use crate::{errdata, Error};

/// On-disk sidecar header size: m (u64) followed by k (i32), little-endian.
const HEADER_SIZE: u64 = 12;

/// A fixed-geometry bloom filter over 64-bit words.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    /// Bit array, packed least-significant-bit first within each word.
    words: Vec<u64>,
    /// Bit-array length `m`. The word vector may carry up to 63 bits of
    /// padding beyond this; padding bits are never set.
    bits: u64,
    /// Hash count `k`.
    hashes: u32,
}

impl BloomFilter {
    /// Allocates a filter of `bits` zero bits probed by `hashes` seeded hashes.
    pub fn new(bits: u64, hashes: u32) -> Self {
        let words = bits.div_ceil(64) as usize;
        Self {
            words: vec![0; words],
            bits,
            hashes,
        }
    }

    /// Bit-array length `m`.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Hash count `k`.
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    fn position(&self, value: &str, seed: u32) -> u64 {
        let mut hasher = XxHash32::with_seed(seed);
        hasher.write(value.as_bytes());
        // XxHash32 yields a 32-bit result widened to u64.
        hasher.finish() % self.bits
    }

    /// Sets the `k` bits derived from `value`.
    pub fn insert(&mut self, value: &str) {
        for seed in 0..self.hashes {
            let bit = self.position(value, seed);
            self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// Tests whether `value` may have been inserted. False positives are
    /// possible; false negatives are not.
    pub fn exists(&self, value: &str) -> bool {
        (0..self.hashes).all(|seed| {
            let bit = self.position(value, seed);
            self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }

    /// In-place bitwise OR of `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns `SizeMismatch` if the filters' bit-array lengths differ.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<()> {
        if self.bits != other.bits {
            return Err(Error::SizeMismatch {
                expected: self.bits,
                actual: other.bits,
            });
        }
        for (word, theirs) in self.words.iter_mut().zip(&other.words) {
            *word |= theirs;
        }
        Ok(())
    }

    /// Serialized size in bytes: the fixed header plus the packed bit payload.
    pub fn serialized_len(&self) -> u64 {
        HEADER_SIZE + self.bits.div_ceil(8)
    }

    /// Writes the filter to `path`: m (u64), k (i32), then ⌈m/8⌉ payload
    /// bytes with bit `i` stored in byte `i/8` at position `i % 8`,
    /// least-significant-bit first. All fields little-endian.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_u64::<LittleEndian>(self.bits)?;
        file.write_i32::<LittleEndian>(self.hashes as i32)?;

        let byte_len = self.bits.div_ceil(8) as usize;
        let mut payload = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            payload.extend_from_slice(&word.to_le_bytes());
        }
        payload.truncate(byte_len);
        file.write_all(&payload)?;
        file.flush()?;
        Ok(())
    }

    /// Reads a filter previously written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the header is malformed or the payload length
    /// disagrees with the declared bit count.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let bits = file.read_u64::<LittleEndian>()?;
        let hashes = file.read_i32::<LittleEndian>()?;
        if hashes < 0 {
            return errdata!("negative hash count {hashes} in bloom filter file");
        }

        let byte_len = bits.div_ceil(8) as usize;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        if payload.len() != byte_len {
            return errdata!(
                "bloom filter payload is {} bytes, expected {byte_len} for {bits} bits",
                payload.len()
            );
        }

        payload.resize(bits.div_ceil(64) as usize * 8, 0);
        let words = payload
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(Self {
            words,
            bits,
            hashes: hashes as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::NamedTempFile;

    #[test]
    fn test_insert_and_exists() {
        let mut filter = BloomFilter::new(1 << 16, 3);
        for i in 0..100 {
            filter.insert(&format!("value_{i}"));
        }

        for i in 0..100 {
            assert!(filter.exists(&format!("value_{i}")));
        }

        // At 100 items in 64Ki bits false positives should be vanishingly rare.
        let misses = (0..1000)
            .filter(|i| filter.exists(&format!("absent_{i}")))
            .count();
        assert!(misses < 5, "unexpected false positive count: {misses}");
    }

    #[test]
    fn test_merge_covers_both_children() {
        let mut left = BloomFilter::new(1 << 16, 3);
        let mut right = BloomFilter::new(1 << 16, 3);
        for i in 0..100 {
            left.insert(&format!("left_{i}"));
            right.insert(&format!("right_{i}"));
        }

        let mut parent = BloomFilter::new(1 << 16, 3);
        parent.merge(&left).unwrap();
        parent.merge(&right).unwrap();

        for i in 0..100 {
            assert!(parent.exists(&format!("left_{i}")));
            assert!(parent.exists(&format!("right_{i}")));
        }
    }

    #[test]
    fn test_merge_size_mismatch() {
        let mut filter = BloomFilter::new(1024, 3);
        let other = BloomFilter::new(2048, 3);
        assert_eq!(
            filter.merge(&other),
            Err(Error::SizeMismatch {
                expected: 1024,
                actual: 2048
            })
        );
    }

    #[test]
    fn test_save_load_round_trip() -> Result<()> {
        // A bit count that is not a multiple of 8 exercises payload padding.
        let mut filter = BloomFilter::new(1021, 4);
        for i in 0..10 {
            filter.insert(&format!("value_{i}"));
        }

        let file = NamedTempFile::new()?;
        filter.save(file.path())?;
        let loaded = BloomFilter::load(file.path())?;

        assert_eq!(filter, loaded);

        for i in 0..10 {
            assert!(loaded.exists(&format!("value_{i}")));
        }
        // With 10 items in 1021 bits the false-positive rate is low; tolerate
        // a handful of collisions over 100 probes.
        let misses = (0..100)
            .filter(|i| loaded.exists(&format!("unrelated_{i}")))
            .count();
        assert!(misses < 20, "unexpected false positive count: {misses}");
        Ok(())
    }

    #[test]
    fn test_load_rejects_truncated_payload() -> Result<()> {
        let mut filter = BloomFilter::new(1024, 3);
        filter.insert("value");

        let file = NamedTempFile::new()?;
        filter.save(file.path())?;

        let bytes = std::fs::read(file.path())?;
        std::fs::write(file.path(), &bytes[..bytes.len() - 1])?;

        assert!(matches!(
            BloomFilter::load(file.path()),
            Err(Error::InvalidData(_))
        ));
        Ok(())
    }
}
