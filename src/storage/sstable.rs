//! Immutable sorted run files: the on-disk shape the index builder walks and
//! the query engine scans.
//!
//! ## File Layout
//!
//! A run file consists of a data section, a sparse index, and a fixed footer:
//!
//! ```text
//! +----------------------+
//! | Entry 1              |  key_len (u16) | value_len (u32) | key | value
//! +----------------------+
//! | ...                  |
//! +----------------------+
//! | Entry N              |
//! +----------------------+
//! | Sparse Index         |  count (u32), then key_len (u16) | key | offset (u64)
//! +----------------------+
//! | Index Offset (u64)   |
//! | Checksum (u64)       |
//! +----------------------+
//! ```
//!
//! Entries are stored in ascending key order; the sparse index records the
//! key and offset of every [`INDEX_INTERVAL`]th entry. The checksum is a
//! rolling CRC-64/ECMA over all key/value pairs, verifiable after the fact
//! with [`Reader::verify`]. All fixed-width fields are big-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Algorithm, Crc};

use crate::error::Result;
use crate::{errdata, errinput};

/// One sparse index entry is written per this many data entries.
const INDEX_INTERVAL: u64 = 16;

/// Footer size: index offset plus checksum.
const FOOTER_SIZE: i64 = 16;

const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

/// Order-independent rolling checksum over key/value pairs.
struct RollingChecksum {
    value: u64,
    crc64: Crc<u64>,
}

impl RollingChecksum {
    fn new() -> Self {
        Self {
            value: 0,
            crc64: Crc::<u64>::new(&CRC_64_ECMA),
        }
    }

    fn update(&mut self, key: &str, value: &str) {
        self.value ^= self.crc64.checksum(key.as_bytes()) ^ self.crc64.checksum(value.as_bytes());
    }
}

/// Builds a run file by appending key/value pairs in ascending key order.
pub struct Writer {
    file: BufWriter<File>,
    index: Vec<(String, u64)>,
    offset: u64,
    entry_count: u64,
    checksum: RollingChecksum,
    last_key: Option<String>,
}

impl Writer {
    pub fn create(path: &str) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(Self {
            file,
            index: Vec::new(),
            offset: 0,
            entry_count: 0,
            checksum: RollingChecksum::new(),
            last_key: None,
        })
    }

    /// Appends an entry. Keys must arrive in strictly ascending order.
    pub fn append(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_str() {
                return errinput!("key {key:?} appended out of order after {last:?}");
            }
        }

        if self.entry_count % INDEX_INTERVAL == 0 {
            self.index.push((key.to_string(), self.offset));
        }

        self.file.write_u16::<BigEndian>(key.len() as u16)?;
        self.file.write_u32::<BigEndian>(value.len() as u32)?;
        self.file.write_all(key.as_bytes())?;
        self.file.write_all(value.as_bytes())?;

        self.checksum.update(key, value);
        self.offset += 6 + key.len() as u64 + value.len() as u64;
        self.entry_count += 1;
        self.last_key = Some(key.to_string());
        Ok(())
    }

    /// Writes the sparse index and footer, sealing the file.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.offset;
        self.file.write_u32::<BigEndian>(self.index.len() as u32)?;
        for (key, offset) in &self.index {
            self.file.write_u16::<BigEndian>(key.len() as u16)?;
            self.file.write_all(key.as_bytes())?;
            self.file.write_u64::<BigEndian>(*offset)?;
        }
        self.file.write_u64::<BigEndian>(index_offset)?;
        self.file.write_u64::<BigEndian>(self.checksum.value)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Reads a sealed run file: point lookups via the sparse index and ordered,
/// optionally range-bounded scans.
pub struct Reader {
    file: File,
    index: Vec<(String, u64)>,
    data_len: u64,
    checksum: u64,
}

impl Reader {
    /// Opens a run file and loads its sparse index into memory.
    pub fn open(path: &str) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::End(-FOOTER_SIZE))?;
        let index_offset = file.read_u64::<BigEndian>()?;
        let checksum = file.read_u64::<BigEndian>()?;

        file.seek(SeekFrom::Start(index_offset))?;
        let mut reader = BufReader::new(&mut file);
        let count = reader.read_u32::<BigEndian>()?;
        let mut index = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = reader.read_u16::<BigEndian>()? as usize;
            let mut key = vec![0; key_len];
            reader.read_exact(&mut key)?;
            let offset = reader.read_u64::<BigEndian>()?;
            index.push((decode_utf8(key)?, offset));
        }

        Ok(Self {
            file,
            index,
            data_len: index_offset,
            checksum,
        })
    }

    /// Retrieves the value stored for `key`, if any.
    ///
    /// Binary-searches the sparse index for the run of entries that may hold
    /// the key, then scans forward within it.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let run = self.index.partition_point(|(k, _)| k.as_str() <= key);
        if run == 0 {
            return Ok(None);
        }

        for entry in self.scan_from(self.index[run - 1].1, None)? {
            let (found, value) = entry?;
            if found.as_str() > key {
                break;
            }
            if found == key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Iterates entries with keys in `[range_start, range_end]`, both bounds
    /// inclusive and an empty string meaning unbounded on that side.
    pub fn scan(&self, range_start: &str, range_end: &str) -> Result<ScanIter> {
        let offset = if range_start.is_empty() {
            0
        } else {
            let run = self
                .index
                .partition_point(|(k, _)| k.as_str() <= range_start);
            if run == 0 {
                0
            } else {
                self.index[run - 1].1
            }
        };

        let mut iter = self.scan_from(offset, (!range_end.is_empty()).then(|| range_end.to_string()))?;
        iter.skip_until = (!range_start.is_empty()).then(|| range_start.to_string());
        Ok(iter)
    }

    /// Iterates every entry in key order.
    pub fn iter(&self) -> Result<ScanIter> {
        self.scan_from(0, None)
    }

    /// Recomputes the rolling content checksum and compares it to the footer.
    pub fn verify(&self) -> Result<()> {
        let mut checksum = RollingChecksum::new();
        for entry in self.iter()? {
            let (key, value) = entry?;
            checksum.update(&key, &value);
        }
        if checksum.value != self.checksum {
            return errdata!(
                "run file checksum mismatch: stored {:#018x}, computed {:#018x}",
                self.checksum,
                checksum.value
            );
        }
        Ok(())
    }

    fn scan_from(&self, offset: u64, end: Option<String>) -> Result<ScanIter> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(ScanIter {
            file: BufReader::new(file),
            pos: offset,
            data_len: self.data_len,
            skip_until: None,
            end,
        })
    }
}

/// Forward iterator over a run file's data section. Terminates early once a
/// key passes the end bound.
pub struct ScanIter {
    file: BufReader<File>,
    pos: u64,
    data_len: u64,
    skip_until: Option<String>,
    end: Option<String>,
}

impl ScanIter {
    fn read_entry(&mut self) -> Result<(String, String)> {
        let key_len = self.file.read_u16::<BigEndian>()? as usize;
        let value_len = self.file.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0; key_len];
        self.file.read_exact(&mut key)?;
        let mut value = vec![0; value_len];
        self.file.read_exact(&mut value)?;
        self.pos += 6 + key_len as u64 + value_len as u64;
        Ok((decode_utf8(key)?, decode_utf8(value)?))
    }
}

impl Iterator for ScanIter {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.data_len {
                return None;
            }
            let (key, value) = match self.read_entry() {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if let Some(start) = &self.skip_until {
                if key.as_str() < start.as_str() {
                    continue;
                }
                self.skip_until = None;
            }
            if let Some(end) = &self.end {
                if key.as_str() > end.as_str() {
                    return None;
                }
            }
            return Some(Ok((key, value)));
        }
    }
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| crate::Error::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::NamedTempFile;

    fn write_run(path: &str, count: usize) -> Result<()> {
        let mut writer = Writer::create(path)?;
        for i in 0..count {
            writer.append(&format!("key_{i:04}"), &format!("value_{i}"))?;
        }
        writer.finish()
    }

    #[test]
    fn test_write_and_get() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        write_run(path, 100)?;

        let reader = Reader::open(path)?;
        for i in 0..100 {
            let value = reader.get(&format!("key_{i:04}"))?;
            assert_eq!(value, Some(format!("value_{i}")));
        }
        assert_eq!(reader.get("key_9999")?, None);
        assert_eq!(reader.get("a_before_first")?, None);
        Ok(())
    }

    #[test]
    fn test_scan_range() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        write_run(path, 100)?;

        let reader = Reader::open(path)?;
        let keys: Vec<String> = reader
            .scan("key_0010", "key_0020")?
            .map(|r| r.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys.len(), 11);
        assert_eq!(keys.first().unwrap(), "key_0010");
        assert_eq!(keys.last().unwrap(), "key_0020");

        // Unbounded on both sides yields everything in order.
        let all: Vec<String> = reader
            .scan("", "")?
            .map(|r| r.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(all.len(), 100);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_scan_start_between_index_entries() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        write_run(path, 100)?;

        // key_0019 falls inside a sparse-index run, not on a boundary.
        let reader = Reader::open(path)?;
        let keys: Vec<String> = reader
            .scan("key_0019", "")?
            .map(|r| r.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys.len(), 81);
        assert_eq!(keys[0], "key_0019");
        Ok(())
    }

    #[test]
    fn test_append_out_of_order() -> Result<()> {
        let file = NamedTempFile::new()?;
        let mut writer = Writer::create(file.path().to_str().unwrap())?;
        writer.append("key_b", "1")?;
        assert!(writer.append("key_a", "2").is_err());
        assert!(writer.append("key_b", "3").is_err());
        Ok(())
    }

    #[test]
    fn test_verify_detects_corruption() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        write_run(path, 50)?;

        Reader::open(path)?.verify()?;

        // Flip one byte inside the data section.
        let mut bytes = std::fs::read(path)?;
        bytes[10] ^= 0xff;
        std::fs::write(path, bytes)?;

        assert!(Reader::open(path)?.verify().is_err());
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        Writer::create(path)?.finish()?;

        let reader = Reader::open(path)?;
        assert_eq!(reader.get("anything")?, None);
        assert_eq!(reader.iter()?.count(), 0);
        reader.verify()?;
        Ok(())
    }
}
