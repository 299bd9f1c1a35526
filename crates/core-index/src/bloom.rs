//! Memory-mapped bloom filter for negative lookups
//!
//! A bit array of M = 2^m bits backed by a file, preceded by a small header
//! recording the parameters. May return false positives but never false
//! negatives, so a negative answer lets a scan skip the hash store entirely.
//!
//! The k bit indexes are derived by double hashing over the first 128 bits of
//! the block hash, read as two little-endian u64 windows (zero-padded for
//! short hashes): `index_i = w1 + i*w2 mod M`. Block hashes are already
//! cryptographic, so the windows stand in for independent hash functions.
//!
//! The writer only ever sets bits; readers share the same mapping and observe
//! a monotonically growing filter.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::{Error, Result};

/// Magic number identifying a bloom filter file
const BLOOM_MAGIC: &[u8; 8] = b"BDBBLOOM";

/// Current bloom filter file version
const BLOOM_VERSION: u16 = 1;

/// magic[8] + version u16 + reserved u16 + k u32 + m_bits u64
const HEADER_LEN: usize = 24;

enum Backing {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::ReadOnly(map) => map,
            Backing::ReadWrite(map) => map,
        }
    }
}

/// File-backed bloom filter over block hashes
pub struct BloomFilter {
    backing: Backing,
    m_bits: u64,
    k: u32,
}

impl BloomFilter {
    /// Create a new filter file with 2^`m_log2` bits and `k` hash functions,
    /// replacing any existing file, and open it for writing.
    pub fn create(path: &Path, m_log2: u32, k: u32) -> Result<Self> {
        if m_log2 == 0 || m_log2 > 32 {
            return Err(Error::bloom_filter(format!(
                "M (log2 bits) must be in 1..=32, got {m_log2}"
            )));
        }
        if k == 0 {
            return Err(Error::bloom_filter("k must not be zero"));
        }
        let m_bits = 1u64 << m_log2;
        let byte_len = HEADER_LEN as u64 + m_bits.div_ceil(8);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(byte_len)?;

        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[0..8].copy_from_slice(BLOOM_MAGIC);
        map[8..10].copy_from_slice(&BLOOM_VERSION.to_le_bytes());
        map[10..12].copy_from_slice(&[0, 0]);
        map[12..16].copy_from_slice(&k.to_le_bytes());
        map[16..24].copy_from_slice(&m_bits.to_le_bytes());
        map.flush()?;

        Ok(Self {
            backing: Backing::ReadWrite(map),
            m_bits,
            k,
        })
    }

    /// Open an existing filter file for writing, or create it when absent.
    pub fn open_rw(path: &Path, m_log2: u32, k: u32) -> Result<Self> {
        if !path.is_file() {
            return Self::create(path, m_log2, k);
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        let (m_bits, k) = Self::check_header(&map)?;
        Ok(Self {
            backing: Backing::ReadWrite(map),
            m_bits,
            k,
        })
    }

    /// Open an existing filter file read-only.
    pub fn open_ro(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let (m_bits, k) = Self::check_header(&map)?;
        Ok(Self {
            backing: Backing::ReadOnly(map),
            m_bits,
            k,
        })
    }

    fn check_header(map: &[u8]) -> Result<(u64, u32)> {
        if map.len() < HEADER_LEN {
            return Err(Error::bloom_filter("file too small for header"));
        }
        if &map[0..8] != BLOOM_MAGIC {
            return Err(Error::bloom_filter("bad magic number"));
        }
        let version = u16::from_le_bytes([map[8], map[9]]);
        if version != BLOOM_VERSION {
            return Err(Error::bloom_filter(format!(
                "version mismatch: expected {BLOOM_VERSION}, found {version}"
            )));
        }
        let k = u32::from_le_bytes([map[12], map[13], map[14], map[15]]);
        let mut m = [0u8; 8];
        m.copy_from_slice(&map[16..24]);
        let m_bits = u64::from_le_bytes(m);
        if !m_bits.is_power_of_two() || k == 0 {
            return Err(Error::bloom_filter("invalid parameters in header"));
        }
        let expected_len = HEADER_LEN as u64 + m_bits.div_ceil(8);
        if map.len() as u64 != expected_len {
            return Err(Error::bloom_filter(format!(
                "file length {} does not match parameters (expected {expected_len})",
                map.len()
            )));
        }
        Ok((m_bits, k))
    }

    /// The two 64-bit windows of the first 128 bits of the hash
    fn windows(hash: &[u8]) -> (u64, u64) {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        for (dst, src) in first.iter_mut().zip(hash.iter()) {
            *dst = *src;
        }
        for (dst, src) in second.iter_mut().zip(hash.iter().skip(8)) {
            *dst = *src;
        }
        (u64::from_le_bytes(first), u64::from_le_bytes(second))
    }

    fn bit_index(&self, w1: u64, w2: u64, i: u32) -> u64 {
        // m_bits is a power of two, so the modulo is a mask
        w1.wrapping_add((i as u64).wrapping_mul(w2)) & (self.m_bits - 1)
    }

    /// Set the k bits for `hash`. Fails on a read-only filter.
    pub fn add(&mut self, hash: &[u8]) -> Result<()> {
        let (w1, w2) = Self::windows(hash);
        let mask = self.m_bits - 1;
        let k = self.k;
        let map = match &mut self.backing {
            Backing::ReadWrite(map) => map,
            Backing::ReadOnly(_) => {
                return Err(Error::bloom_filter("add on a read-only filter"));
            }
        };
        for i in 0..k {
            let bit = w1.wrapping_add((i as u64).wrapping_mul(w2)) & mask;
            map[HEADER_LEN + (bit / 8) as usize] |= 1 << (bit % 8);
        }
        Ok(())
    }

    /// Test the k bits for `hash`. A `false` answer is definitive.
    pub fn probably_contains(&self, hash: &[u8]) -> bool {
        let (w1, w2) = Self::windows(hash);
        let bytes = self.backing.bytes();
        for i in 0..self.k {
            let bit = self.bit_index(w1, w2, i);
            if bytes[HEADER_LEN + (bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Flush pending writes to the backing file.
    pub fn flush(&self) -> Result<()> {
        if let Backing::ReadWrite(map) = &self.backing {
            map.flush()?;
        }
        Ok(())
    }

    /// Number of bits M
    pub fn m_bits(&self) -> u64 {
        self.m_bits
    }

    /// Number of hash functions k
    pub fn k(&self) -> u32 {
        self.k
    }
}

impl Drop for BloomFilter {
    fn drop(&mut self) {
        if let Backing::ReadWrite(map) = &self.backing {
            let _ = map.flush();
        }
    }
}
