//! Hash-data store: full provenance for each block hash
//!
//! Multimap from (possibly truncated) block hash to encoded
//! (source-id, offset-index) entries. Duplicate-valued keys keep insertion
//! O(log n) without rewriting a growing value, and the exact-pair probe makes
//! duplicate suppression a single lookup.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTableMetadata};

use crate::codec::{decode_source_offset, encode_source_offset};
use crate::error::Result;
use crate::settings::{Settings, HASH_DATA_STORE_FILE};
use crate::store::shared_database;

const HASH_DATA_TABLE: MultimapTableDefinition<&[u8], &[u8]> =
    MultimapTableDefinition::new("hash_data_store");

/// Keys fetched per batch while streaming the whole store
const ITER_BATCH: usize = 128;

/// Block-hash → multiset of (source-id, offset-index)
pub struct HashDataStore {
    db: Arc<Database>,
    truncation: usize,
}

impl HashDataStore {
    /// Open the hash-data store inside a database directory.
    pub fn open(dir: &Path, settings: &Settings) -> Result<Self> {
        let db = shared_database(&dir.join(HASH_DATA_STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_multimap_table(HASH_DATA_TABLE)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            truncation: settings.hash_truncation as usize,
        })
    }

    /// The store key for a block hash, honoring hash truncation.
    pub fn key<'a>(&self, hash: &'a [u8]) -> &'a [u8] {
        if self.truncation != 0 && hash.len() > self.truncation {
            &hash[..self.truncation]
        } else {
            hash
        }
    }

    /// Insert one provenance entry. Returns `false` when the exact
    /// (hash, source-id, offset-index) entry already exists.
    pub fn insert(&self, hash: &[u8], source_id: u64, offset_index: u64) -> Result<bool> {
        assert!(!hash.is_empty(), "empty block hash");
        let key = self.key(hash);
        let value = encode_source_offset(source_id, offset_index);

        let txn = self.db.begin_write()?;
        let was_present;
        {
            let mut table = txn.open_multimap_table(HASH_DATA_TABLE)?;
            was_present = table.insert(key, value.as_slice())?;
        }
        txn.commit()?;
        Ok(!was_present)
    }

    /// Number of entries stored under a block hash.
    pub fn count(&self, hash: &[u8]) -> Result<u64> {
        assert!(!hash.is_empty(), "empty block hash");
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(HASH_DATA_TABLE)?;
        let mut count = 0;
        for entry in table.get(self.key(hash))? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// All (source-id, offset-index) entries for a block hash, in the
    /// substrate's value order.
    pub fn entries(&self, hash: &[u8]) -> Result<Vec<(u64, u64)>> {
        assert!(!hash.is_empty(), "empty block hash");
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(HASH_DATA_TABLE)?;
        let mut entries = Vec::new();
        for entry in table.get(self.key(hash))? {
            entries.push(decode_source_offset(entry?.value())?);
        }
        Ok(entries)
    }

    /// Total number of (hash, source-id, offset-index) entries.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(HASH_DATA_TABLE)?;
        Ok(table.len()?)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Stream every key with its entries in ascending key order.
    ///
    /// The iterator re-reads in key batches, so it holds no transaction open
    /// across yields and uses bounded memory regardless of store size.
    pub fn iter(&self) -> HashDataIter {
        HashDataIter {
            db: Arc::clone(&self.db),
            last_key: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

/// Streaming cursor over the whole hash-data store
pub struct HashDataIter {
    db: Arc<Database>,
    last_key: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<(u64, u64)>)>,
    done: bool,
}

impl HashDataIter {
    fn fill(&mut self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(HASH_DATA_TABLE)?;
        let range = match &self.last_key {
            None => table.range::<&[u8]>(..)?,
            Some(key) => {
                table.range::<&[u8]>((Bound::Excluded(key.as_slice()), Bound::Unbounded))?
            }
        };

        let mut fetched = 0;
        for item in range {
            let (key_guard, values) = item?;
            let key = key_guard.value().to_vec();
            let mut entries = Vec::new();
            for value in values {
                entries.push(decode_source_offset(value?.value())?);
            }
            self.buffer.push_back((key, entries));
            fetched += 1;
            if fetched == ITER_BATCH {
                break;
            }
        }
        if let Some((key, _)) = self.buffer.back() {
            self.last_key = Some(key.clone());
        }
        if fetched < ITER_BATCH {
            self.done = true;
        }
        Ok(())
    }
}

impl Iterator for HashDataIter {
    type Item = Result<(Vec<u8>, Vec<(u64, u64)>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
