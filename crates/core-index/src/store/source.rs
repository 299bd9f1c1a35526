//! Source stores: provenance behind the hash stores
//!
//! Three cooperating maps: file-hash → dense source-id, source-id → metadata,
//! and source-id → name pairs. Source-ids are assigned densely starting at 1
//! on first sight of a file hash and never reused; no deletion path exists,
//! so the next id is always the store length plus one.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::codec::{
    decode_source_data, decode_source_name, encode_source_data, encode_source_name,
};
use crate::error::Result;
use crate::settings::{SOURCE_DATA_STORE_FILE, SOURCE_ID_STORE_FILE, SOURCE_NAME_STORE_FILE};
use crate::store::shared_database;

const SOURCE_ID_TABLE: TableDefinition<&[u8], u64> = TableDefinition::new("source_id_store");
const SOURCE_DATA_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("source_data_store");
const SOURCE_NAME_TABLE: MultimapTableDefinition<u64, &[u8]> =
    MultimapTableDefinition::new("source_name_store");

const ITER_BATCH: usize = 128;

/// Metadata recorded for a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceData {
    pub filesize: u64,
    pub file_type: String,
    pub nonprobative_count: u64,
}

/// One (repository name, filename) pair naming a source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceName {
    pub repository_name: String,
    pub filename: String,
}

/// Outcome of a source-data insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDataOutcome {
    /// First record for this source-id
    Inserted,
    /// Record repeated the stored values
    Same,
    /// Record replaced the stored values
    Changed,
}

/// File-hash → source-id map with dense id assignment
pub struct SourceIdStore {
    db: Arc<Database>,
}

impl SourceIdStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = shared_database(&dir.join(SOURCE_ID_STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(SOURCE_ID_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Source-id for a file hash, if assigned.
    pub fn get(&self, file_hash: &[u8]) -> Result<Option<u64>> {
        assert!(!file_hash.is_empty(), "empty file hash");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCE_ID_TABLE)?;
        Ok(table.get(file_hash)?.map(|guard| guard.value()))
    }

    /// Look up the file hash, assigning the next dense id when absent.
    /// Returns (was_new, id).
    pub fn insert_if_absent(&self, file_hash: &[u8]) -> Result<(bool, u64)> {
        assert!(!file_hash.is_empty(), "empty file hash");
        let txn = self.db.begin_write()?;
        let result;
        {
            let mut table = txn.open_table(SOURCE_ID_TABLE)?;
            let existing = table.get(file_hash)?.map(|guard| guard.value());
            match existing {
                Some(id) => result = (false, id),
                None => {
                    let id = table.len()? + 1;
                    table.insert(file_hash, id)?;
                    result = (true, id);
                }
            }
        }
        txn.commit()?;
        Ok(result)
    }

    /// Number of sources.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCE_ID_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Stream every (file_hash, source_id) pair in ascending file-hash order.
    pub fn iter(&self) -> SourceIdIter {
        SourceIdIter {
            db: Arc::clone(&self.db),
            last_key: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Reverse lookup of the file hash for a source-id.
    ///
    /// The map is keyed by file hash only, so this walks the store; bulk
    /// callers should build a map from `iter()` instead.
    pub fn file_hash_for_id(&self, source_id: u64) -> Result<Option<Vec<u8>>> {
        for item in self.iter() {
            let (file_hash, id) = item?;
            if id == source_id {
                return Ok(Some(file_hash));
            }
        }
        Ok(None)
    }
}

/// Streaming cursor over the source-id store
pub struct SourceIdIter {
    db: Arc<Database>,
    last_key: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, u64)>,
    done: bool,
}

impl SourceIdIter {
    fn fill(&mut self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCE_ID_TABLE)?;
        let range = match &self.last_key {
            None => table.range::<&[u8]>(..)?,
            Some(key) => {
                table.range::<&[u8]>((Bound::Excluded(key.as_slice()), Bound::Unbounded))?
            }
        };

        let mut fetched = 0;
        for item in range {
            let (key, value) = item?;
            self.buffer.push_back((key.value().to_vec(), value.value()));
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

impl Iterator for SourceIdIter {
    type Item = Result<(Vec<u8>, u64)>;

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

/// Source-id → (filesize, file_type, nonprobative_count)
pub struct SourceDataStore {
    db: Arc<Database>,
}

impl SourceDataStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = shared_database(&dir.join(SOURCE_DATA_STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(SOURCE_DATA_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn get(&self, source_id: u64) -> Result<Option<SourceData>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCE_DATA_TABLE)?;
        match table.get(source_id)? {
            None => Ok(None),
            Some(guard) => {
                let (filesize, file_type, nonprobative_count) =
                    decode_source_data(guard.value())?;
                Ok(Some(SourceData {
                    filesize,
                    file_type,
                    nonprobative_count,
                }))
            }
        }
    }

    /// Write the record for a source-id, last writer wins.
    pub fn insert(&self, source_id: u64, data: &SourceData) -> Result<SourceDataOutcome> {
        let encoding = encode_source_data(data.filesize, &data.file_type, data.nonprobative_count);

        let txn = self.db.begin_write()?;
        let outcome;
        {
            let mut table = txn.open_table(SOURCE_DATA_TABLE)?;
            let existing = table.get(source_id)?.map(|guard| guard.value().to_vec());
            outcome = match existing {
                None => SourceDataOutcome::Inserted,
                Some(stored) if stored == encoding => SourceDataOutcome::Same,
                Some(_) => SourceDataOutcome::Changed,
            };
            if outcome != SourceDataOutcome::Same {
                table.insert(source_id, encoding.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(outcome)
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCE_DATA_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Source-id → multiset of (repository name, filename)
pub struct SourceNameStore {
    db: Arc<Database>,
}

impl SourceNameStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = shared_database(&dir.join(SOURCE_NAME_STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_multimap_table(SOURCE_NAME_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Insert one name pair. Returns `false` when the exact pair is already
    /// recorded for this source-id.
    pub fn insert(&self, source_id: u64, repository_name: &str, filename: &str) -> Result<bool> {
        let value = encode_source_name(repository_name, filename);

        let txn = self.db.begin_write()?;
        let was_present;
        {
            let mut table = txn.open_multimap_table(SOURCE_NAME_TABLE)?;
            was_present = table.insert(source_id, value.as_slice())?;
        }
        txn.commit()?;
        Ok(!was_present)
    }

    /// All name pairs recorded for a source-id.
    pub fn names(&self, source_id: u64) -> Result<Vec<SourceName>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(SOURCE_NAME_TABLE)?;
        let mut names = Vec::new();
        for entry in table.get(source_id)? {
            let (repository_name, filename) = decode_source_name(entry?.value())?;
            names.push(SourceName {
                repository_name,
                filename,
            });
        }
        Ok(names)
    }

    /// Total number of name pairs.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(SOURCE_NAME_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
