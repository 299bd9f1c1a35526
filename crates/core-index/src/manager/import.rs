//! Import manager: the single writer over a database directory
//!
//! Owns the write side of all five stores plus the bloom filter, tracks the
//! `Changes` counters, and appends one history event on close. A coarse
//! mutex serializes inserts across threads; the substrate additionally
//! serializes its own write transactions.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::bloom::BloomFilter;
use crate::changes::Changes;
use crate::error::Result;
use crate::manager::history::HistoryManager;
use crate::settings::{Settings, BLOOM_FILE};
use crate::store::hash::HashStore;
use crate::store::hash_data::HashDataStore;
use crate::store::source::{
    SourceData, SourceDataOutcome, SourceDataStore, SourceIdStore, SourceNameStore,
};
use crate::store::WriterGuard;

struct WriterState {
    bloom: Option<BloomFilter>,
    changes: Changes,
}

/// Single-writer facade composing the hash, hash-data, and source stores
pub struct ImportManager {
    dir: PathBuf,
    command: String,
    arguments: Vec<String>,
    settings: Settings,
    hash_store: HashStore,
    hash_data: HashDataStore,
    source_ids: SourceIdStore,
    source_data: SourceDataStore,
    source_names: SourceNameStore,
    history: HistoryManager,
    state: Mutex<WriterState>,
    _writer: WriterGuard,
}

impl ImportManager {
    /// Open the directory for writing. Fails when it is not a database or
    /// when another writer is active on it.
    ///
    /// `command` and `arguments` name the operation for the history log.
    pub fn open(dir: &Path, command: &str, arguments: &[String]) -> Result<Self> {
        let settings = Settings::load(dir)?;
        let writer = WriterGuard::acquire(dir)?;

        let bloom = if settings.bloom_enabled() {
            Some(BloomFilter::open_rw(
                &dir.join(BLOOM_FILE),
                settings.bloom_m,
                settings.bloom_k,
            )?)
        } else {
            None
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            command: command.to_string(),
            arguments: arguments.to_vec(),
            hash_store: HashStore::open(dir, &settings)?,
            hash_data: HashDataStore::open(dir, &settings)?,
            source_ids: SourceIdStore::open(dir)?,
            source_data: SourceDataStore::open(dir)?,
            source_names: SourceNameStore::open(dir)?,
            history: HistoryManager::open(dir),
            settings,
            state: Mutex::new(WriterState {
                bloom,
                changes: Changes::new(),
            }),
            _writer: writer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record metadata for a source file, assigning its id when new.
    ///
    /// Last writer wins, except `nonprobative_count` which keeps its maximum
    /// across repeated inserts of the same source.
    pub fn insert_source_data(&self, file_hash: &[u8], data: &SourceData) -> Result<u64> {
        let mut state = self.state.lock().expect("writer state poisoned");
        let (_, source_id) = self.source_ids.insert_if_absent(file_hash)?;

        let mut record = data.clone();
        if let Some(existing) = self.source_data.get(source_id)? {
            record.nonprobative_count = record.nonprobative_count.max(existing.nonprobative_count);
        }
        match self.source_data.insert(source_id, &record)? {
            SourceDataOutcome::Inserted => state.changes.source_data_inserted += 1,
            SourceDataOutcome::Same => state.changes.source_data_same += 1,
            SourceDataOutcome::Changed => state.changes.source_data_changed += 1,
        }
        Ok(source_id)
    }

    /// Record one (repository name, filename) pair for a source file,
    /// assigning its id when new.
    pub fn insert_source_name(
        &self,
        file_hash: &[u8],
        repository_name: &str,
        filename: &str,
    ) -> Result<u64> {
        let mut state = self.state.lock().expect("writer state poisoned");
        let (_, source_id) = self.source_ids.insert_if_absent(file_hash)?;
        if self.source_names.insert(source_id, repository_name, filename)? {
            state.changes.source_name_inserted += 1;
        } else {
            state.changes.source_name_already_present += 1;
        }
        Ok(source_id)
    }

    /// Insert one block observation.
    ///
    /// Rejections are counted, never errors: misaligned offsets, entries
    /// beyond `max_duplicates`, and exact duplicates all leave the database
    /// unchanged and bump their counter. `entropy` and `block_label` are part
    /// of the record contract but carry no stored representation.
    pub fn insert_hash(
        &self,
        block_hash: &[u8],
        file_hash: &[u8],
        file_offset: u64,
        _entropy: u64,
        _block_label: &str,
    ) -> Result<()> {
        assert!(!block_hash.is_empty(), "empty block hash");
        assert!(!file_hash.is_empty(), "empty file hash");
        let mut state = self.state.lock().expect("writer state poisoned");

        if file_offset % self.settings.sector_size as u64 != 0 {
            state.changes.hashes_not_inserted_invalid_byte_alignment += 1;
            return Ok(());
        }
        let offset_index = file_offset / self.settings.sector_size as u64;

        let (_, source_id) = self.source_ids.insert_if_absent(file_hash)?;

        if self.settings.max_duplicates > 0
            && self.hash_data.count(block_hash)? >= self.settings.max_duplicates as u64
        {
            state.changes.hashes_not_inserted_exceeds_max_duplicates += 1;
            return Ok(());
        }

        if !self.hash_data.insert(block_hash, source_id, offset_index)? {
            state.changes.hashes_not_inserted_duplicate_element += 1;
            return Ok(());
        }

        self.hash_store.insert(block_hash, &mut state.changes)?;
        if let Some(bloom) = state.bloom.as_mut() {
            // the bloom holds the store key form so a rebuild from the
            // hash-data store reproduces the same bits
            bloom.add(self.hash_data.key(block_hash))?;
        }
        state.changes.hashes_inserted += 1;
        Ok(())
    }

    /// Snapshot of the counters accumulated so far.
    pub fn changes(&self) -> Changes {
        self.state.lock().expect("writer state poisoned").changes.clone()
    }

    /// Flush, append the history event, and release the writer claim.
    /// Returns the final counters.
    pub fn close(self) -> Result<Changes> {
        let changes = {
            let state = self.state.lock().expect("writer state poisoned");
            if let Some(bloom) = &state.bloom {
                bloom.flush()?;
            }
            state.changes.clone()
        };
        self.history
            .append(&self.command, &self.arguments, Some(&changes))?;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::create_database;
    use tempfile::TempDir;

    fn new_db() -> TempDir {
        let dir = TempDir::new().unwrap();
        create_database(dir.path(), &Settings::default()).unwrap();
        dir
    }

    #[test]
    fn test_insert_hash_counts() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let block = vec![0u8; 16];
        let file = vec![0xab; 32];

        manager.insert_hash(&block, &file, 0, 0, "").unwrap();
        manager.insert_hash(&block, &file, 0, 0, "").unwrap();
        manager.insert_hash(&block, &file, 513, 0, "").unwrap();

        let changes = manager.close().unwrap();
        assert_eq!(changes.hashes_inserted, 1);
        assert_eq!(changes.hashes_not_inserted_duplicate_element, 1);
        assert_eq!(changes.hashes_not_inserted_invalid_byte_alignment, 1);
    }

    #[test]
    fn test_second_writer_rejected() {
        let dir = new_db();
        let _manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        assert!(ImportManager::open(dir.path(), "import", &[]).is_err());
    }

    #[test]
    fn test_writer_released_on_close() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        manager.close().unwrap();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        manager.close().unwrap();
    }

    #[test]
    fn test_nonprobative_count_keeps_maximum() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let file = vec![0x01; 32];

        let high = SourceData {
            filesize: 8000,
            file_type: "exe".to_string(),
            nonprobative_count: 9,
        };
        let low = SourceData {
            nonprobative_count: 2,
            ..high.clone()
        };
        let id = manager.insert_source_data(&file, &high).unwrap();
        manager.insert_source_data(&file, &low).unwrap();

        assert_eq!(
            manager.source_data.get(id).unwrap().unwrap().nonprobative_count,
            9
        );
        manager.close().unwrap();
    }

    #[test]
    fn test_max_duplicates_limit() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            max_duplicates: 2,
            ..Settings::default()
        };
        create_database(dir.path(), &settings).unwrap();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let block = vec![0x42; 16];
        let file = vec![0xab; 32];

        manager.insert_hash(&block, &file, 0, 0, "").unwrap();
        manager.insert_hash(&block, &file, 512, 0, "").unwrap();
        manager.insert_hash(&block, &file, 1024, 0, "").unwrap();

        let changes = manager.close().unwrap();
        assert_eq!(changes.hashes_inserted, 2);
        assert_eq!(changes.hashes_not_inserted_exceeds_max_duplicates, 1);
    }

    #[test]
    fn test_close_appends_history() {
        let dir = new_db();
        let manager =
            ImportManager::open(dir.path(), "import", &["stdin".to_string()]).unwrap();
        manager
            .insert_hash(&[0x10; 16], &[0x20; 32], 0, 0, "")
            .unwrap();
        manager.close().unwrap();

        let events = HistoryManager::open(dir.path()).read().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command, "import");
        assert_eq!(events[0].changes.as_ref().unwrap().hashes_inserted, 1);
    }
}
