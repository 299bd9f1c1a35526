//! Scan manager: read-only composite over a database directory
//!
//! Lookups flow bloom → hash store → hash-data store → source stores, so a
//! bloom rejection skips the stores entirely. Reads observe a point-in-time
//! view; reopen the manager to observe later commits.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::settings::{Settings, BLOOM_FILE};
use crate::store::hash::HashStore;
use crate::store::hash_data::{HashDataIter, HashDataStore};
use crate::store::source::{
    SourceData, SourceDataStore, SourceIdIter, SourceIdStore, SourceName, SourceNameStore,
};

/// Everything known about one source of an expanded block hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandedSource {
    pub source_id: u64,
    #[serde(with = "hex::serde")]
    pub file_hash: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SourceData>,
    pub names: Vec<SourceName>,
    pub offset_indexes: Vec<u64>,
}

/// Full provenance for one block hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandedHash {
    #[serde(with = "hex::serde")]
    pub block_hash: Vec<u8>,
    pub count: u64,
    pub sources: Vec<ExpandedSource>,
}

/// Per-store entry counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub hash_store: u64,
    pub hash_data_store: u64,
    pub source_id_store: u64,
    pub source_data_store: u64,
    pub source_name_store: u64,
}

/// Read-only facade over the stores of one database directory
pub struct ScanManager {
    dir: PathBuf,
    settings: Settings,
    hash_store: HashStore,
    hash_data: HashDataStore,
    source_ids: SourceIdStore,
    source_data: SourceDataStore,
    source_names: SourceNameStore,
    bloom: Option<BloomFilter>,
}

impl ScanManager {
    /// Open the directory read-only. Any number of scan managers may coexist
    /// with at most one import manager.
    pub fn open(dir: &Path) -> Result<Self> {
        let settings = Settings::load(dir)?;

        let bloom_path = dir.join(BLOOM_FILE);
        let bloom = if settings.bloom_enabled() && bloom_path.is_file() {
            Some(BloomFilter::open_ro(&bloom_path)?)
        } else {
            if settings.bloom_enabled() {
                warn!(dir = %dir.display(), "bloom filter file missing, lookups fall back to the hash store");
            }
            None
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            hash_store: HashStore::open(dir, &settings)?,
            hash_data: HashDataStore::open(dir, &settings)?,
            source_ids: SourceIdStore::open(dir)?,
            source_data: SourceDataStore::open(dir)?,
            source_names: SourceNameStore::open(dir)?,
            bloom,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the block hash is present.
    pub fn find_hash(&self, hash: &[u8]) -> Result<bool> {
        if let Some(bloom) = &self.bloom {
            if !bloom.probably_contains(self.hash_data.key(hash)) {
                return Ok(false);
            }
        }
        self.hash_store.find(hash)
    }

    /// Number of stored observations of the block hash.
    pub fn find_count(&self, hash: &[u8]) -> Result<u64> {
        self.hash_data.count(hash)
    }

    /// All (source-id, offset-index) entries for the block hash.
    pub fn hash_data_entries(&self, hash: &[u8]) -> Result<Vec<(u64, u64)>> {
        self.hash_data.entries(hash)
    }

    /// Full provenance for the block hash: every observation grouped by
    /// source, with source metadata and names attached.
    pub fn find_expanded_hash(&self, hash: &[u8]) -> Result<Option<ExpandedHash>> {
        let entries = self.hash_data.entries(hash)?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut by_source: std::collections::BTreeMap<u64, Vec<u64>> =
            std::collections::BTreeMap::new();
        for (source_id, offset_index) in &entries {
            by_source.entry(*source_id).or_default().push(*offset_index);
        }

        let mut sources = Vec::with_capacity(by_source.len());
        for (source_id, mut offset_indexes) in by_source {
            offset_indexes.sort_unstable();
            let file_hash = self
                .source_ids
                .file_hash_for_id(source_id)?
                .unwrap_or_default();
            sources.push(ExpandedSource {
                source_id,
                file_hash,
                data: self.source_data.get(source_id)?,
                names: self.source_names.names(source_id)?,
                offset_indexes,
            });
        }

        Ok(Some(ExpandedHash {
            block_hash: hash.to_vec(),
            count: entries.len() as u64,
            sources,
        }))
    }

    /// Bulk scan: per-hash observation counts, matched indices only.
    pub fn scan(&self, hashes: &[Vec<u8>]) -> Result<Vec<(usize, u64)>> {
        let mut matches = Vec::new();
        for (index, hash) in hashes.iter().enumerate() {
            if let Some(bloom) = &self.bloom {
                if !bloom.probably_contains(self.hash_data.key(hash)) {
                    continue;
                }
            }
            let count = self.hash_data.count(hash)?;
            if count > 0 {
                matches.push((index, count));
            }
        }
        Ok(matches)
    }

    /// Entry counts of every store.
    pub fn size(&self) -> Result<SizeReport> {
        Ok(SizeReport {
            hash_store: self.hash_store.size()?,
            hash_data_store: self.hash_data.len()?,
            source_id_store: self.source_ids.len()?,
            source_data_store: self.source_data.len()?,
            source_name_store: self.source_names.len()?,
        })
    }

    /// Stream all (block hash, entries) pairs in key order.
    pub fn iter_hash_data(&self) -> HashDataIter {
        self.hash_data.iter()
    }

    /// Stream all (file hash, source id) pairs in file-hash order.
    pub fn iter_sources(&self) -> SourceIdIter {
        self.source_ids.iter()
    }

    /// Source metadata by id.
    pub fn source_data(&self, source_id: u64) -> Result<Option<SourceData>> {
        self.source_data.get(source_id)
    }

    /// Source names by id.
    pub fn source_names(&self, source_id: u64) -> Result<Vec<SourceName>> {
        self.source_names.names(source_id)
    }

    /// Total hash-data entries, the `map_size` used to pick operator drivers.
    pub fn entry_count(&self) -> Result<u64> {
        self.hash_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::import::ImportManager;
    use crate::settings::create_database;
    use tempfile::TempDir;

    fn populated_db() -> TempDir {
        let dir = TempDir::new().unwrap();
        create_database(dir.path(), &Settings::default()).unwrap();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let file = vec![0xab; 32];
        manager
            .insert_source_data(
                &file,
                &SourceData {
                    filesize: 8000,
                    file_type: "exe".to_string(),
                    nonprobative_count: 4,
                },
            )
            .unwrap();
        manager
            .insert_source_name(&file, "repository1", "filename1")
            .unwrap();
        manager.insert_hash(&[0u8; 16], &file, 0, 0, "").unwrap();
        manager.insert_hash(&[0u8; 16], &file, 512, 0, "").unwrap();
        manager.close().unwrap();
        dir
    }

    #[test]
    fn test_find_hash() {
        let dir = populated_db();
        let scan = ScanManager::open(dir.path()).unwrap();
        assert!(scan.find_hash(&[0u8; 16]).unwrap());
        assert!(!scan.find_hash(&[1u8; 16]).unwrap());
    }

    #[test]
    fn test_find_expanded_hash() {
        let dir = populated_db();
        let scan = ScanManager::open(dir.path()).unwrap();

        let expanded = scan.find_expanded_hash(&[0u8; 16]).unwrap().unwrap();
        assert_eq!(expanded.count, 2);
        assert_eq!(expanded.sources.len(), 1);
        let source = &expanded.sources[0];
        assert_eq!(source.source_id, 1);
        assert_eq!(source.file_hash, vec![0xab; 32]);
        assert_eq!(source.offset_indexes, vec![0, 1]);
        assert_eq!(source.data.as_ref().unwrap().filesize, 8000);
        assert_eq!(source.names.len(), 1);

        assert!(scan.find_expanded_hash(&[1u8; 16]).unwrap().is_none());
    }

    #[test]
    fn test_scan_reports_matches_only() {
        let dir = populated_db();
        let scan = ScanManager::open(dir.path()).unwrap();

        let hashes = vec![vec![1u8; 16], vec![0u8; 16], vec![2u8; 16]];
        let matches = scan.scan(&hashes).unwrap();
        assert_eq!(matches, vec![(1, 2)]);
    }

    #[test]
    fn test_size_report() {
        let dir = populated_db();
        let scan = ScanManager::open(dir.path()).unwrap();
        let size = scan.size().unwrap();
        assert_eq!(size.hash_store, 1);
        assert_eq!(size.hash_data_store, 2);
        assert_eq!(size.source_id_store, 1);
        assert_eq!(size.source_data_store, 1);
        assert_eq!(size.source_name_store, 1);
    }

    #[test]
    fn test_reader_overlaps_writer() {
        let dir = TempDir::new().unwrap();
        create_database(dir.path(), &Settings::default()).unwrap();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        manager
            .insert_hash(&[0x07; 16], &[0xab; 32], 0, 0, "")
            .unwrap();

        // a reader may open while the writer is active
        let scan = ScanManager::open(dir.path()).unwrap();
        assert!(scan.find_hash(&[0x07; 16]).unwrap());
        manager.close().unwrap();
    }

    #[test]
    fn test_bloom_disabled_database() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            bloom_is_used: false,
            ..Settings::default()
        };
        create_database(dir.path(), &settings).unwrap();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        manager
            .insert_hash(&[0x09; 16], &[0xab; 32], 0, 0, "")
            .unwrap();
        manager.close().unwrap();

        // the hash store alone must still be exact
        let scan = ScanManager::open(dir.path()).unwrap();
        assert!(scan.find_hash(&[0x09; 16]).unwrap());
        assert!(!scan.find_hash(&[0x0a; 16]).unwrap());
    }
}
