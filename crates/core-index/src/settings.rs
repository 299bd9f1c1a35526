//! Database settings document and directory lifecycle
//!
//! A database directory is created by writing a `settings.json` document into
//! an empty directory. Every subsequent open re-reads the document; the
//! settings are immutable for the life of the database except for the bloom
//! parameters, which `rebuild_bloom` may rewrite.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current settings document version
pub const SETTINGS_VERSION: u32 = 3;

/// Name of the settings document inside a database directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Name of the bloom filter backing file inside a database directory
pub const BLOOM_FILE: &str = "bloom_filter";

/// Name of the history log inside a database directory
pub const HISTORY_FILE: &str = "history.json";

/// Store file names inside a database directory
pub const HASH_STORE_FILE: &str = "hash_store.redb";
pub const HASH_DATA_STORE_FILE: &str = "hash_data_store.redb";
pub const SOURCE_ID_STORE_FILE: &str = "source_id_store.redb";
pub const SOURCE_DATA_STORE_FILE: &str = "source_data_store.redb";
pub const SOURCE_NAME_STORE_FILE: &str = "source_name_store.redb";

/// Database parameters, persisted as `settings.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Settings document version
    pub settings_version: u32,
    /// Size in bytes of the hashed data blocks
    pub block_size: u32,
    /// Alignment in bytes required of stored file offsets
    pub sector_size: u32,
    /// Bit length of the hash-store key prefix
    pub hash_prefix_bits: u32,
    /// Byte length of the hash-store value suffixes
    pub hash_suffix_bytes: u32,
    /// Truncate block hashes to this many bytes before use as a key
    /// (0 disables truncation)
    pub hash_truncation: u32,
    /// Reject hash-data entries once a key holds this many
    /// (0 disables the limit)
    pub max_duplicates: u32,
    /// Whether the bloom filter accelerates negative lookups
    pub bloom_is_used: bool,
    /// log2 of the bloom filter bit count M
    pub bloom_m: u32,
    /// Number of bloom hash functions
    pub bloom_k: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: SETTINGS_VERSION,
            block_size: 512,
            sector_size: 512,
            hash_prefix_bits: 28,
            hash_suffix_bytes: 3,
            hash_truncation: 0,
            max_duplicates: 0,
            bloom_is_used: true,
            bloom_m: 28,
            bloom_k: 3,
        }
    }
}

impl Settings {
    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::invalid_settings("block size must not be zero"));
        }
        if self.sector_size == 0 {
            return Err(Error::invalid_settings("sector size must not be zero"));
        }
        if self.hash_prefix_bits == 0 {
            return Err(Error::invalid_settings(
                "hash prefix bits must not be zero",
            ));
        }
        if self.bloom_m > 32 {
            return Err(Error::invalid_settings(format!(
                "bloom M (log2 bits) must not exceed 32, got {}",
                self.bloom_m
            )));
        }
        if self.bloom_enabled() && self.bloom_k == 0 {
            return Err(Error::invalid_settings(
                "bloom k must not be zero when bloom is used",
            ));
        }
        Ok(())
    }

    /// Whether the bloom filter participates in lookups. M = 0 disables the
    /// filter just like `bloom_is_used = false`.
    pub fn bloom_enabled(&self) -> bool {
        self.bloom_is_used && self.bloom_m != 0
    }

    /// Read and validate the settings document of a database directory
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.is_file() {
            return Err(Error::not_a_database(dir));
        }
        let text = fs::read_to_string(&path)?;
        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| Error::invalid_settings(format!("{}: {e}", path.display())))?;
        if settings.settings_version != SETTINGS_VERSION {
            return Err(Error::VersionMismatch {
                expected: SETTINGS_VERSION,
                found: settings.settings_version,
            });
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings document into a database directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(SETTINGS_FILE), text)?;
        Ok(())
    }
}

/// Whether `dir` looks like a block-hash database directory
pub fn is_database(dir: &Path) -> bool {
    dir.join(SETTINGS_FILE).is_file()
}

/// Create a new database directory with the given settings.
///
/// The directory is created if absent and must be empty. The settings
/// document is written and the store files are left to be created lazily on
/// first open.
pub fn create_database(dir: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    if dir.exists() {
        if !dir.is_dir() {
            return Err(Error::invalid_settings(format!(
                "{} exists and is not a directory",
                dir.display()
            )));
        }
        if fs::read_dir(dir)?.next().is_some() {
            return Err(Error::DirectoryNotEmpty {
                path: dir.to_path_buf(),
            });
        }
    } else {
        fs::create_dir_all(dir)?;
    }
    settings.save(dir)?;
    Ok(())
}

/// Canonical form of a database directory path, for identity comparisons
pub fn canonical_dir(dir: &Path) -> Result<PathBuf> {
    Ok(dir.canonicalize()?)
}
