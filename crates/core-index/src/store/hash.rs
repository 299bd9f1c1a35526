//! Prefix/suffix hash store
//!
//! Maps a truncated hash prefix to an encoded set of hash suffixes, keeping
//! keys much shorter than full hashes while `find` stays exact modulo
//! (prefix, suffix) collisions. Parameters are chosen so prefix plus suffix
//! covers at least the full hash, making collisions vanishingly rare.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::changes::Changes;
use crate::codec::{decode_suffix_set, encode_suffix_set};
use crate::error::Result;
use crate::settings::{Settings, HASH_STORE_FILE};
use crate::store::shared_database;

const HASH_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("hash_store");

/// Bit masks applied to the final prefix byte, indexed by `prefix_bits % 8`
static MASKS: [u8; 8] = [0xff, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

/// Prefix → suffix-set store backing `find(hash)` and `insert(hash)`
pub struct HashStore {
    db: Arc<Database>,
    prefix_bytes: usize,
    prefix_mask: u8,
    suffix_bytes: usize,
}

impl HashStore {
    /// Open the hash store inside a database directory.
    pub fn open(dir: &Path, settings: &Settings) -> Result<Self> {
        let db = shared_database(&dir.join(HASH_STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(HASH_TABLE)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            prefix_bytes: (settings.hash_prefix_bits as usize + 7) / 8,
            prefix_mask: MASKS[settings.hash_prefix_bits as usize % 8],
            suffix_bytes: settings.hash_suffix_bytes as usize,
        })
    }

    /// Split a hash into its masked prefix and its suffix.
    ///
    /// The suffix is the trailing `suffix_bytes` bytes but never overlaps the
    /// prefix; short hashes yield a short prefix (unmasked) and possibly an
    /// empty suffix, and still round-trip exactly.
    fn split(&self, hash: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let prefix_len = hash.len().min(self.prefix_bytes);
        let mut prefix = hash[..prefix_len].to_vec();
        if prefix_len == self.prefix_bytes {
            prefix[prefix_len - 1] &= self.prefix_mask;
        }
        let suffix_start = hash.len().saturating_sub(self.suffix_bytes).max(prefix_len);
        let suffix = hash[suffix_start.min(hash.len())..].to_vec();
        (prefix, suffix)
    }

    /// Insert a block hash, counting `hash_inserted` or
    /// `hash_already_present`.
    ///
    /// Panics on an empty hash; that is a programmer error in the caller, not
    /// record-level input.
    pub fn insert(&self, hash: &[u8], changes: &mut Changes) -> Result<()> {
        assert!(!hash.is_empty(), "empty block hash");
        let (prefix, suffix) = self.split(hash);

        let txn = self.db.begin_write()?;
        let inserted;
        {
            let mut table = txn.open_table(HASH_TABLE)?;
            // copy out the current encoding before mutating the table
            let existing = table
                .get(prefix.as_slice())?
                .map(|guard| guard.value().to_vec());
            match existing {
                None => {
                    let mut suffixes = std::collections::BTreeSet::new();
                    suffixes.insert(suffix);
                    let encoding = encode_suffix_set(&suffixes);
                    table.insert(prefix.as_slice(), encoding.as_slice())?;
                    inserted = true;
                }
                Some(encoding) => {
                    let mut suffixes = decode_suffix_set(&encoding)?;
                    if suffixes.insert(suffix) {
                        let encoding = encode_suffix_set(&suffixes);
                        table.insert(prefix.as_slice(), encoding.as_slice())?;
                        inserted = true;
                    } else {
                        inserted = false;
                    }
                }
            }
        }
        txn.commit()?;

        if inserted {
            changes.hash_inserted += 1;
        } else {
            changes.hash_already_present += 1;
        }
        Ok(())
    }

    /// Whether the hash is present. Exact: a `false` here is authoritative
    /// even when the bloom filter reported a possible match.
    pub fn find(&self, hash: &[u8]) -> Result<bool> {
        assert!(!hash.is_empty(), "empty block hash");
        let (prefix, suffix) = self.split(hash);

        let txn = self.db.begin_read()?;
        let table = txn.open_table(HASH_TABLE)?;
        match table.get(prefix.as_slice())? {
            None => Ok(false),
            Some(guard) => {
                let suffixes = decode_suffix_set(guard.value())?;
                Ok(suffixes.contains(&suffix))
            }
        }
    }

    /// Number of distinct prefixes stored.
    pub fn size(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(HASH_TABLE)?;
        Ok(table.len()?)
    }
}
