//! Multi-database operators
//!
//! Add, ordered merge, intersect, subtract, and deduplicate over two or three
//! databases, plus bloom filter rebuild. All operators stream over cursor
//! ranges with bounded memory (the per-input source table is the one
//! in-memory structure, and sources are small relative to hashes), check a
//! caller-supplied stop flag between records, and merge input histories into
//! the destination on completion.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::bloom::BloomFilter;
use crate::changes::Changes;
use crate::error::{Error, Result};
use crate::manager::history::HistoryManager;
use crate::manager::import::ImportManager;
use crate::manager::scan::ScanManager;
use crate::settings::{self, Settings, BLOOM_FILE};
use crate::store::hash_data::HashDataStore;

/// Refuse to operate when any two directories are the same one.
fn require_distinct(dirs: &[&Path]) -> Result<()> {
    let mut seen = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let canonical = settings::canonical_dir(dir)?;
        if seen.contains(&canonical) {
            return Err(Error::incompatible(format!(
                "the databases must not be the same one: {}",
                canonical.display()
            )));
        }
        seen.push(canonical);
    }
    Ok(())
}

/// Refuse to operate on databases with unequal block sizes.
fn require_same_block_size(settings: &[&Settings]) -> Result<()> {
    for pair in settings.windows(2) {
        if pair[0].block_size != pair[1].block_size {
            return Err(Error::incompatible(format!(
                "the databases have unequal block sizes: {} vs {}",
                pair[0].block_size, pair[1].block_size
            )));
        }
    }
    Ok(())
}

/// Create the destination with the source's settings when it is absent.
fn ensure_destination(dest: &Path, template: &Settings) -> Result<()> {
    if !settings::is_database(dest) {
        settings::create_database(dest, template)?;
    }
    Ok(())
}

/// Copies elements of one input database into the destination, bringing each
/// referenced source's metadata and names along the first time it appears.
struct SourceCopier {
    sector_size: u64,
    id_to_file_hash: HashMap<u64, Vec<u8>>,
    copied: HashSet<u64>,
}

impl SourceCopier {
    fn new(src: &ScanManager) -> Result<Self> {
        let mut id_to_file_hash = HashMap::new();
        for item in src.iter_sources() {
            let (file_hash, source_id) = item?;
            id_to_file_hash.insert(source_id, file_hash);
        }
        Ok(Self {
            sector_size: src.settings().sector_size as u64,
            id_to_file_hash,
            copied: HashSet::new(),
        })
    }

    fn copy_key(
        &mut self,
        src: &ScanManager,
        dest: &ImportManager,
        block_hash: &[u8],
        entries: &[(u64, u64)],
    ) -> Result<()> {
        for &(source_id, offset_index) in entries {
            let file_hash = self.id_to_file_hash.get(&source_id).ok_or_else(|| {
                Error::corrupt_data(format!(
                    "hash-data entry references unknown source id {source_id}"
                ))
            })?;
            if self.copied.insert(source_id) {
                if let Some(data) = src.source_data(source_id)? {
                    dest.insert_source_data(file_hash, &data)?;
                }
                for name in src.source_names(source_id)? {
                    dest.insert_source_name(file_hash, &name.repository_name, &name.filename)?;
                }
            }
            dest.insert_hash(
                block_hash,
                file_hash,
                offset_index * self.sector_size,
                0,
                "",
            )?;
        }
        Ok(())
    }
}

/// Finish an operator run: close the destination writer, record an abort if
/// one happened, and merge input histories on completion.
fn finish(
    dest_dir: &Path,
    dest: ImportManager,
    command: &str,
    inputs: &[&Path],
    stopped: bool,
) -> Result<Changes> {
    let changes = dest.close()?;
    let history = HistoryManager::open(dest_dir);
    if stopped {
        history.append(&format!("{command} aborted"), &[], None)?;
        return Ok(changes);
    }
    for input in inputs {
        history.merge_from(input)?;
    }
    info!(command, ?changes, "operator completed");
    Ok(changes)
}

fn dir_args(dirs: &[&Path]) -> Vec<String> {
    dirs.iter().map(|d| d.display().to_string()).collect()
}

/// Copy every element of `a_dir` into `b_dir`.
pub fn add(a_dir: &Path, b_dir: &Path, stop: &AtomicBool) -> Result<Changes> {
    let a = ScanManager::open(a_dir)?;
    ensure_destination(b_dir, a.settings())?;
    require_distinct(&[a_dir, b_dir])?;
    let b = ImportManager::open(b_dir, "add", &dir_args(&[a_dir, b_dir]))?;
    require_same_block_size(&[a.settings(), b.settings()])?;

    let mut copier = SourceCopier::new(&a)?;
    let mut stopped = false;
    for item in a.iter_hash_data() {
        if stop.load(Ordering::Relaxed) {
            stopped = true;
            break;
        }
        let (hash, entries) = item?;
        copier.copy_key(&a, &b, &hash, &entries)?;
    }
    finish(b_dir, b, "add", &[a_dir], stopped)
}

/// Ordered merge of `a_dir` and `b_dir` into `c_dir`; ties favor A.
pub fn add_multiple(
    a_dir: &Path,
    b_dir: &Path,
    c_dir: &Path,
    stop: &AtomicBool,
) -> Result<Changes> {
    let a = ScanManager::open(a_dir)?;
    let b = ScanManager::open(b_dir)?;
    ensure_destination(c_dir, a.settings())?;
    require_distinct(&[a_dir, b_dir, c_dir])?;
    let c = ImportManager::open(c_dir, "add_multiple", &dir_args(&[a_dir, b_dir, c_dir]))?;
    require_same_block_size(&[a.settings(), b.settings(), c.settings()])?;

    let mut copier_a = SourceCopier::new(&a)?;
    let mut copier_b = SourceCopier::new(&b)?;
    let mut iter_a = a.iter_hash_data().peekable();
    let mut iter_b = b.iter_hash_data().peekable();
    let mut stopped = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            stopped = true;
            break;
        }
        // peek errors fall through to next() below and propagate there
        let take_a = match (iter_a.peek(), iter_b.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(Ok((key_a, _))), Some(Ok((key_b, _)))) => key_a <= key_b,
            (Some(Err(_)), _) => true,
            (_, Some(Err(_))) => false,
        };
        if take_a {
            let (hash, entries) = iter_a.next().expect("peeked")?;
            copier_a.copy_key(&a, &c, &hash, &entries)?;
        } else {
            let (hash, entries) = iter_b.next().expect("peeked")?;
            copier_b.copy_key(&b, &c, &hash, &entries)?;
        }
    }
    finish(c_dir, c, "add_multiple", &[a_dir, b_dir], stopped)
}

/// Copy the elements of keys present in both `a_dir` and `b_dir` into
/// `c_dir`, driven by the smaller database.
pub fn intersect(a_dir: &Path, b_dir: &Path, c_dir: &Path, stop: &AtomicBool) -> Result<Changes> {
    let a = ScanManager::open(a_dir)?;
    let b = ScanManager::open(b_dir)?;
    ensure_destination(c_dir, a.settings())?;
    require_distinct(&[a_dir, b_dir, c_dir])?;
    let c = ImportManager::open(c_dir, "intersect", &dir_args(&[a_dir, b_dir, c_dir]))?;
    require_same_block_size(&[a.settings(), b.settings(), c.settings()])?;

    // drive from the smaller side so the loop length is min(|A|, |B|)
    let (driver, other) = if a.entry_count()? <= b.entry_count()? {
        (&a, &b)
    } else {
        (&b, &a)
    };
    let mut driver_copier = SourceCopier::new(driver)?;
    let mut other_copier = SourceCopier::new(other)?;
    let mut stopped = false;

    for item in driver.iter_hash_data() {
        if stop.load(Ordering::Relaxed) {
            stopped = true;
            break;
        }
        let (hash, entries) = item?;
        if other.find_count(&hash)? == 0 {
            continue;
        }
        driver_copier.copy_key(driver, &c, &hash, &entries)?;
        let other_entries = other.hash_data_entries(&hash)?;
        other_copier.copy_key(other, &c, &hash, &other_entries)?;
    }
    finish(c_dir, c, "intersect", &[a_dir, b_dir], stopped)
}

/// Copy the elements of `a_dir` whose keys are absent from `b_dir` into
/// `c_dir`.
pub fn subtract(a_dir: &Path, b_dir: &Path, c_dir: &Path, stop: &AtomicBool) -> Result<Changes> {
    let a = ScanManager::open(a_dir)?;
    let b = ScanManager::open(b_dir)?;
    ensure_destination(c_dir, a.settings())?;
    require_distinct(&[a_dir, b_dir, c_dir])?;
    let c = ImportManager::open(c_dir, "subtract", &dir_args(&[a_dir, b_dir, c_dir]))?;
    require_same_block_size(&[a.settings(), b.settings(), c.settings()])?;

    let mut copier = SourceCopier::new(&a)?;
    let mut stopped = false;
    for item in a.iter_hash_data() {
        if stop.load(Ordering::Relaxed) {
            stopped = true;
            break;
        }
        let (hash, entries) = item?;
        if b.find_count(&hash)? > 0 {
            continue;
        }
        copier.copy_key(&a, &c, &hash, &entries)?;
    }
    finish(c_dir, c, "subtract", &[a_dir, b_dir], stopped)
}

/// Copy the elements of `a_dir` whose keys occur exactly once into `b_dir`.
pub fn deduplicate(a_dir: &Path, b_dir: &Path, stop: &AtomicBool) -> Result<Changes> {
    let a = ScanManager::open(a_dir)?;
    ensure_destination(b_dir, a.settings())?;
    require_distinct(&[a_dir, b_dir])?;
    let b = ImportManager::open(b_dir, "deduplicate", &dir_args(&[a_dir, b_dir]))?;
    require_same_block_size(&[a.settings(), b.settings()])?;

    let mut copier = SourceCopier::new(&a)?;
    let mut stopped = false;
    for item in a.iter_hash_data() {
        if stop.load(Ordering::Relaxed) {
            stopped = true;
            break;
        }
        let (hash, entries) = item?;
        if entries.len() == 1 {
            copier.copy_key(&a, &b, &hash, &entries)?;
        }
    }
    finish(b_dir, b, "deduplicate", &[a_dir], stopped)
}

/// Rewrite the bloom settings and rebuild the filter from the hash-data
/// store.
pub fn rebuild_bloom(
    dir: &Path,
    bloom_is_used: bool,
    bloom_m: u32,
    bloom_k: u32,
) -> Result<()> {
    let mut new_settings = Settings::load(dir)?;
    new_settings.bloom_is_used = bloom_is_used;
    new_settings.bloom_m = bloom_m;
    new_settings.bloom_k = bloom_k;
    new_settings.validate()?;
    new_settings.save(dir)?;

    let path = dir.join(BLOOM_FILE);
    if path.exists() {
        fs::remove_file(&path)?;
    }

    if new_settings.bloom_enabled() {
        let mut bloom = BloomFilter::create(&path, bloom_m, bloom_k)?;
        let store = HashDataStore::open(dir, &new_settings)?;
        for item in store.iter() {
            let (hash, _) = item?;
            bloom.add(&hash)?;
        }
        bloom.flush()?;
    }

    HistoryManager::open(dir).append(
        "rebuild_bloom",
        &[dir.display().to_string()],
        None,
    )?;
    info!(dir = %dir.display(), bloom_is_used, bloom_m, bloom_k, "bloom filter rebuilt");
    Ok(())
}
