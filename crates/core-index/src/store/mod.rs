//! Persistent stores over the ordered key-value substrate
//!
//! Each store owns one substrate database file inside the database directory,
//! mirroring the one-environment-per-store layout of the on-disk format. The
//! substrate provides ordered byte keys, duplicate-valued keys ordered by
//! value (multimap tables), MVCC read snapshots that overlap the single
//! writer, range cursors, and automatic growth.
//!
//! The substrate permits one open handle per file, so all stores in a process
//! share handles through a registry; this is what lets any number of scan
//! managers overlap one import manager on the same directory.

pub mod hash;
pub mod hash_data;
pub mod source;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use redb::Database;

use crate::error::{Error, Result};

fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<Database>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<Database>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open the database file at `path`, creating it when absent, returning the
/// process-wide shared handle.
pub(crate) fn shared_database(path: &Path) -> Result<Arc<Database>> {
    let mut map = registry().lock().expect("database registry poisoned");
    map.retain(|_, weak| weak.strong_count() > 0);
    if path.exists() {
        let canonical = path.canonicalize()?;
        if let Some(db) = map.get(&canonical).and_then(Weak::upgrade) {
            return Ok(db);
        }
    }
    let db = Arc::new(Database::create(path)?);
    map.insert(path.canonicalize()?, Arc::downgrade(&db));
    Ok(db)
}

fn writer_dirs() -> &'static Mutex<HashSet<PathBuf>> {
    static WRITERS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    WRITERS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive write claim on a database directory.
///
/// At most one import manager may exist per directory at a time; the claim is
/// released when the guard drops.
pub(crate) struct WriterGuard {
    dir: PathBuf,
}

impl WriterGuard {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let canonical = dir.canonicalize()?;
        let mut active = writer_dirs().lock().expect("writer registry poisoned");
        if !active.insert(canonical.clone()) {
            return Err(Error::WriterActive {
                path: dir.to_path_buf(),
            });
        }
        Ok(Self { dir: canonical })
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut active = writer_dirs().lock().expect("writer registry poisoned");
        active.remove(&self.dir);
    }
}
