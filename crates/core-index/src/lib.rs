//! Persistent block-hash indexing engine
//!
//! Stores cryptographic hashes of fixed-size data blocks together with the
//! sources they were observed in and the offsets at which they occurred.
//! Hashes are ingested through the single-writer [`ImportManager`]; unknown
//! hashes are scanned through the read-only [`ScanManager`], which answers
//! whether a block has been seen before, in what source, at what offset, and
//! how often.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            database directory               │
//! ├─────────────────────────────────────────────┤
//! │ settings.json          parameter document   │
//! │ hash_store.redb        prefix → suffix set  │
//! │ hash_data_store.redb   hash → (src, off)*   │
//! │ source_id_store.redb   file hash → id       │
//! │ source_data_store.redb id → metadata        │
//! │ source_name_store.redb id → (repo, name)*   │
//! │ bloom_filter           mmap'd bit array     │
//! │ history.json           append-only log      │
//! └─────────────────────────────────────────────┘
//!        ▲ one ImportManager        ▲ any number of ScanManagers
//! ```
//!
//! Scans flow bloom → hash store → hash-data store → source stores, so a
//! bloom rejection answers in O(k) bit probes without touching the stores.
//!
//! # Example
//!
//! ```no_run
//! use blockdb_core_index::{create_database, ImportManager, ScanManager, Settings};
//!
//! let dir = std::path::Path::new("corpus.bdb");
//! create_database(dir, &Settings::default()).unwrap();
//!
//! let import = ImportManager::open(dir, "import", &[]).unwrap();
//! import.insert_hash(&[0u8; 16], &[0xab; 32], 0, 0, "").unwrap();
//! let changes = import.close().unwrap();
//! println!("{changes}");
//!
//! let scan = ScanManager::open(dir).unwrap();
//! assert!(scan.find_hash(&[0u8; 16]).unwrap());
//! ```

pub mod bloom;
pub mod changes;
pub mod codec;
pub mod error;
pub mod json;
pub mod manager;
pub mod ops;
pub mod protocol;
pub mod settings;
pub mod store;

pub use bloom::BloomFilter;
pub use changes::Changes;
pub use error::{Error, Result};
pub use json::{export_lines, import_lines, ImportReport};
pub use manager::{
    ExpandedHash, ExpandedSource, HistoryEvent, HistoryManager, ImportManager, ScanManager,
    SizeReport,
};
pub use settings::{create_database, is_database, Settings};
pub use store::source::{SourceData, SourceName};
