//! End-to-end scenarios over a database directory

use blockdb_core_index::{
    create_database, ops, BloomFilter, ImportManager, ScanManager, Settings,
};
use tempfile::TempDir;

fn scenario_settings() -> Settings {
    Settings {
        block_size: 4096,
        sector_size: 512,
        hash_prefix_bits: 16,
        hash_suffix_bytes: 14,
        bloom_m: 28,
        bloom_k: 3,
        ..Settings::default()
    }
}

#[test]
fn test_create_insert_find_expand() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let block_hash = vec![0u8; 16];
    let file_hash = vec![0xab; 32];

    let import = ImportManager::open(dir.path(), "import", &[]).unwrap();
    import.insert_hash(&block_hash, &file_hash, 0, 0, "").unwrap();
    let changes = import.close().unwrap();
    assert_eq!(changes.hashes_inserted, 1);

    let scan = ScanManager::open(dir.path()).unwrap();
    assert!(scan.find_hash(&block_hash).unwrap());

    let expanded = scan.find_expanded_hash(&block_hash).unwrap().unwrap();
    assert_eq!(expanded.count, 1);
    assert_eq!(expanded.sources.len(), 1);
    assert_eq!(expanded.sources[0].source_id, 1);
    assert_eq!(expanded.sources[0].offset_indexes, vec![0]);
}

#[test]
fn test_misaligned_offset_rejected() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let block_hash = vec![0x11; 16];
    let file_hash = vec![0xab; 32];

    let import = ImportManager::open(dir.path(), "import", &[]).unwrap();
    import
        .insert_hash(&block_hash, &file_hash, 513, 0, "")
        .unwrap();
    let changes = import.close().unwrap();
    assert_eq!(changes.hashes_not_inserted_invalid_byte_alignment, 1);
    assert_eq!(changes.hashes_inserted, 0);

    let scan = ScanManager::open(dir.path()).unwrap();
    assert!(!scan.find_hash(&block_hash).unwrap());
}

#[test]
fn test_duplicate_observation_suppressed() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let block_hash = vec![0x22; 16];
    let file_hash = vec![0xab; 32];

    let import = ImportManager::open(dir.path(), "import", &[]).unwrap();
    import.insert_hash(&block_hash, &file_hash, 0, 0, "").unwrap();
    import.insert_hash(&block_hash, &file_hash, 0, 0, "").unwrap();
    let changes = import.close().unwrap();
    assert_eq!(changes.hashes_inserted, 1);
    assert_eq!(changes.hashes_not_inserted_duplicate_element, 1);

    // the observation appears exactly once no matter how often submitted
    let scan = ScanManager::open(dir.path()).unwrap();
    assert_eq!(scan.find_count(&block_hash).unwrap(), 1);
}

#[test]
fn test_inserted_hashes_pass_bloom_and_find() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let hashes: Vec<Vec<u8>> = (1u8..=32).map(|seed| vec![seed; 16]).collect();
    let file_hash = vec![0xcd; 32];

    let import = ImportManager::open(dir.path(), "import", &[]).unwrap();
    for (i, hash) in hashes.iter().enumerate() {
        import
            .insert_hash(hash, &file_hash, (i as u64) * 512, 0, "")
            .unwrap();
    }
    import.close().unwrap();

    let scan = ScanManager::open(dir.path()).unwrap();
    for hash in &hashes {
        assert!(scan.find_hash(hash).unwrap());
    }
    // absent hashes answer negative through bloom or hash store
    assert!(!scan.find_hash(&vec![0xee; 16]).unwrap());

    let matches = scan.scan(&hashes).unwrap();
    assert_eq!(matches.len(), hashes.len());
    assert!(matches.iter().all(|&(_, count)| count == 1));
}

#[test]
fn test_rebuild_bloom_covers_every_stored_hash() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let hashes: Vec<Vec<u8>> = (1u8..=16).map(|seed| vec![seed; 16]).collect();
    let import = ImportManager::open(dir.path(), "import", &[]).unwrap();
    for hash in &hashes {
        import.insert_hash(hash, &[0xab; 32], 0, 0, "").unwrap();
    }
    import.close().unwrap();

    // lose the filter, then rebuild it from the hash-data store
    std::fs::remove_file(dir.path().join("bloom_filter")).unwrap();
    ops::rebuild_bloom(dir.path(), true, 20, 4).unwrap();

    let bloom = BloomFilter::open_ro(&dir.path().join("bloom_filter")).unwrap();
    assert_eq!(bloom.m_bits(), 1 << 20);
    for hash in &hashes {
        assert!(bloom.probably_contains(hash));
    }

    // scans keep working against the rebuilt filter
    let scan = ScanManager::open(dir.path()).unwrap();
    for hash in &hashes {
        assert!(scan.find_hash(hash).unwrap());
    }
}

#[test]
fn test_history_records_operations() {
    let dir = TempDir::new().unwrap();
    create_database(dir.path(), &scenario_settings()).unwrap();

    let import =
        ImportManager::open(dir.path(), "import_json", &["input.json".to_string()]).unwrap();
    import.insert_hash(&[0x31; 16], &[0xab; 32], 0, 0, "").unwrap();
    import.close().unwrap();

    let history = blockdb_core_index::HistoryManager::open(dir.path());
    let events = history.read().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command, "import_json");
    assert_eq!(events[0].changes.as_ref().unwrap().hashes_inserted, 1);
}
