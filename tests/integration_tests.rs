//! CLI-level integration tests driving the command layer

use std::fs;
use std::path::Path;

use blockdb::commands::{run, Command, CreateArgs};
use blockdb_core_index::{ScanManager, Settings};
use tempfile::TempDir;

fn create_args(dir: &Path) -> CreateArgs {
    CreateArgs {
        dir: dir.to_path_buf(),
        block_size: 4096,
        sector_size: 4096,
        prefix_bits: 28,
        suffix_bytes: 3,
        hash_truncation: 0,
        max_duplicates: 0,
        no_bloom: false,
        bloom_m: 20,
        bloom_k: 3,
    }
}

const IMPORT_STREAM: &str = concat!(
    "# block hash corpus\n",
    r#"{"file_hash":"abababababababababababababababab","filesize":8000,"#,
    r#""file_type":"exe","nonprobative_count":4,"#,
    r#""names":[{"repository_name":"repository1","filename":"filename1"}]}"#,
    "\n",
    r#"{"block_hash":"00112233445566778899aabbccddeeff","#,
    r#""source_offset_pairs":["abababababababababababababababab",0,"#,
    r#""abababababababababababababababab",4096]}"#,
    "\n",
);

#[test]
fn test_create_import_export_roundtrip() {
    let root = TempDir::new().unwrap();
    let db = root.path().join("db");
    let input = root.path().join("input.json");
    let output = root.path().join("export.json");
    fs::write(&input, IMPORT_STREAM).unwrap();

    run(Command::Create(create_args(&db))).unwrap();
    run(Command::Import {
        dir: db.clone(),
        file: Some(input),
    })
    .unwrap();
    run(Command::Export {
        dir: db.clone(),
        file: Some(output.clone()),
    })
    .unwrap();

    let exported = fs::read_to_string(&output).unwrap();
    assert!(exported.contains("\"block_hash\":\"00112233445566778899aabbccddeeff\""));
    assert!(exported.contains("\"repository_name\":\"repository1\""));

    let scan = ScanManager::open(&db).unwrap();
    let block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
    assert_eq!(scan.find_count(&block).unwrap(), 2);
    assert_eq!(scan.settings().block_size, 4096);
}

#[test]
fn test_export_refuses_existing_file() {
    let root = TempDir::new().unwrap();
    let db = root.path().join("db");
    let output = root.path().join("export.json");
    fs::write(&output, "occupied").unwrap();

    run(Command::Create(create_args(&db))).unwrap();
    assert!(run(Command::Export {
        dir: db,
        file: Some(output),
    })
    .is_err());
}

#[test]
fn test_create_rejects_invalid_settings() {
    let root = TempDir::new().unwrap();
    let db = root.path().join("db");
    let mut args = create_args(&db);
    args.prefix_bits = 0;
    assert!(run(Command::Create(args)).is_err());
}

#[test]
fn test_add_and_size_flow() {
    let root = TempDir::new().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    let input = root.path().join("input.json");
    fs::write(&input, IMPORT_STREAM).unwrap();

    run(Command::Create(create_args(&a))).unwrap();
    run(Command::Import {
        dir: a.clone(),
        file: Some(input),
    })
    .unwrap();
    run(Command::Add {
        a: a.clone(),
        b: b.clone(),
    })
    .unwrap();

    let scan = ScanManager::open(&b).unwrap();
    let size = scan.size().unwrap();
    assert_eq!(size.hash_data_store, 2);
    assert_eq!(size.source_id_store, 1);

    // destination inherited the source settings
    assert_eq!(Settings::load(&b).unwrap().block_size, 4096);
}

#[test]
fn test_rebuild_bloom_command() {
    let root = TempDir::new().unwrap();
    let db = root.path().join("db");
    let input = root.path().join("input.json");
    fs::write(&input, IMPORT_STREAM).unwrap();

    run(Command::Create(create_args(&db))).unwrap();
    run(Command::Import {
        dir: db.clone(),
        file: Some(input),
    })
    .unwrap();

    fs::remove_file(db.join("bloom_filter")).unwrap();
    run(Command::RebuildBloom {
        dir: db.clone(),
        no_bloom: false,
        bloom_m: 18,
        bloom_k: 2,
    })
    .unwrap();

    let scan = ScanManager::open(&db).unwrap();
    let block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
    assert!(scan.find_hash(&block).unwrap());
    assert_eq!(Settings::load(&db).unwrap().bloom_m, 18);
}
