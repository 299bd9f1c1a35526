//! JSON line import and export
//!
//! The stream is UTF-8 with one record per line; lines beginning with `#`
//! and empty lines are skipped. Two record kinds, told apart by their key
//! field:
//!
//! Source data:
//!   `{"file_hash":"b9e7...", "filesize":8000, "file_type":"exe",
//!   "nonprobative_count":4, "names":[{"repository_name":"repository1",
//!   "filename":"filename1"}]}`
//!
//! Block hash data:
//!   `{"block_hash":"a7df...", "entropy":8, "block_label":"W",
//!   "source_offset_pairs":["b9e7...", 4096]}`
//!
//! Invalid lines are reported with their line number and offending field and
//! counted; a bulk import never aborts over one bad record. Exports are
//! deterministically ordered so that export → import → export is a fixpoint.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use serde_json::{json, Value};
use tracing::warn;

use crate::error::Result;
use crate::manager::import::ImportManager;
use crate::manager::scan::ScanManager;
use crate::store::source::SourceData;

/// Per-line outcome distinguishing record rejection from fatal errors
enum LineStatus {
    Accepted,
    Invalid(&'static str),
}

/// Outcome of a bulk JSON import
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Records processed (comments and empty lines excluded)
    pub records: usize,
    /// Records rejected for a malformed or missing field
    pub invalid: usize,
}

/// Import a JSON line stream into the database.
pub fn import_lines<R: BufRead>(reader: R, manager: &ImportManager) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        report.records += 1;
        match import_line(&line, manager)? {
            LineStatus::Accepted => {}
            LineStatus::Invalid(field) => {
                warn!(line = line_number, field, content = %line, "invalid line");
                report.invalid += 1;
            }
        }
    }
    Ok(report)
}

fn import_line(line: &str, manager: &ImportManager) -> Result<LineStatus> {
    let document: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return Ok(LineStatus::Invalid("JSON parse error")),
    };
    let Some(object) = document.as_object() else {
        return Ok(LineStatus::Invalid("not a JSON object"));
    };

    if object.contains_key("file_hash") {
        read_source_data(object, manager)
    } else if object.contains_key("block_hash") {
        read_block_hash_data(object, manager)
    } else {
        Ok(LineStatus::Invalid("no file_hash or block_hash"))
    }
}

fn hash_field(object: &serde_json::Map<String, Value>, field: &str) -> Option<Vec<u8>> {
    let text = object.get(field)?.as_str()?;
    let bytes = hex::decode(text).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(bytes)
}

fn read_source_data(
    object: &serde_json::Map<String, Value>,
    manager: &ImportManager,
) -> Result<LineStatus> {
    let Some(file_hash) = hash_field(object, "file_hash") else {
        return Ok(LineStatus::Invalid("source data file_hash"));
    };
    let Some(filesize) = object.get("filesize").and_then(Value::as_u64) else {
        return Ok(LineStatus::Invalid("source data filesize"));
    };
    let file_type = object
        .get("file_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let nonprobative_count = object
        .get("nonprobative_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    manager.insert_source_data(
        &file_hash,
        &SourceData {
            filesize,
            file_type,
            nonprobative_count,
        },
    )?;

    let Some(names) = object.get("names").and_then(Value::as_array) else {
        return Ok(LineStatus::Invalid("source data names"));
    };
    for name in names {
        let Some(repository_name) = name.get("repository_name").and_then(Value::as_str) else {
            return Ok(LineStatus::Invalid("source data repository_name"));
        };
        let Some(filename) = name.get("filename").and_then(Value::as_str) else {
            return Ok(LineStatus::Invalid("source data filename"));
        };
        manager.insert_source_name(&file_hash, repository_name, filename)?;
    }
    Ok(LineStatus::Accepted)
}

fn read_block_hash_data(
    object: &serde_json::Map<String, Value>,
    manager: &ImportManager,
) -> Result<LineStatus> {
    let Some(block_hash) = hash_field(object, "block_hash") else {
        return Ok(LineStatus::Invalid("block hash data block_hash"));
    };
    let entropy = object.get("entropy").and_then(Value::as_u64).unwrap_or(0);
    let block_label = object
        .get("block_label")
        .and_then(Value::as_str)
        .unwrap_or("");

    let Some(pairs) = object.get("source_offset_pairs").and_then(Value::as_array) else {
        return Ok(LineStatus::Invalid("block hash data source_offset_pairs"));
    };
    let mut i = 0;
    while i + 1 < pairs.len() {
        let Some(file_hash) = pairs[i]
            .as_str()
            .and_then(|text| hex::decode(text).ok())
            .filter(|bytes| !bytes.is_empty())
        else {
            return Ok(LineStatus::Invalid(
                "block hash data source_offset_pair source hash",
            ));
        };
        let Some(file_offset) = pairs[i + 1].as_u64() else {
            return Ok(LineStatus::Invalid(
                "block hash data source_offset_pair file offset",
            ));
        };
        manager.insert_hash(&block_hash, &file_hash, file_offset, entropy, block_label)?;
        i += 2;
    }
    Ok(LineStatus::Accepted)
}

/// Export the whole database as a JSON line stream: one line per source in
/// source-id order, then one line per distinct block hash in key order.
pub fn export_lines<W: Write>(scan: &ScanManager, writer: &mut W) -> Result<()> {
    let mut sources: Vec<(u64, Vec<u8>)> = Vec::new();
    for item in scan.iter_sources() {
        let (file_hash, source_id) = item?;
        sources.push((source_id, file_hash));
    }
    sources.sort_unstable_by_key(|(source_id, _)| *source_id);

    let mut id_to_file_hash: HashMap<u64, String> = HashMap::with_capacity(sources.len());
    for (source_id, file_hash) in &sources {
        id_to_file_hash.insert(*source_id, hex::encode(file_hash));
    }

    for (source_id, file_hash) in &sources {
        let data = scan.source_data(*source_id)?.unwrap_or(SourceData {
            filesize: 0,
            file_type: String::new(),
            nonprobative_count: 0,
        });
        let names: Vec<Value> = scan
            .source_names(*source_id)?
            .into_iter()
            .map(|name| {
                json!({
                    "repository_name": name.repository_name,
                    "filename": name.filename,
                })
            })
            .collect();
        let record = json!({
            "file_hash": hex::encode(file_hash),
            "filesize": data.filesize,
            "file_type": data.file_type,
            "nonprobative_count": data.nonprobative_count,
            "names": names,
        });
        writeln!(writer, "{record}")?;
    }

    let sector_size = scan.settings().sector_size as u64;
    for item in scan.iter_hash_data() {
        let (hash, entries) = item?;
        let mut pairs: Vec<Value> = Vec::with_capacity(entries.len() * 2);
        for (source_id, offset_index) in entries {
            let file_hash = id_to_file_hash.get(&source_id).cloned().unwrap_or_default();
            pairs.push(Value::from(file_hash));
            pairs.push(Value::from(offset_index * sector_size));
        }
        let record = json!({
            "block_hash": hex::encode(&hash),
            "source_offset_pairs": pairs,
        });
        writeln!(writer, "{record}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::scan::ScanManager;
    use crate::settings::{create_database, Settings};
    use tempfile::TempDir;

    fn new_db() -> TempDir {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            block_size: 4096,
            sector_size: 4096,
            ..Settings::default()
        };
        create_database(dir.path(), &settings).unwrap();
        dir
    }

    const SOURCE_LINE: &str = concat!(
        r#"{"file_hash":"abababababababababababababababab","filesize":8000,"#,
        r#""file_type":"exe","nonprobative_count":4,"#,
        r#""names":[{"repository_name":"repository1","filename":"filename1"}]}"#
    );

    const BLOCK_LINE: &str = concat!(
        r#"{"block_hash":"00112233445566778899aabbccddeeff","entropy":8,"#,
        r#""block_label":"W","source_offset_pairs":["abababababababababababababababab",4096]}"#
    );

    #[test]
    fn test_import_source_and_block() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let input = format!("# comment\n\n{SOURCE_LINE}\n{BLOCK_LINE}\n");

        let report = import_lines(input.as_bytes(), &manager).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.invalid, 0);
        let changes = manager.close().unwrap();
        assert_eq!(changes.hashes_inserted, 1);
        assert_eq!(changes.source_data_inserted, 1);
        assert_eq!(changes.source_name_inserted, 1);

        let scan = ScanManager::open(dir.path()).unwrap();
        let block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let expanded = scan.find_expanded_hash(&block).unwrap().unwrap();
        assert_eq!(expanded.sources[0].offset_indexes, vec![1]);
    }

    #[test]
    fn test_invalid_lines_counted_and_continue() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let input = format!(
            "not json\n\
             {{\"no_key\":1}}\n\
             {{\"file_hash\":\"zzzz\",\"filesize\":1,\"names\":[]}}\n\
             {{\"file_hash\":\"abab\",\"names\":[]}}\n\
             {BLOCK_LINE}\n"
        );

        let report = import_lines(input.as_bytes(), &manager).unwrap();
        assert_eq!(report.records, 5);
        assert_eq!(report.invalid, 4);
        let changes = manager.close().unwrap();
        assert_eq!(changes.hashes_inserted, 1);
    }

    #[test]
    fn test_block_line_with_odd_pairs_imports_complete_pairs() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        // trailing unpaired element is ignored, as the pair walk stops
        let input = concat!(
            r#"{"block_hash":"0011223344556677","#,
            r#""source_offset_pairs":["abab",0,"cdcd"]}"#,
            "\n"
        );

        let report = import_lines(input.as_bytes(), &manager).unwrap();
        assert_eq!(report.invalid, 0);
        let changes = manager.close().unwrap();
        assert_eq!(changes.hashes_inserted, 1);
    }

    #[test]
    fn test_export_import_export_fixpoint() {
        let dir = new_db();
        let manager = ImportManager::open(dir.path(), "import", &[]).unwrap();
        let input = format!("{SOURCE_LINE}\n{BLOCK_LINE}\n");
        import_lines(input.as_bytes(), &manager).unwrap();
        manager.close().unwrap();

        let scan = ScanManager::open(dir.path()).unwrap();
        let mut first = Vec::new();
        export_lines(&scan, &mut first).unwrap();
        drop(scan);

        let copy = TempDir::new().unwrap();
        let copy_dir = copy.path().join("db");
        create_database(
            &copy_dir,
            &Settings {
                block_size: 4096,
                sector_size: 4096,
                ..Settings::default()
            },
        )
        .unwrap();
        let manager = ImportManager::open(&copy_dir, "import", &[]).unwrap();
        import_lines(first.as_slice(), &manager).unwrap();
        manager.close().unwrap();

        let scan = ScanManager::open(&copy_dir).unwrap();
        let mut second = Vec::new();
        export_lines(&scan, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
