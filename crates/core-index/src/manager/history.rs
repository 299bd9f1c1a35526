//! Append-only history log
//!
//! Every mutating command appends one JSON line recording when it ran, what
//! it was, and what it changed. Multi-database operators merge the input
//! databases' histories into the destination so provenance of provenance is
//! never lost.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::changes::Changes;
use crate::error::{Error, Result};
use crate::settings::HISTORY_FILE;

/// One history log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: String,
    pub command: String,
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Changes>,
}

/// Append-only writer/reader for a database directory's history log
pub struct HistoryManager {
    path: PathBuf,
}

impl HistoryManager {
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(HISTORY_FILE),
        }
    }

    /// Append one event.
    pub fn append(
        &self,
        command: &str,
        arguments: &[String],
        changes: Option<&Changes>,
    ) -> Result<()> {
        let event = HistoryEvent {
            timestamp: Utc::now().to_rfc3339(),
            command: command.to_string(),
            arguments: arguments.to_vec(),
            changes: changes.cloned(),
        };
        let json = serde_json::to_string(&event)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Other(format!("failed to open history log: {e}")))?;
        writeln!(file, "{json}")?;
        file.flush()?;
        Ok(())
    }

    /// Read back all events. Unparseable lines are skipped.
    pub fn read(&self) -> Result<Vec<HistoryEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Append the raw history of another database directory to this log.
    pub fn merge_from(&self, other_dir: &Path) -> Result<()> {
        let other = other_dir.join(HISTORY_FILE);
        if !other.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&other)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in content.lines() {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let history = HistoryManager::open(dir.path());

        let changes = Changes {
            hashes_inserted: 5,
            ..Changes::default()
        };
        history
            .append("import", &["input.json".to_string()], Some(&changes))
            .unwrap();
        history.append("scan", &[], None).unwrap();

        let events = history.read().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].command, "import");
        assert_eq!(events[0].arguments, vec!["input.json"]);
        assert_eq!(events[0].changes.as_ref().unwrap().hashes_inserted, 5);
        assert!(events[1].changes.is_none());
        assert!(!events[0].timestamp.is_empty());
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = HistoryManager::open(dir.path());
        assert!(history.read().unwrap().is_empty());
    }

    #[test]
    fn test_merge_from_appends_other_log() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let history_a = HistoryManager::open(a.path());
        let history_b = HistoryManager::open(b.path());

        history_a.append("create", &[], None).unwrap();
        history_b.append("import", &[], None).unwrap();
        history_a.merge_from(b.path()).unwrap();

        let events = history_a.read().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].command, "import");
    }

    #[test]
    fn test_merge_from_missing_is_noop() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let history_a = HistoryManager::open(a.path());
        history_a.merge_from(b.path()).unwrap();
        assert!(history_a.read().unwrap().is_empty());
    }
}
