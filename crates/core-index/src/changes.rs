//! Change counters for bulk operations
//!
//! Counters are the normative report for bulk ingest: record-level rejections
//! are tallied here and the operation continues. Only configuration and
//! substrate failures abort a run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Counters summarizing the outcome of a bulk operation
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    /// Hash-data entries inserted
    pub hashes_inserted: u32,
    /// Entries rejected because `file_offset % sector_size != 0`
    pub hashes_not_inserted_invalid_byte_alignment: u32,
    /// Entries rejected because the key already held `max_duplicates` entries
    pub hashes_not_inserted_exceeds_max_duplicates: u32,
    /// Entries rejected because the exact (hash, source, offset) pair exists
    pub hashes_not_inserted_duplicate_element: u32,
    /// Suffixes newly added to the prefix/suffix hash store
    pub hash_inserted: u32,
    /// Prefix/suffix pairs that were already present
    pub hash_already_present: u32,
    /// Source data records inserted for a new source
    pub source_data_inserted: u32,
    /// Source data records that repeated the stored values
    pub source_data_same: u32,
    /// Source data records that replaced the stored values
    pub source_data_changed: u32,
    /// Source name pairs inserted
    pub source_name_inserted: u32,
    /// Source name pairs that were already present
    pub source_name_already_present: u32,
    /// Hashes removed; retained for history logs of older removal operations
    pub hashes_removed: u32,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any counter is non-zero
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No database changes.");
        }
        writeln!(f, "database changes:")?;
        let lines = [
            ("hashes inserted", self.hashes_inserted),
            (
                "hashes not inserted, invalid byte alignment",
                self.hashes_not_inserted_invalid_byte_alignment,
            ),
            (
                "hashes not inserted, exceeds max duplicates",
                self.hashes_not_inserted_exceeds_max_duplicates,
            ),
            (
                "hashes not inserted, duplicate element",
                self.hashes_not_inserted_duplicate_element,
            ),
            ("hash store suffixes inserted", self.hash_inserted),
            (
                "hash store suffixes already present",
                self.hash_already_present,
            ),
            ("source data inserted", self.source_data_inserted),
            ("source data same", self.source_data_same),
            ("source data changed", self.source_data_changed),
            ("source names inserted", self.source_name_inserted),
            (
                "source names already present",
                self.source_name_already_present,
            ),
            ("hashes removed", self.hashes_removed),
        ];
        for (label, count) in lines {
            if count != 0 {
                writeln!(f, "    {label}={count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_display() {
        assert_eq!(Changes::new().to_string(), "No database changes.\n");
    }

    #[test]
    fn test_nonzero_lines_only() {
        let changes = Changes {
            hashes_inserted: 3,
            hashes_not_inserted_duplicate_element: 1,
            ..Changes::default()
        };
        let text = changes.to_string();
        assert!(text.contains("hashes inserted=3"));
        assert!(text.contains("duplicate element=1"));
        assert!(!text.contains("byte alignment"));
        assert!(!text.contains("removed"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let changes = Changes {
            hashes_inserted: 7,
            source_name_inserted: 2,
            ..Changes::default()
        };
        let json = serde_json::to_string(&changes).unwrap();
        let back: Changes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, changes);
    }
}
