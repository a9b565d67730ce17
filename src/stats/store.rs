//! Statistics persistence.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::StatisticsSnapshot;
use crate::common::error::PersistenceError;

/// Where a bridge keeps its statistics between runs.
pub trait StatisticsStore: Send + Sync {
    /// The previously saved snapshot, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<StatisticsSnapshot>, PersistenceError>;

    fn save(&self, snapshot: &StatisticsSnapshot) -> Result<(), PersistenceError>;
}

/// On-disk layout: `{"statistics": {...}}`, leaving room for other data.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedData {
    statistics: Option<StatisticsSnapshot>,
}

/// Stores statistics as a small JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl StatisticsStore for JsonFileStore {
    fn load(&self) -> Result<Option<StatisticsSnapshot>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let data: PersistedData =
            serde_json::from_str(&content).map_err(|source| PersistenceError::Format {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(data.statistics)
    }

    fn save(&self, snapshot: &StatisticsSnapshot) -> Result<(), PersistenceError> {
        let data = PersistedData {
            statistics: Some(*snapshot),
        };
        let json = serde_json::to_string_pretty(&data).map_err(|source| PersistenceError::Format {
            path: self.path.display().to_string(),
            source,
        })?;

        // Write to a sibling file first so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_no_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("stats.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("stats.json"));
        let snapshot = StatisticsSnapshot {
            message_count: 12,
            cumulative_latency_nanos: u64::MAX,
        };

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(
            &path,
            r#"{"statistics": {"message-count": 3, "cumulative-latency-nanos": 900}}"#,
        )
        .unwrap();

        let snapshot = JsonFileStore::new(&path).load().unwrap().unwrap();
        assert_eq!(snapshot.message_count, 3);
        assert_eq!(snapshot.cumulative_latency_nanos, 900);
    }

    #[test]
    fn test_corrupt_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "not json").unwrap();

        let result = JsonFileStore::new(&path).load();
        assert!(matches!(result, Err(PersistenceError::Format { .. })));
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing").join("stats.json"));
        let result = store.save(&StatisticsSnapshot::default());
        assert!(matches!(result, Err(PersistenceError::Io { .. })));
    }
}
