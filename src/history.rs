//! Audit history of processed files.
//!
//! `history.json` holds `{processedFiles, timeSavedTotal}`. Recording a name
//! is idempotent: the first time a file is seen it is appended and the
//! per-file time credit is added; every later call is a no-op. The file is
//! rewritten atomically on each accepted record.

use crate::error::ClientError;
use crate::store::{lock, read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Persisted history document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default, alias = "processed_files")]
    pub processed_files: Vec<String>,
    /// Minutes.
    #[serde(default, alias = "time_saved_total")]
    pub time_saved_total: u64,
}

impl HistoryRecord {
    /// Estimated value of the time saved at `rate` per minute.
    pub fn value_at(&self, rate: f64) -> f64 {
        self.time_saved_total as f64 * rate
    }
}

pub struct HistoryStore {
    path: Option<PathBuf>,
    minutes_per_file: u64,
    record: Mutex<HistoryRecord>,
}

impl HistoryStore {
    /// Load `path`, creating an empty history file when it does not exist.
    pub fn open(path: impl Into<PathBuf>, minutes_per_file: u64) -> Result<Self, ClientError> {
        let path = path.into();
        let record = match read_json::<HistoryRecord>(&path)? {
            Some(r) => r,
            None => {
                let empty = HistoryRecord::default();
                write_json_atomic(&path, &empty)?;
                info!("Created empty history at {}", path.display());
                empty
            }
        };
        Ok(Self {
            path: Some(path),
            minutes_per_file,
            record: Mutex::new(record),
        })
    }

    pub fn in_memory(minutes_per_file: u64) -> Self {
        Self {
            path: None,
            minutes_per_file,
            record: Mutex::new(HistoryRecord::default()),
        }
    }

    /// Append `name` once. Returns `true` if it was new.
    pub fn record(&self, name: &str) -> Result<bool, ClientError> {
        let mut guard = lock(&self.record);
        if guard.processed_files.iter().any(|n| n == name) {
            return Ok(false);
        }
        let before = guard.clone();
        guard.processed_files.push(name.to_string());
        guard.time_saved_total += self.minutes_per_file;
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &*guard) {
                *guard = before;
                return Err(e);
            }
        }
        debug!("History: recorded '{}'", name);
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.record).processed_files.iter().any(|n| n == name)
    }

    pub fn snapshot(&self) -> HistoryRecord {
        lock(&self.record).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_idempotent() {
        let h = HistoryStore::in_memory(3);
        assert!(h.record("a.pdf").unwrap());
        assert!(!h.record("a.pdf").unwrap());
        let r = h.snapshot();
        assert_eq!(r.processed_files, vec!["a.pdf".to_string()]);
        assert_eq!(r.time_saved_total, 3);
    }

    #[test]
    fn open_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let h = HistoryStore::open(&path, 3).unwrap();
        assert!(path.exists());
        assert_eq!(h.snapshot(), HistoryRecord::default());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("processedFiles"));
        assert!(raw.contains("timeSavedTotal"));
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let h = HistoryStore::open(&path, 3).unwrap();
            h.record("a.pdf").unwrap();
            h.record("b.pdf").unwrap();
        }
        let h = HistoryStore::open(&path, 3).unwrap();
        assert!(h.contains("b.pdf"));
        assert!(!h.record("a.pdf").unwrap());
        assert_eq!(h.snapshot().time_saved_total, 6);
    }

    #[test]
    fn accepts_snake_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"{"processed_files":["old.pdf"],"time_saved_total":3}"#,
        )
        .unwrap();
        let h = HistoryStore::open(&path, 3).unwrap();
        assert!(h.contains("old.pdf"));
        assert_eq!(h.snapshot().value_at(2.0), 6.0);
    }
}
