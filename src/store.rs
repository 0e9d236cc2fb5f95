//! Durable session state.
//!
//! Everything the orchestrator needs to pick up after a restart lives in
//! [`SessionState`]: the ledger, the batch currently in flight, per-job
//! polling progress, and collected download handles. [`SessionStore`] owns
//! it behind a mutex and rewrites `session.json` atomically on every
//! mutation.
//!
//! The mutex is a `std::sync::Mutex` and is never held across an `.await`.

use crate::error::ClientError;
use crate::job::{EngineState, JobOutcome, JobRef};
use crate::ledger::BatchLedger;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info};

// ── Atomic JSON files ────────────────────────────────────────────────────

/// Write `value` as pretty JSON to `path`: temp file in the same directory,
/// fsync, then rename over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ClientError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| ClientError::storage(&dir, e))?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ClientError::Internal(format!("serialise {}: {e}", path.display())))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| ClientError::storage(&dir, e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.flush())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ClientError::storage(path, e))?;
    tmp.persist(path)
        .map_err(|e| ClientError::storage(path, e.error))?;
    Ok(())
}

/// Read a JSON file, or `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ClientError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ClientError::storage(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ClientError::StateCorrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Session state ────────────────────────────────────────────────────────

/// Polling progress of one job, rewritten after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job: JobRef,
    pub attempts: u32,
    pub state: EngineState,
    /// Raw tag of the last `Unknown` observation.
    #[serde(default)]
    pub last_unknown: Option<String>,
    /// Set once the job is terminal.
    #[serde(default)]
    pub outcome: Option<JobOutcome>,
    /// Set once the outcome has been folded into the ledger and history.
    #[serde(default)]
    pub applied: bool,
}

impl JobProgress {
    pub fn new(job: JobRef) -> Self {
        Self {
            job,
            attempts: 0,
            state: EngineState::Pending,
            last_unknown: None,
            outcome: None,
            applied: false,
        }
    }
}

/// A job of the in-flight batch and the input files it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job: JobRef,
    pub files: Vec<String>,
}

/// Conversion batch submitted but not yet finalised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedBatch {
    pub jobs: Vec<TrackedJob>,
    pub credits_used: u64,
    pub files_submitted: usize,
}

impl TrackedBatch {
    pub fn job_refs(&self) -> Vec<JobRef> {
        self.jobs.iter().map(|t| t.job.clone()).collect()
    }
}

/// A queued external submission and the file it delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSend {
    pub job: JobRef,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub ledger: BatchLedger,
    #[serde(default)]
    pub batch: Option<TrackedBatch>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobProgress>,
    #[serde(default)]
    pub download_handles: Vec<String>,
    /// Send jobs queued by the backend and not yet settled.
    #[serde(default)]
    pub sends: Vec<TrackedSend>,
}

impl SessionState {
    pub fn tracked_send(&self, file: &str) -> Option<&TrackedSend> {
        self.sends.iter().find(|t| t.file == file)
    }
}

/// Owner of [`SessionState`]; every mutation is flushed before returning.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Load `path`, or start empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let state: SessionState = read_json(&path)?.unwrap_or_default();
        if let Some(batch) = &state.batch {
            info!(
                "Session has a batch in flight ({} job(s)); resume to finish it",
                batch.jobs.len()
            );
        }
        if !state.sends.is_empty() {
            info!(
                "Session has {} send job(s) in flight; send again to finish them",
                state.sends.len()
            );
        }
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn ledger(&self) -> BatchLedger {
        lock(&self.state).ledger.clone()
    }

    pub fn tracked_batch(&self) -> Option<TrackedBatch> {
        lock(&self.state).batch.clone()
    }

    pub fn tracked_sends(&self) -> Vec<TrackedSend> {
        lock(&self.state).sends.clone()
    }

    pub fn job_progress(&self, id: &str) -> Option<JobProgress> {
        lock(&self.state).jobs.get(id).cloned()
    }

    /// Apply `f` and flush. If the flush fails the in-memory state is
    /// rolled back and the error returned.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R, ClientError> {
        let mut guard = lock(&self.state);
        let before = guard.clone();
        let out = f(&mut guard);
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &*guard) {
                *guard = before;
                return Err(e);
            }
            debug!("Session state flushed to {}", path.display());
        }
        Ok(out)
    }

    pub fn save_progress(&self, progress: JobProgress) -> Result<(), ClientError> {
        self.update(|s| {
            s.jobs.insert(progress.job.id.clone(), progress);
        })
    }

    /// Drop progress records of jobs whose results are fully applied.
    pub fn forget_jobs(&self, ids: &[String]) -> Result<(), ClientError> {
        self.update(|s| {
            for id in ids {
                s.jobs.remove(id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;
    use crate::ledger::FileStatus;

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = SessionStore::open(&path).unwrap();
        store
            .update(|s| {
                s.ledger.register_upload("a.pdf", PathBuf::from("uploads/a.pdf"));
                s.ledger.mark_submitted(&["a.pdf".to_string()]);
            })
            .unwrap();
        let mut p = JobProgress::new(JobRef::new("t1", JobKind::Extraction));
        p.attempts = 7;
        p.state = EngineState::Started;
        store.save_progress(p).unwrap();
        drop(store);

        let reopened = SessionStore::open(&path).unwrap();
        assert_eq!(
            reopened.ledger().get("a.pdf").unwrap().status,
            FileStatus::Submitted
        );
        let p = reopened.job_progress("t1").unwrap();
        assert_eq!(p.attempts, 7);
        assert_eq!(p.state, EngineState::Started);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("nope.json")).unwrap();
        assert!(store.ledger().is_empty());
        assert!(store.tracked_batch().is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            SessionStore::open(&path),
            Err(ClientError::StateCorrupt { .. })
        ));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let back: Vec<i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, vec![4]);
    }

    #[test]
    fn forget_jobs_removes_progress() {
        let store = SessionStore::in_memory();
        store
            .save_progress(JobProgress::new(JobRef::new("t1", JobKind::Merge)))
            .unwrap();
        store.forget_jobs(&["t1".to_string()]).unwrap();
        assert!(store.job_progress("t1").is_none());
    }
}
