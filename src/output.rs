//! Results returned by the orchestrator entry points.

use crate::error::EntryError;
use crate::job::{BatchOutcome, JobOutcome};
use serde::Serialize;

/// Result of a conversion batch (fresh or resumed).
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    /// Aggregate over the batch's jobs.
    #[serde(skip)]
    pub outcome: BatchOutcome,
    /// One entry per job, in submission order.
    pub jobs: Vec<JobOutcome>,
    /// As reported by the backend; the client never debits locally.
    pub credits_used: u64,
    pub files_submitted: usize,
    /// Ledger names that ended `Completed`.
    pub completed: Vec<String>,
    /// Ledger names that ended `Failed`, with the reason.
    pub failed: Vec<(String, String)>,
    /// Entries rejected while decoding.
    pub entry_errors: Vec<EntryError>,
    /// Decoded documents whose name matched no uploaded file.
    pub unmatched: Vec<String>,
    /// Per-file problems reported by the backend.
    pub warnings: Vec<String>,
    pub download_handles: Vec<String>,
}

impl ConversionReport {
    pub(crate) fn empty(credits_used: u64, files_submitted: usize) -> Self {
        Self {
            outcome: BatchOutcome::AllSucceeded,
            jobs: Vec::new(),
            credits_used,
            files_submitted,
            completed: Vec::new(),
            failed: Vec::new(),
            entry_errors: Vec::new(),
            unmatched: Vec::new(),
            warnings: Vec::new(),
            download_handles: Vec::new(),
        }
    }

    /// `(succeeded, failed)` job counts. Timeouts count as failed.
    pub fn job_counts(&self) -> (usize, usize) {
        let ok = self.jobs.iter().filter(|j| j.is_success()).count();
        (ok, self.jobs.len() - ok)
    }

    /// `(completed, failed)` file counts.
    pub fn file_counts(&self) -> (usize, usize) {
        (self.completed.len(), self.failed.len())
    }
}

/// Result of forwarding documents to the external API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendReport {
    /// `(file, receipt detail)`.
    pub sent: Vec<(String, String)>,
    /// `(file, reason)`.
    pub failed: Vec<(String, String)>,
}

impl SendReport {
    /// `(sent, failed)`.
    pub fn counts(&self) -> (usize, usize) {
        (self.sent.len(), self.failed.len())
    }
}

/// A merged PDF returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub filename: String,
    pub bytes: Vec<u8>,
}
