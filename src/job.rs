//! Job references, backend status tags, and terminal outcomes.
//!
//! A [`JobRef`] is created once, when the backend accepts a submission, and
//! never mutated afterwards. Everything that changes while a job runs lives
//! in [`crate::store::JobProgress`] instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of backend job. Each kind has its own polling ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// PDF → XML extraction.
    Extraction,
    /// Several PDFs merged into one.
    Merge,
    /// A generated document forwarded to the external API.
    Send,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Extraction => "extraction",
            JobKind::Merge => "merge",
            JobKind::Send => "send",
        };
        f.write_str(s)
    }
}

/// Opaque handle to one backend job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: String,
    pub kind: JobKind,
    /// Seconds since the Unix epoch.
    pub submitted_at: u64,
}

impl JobRef {
    pub fn new(id: impl Into<String>, kind: JobKind) -> Self {
        let submitted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: id.into(),
            kind,
            submitted_at,
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job {}", self.kind, self.id)
    }
}

/// What the backend reported for a job on one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Started,
    Retry,
    Success(Payload),
    Failure(String),
    /// Unrecognised tag or unparseable body. Treated as still running.
    Unknown(String),
}

impl JobStatus {
    /// The engine state this observation moves the job into.
    pub fn state(&self) -> EngineState {
        match self {
            JobStatus::Pending => EngineState::Pending,
            JobStatus::Started => EngineState::Started,
            JobStatus::Retry => EngineState::Retry,
            JobStatus::Success(_) => EngineState::Success,
            JobStatus::Failure(_) => EngineState::Failure,
            JobStatus::Unknown(_) => EngineState::Unknown,
        }
    }
}

/// Shape of a successful job's result, resolved once at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// `{filename: text}` mapping carried in the status body.
    Inline {
        files: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        download_handle: Option<String>,
        #[serde(default)]
        warnings: Vec<String>,
    },
    /// Base64-encoded zip container carried in the status body.
    Archive { data: String },
    /// Container that must be fetched separately.
    Reference { handle: String },
    /// Single base64-encoded binary document (merge result).
    Document {
        filename: Option<String>,
        data: String,
    },
    /// Acknowledgement from the external API.
    Receipt {
        uuid: Option<String>,
        message: Option<String>,
    },
}

impl Payload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Inline { .. } => "inline",
            Payload::Archive { .. } => "archive",
            Payload::Reference { .. } => "reference",
            Payload::Document { .. } => "document",
            Payload::Receipt { .. } => "receipt",
        }
    }
}

/// Polling state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Pending,
    Started,
    Retry,
    Unknown,
    Success,
    Failure,
    TimedOut,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Success | EngineState::Failure | EngineState::TimedOut
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Pending => "PENDING",
            EngineState::Started => "STARTED",
            EngineState::Retry => "RETRY",
            EngineState::Unknown => "UNKNOWN",
            EngineState::Success => "SUCCESS",
            EngineState::Failure => "FAILURE",
            EngineState::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobResult {
    Succeeded { payload: Payload },
    Failed { reason: String },
    TimedOut { reason: String },
}

/// A job together with its terminal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: JobRef,
    pub attempts: u32,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, JobResult::Succeeded { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.result {
            JobResult::Succeeded { payload } => Some(payload),
            _ => None,
        }
    }

    /// Human-readable reason for a negative outcome. Timeouts and failures
    /// read the same way to callers.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.result {
            JobResult::Succeeded { .. } => None,
            JobResult::Failed { reason } | JobResult::TimedOut { reason } => Some(reason),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.result {
            JobResult::Succeeded { .. } => EngineState::Success,
            JobResult::Failed { .. } => EngineState::Failure,
            JobResult::TimedOut { .. } => EngineState::TimedOut,
        }
    }
}

/// Aggregate result of a polled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    AllSucceeded,
    /// Job ids in submission order.
    PartialSuccess {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },
    AllFailed,
}

impl BatchOutcome {
    /// Classify outcomes. An empty slice counts as all succeeded.
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let (ok, bad): (Vec<&JobOutcome>, Vec<&JobOutcome>) =
            outcomes.iter().partition(|o| o.is_success());
        if bad.is_empty() {
            BatchOutcome::AllSucceeded
        } else if ok.is_empty() {
            BatchOutcome::AllFailed
        } else {
            BatchOutcome::PartialSuccess {
                succeeded: ok.iter().map(|o| o.job.id.clone()).collect(),
                failed: bad.iter().map(|o| o.job.id.clone()).collect(),
            }
        }
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::AllSucceeded => f.write_str("all jobs succeeded"),
            BatchOutcome::AllFailed => f.write_str("all jobs failed"),
            BatchOutcome::PartialSuccess { succeeded, failed } => write!(
                f,
                "{}/{} jobs succeeded",
                succeeded.len(),
                succeeded.len() + failed.len()
            ),
        }
    }
}
