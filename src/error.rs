//! Error types for the pdf2xml-client library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`ClientError`]: **fatal to one operation**. Admission was refused, the
//!   backend rejected the credentials, local state could not be written.
//!   Returned as `Err(ClientError)` from the orchestrator entry points.
//!
//! * [`DecodeError`]: a terminal payload could not be opened at all
//!   (corrupt container, invalid base64, nothing inside). Fatal to that one
//!   job's results, never to its siblings.
//!
//! * [`EntryError`]: **non-fatal**. One entry inside an otherwise readable
//!   container is malformed. Stored in [`crate::decode::DecodedFiles`] so the
//!   remaining entries are still delivered.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2xml-client library.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Transport errors ──────────────────────────────────────────────────
    /// Connection failure or request timeout. Retry-eligible while polling.
    #[error("Network error calling '{endpoint}': {detail}\nCheck the backend URL and your connection.")]
    Network { endpoint: String, detail: String },

    /// The backend refused the credentials, even after one refresh.
    #[error("Authentication failed: {detail}\nLog in again and resume the batch.")]
    Auth { detail: String },

    /// Non-2xx response other than 401.
    #[error("Backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// A 2xx response whose body does not have the expected shape.
    #[error("Malformed response from '{endpoint}': {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    // ── Admission errors ──────────────────────────────────────────────────
    /// Credit balance is below the number of units requested.
    #[error(
        "Insufficient credits: {required} required, {balance} available ({missing} missing)\n\
         No files were submitted."
    )]
    AdmissionRejected {
        required: u64,
        balance: u64,
        missing: u64,
    },

    /// The credit balance could not be read, so nothing was admitted.
    #[error(
        "Credit balance unavailable ({required} credit(s) required): {reason}\n\
         No files were submitted."
    )]
    BalanceUnavailable { required: u64, reason: String },

    /// Selection exceeds the per-batch file cap.
    #[error("{selected} files selected but at most {max} can be submitted per batch\nSplit the selection and convert in several runs.")]
    TooManyFiles { selected: usize, max: usize },

    /// Nothing to submit.
    #[error("No files selected")]
    EmptySelection,

    /// Upload name has no usable final path component.
    #[error("'{name}' is not a valid file name")]
    InvalidFileName { name: String },

    /// Selected name is not in the ledger.
    #[error("Unknown file '{name}'\nUpload it first.")]
    UnknownFile { name: String },

    /// Selected file is not in a state that allows this operation.
    #[error("File '{name}' is {status}, cannot {action}")]
    FileNotReady {
        name: String,
        status: String,
        action: &'static str,
    },

    /// A previous batch has not reached a terminal state yet.
    #[error("{jobs} job(s) from a previous batch are still in flight\nRun `resume` before submitting new files.")]
    BatchInFlight { jobs: usize },

    /// Merging needs at least two documents.
    #[error("Merging needs at least 2 PDFs, got {got}")]
    NotEnoughMergeInputs { got: usize },

    // ── Job errors ────────────────────────────────────────────────────────
    /// Single-job flows (merge): the job ended in `Failure`.
    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// Single-job flows (merge): the job exhausted its attempt ceiling.
    #[error("Job {job_id} timed out after {attempts} polling attempts")]
    JobTimedOut { job_id: String, attempts: u32 },

    /// Payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ── Storage errors ────────────────────────────────────────────────────
    /// Could not read or write a local file.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state exists but cannot be parsed.
    #[error("State file '{path}' is corrupt: {detail}\nMove it aside to start from a clean state.")]
    StateCorrupt { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether a polling tick that hit this error should simply try again.
    ///
    /// Connection problems and 5xx responses are; 4xx responses, auth and
    /// local errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network { .. } => true,
            ClientError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// A terminal payload that could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DecodeError {
    /// The base64 transport layer is invalid.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// The zip container could not be read.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The container opened but holds no documents.
    #[error("result container is empty")]
    EmptyContainer,

    /// The payload kind never carries documents (e.g. a send receipt).
    #[error("payload of kind '{0}' carries no documents")]
    Unsupported(String),
}

/// A non-fatal error for a single entry of a result container.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{name}: {fault}")]
pub struct EntryError {
    pub name: String,
    pub fault: EntryFault,
}

/// Why a single entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum EntryFault {
    /// Reading the entry failed (bad CRC, truncated data).
    #[error("unreadable entry: {0}")]
    Unreadable(String),

    /// Entry bytes are not valid UTF-8.
    #[error("content is not UTF-8 text")]
    NotUtf8,

    /// Inline value is not a string.
    #[error("expected text, found {0}")]
    NotText(String),

    /// Text does not start with a markup declaration or opening tag.
    #[error("content does not start with '<?xml' or an opening tag")]
    MissingMarker,

    /// Another entry of the container already used this name.
    #[error("duplicate entry name")]
    DuplicateName,
}

impl EntryError {
    pub fn new(name: impl Into<String>, fault: EntryFault) -> Self {
        Self {
            name: name.into(),
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_unavailable_display_keeps_cause() {
        let e = ClientError::BalanceUnavailable {
            required: 1,
            reason: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("connection refused"), "got: {msg}");
        assert!(!msg.contains("Insufficient"), "got: {msg}");
    }

    #[test]
    fn admission_rejected_display() {
        let e = ClientError::AdmissionRejected {
            required: 3,
            balance: 2,
            missing: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains("3 required"), "got: {msg}");
        assert!(msg.contains("1 missing"), "got: {msg}");
    }

    #[test]
    fn too_many_files_display() {
        let e = ClientError::TooManyFiles {
            selected: 151,
            max: 150,
        };
        assert!(e.to_string().contains("151 files selected"));
    }

    #[test]
    fn transient_errors() {
        let net = ClientError::Network {
            endpoint: "/task-status/1/".into(),
            detail: "connection reset".into(),
        };
        let gateway = ClientError::Backend {
            status: 502,
            message: "bad gateway".into(),
        };
        let backend = ClientError::Backend {
            status: 404,
            message: "task not found".into(),
        };
        let auth = ClientError::Auth {
            detail: "expired".into(),
        };
        assert!(net.is_transient());
        assert!(gateway.is_transient());
        assert!(!backend.is_transient());
        assert!(!auth.is_transient());
    }

    #[test]
    fn entry_error_display_names_entry() {
        let e = EntryError::new("nota.xml", EntryFault::MissingMarker);
        assert!(e.to_string().starts_with("nota.xml:"));
    }

    #[test]
    fn decode_error_converts_into_client_error() {
        let e: ClientError = DecodeError::EmptyContainer.into();
        assert!(e.to_string().contains("empty"));
    }
}
