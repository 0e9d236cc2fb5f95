//! Per-file status ledger for the current session.
//!
//! ```text
//! Uploaded ──submit──▶ Submitted ──apply──▶ Completed
//!                          │
//!                          └──job failed──▶ Failed
//! ```
//!
//! Transitions are monotonic. The only way back is an explicit re-upload,
//! which resets the row to `Uploaded` and clears everything derived from the
//! previous run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    Submitted,
    Completed,
    Failed,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Submitted => "submitted",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Delivery state of a generated document towards the external API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    #[default]
    NotSent,
    Sending,
    Sent,
    SendFailed,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SendStatus::NotSent => "not sent",
            SendStatus::Sending => "sending",
            SendStatus::Sent => "sent",
            SendStatus::SendFailed => "send failed",
        };
        f.write_str(s)
    }
}

/// One uploaded PDF and everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub storage_path: PathBuf,
    pub status: FileStatus,
    pub xml_generated: bool,
    #[serde(default)]
    pub send_status: SendStatus,
    /// Last human-readable note (failure reason, send receipt).
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub generated_content: Option<String>,
}

impl InputFile {
    fn uploaded(name: String, storage_path: PathBuf) -> Self {
        Self {
            name,
            storage_path,
            status: FileStatus::Uploaded,
            xml_generated: false,
            send_status: SendStatus::NotSent,
            detail: String::new(),
            generated_content: None,
        }
    }

    fn stem(&self) -> Option<&str> {
        Path::new(&self.name).file_stem().and_then(|s| s.to_str())
    }
}

/// What [`BatchLedger::apply`] did with a decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The named file moved to `Completed`. Carries the ledger name, which
    /// may differ from the document name (`a.xml` completes `a.pdf`).
    Completed(String),
    /// The file was already `Completed`; nothing changed.
    AlreadyCompleted(String),
    /// No ledger row matches the document name.
    Unmatched,
    /// Content was empty and was refused.
    EmptyContent,
}

/// Ordered set of [`InputFile`] rows keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchLedger {
    files: Vec<InputFile>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn get(&self, name: &str) -> Option<&InputFile> {
        self.files.iter().find(|f| f.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut InputFile> {
        self.files.iter_mut().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Add a file, or reset an existing row of the same name to `Uploaded`.
    pub fn register_upload(&mut self, name: &str, storage_path: PathBuf) {
        match self.get_mut(name) {
            Some(existing) => {
                debug!("Re-upload of '{}' resets its status", name);
                *existing = InputFile::uploaded(name.to_string(), storage_path);
            }
            None => self
                .files
                .push(InputFile::uploaded(name.to_string(), storage_path)),
        }
    }

    /// Files that can be selected for a new conversion.
    pub fn pending(&self) -> Vec<&InputFile> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Uploaded)
            .collect()
    }

    /// Completed files whose document has not been delivered yet.
    pub fn ready_to_send(&self) -> Vec<&InputFile> {
        self.files
            .iter()
            .filter(|f| {
                f.status == FileStatus::Completed
                    && f.generated_content.is_some()
                    && f.send_status != SendStatus::Sent
            })
            .collect()
    }

    /// `Uploaded → Submitted`. Rows in any other state are left alone.
    pub fn mark_submitted(&mut self, names: &[String]) {
        for name in names {
            if let Some(f) = self.get_mut(name) {
                if f.status == FileStatus::Uploaded {
                    f.status = FileStatus::Submitted;
                    f.detail.clear();
                }
            }
        }
    }

    /// `Submitted → Failed` with a reason. Completed rows are never demoted.
    pub fn mark_failed(&mut self, name: &str, reason: &str) -> bool {
        match self.get_mut(name) {
            Some(f) if f.status == FileStatus::Submitted => {
                f.status = FileStatus::Failed;
                f.detail = reason.to_string();
                true
            }
            _ => false,
        }
    }

    /// Resolve a document name to a ledger row: exact name first, then the
    /// same file stem (`nota.xml` ↔ `nota.pdf`).
    fn resolve(&self, doc_name: &str) -> Option<usize> {
        if let Some(i) = self.files.iter().position(|f| f.name == doc_name) {
            return Some(i);
        }
        let stem = Path::new(doc_name).file_stem().and_then(|s| s.to_str())?;
        let mut matches = self
            .files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.stem() == Some(stem));
        let first = matches.next().map(|(i, _)| i);
        // An ambiguous stem matches nothing.
        if matches.next().is_some() {
            return None;
        }
        first
    }

    /// Record a decoded document against its input file.
    pub fn apply(&mut self, doc_name: &str, content: &str) -> ApplyOutcome {
        if content.trim().is_empty() {
            warn!("Refusing empty document for '{}'", doc_name);
            return ApplyOutcome::EmptyContent;
        }
        let Some(i) = self.resolve(doc_name) else {
            warn!("Result '{}' matches no uploaded file", doc_name);
            return ApplyOutcome::Unmatched;
        };
        let f = &mut self.files[i];
        if f.status == FileStatus::Completed {
            return ApplyOutcome::AlreadyCompleted(f.name.clone());
        }
        f.status = FileStatus::Completed;
        f.xml_generated = true;
        f.generated_content = Some(content.to_string());
        f.detail.clear();
        ApplyOutcome::Completed(f.name.clone())
    }

    pub fn set_send_status(&mut self, name: &str, status: SendStatus, detail: Option<String>) {
        if let Some(f) = self.get_mut(name) {
            f.send_status = status;
            if let Some(d) = detail {
                f.detail = d;
            }
        }
    }

    /// `(completed, failed, in flight)` counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.files.iter().fold((0, 0, 0), |(c, f, s), file| match file.status {
            FileStatus::Completed => (c + 1, f, s),
            FileStatus::Failed => (c, f + 1, s),
            FileStatus::Submitted => (c, f, s + 1),
            FileStatus::Uploaded => (c, f, s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(names: &[&str]) -> BatchLedger {
        let mut l = BatchLedger::new();
        for n in names {
            l.register_upload(n, PathBuf::from(format!("uploads/{n}")));
        }
        l
    }

    #[test]
    fn lifecycle_to_completed() {
        let mut l = ledger(&["a.pdf"]);
        l.mark_submitted(&["a.pdf".into()]);
        assert_eq!(l.get("a.pdf").unwrap().status, FileStatus::Submitted);

        assert_eq!(
            l.apply("a.pdf", "<nfe/>"),
            ApplyOutcome::Completed("a.pdf".into())
        );
        let f = l.get("a.pdf").unwrap();
        assert!(f.xml_generated);
        assert_eq!(f.generated_content.as_deref(), Some("<nfe/>"));
    }

    #[test]
    fn archive_names_match_by_stem() {
        let mut l = ledger(&["nota-01.pdf", "nota-02.pdf"]);
        l.mark_submitted(&["nota-01.pdf".into(), "nota-02.pdf".into()]);
        assert_eq!(
            l.apply("nota-02.xml", "<nfe/>"),
            ApplyOutcome::Completed("nota-02.pdf".into())
        );
    }

    #[test]
    fn ambiguous_stem_is_unmatched() {
        let mut l = ledger(&["a.pdf", "a.PDF"]);
        assert_eq!(l.apply("a.xml", "<nfe/>"), ApplyOutcome::Unmatched);
    }

    #[test]
    fn empty_content_is_refused() {
        let mut l = ledger(&["a.pdf"]);
        l.mark_submitted(&["a.pdf".into()]);
        assert_eq!(l.apply("a.pdf", "  \n"), ApplyOutcome::EmptyContent);
        assert_eq!(l.get("a.pdf").unwrap().status, FileStatus::Submitted);
    }

    #[test]
    fn completed_is_never_demoted() {
        let mut l = ledger(&["a.pdf"]);
        l.mark_submitted(&["a.pdf".into()]);
        l.apply("a.pdf", "<nfe/>");
        assert!(!l.mark_failed("a.pdf", "late failure"));
        assert_eq!(
            l.apply("a.pdf", "<other/>"),
            ApplyOutcome::AlreadyCompleted("a.pdf".into())
        );
        assert_eq!(
            l.get("a.pdf").unwrap().generated_content.as_deref(),
            Some("<nfe/>")
        );
    }

    #[test]
    fn reupload_resets_row_in_place() {
        let mut l = ledger(&["a.pdf", "b.pdf"]);
        l.mark_submitted(&["a.pdf".into()]);
        l.apply("a.pdf", "<nfe/>");
        l.set_send_status("a.pdf", SendStatus::Sent, Some("uuid u-1".into()));

        l.register_upload("a.pdf", PathBuf::from("uploads/a-v2.pdf"));
        let f = l.get("a.pdf").unwrap();
        assert_eq!(f.status, FileStatus::Uploaded);
        assert_eq!(f.send_status, SendStatus::NotSent);
        assert!(f.generated_content.is_none());
        assert!(f.detail.is_empty());
        assert_eq!(l.len(), 2);
        assert_eq!(l.files()[0].name, "a.pdf");
    }

    #[test]
    fn send_selection() {
        let mut l = ledger(&["a.pdf", "b.pdf"]);
        l.mark_submitted(&["a.pdf".into(), "b.pdf".into()]);
        l.apply("a.pdf", "<nfe/>");
        l.mark_failed("b.pdf", "parse error");
        assert_eq!(l.ready_to_send().len(), 1);
        l.set_send_status("a.pdf", SendStatus::Sent, None);
        assert!(l.ready_to_send().is_empty());
        assert_eq!(l.counts(), (1, 1, 0));
    }
}
