//! Shared fixtures: a scripted in-memory gateway and payload builders.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pdf2xml_client::{
    BackendGateway, ClientConfig, ClientError, JobKind, JobRef, JobStatus, Payload,
    SendSubmission, SubmitReceipt, UploadFile,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// One scripted answer to `poll_status`.
#[derive(Debug, Clone)]
pub enum Step {
    Status(JobStatus),
    Network,
    Backend(u16, &'static str),
    Auth,
}

impl Step {
    fn into_result(self) -> Result<JobStatus, ClientError> {
        match self {
            Step::Status(s) => Ok(s),
            Step::Network => Err(ClientError::Network {
                endpoint: "/task-status/".into(),
                detail: "connection reset".into(),
            }),
            Step::Backend(status, message) => Err(ClientError::Backend {
                status,
                message: message.into(),
            }),
            Step::Auth => Err(ClientError::Auth {
                detail: "token expired".into(),
            }),
        }
    }
}

/// In-memory [`BackendGateway`] driven by per-job scripts.
///
/// Each `poll_status` pops the next step of the job's script; an exhausted
/// script keeps answering `Pending`. Submissions get sequential job ids
/// (`job-1`, `job-2`, …), merges `merge-N`, sends `send-<file>`.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    polls: Mutex<HashMap<String, u32>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    submitted: Mutex<Vec<Vec<String>>>,
    rejected_sends: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    pub submits: AtomicUsize,
    pub fetches: AtomicUsize,
    pub merges: AtomicUsize,
    pub sends: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, job_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into());
    }

    pub fn archive(&self, handle: &str, bytes: Vec<u8>) {
        self.archives
            .lock()
            .unwrap()
            .insert(handle.to_string(), bytes);
    }

    /// Answer `submit_send` for `file` with an immediate rejection.
    pub fn reject_send(&self, file: &str) {
        self.rejected_sends.lock().unwrap().push(file.to_string());
    }

    pub fn polls(&self, job_id: &str) -> u32 {
        self.polls
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_polls(&self) -> u32 {
        self.polls.lock().unwrap().values().sum()
    }

    pub fn submitted(&self) -> Vec<Vec<String>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendGateway for ScriptedGateway {
    async fn submit(&self, files: &[UploadFile]) -> Result<SubmitReceipt, ClientError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .unwrap()
            .push(files.iter().map(|f| f.name.clone()).collect());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmitReceipt {
            job_refs: vec![JobRef::new(format!("job-{n}"), JobKind::Extraction)],
            credits_used: files.len() as u64,
            files_count: files.len(),
        })
    }

    async fn poll_status(&self, job: &JobRef) -> Result<JobStatus, ClientError> {
        *self
            .polls
            .lock()
            .unwrap()
            .entry(job.id.clone())
            .or_insert(0) += 1;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&job.id)
            .and_then(VecDeque::pop_front);
        step.unwrap_or(Step::Status(JobStatus::Pending)).into_result()
    }

    async fn fetch_binary(&self, handle: &str) -> Result<Vec<u8>, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.archives
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| ClientError::Backend {
                status: 404,
                message: format!("no archive {handle}"),
            })
    }

    async fn submit_merge(
        &self,
        _files: &[UploadFile],
        _output_filename: &str,
    ) -> Result<JobRef, ClientError> {
        let n = self.merges.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(JobRef::new(format!("merge-{n}"), JobKind::Merge))
    }

    async fn submit_send(
        &self,
        file_name: &str,
        _content: &str,
    ) -> Result<SendSubmission, ClientError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self
            .rejected_sends
            .lock()
            .unwrap()
            .iter()
            .any(|f| f == file_name)
        {
            return Ok(SendSubmission::Rejected("schema validation failed".into()));
        }
        Ok(SendSubmission::Queued(JobRef::new(
            format!("send-{file_name}"),
            JobKind::Send,
        )))
    }
}

// ── Payload builders ─────────────────────────────────────────────────────────

/// Zip container holding `entries` (stored, no compression).
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn archive(entries: &[(&str, &str)]) -> Payload {
    Payload::Archive {
        data: STANDARD.encode(zip_bytes(entries)),
    }
}

pub fn inline(entries: &[(&str, &str)]) -> Payload {
    let files: BTreeMap<String, serde_json::Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    Payload::Inline {
        files,
        download_handle: None,
        warnings: Vec::new(),
    }
}

pub fn success(payload: Payload) -> Step {
    Step::Status(JobStatus::Success(payload))
}

pub fn started() -> Step {
    Step::Status(JobStatus::Started)
}

pub fn pending() -> Step {
    Step::Status(JobStatus::Pending)
}

pub fn failure(reason: &str) -> Step {
    Step::Status(JobStatus::Failure(reason.to_string()))
}

/// Config with a 1 ms tick and small ceilings.
pub fn fast_config(ceiling: u32) -> ClientConfig {
    ClientConfig::builder()
        .poll_interval_ms(1)
        .extraction_max_attempts(ceiling)
        .merge_max_attempts(ceiling)
        .send_max_attempts(ceiling)
        .build()
        .unwrap()
}

pub fn xml(tag: &str) -> String {
    format!("<?xml version=\"1.0\"?><{tag}/>")
}
