//! Backend gateway: the authenticated RPC surface of the extraction backend.
//!
//! ```text
//! submit(files)         POST /upload-e-processar-pdf/   → job refs
//! poll_status(job)      GET  /task-status/{id}/         → JobStatus
//! fetch_binary(handle)  GET  /download-zip/{handle}/    → bytes
//! submit_merge(files)   POST /merge_pdfs/               → job ref
//! submit_send(doc)      POST /send-xml-to-external-api/ → job ref | ack
//! ```
//!
//! [`BackendGateway`] is the seam the engine and orchestrator are written
//! against; [`http::HttpGateway`] is the production implementation, tests
//! substitute scripted fakes.

pub mod http;
pub mod wire;

pub use http::HttpGateway;
pub use wire::{SendSubmission, SubmitReceipt};

use crate::error::ClientError;
use crate::job::{JobRef, JobStatus};
use async_trait::async_trait;
use tracing::{info, warn};

/// One PDF ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Authenticated calls to the extraction backend.
///
/// Every method follows the same taxonomy: [`ClientError::Network`] for
/// connection problems and timeouts, [`ClientError::Auth`] when a 401
/// survives one credential refresh, [`ClientError::Backend`] for any other
/// non-2xx response.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Upload one request's worth of PDFs for extraction.
    async fn submit(&self, files: &[UploadFile]) -> Result<SubmitReceipt, ClientError>;

    /// Observe a job once.
    async fn poll_status(&self, job: &JobRef) -> Result<JobStatus, ClientError>;

    /// Download a stored result container.
    async fn fetch_binary(&self, handle: &str) -> Result<Vec<u8>, ClientError>;

    /// Ask the backend to merge several PDFs into `output_filename`.
    async fn submit_merge(
        &self,
        files: &[UploadFile],
        output_filename: &str,
    ) -> Result<JobRef, ClientError>;

    /// Forward one generated document to the external API.
    async fn submit_send(
        &self,
        file_name: &str,
        content: &str,
    ) -> Result<SendSubmission, ClientError>;
}

/// Submit `files` in chunks of `chunk_size`, one request per chunk.
///
/// Selections above `max_files` are refused before any request is made.
/// `on_receipt` runs after each accepted chunk with the chunk's files and
/// receipt, so callers can persist job refs before the next request. When a
/// later chunk fails, the error is returned and earlier chunks stay
/// submitted.
pub async fn submit_in_chunks<F>(
    gateway: &dyn BackendGateway,
    files: &[UploadFile],
    max_files: usize,
    chunk_size: usize,
    mut on_receipt: F,
) -> Result<Vec<SubmitReceipt>, ClientError>
where
    F: FnMut(&[UploadFile], &SubmitReceipt) -> Result<(), ClientError>,
{
    if files.is_empty() {
        return Err(ClientError::EmptySelection);
    }
    if files.len() > max_files {
        return Err(ClientError::TooManyFiles {
            selected: files.len(),
            max: max_files,
        });
    }

    let chunks: Vec<&[UploadFile]> = files.chunks(chunk_size.max(1)).collect();
    let total = chunks.len();
    let mut receipts = Vec::with_capacity(total);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let receipt = gateway.submit(chunk).await?;
        if receipt.files_count != 0 && receipt.files_count != chunk.len() {
            warn!(
                "Chunk {}/{}: sent {} files, backend acknowledged {}",
                i + 1,
                total,
                chunk.len(),
                receipt.files_count
            );
        }
        info!(
            "Chunk {}/{}: {} files → {} job(s), {} credits used",
            i + 1,
            total,
            chunk.len(),
            receipt.job_refs.len(),
            receipt.credits_used
        );
        on_receipt(chunk, &receipt)?;
        receipts.push(receipt);
    }

    Ok(receipts)
}
