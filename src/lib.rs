//! # pdf2xml-client
//!
//! Client-side orchestration for a remote PDF → XML extraction backend.
//!
//! ## Why this crate?
//!
//! The backend does the heavy lifting (reading fiscal PDFs and emitting XML
//! documents) but it is asynchronous: a submission returns job ids, results
//! appear minutes later in one of several container shapes, and credentials
//! expire in the middle of long batches. This crate owns everything on the
//! client side of that contract: admission against the credit balance,
//! chunked submission, durable polling with per-kind ceilings, fault-isolated
//! decoding, and the per-file ledger and audit history.
//!
//! ## Pipeline Overview
//!
//! ```text
//! selected PDFs
//!  │
//!  ├─ 1. Admit    CreditGate: one unit per file, fail closed
//!  ├─ 2. Submit   BackendGateway: chunked multipart, 401 → refresh → retry once
//!  ├─ 3. Poll     PollingEngine: one ticker per job, persisted every tick
//!  ├─ 4. Decode   inline map | base64 zip | fetched zip → {name: xml}
//!  └─ 5. Record   BatchLedger (per file) + HistoryStore (idempotent)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2xml_client::{ClientConfig, HttpGateway, Orchestrator, StaticToken};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .backend_url("https://extract.example.com")
//!         .build()?;
//!     let session = Arc::new(StaticToken::new(std::env::var("PDF2XML_TOKEN")?));
//!     let gateway = Arc::new(HttpGateway::new(&config, session)?);
//!     let client = Orchestrator::open(config, gateway.clone(), gateway)?;
//!
//!     client.upload("nota-01.pdf", &std::fs::read("nota-01.pdf")?).await?;
//!     let report = client
//!         .convert(&["nota-01.pdf".to_string()], &CancellationToken::new())
//!         .await?;
//!     let (ok, failed) = report.file_counts();
//!     eprintln!("{}: {ok} converted, {failed} failed", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2xml` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2xml-client = { version = "0.5", default-features = false }
//! ```
//!
//! ## Persisted State
//!
//! | File | Contents |
//! |------|----------|
//! | `<state_dir>/session.json` | ledger, batch in flight, per-job polling progress, download handles |
//! | `<state_dir>/history.json` | `{processedFiles, timeSavedTotal}` |
//! | `<state_dir>/uploads/`     | stored PDFs |
//!
//! Both JSON files are rewritten atomically on every mutation, so a killed
//! process resumes exactly where it stopped.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod convert;
pub mod credit;
pub mod decode;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod history;
pub mod job;
pub mod ledger;
pub mod output;
pub mod progress;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{CredentialSession, StaticToken, TokenSession};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use convert::Orchestrator;
pub use credit::{BalanceSource, CreditCheck, CreditGate, FixedBalance};
pub use decode::{decode, decode_archive, looks_like_markup, DecodedFiles};
pub use engine::{BatchReport, PollingEngine};
pub use error::{ClientError, DecodeError, EntryError, EntryFault};
pub use gateway::{BackendGateway, HttpGateway, SendSubmission, SubmitReceipt, UploadFile};
pub use history::{HistoryRecord, HistoryStore};
pub use job::{BatchOutcome, EngineState, JobKind, JobOutcome, JobRef, JobResult, JobStatus, Payload};
pub use ledger::{ApplyOutcome, BatchLedger, FileStatus, InputFile, SendStatus};
pub use output::{ConversionReport, MergeOutput, SendReport};
pub use progress::{NoopProgressCallback, PollProgressCallback, ProgressCallback};
pub use store::{SessionState, SessionStore};
pub use stream::{poll_stream, OutcomeStream};
