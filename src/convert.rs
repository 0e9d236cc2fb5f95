//! Orchestrator: the end-to-end flows built on the gateway, engine,
//! decoder and stores.
//!
//! ## Conversion
//!
//! ```text
//! convert(selection)
//!  ├─ 1. Guard     no batch in flight; names known and Uploaded; ≤ cap
//!  ├─ 2. Admit     CreditGate: balance ≥ one unit per file
//!  ├─ 3. Submit    chunked uploads; each receipt persisted before the next
//!  ├─ 4. Poll      outcome stream, completion order
//!  ├─ 5. Apply     decode → ledger → history, once per job (`applied`)
//!  └─ 6. Settle    leftover Submitted files → Failed; batch cleared
//! ```
//!
//! Steps 4-6 are shared with [`Orchestrator::resume`], which picks up a
//! batch left in the [`SessionStore`] by an earlier process.

use crate::config::ClientConfig;
use crate::credit::{BalanceSource, CreditCheck, CreditGate};
use crate::decode::{decode, decode_archive, decode_base64, DecodedFiles};
use crate::engine::PollingEngine;
use crate::error::ClientError;
use crate::gateway::{submit_in_chunks, wire, BackendGateway, SendSubmission, UploadFile};
use crate::history::{HistoryRecord, HistoryStore};
use crate::job::{BatchOutcome, JobOutcome, JobResult, Payload};
use crate::ledger::{ApplyOutcome, BatchLedger, FileStatus, SendStatus};
use crate::output::{ConversionReport, MergeOutput, SendReport};
use crate::store::{SessionStore, TrackedBatch, TrackedJob, TrackedSend};
use crate::stream::poll_stream;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Entry point for every client-side flow of one session.
pub struct Orchestrator {
    config: ClientConfig,
    gateway: Arc<dyn BackendGateway>,
    balance: Arc<dyn BalanceSource>,
    store: Arc<SessionStore>,
    history: Arc<HistoryStore>,
    engine: PollingEngine,
}

impl Orchestrator {
    /// Build an orchestrator over explicit stores.
    pub fn new(
        config: ClientConfig,
        gateway: Arc<dyn BackendGateway>,
        balance: Arc<dyn BalanceSource>,
        store: Arc<SessionStore>,
        history: Arc<HistoryStore>,
    ) -> Self {
        let engine = PollingEngine::new(Arc::clone(&gateway), Arc::clone(&store), config.clone());
        Self {
            config,
            gateway,
            balance,
            store,
            history,
            engine,
        }
    }

    /// Open `session.json` and `history.json` under `config.state_dir`.
    pub fn open(
        config: ClientConfig,
        gateway: Arc<dyn BackendGateway>,
        balance: Arc<dyn BalanceSource>,
    ) -> Result<Self, ClientError> {
        let store = Arc::new(SessionStore::open(config.session_path())?);
        let history = Arc::new(HistoryStore::open(
            config.history_path(),
            config.time_saved_per_file,
        )?);
        Ok(Self::new(config, gateway, balance, store, history))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn engine(&self) -> &PollingEngine {
        &self.engine
    }

    pub fn ledger(&self) -> BatchLedger {
        self.store.ledger()
    }

    pub fn history(&self) -> HistoryRecord {
        self.history.snapshot()
    }

    pub fn tracked_batch(&self) -> Option<TrackedBatch> {
        self.store.tracked_batch()
    }

    pub fn download_handles(&self) -> Vec<String> {
        self.store.snapshot().download_handles
    }

    /// Direct URL of a stored result container.
    pub fn download_url(&self, handle: &str) -> String {
        wire::url(&self.config.backend_url, &wire::download_zip(handle))
    }

    /// Fetch a stored result container.
    pub async fn download(&self, handle: &str) -> Result<Vec<u8>, ClientError> {
        self.gateway.fetch_binary(handle).await
    }

    /// Balance check for `units` files without submitting anything.
    pub async fn credit_check(&self, units: u64) -> CreditCheck {
        CreditGate::new(self.balance.as_ref()).check(units).await
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Store `bytes` under `<state_dir>/uploads/` and register the file.
    ///
    /// Re-uploading a name resets its row to `Uploaded`, unless the file is
    /// part of a batch or a send that is still in flight.
    pub async fn upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ClientError> {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ClientError::InvalidFileName {
                name: name.to_string(),
            })?
            .to_string();

        let state = self.store.snapshot();
        if let Some(existing) = state.ledger.get(&file_name) {
            let busy = existing.status == FileStatus::Submitted
                || state.tracked_send(&file_name).is_some();
            if busy {
                let status = match existing.status {
                    FileStatus::Submitted => existing.status.to_string(),
                    _ => existing.send_status.to_string(),
                };
                return Err(ClientError::FileNotReady {
                    name: file_name,
                    status,
                    action: "re-upload",
                });
            }
        }

        let dir = self.config.upload_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ClientError::storage(&dir, e))?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ClientError::storage(&path, e))?;

        self.store
            .update(|s| s.ledger.register_upload(&file_name, path.clone()))?;
        info!("Uploaded '{}' ({} bytes)", file_name, bytes.len());
        Ok(path)
    }

    // ── Conversion ───────────────────────────────────────────────────────

    /// Submit `selection` for extraction and drive it to completion.
    ///
    /// Fails before any network call when the selection is invalid or the
    /// credit balance is short. Once submitted, a job's failure never aborts
    /// its siblings; only a rejected session does, leaving the batch
    /// tracked for [`Orchestrator::resume`].
    pub async fn convert(
        &self,
        selection: &[String],
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ClientError> {
        if let Some(batch) = self.store.tracked_batch() {
            return Err(ClientError::BatchInFlight {
                jobs: batch.jobs.len(),
            });
        }

        let mut seen = HashSet::new();
        let names: Vec<String> = selection
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .cloned()
            .collect();
        if names.is_empty() {
            return Err(ClientError::EmptySelection);
        }
        if names.len() > self.config.max_files_per_batch {
            return Err(ClientError::TooManyFiles {
                selected: names.len(),
                max: self.config.max_files_per_batch,
            });
        }

        let ledger = self.store.ledger();
        let mut paths = Vec::with_capacity(names.len());
        for name in &names {
            let file = ledger.get(name).ok_or_else(|| ClientError::UnknownFile {
                name: name.clone(),
            })?;
            if file.status != FileStatus::Uploaded {
                return Err(ClientError::FileNotReady {
                    name: name.clone(),
                    status: file.status.to_string(),
                    action: "convert",
                });
            }
            paths.push(file.storage_path.clone());
        }

        let check = CreditGate::new(self.balance.as_ref())
            .admit(names.len() as u64)
            .await?;
        info!(
            "Admitted {} file(s): balance {}, {} after debit",
            names.len(),
            check.current_balance,
            check.remaining_after
        );

        let mut uploads = Vec::with_capacity(names.len());
        for (name, path) in names.iter().zip(&paths) {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ClientError::storage(path, e))?;
            uploads.push(UploadFile::new(name.clone(), bytes));
        }

        self.store
            .update(|s| s.batch = Some(TrackedBatch::default()))?;

        let submitted = submit_in_chunks(
            self.gateway.as_ref(),
            &uploads,
            self.config.max_files_per_batch,
            self.config.chunk_size,
            |chunk, receipt| {
                let files: Vec<String> = chunk.iter().map(|f| f.name.clone()).collect();
                self.store.update(|s| {
                    s.ledger.mark_submitted(&files);
                    let batch = s.batch.get_or_insert_with(TrackedBatch::default);
                    batch.credits_used += receipt.credits_used;
                    batch.files_submitted += chunk.len();
                    batch.jobs.extend(receipt.job_refs.iter().map(|job| TrackedJob {
                        job: job.clone(),
                        files: files.clone(),
                    }));
                })
            },
        )
        .await;

        if let Err(e) = submitted {
            let kept = self.store.update(|s| {
                let empty = s.batch.as_ref().map_or(true, |b| b.jobs.is_empty());
                if empty {
                    s.batch = None;
                }
                !empty
            })?;
            if kept {
                error!("Submission stopped part-way: {}. Resume to finish the accepted chunks.", e);
            }
            return Err(e);
        }

        let batch = self
            .store
            .tracked_batch()
            .ok_or_else(|| ClientError::Internal("submitted batch was not tracked".into()))?;
        info!(
            "Submitted {} file(s) as {} job(s); {} credit(s) used",
            batch.files_submitted,
            batch.jobs.len(),
            batch.credits_used
        );
        self.run_batch(batch, cancel).await
    }

    /// Finish the batch left in flight by an earlier run, if any.
    ///
    /// Jobs already terminal are not polled again and results already
    /// applied are not applied twice.
    pub async fn resume(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ConversionReport>, ClientError> {
        let Some(batch) = self.store.tracked_batch() else {
            info!("No batch in flight");
            return Ok(None);
        };
        info!("Resuming batch of {} job(s)", batch.jobs.len());
        self.run_batch(batch, cancel).await.map(Some)
    }

    async fn run_batch(
        &self,
        batch: TrackedBatch,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ClientError> {
        let jobs = batch.job_refs();
        let total = jobs.len();
        let order: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id.clone(), i))
            .collect();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let mut report = ConversionReport::empty(batch.credits_used, batch.files_submitted);
        let mut reasons: HashMap<String, String> = HashMap::new();
        let mut outcomes: Vec<JobOutcome> = Vec::with_capacity(total);

        let mut stream = poll_stream(self.engine.clone(), jobs, cancel.clone());
        while let Some(item) = stream.next().await {
            // Dropping the stream stops the remaining tickers; their progress
            // is already persisted.
            let outcome = item?;
            if let Some(reason) = self.finalise(&outcome, &mut report).await? {
                reasons.insert(outcome.job.id.clone(), reason);
            }
            outcomes.push(outcome);
        }
        drop(stream);

        outcomes.sort_by_key(|o| order.get(&o.job.id).copied().unwrap_or(usize::MAX));
        self.settle(&batch, &reasons, &mut report)?;

        report.outcome = BatchOutcome::from_outcomes(&outcomes);
        report.jobs = outcomes;
        let (ok, bad) = report.job_counts();
        info!(
            "Batch finished: {} ({} job(s) ok, {} failed; {} file(s) completed, {} failed)",
            report.outcome,
            ok,
            bad,
            report.completed.len(),
            report.failed.len()
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_complete(total, ok);
        }
        Ok(report)
    }

    /// Fold one terminal job into the ledger and history.
    ///
    /// Returns the reason its files should be marked failed, if any.
    async fn finalise(
        &self,
        outcome: &JobOutcome,
        report: &mut ConversionReport,
    ) -> Result<Option<String>, ClientError> {
        let job_id = outcome.job.id.clone();
        let progress = self.store.job_progress(&job_id);
        if progress.as_ref().is_some_and(|p| p.applied) {
            debug!("{}: results already applied", outcome.job);
            return Ok(outcome.failure_reason().map(str::to_string));
        }

        let mut reason = outcome.failure_reason().map(str::to_string);
        let mut decoded = DecodedFiles::default();
        if let Some(payload) = outcome.payload() {
            match self.decode_payload(payload).await {
                Ok(d) => decoded = d,
                Err(e @ ClientError::Auth { .. }) => return Err(e),
                Err(e) => {
                    error!("{}: result could not be decoded: {}", outcome.job, e);
                    reason = Some(format!("result could not be decoded: {e}"));
                }
            }
        }

        let (completed, unmatched) = self.store.update(|s| {
            let mut completed = Vec::new();
            let mut unmatched = Vec::new();
            for (doc, content) in &decoded.files {
                match s.ledger.apply(doc, content) {
                    ApplyOutcome::Completed(name) => completed.push(name),
                    ApplyOutcome::Unmatched => unmatched.push(doc.clone()),
                    ApplyOutcome::AlreadyCompleted(_) | ApplyOutcome::EmptyContent => {}
                }
            }
            if let Some(handle) = &decoded.download_handle {
                if !s.download_handles.contains(handle) {
                    s.download_handles.push(handle.clone());
                }
            }
            if let Some(p) = s.jobs.get_mut(&job_id) {
                p.applied = true;
            }
            (completed, unmatched)
        })?;

        for name in &completed {
            self.history.record(name)?;
        }
        for e in &decoded.errors {
            warn!("{}: rejected entry {}", outcome.job, e);
        }
        for w in &decoded.warnings {
            warn!("{}: backend reported: {}", outcome.job, w);
        }
        debug!(
            "{}: {} document(s) applied, {} rejected, {} unmatched",
            outcome.job,
            completed.len(),
            decoded.errors.len(),
            unmatched.len()
        );

        report.entry_errors.extend(decoded.errors);
        report.warnings.extend(decoded.warnings);
        report.unmatched.extend(unmatched);
        if let Some(h) = decoded.download_handle {
            report.download_handles.push(h);
        }
        Ok(reason)
    }

    /// Decode a success payload, fetching the container when it is only
    /// referenced.
    async fn decode_payload(&self, payload: &Payload) -> Result<DecodedFiles, ClientError> {
        match payload {
            Payload::Reference { handle } => self.fetch_and_decode(handle, Vec::new()).await,
            Payload::Inline {
                files,
                download_handle: Some(handle),
                warnings,
            } if files.is_empty() => self.fetch_and_decode(handle, warnings.clone()).await,
            other => Ok(decode(other)?),
        }
    }

    async fn fetch_and_decode(
        &self,
        handle: &str,
        warnings: Vec<String>,
    ) -> Result<DecodedFiles, ClientError> {
        let bytes = self.gateway.fetch_binary(handle).await?;
        let mut decoded = decode_archive(&bytes)?;
        decoded.download_handle = Some(handle.to_string());
        decoded.warnings = warnings;
        Ok(decoded)
    }

    /// Close the batch: files still `Submitted` become `Failed`, completed
    /// files are recorded in history, and the tracked batch is cleared.
    fn settle(
        &self,
        batch: &TrackedBatch,
        reasons: &HashMap<String, String>,
        report: &mut ConversionReport,
    ) -> Result<(), ClientError> {
        let mut names: Vec<&String> = Vec::new();
        let mut seen = HashSet::new();
        for tracked in &batch.jobs {
            for name in &tracked.files {
                if seen.insert(name.as_str()) {
                    names.push(name);
                }
            }
        }

        // Jobs with an explicit reason go first so their message wins.
        let (explained, silent): (Vec<&TrackedJob>, Vec<&TrackedJob>) = batch
            .jobs
            .iter()
            .partition(|t| reasons.contains_key(&t.job.id));

        let ledger = self.store.update(|s| {
            for tracked in explained.iter().chain(silent.iter()) {
                let reason = reasons
                    .get(&tracked.job.id)
                    .map(String::as_str)
                    .unwrap_or("no document was returned for this file");
                for name in &tracked.files {
                    s.ledger.mark_failed(name, reason);
                }
            }
            s.ledger.clone()
        })?;

        for name in names {
            let Some(file) = ledger.get(name) else { continue };
            match file.status {
                FileStatus::Completed => {
                    self.history.record(name)?;
                    report.completed.push(name.clone());
                }
                FileStatus::Failed => report.failed.push((name.clone(), file.detail.clone())),
                _ => {}
            }
        }

        let ids: Vec<String> = batch.jobs.iter().map(|t| t.job.id.clone()).collect();
        self.store.update(|s| {
            s.batch = None;
            for id in &ids {
                s.jobs.remove(id);
            }
        })
    }

    // ── Merge ────────────────────────────────────────────────────────────

    /// Merge `files` into one PDF on the backend.
    pub async fn merge(
        &self,
        files: &[UploadFile],
        output_filename: &str,
        cancel: &CancellationToken,
    ) -> Result<MergeOutput, ClientError> {
        if files.len() < 2 {
            return Err(ClientError::NotEnoughMergeInputs { got: files.len() });
        }

        let job = self.gateway.submit_merge(files, output_filename).await?;
        info!("Merge of {} PDF(s) submitted as {}", files.len(), job);
        let polled = self.engine.poll_job(job.clone(), cancel).await;
        self.store.forget_jobs(&[job.id.clone()])?;
        let outcome = polled?;

        match outcome.result {
            JobResult::Succeeded {
                payload: Payload::Document { filename, data },
            } => {
                let bytes = decode_base64(&data)?;
                let filename = filename.unwrap_or_else(|| output_filename.to_string());
                info!("Merged PDF '{}' ({} bytes)", filename, bytes.len());
                Ok(MergeOutput { filename, bytes })
            }
            JobResult::Succeeded { payload } => Err(ClientError::MalformedResponse {
                endpoint: wire::MERGE.to_string(),
                detail: format!(
                    "expected a merged document, got a {} payload",
                    payload.kind_name()
                ),
            }),
            JobResult::Failed { reason } => Err(ClientError::JobFailed {
                job_id: job.id,
                reason,
            }),
            JobResult::TimedOut { .. } => Err(ClientError::JobTimedOut {
                job_id: job.id,
                attempts: outcome.attempts,
            }),
        }
    }

    // ── Send ─────────────────────────────────────────────────────────────

    /// Forward generated documents to the external API.
    ///
    /// An empty `names` selects every completed file not yet sent. Send
    /// jobs queued by an earlier call that did not finish (expired login,
    /// crash, Ctrl-C before the poll ended) are polled again instead of
    /// being submitted a second time.
    pub async fn send(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<SendReport, ClientError> {
        let state = self.store.snapshot();
        let ledger = &state.ledger;
        let mut resumed: Vec<TrackedSend> = Vec::new();
        let mut targets: Vec<(String, String)> = Vec::new();

        if names.is_empty() {
            resumed = state.sends.clone();
            for f in ledger.ready_to_send() {
                if state.tracked_send(&f.name).is_some() {
                    continue;
                }
                if let Some(content) = &f.generated_content {
                    targets.push((f.name.clone(), content.clone()));
                }
            }
        } else {
            for name in names {
                let file = ledger.get(name).ok_or_else(|| ClientError::UnknownFile {
                    name: name.clone(),
                })?;
                if let Some(tracked) = state.tracked_send(name) {
                    resumed.push(tracked.clone());
                    continue;
                }
                match (&file.status, &file.generated_content) {
                    (FileStatus::Completed, Some(content)) => {
                        targets.push((name.clone(), content.clone()))
                    }
                    _ => {
                        return Err(ClientError::FileNotReady {
                            name: name.clone(),
                            status: file.status.to_string(),
                            action: "send",
                        })
                    }
                }
            }
        }
        if targets.is_empty() && resumed.is_empty() {
            return Err(ClientError::EmptySelection);
        }

        let mut report = SendReport::default();
        let mut by_job: HashMap<String, String> = HashMap::new();
        let mut queued = Vec::new();
        if !resumed.is_empty() {
            info!("Resuming {} send job(s) from an earlier run", resumed.len());
        }
        for t in resumed {
            by_job.insert(t.job.id.clone(), t.file);
            queued.push(t.job);
        }

        for (name, content) in &targets {
            self.set_send_status(name, SendStatus::Sending, None)?;
            match self.gateway.submit_send(name, content).await {
                Ok(SendSubmission::Queued(job)) => {
                    debug!("'{}' queued for sending as {}", name, job);
                    let tracked = TrackedSend {
                        job: job.clone(),
                        file: name.clone(),
                    };
                    self.store.update(|s| s.sends.push(tracked))?;
                    by_job.insert(job.id.clone(), name.clone());
                    queued.push(job);
                }
                Ok(SendSubmission::Delivered(payload)) => {
                    self.mark_sent(name, None, &payload, &mut report)?;
                }
                Ok(SendSubmission::Rejected(reason)) => {
                    self.mark_send_failed(name, None, &reason, &mut report)?;
                }
                Err(e @ ClientError::Auth { .. }) => {
                    self.set_send_status(name, SendStatus::NotSent, None)?;
                    return Err(e);
                }
                Err(e) => {
                    self.mark_send_failed(name, None, &e.to_string(), &mut report)?;
                }
            }
        }

        if !queued.is_empty() {
            // On Auth the tracked sends and their progress stay for the next call.
            let batch = self.engine.poll_batch(queued, cancel).await?;
            for outcome in &batch.outcomes {
                let Some(name) = by_job.get(&outcome.job.id) else { continue };
                let job_id = Some(outcome.job.id.as_str());
                match &outcome.result {
                    JobResult::Succeeded { payload } => {
                        self.mark_sent(name, job_id, payload, &mut report)?
                    }
                    JobResult::Failed { reason } | JobResult::TimedOut { reason } => {
                        self.mark_send_failed(name, job_id, reason, &mut report)?
                    }
                }
            }
        }

        let (sent, failed) = report.counts();
        info!("Send finished: {} sent, {} failed", sent, failed);
        Ok(report)
    }

    fn set_send_status(
        &self,
        name: &str,
        status: SendStatus,
        detail: Option<String>,
    ) -> Result<(), ClientError> {
        self.store
            .update(|s| s.ledger.set_send_status(name, status, detail))
    }

    /// Record the final send status of `name` and, for a queued send,
    /// drop its tracking and progress in the same flush.
    fn settle_send(
        &self,
        name: &str,
        job_id: Option<&str>,
        status: SendStatus,
        detail: &str,
    ) -> Result<(), ClientError> {
        self.store.update(|s| {
            s.ledger
                .set_send_status(name, status, Some(detail.to_string()));
            if let Some(id) = job_id {
                s.sends.retain(|t| t.job.id != id);
                s.jobs.remove(id);
            }
        })
    }

    fn mark_sent(
        &self,
        name: &str,
        job_id: Option<&str>,
        payload: &Payload,
        report: &mut SendReport,
    ) -> Result<(), ClientError> {
        let detail = match payload {
            Payload::Receipt {
                uuid: Some(uuid), ..
            } => format!("uuid {uuid}"),
            Payload::Receipt {
                message: Some(m), ..
            } => m.clone(),
            _ => "sent".to_string(),
        };
        self.settle_send(name, job_id, SendStatus::Sent, &detail)?;
        self.history.record(name)?;
        info!("'{}' sent ({})", name, detail);
        report.sent.push((name.to_string(), detail));
        Ok(())
    }

    fn mark_send_failed(
        &self,
        name: &str,
        job_id: Option<&str>,
        reason: &str,
        report: &mut SendReport,
    ) -> Result<(), ClientError> {
        error!("Sending '{}' failed: {}", name, reason);
        self.settle_send(name, job_id, SendStatus::SendFailed, reason)?;
        report.failed.push((name.to_string(), reason.to_string()));
        Ok(())
    }
}
