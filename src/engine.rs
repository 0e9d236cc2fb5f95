//! Polling engine: drive job refs to a terminal state.
//!
//! ## State machine
//!
//! ```text
//!            ┌──────── Pending / Started / Retry / Unknown ───────┐
//!            ▼                                                    │
//! tick ─▶ sleep(interval) ─▶ attempts += 1 ─▶ poll_status ────────┘
//!   │                                           │
//!   │                                           ├─ Success  ─▶ done
//!   │                                           └─ Failure  ─▶ done
//!   └─ attempts == ceiling ─▶ TimedOut
//! ```
//!
//! ## Durability
//!
//! A tick never trusts in-memory locals: it loads the job's
//! [`JobProgress`] from the [`SessionStore`], advances it, and writes it
//! back before sleeping again. A process that dies mid-batch resumes with
//! the same attempt counters, and jobs that already reached a terminal
//! state return their stored outcome without another request.
//!
//! ## Errors during a tick
//!
//! * transient ([`ClientError::is_transient`]): counted as an attempt,
//!   state unchanged, polling continues;
//! * [`ClientError::Auth`]: progress is saved and the error returned, so
//!   the batch can be resumed after logging in again;
//! * anything else from the backend: the job ends as `Failure` with that
//!   message. Siblings are unaffected.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::BackendGateway;
use crate::job::{BatchOutcome, EngineState, JobOutcome, JobRef, JobResult, JobStatus};
use crate::store::{JobProgress, SessionStore};
use crate::stream::poll_stream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcomes of a polled batch, in submission order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<JobOutcome>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    /// `(succeeded, failed)`; timeouts count as failed.
    pub fn counts(&self) -> (usize, usize) {
        let ok = self.outcomes.iter().filter(|o| o.is_success()).count();
        (ok, self.outcomes.len() - ok)
    }
}

/// Polls jobs through a [`BackendGateway`], persisting progress in a
/// [`SessionStore`]. Cheap to clone.
#[derive(Clone)]
pub struct PollingEngine {
    gateway: Arc<dyn BackendGateway>,
    store: Arc<SessionStore>,
    config: ClientConfig,
}

impl PollingEngine {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        store: Arc<SessionStore>,
        config: ClientConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Drive one job until it is terminal, cancelled, or the session's
    /// credentials are rejected.
    pub async fn poll_job(
        &self,
        job: JobRef,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, ClientError> {
        let ceiling = self.config.max_attempts(job.kind);
        let interval = self.config.poll_interval();

        loop {
            let mut progress = self
                .store
                .job_progress(&job.id)
                .unwrap_or_else(|| JobProgress::new(job.clone()));

            if let Some(outcome) = progress.outcome.clone() {
                debug!("{}: already terminal ({})", job, outcome.state());
                self.notify_terminal(&outcome);
                return Ok(outcome);
            }

            if progress.attempts >= ceiling {
                let reason = format!(
                    "no terminal state after {} polling attempts (last: {})",
                    progress.attempts, progress.state
                );
                return self.finish(progress, JobResult::TimedOut { reason });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish(progress, JobResult::TimedOut { reason: "cancelled".into() });
                }
                _ = tokio::time::sleep(interval) => {}
            }

            progress.attempts += 1;
            let attempt = progress.attempts;

            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish(progress, JobResult::TimedOut { reason: "cancelled".into() });
                }
                r = self.gateway.poll_status(&progress.job) => r,
            };

            match observed {
                Ok(JobStatus::Success(payload)) => {
                    return self.finish(progress, JobResult::Succeeded { payload });
                }
                Ok(JobStatus::Failure(reason)) => {
                    return self.finish(progress, JobResult::Failed { reason });
                }
                Ok(JobStatus::Unknown(raw)) => {
                    debug!("{}: unrecognised status '{}'", job, raw);
                    progress.state = EngineState::Unknown;
                    progress.last_unknown = Some(raw);
                }
                Ok(status) => {
                    progress.state = status.state();
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "{}: attempt {}/{} failed, will retry: {}",
                        job, attempt, ceiling, e
                    );
                }
                Err(e @ ClientError::Auth { .. }) => {
                    self.store.save_progress(progress)?;
                    error!("{}: credentials rejected, polling stopped", job);
                    return Err(e);
                }
                Err(e) => {
                    return self.finish(
                        progress,
                        JobResult::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
            }

            debug!("{}: attempt {}/{} → {}", job, attempt, ceiling, progress.state);
            if let Some(cb) = &self.config.progress_callback {
                cb.on_tick(&job.id, attempt, ceiling, progress.state);
            }
            self.store.save_progress(progress)?;
        }
    }

    /// Record a terminal result, log it, and notify the callback.
    fn finish(
        &self,
        mut progress: JobProgress,
        result: JobResult,
    ) -> Result<JobOutcome, ClientError> {
        let outcome = JobOutcome {
            job: progress.job.clone(),
            attempts: progress.attempts,
            result,
        };
        progress.state = outcome.state();
        progress.outcome = Some(outcome.clone());
        self.store.save_progress(progress)?;

        let job = &outcome.job;
        match &outcome.result {
            JobResult::Succeeded { payload } => info!(
                "{}: SUCCESS after {} attempt(s) ({} payload)",
                job,
                outcome.attempts,
                payload.kind_name()
            ),
            JobResult::Failed { reason } => {
                error!("{}: FAILURE after {} attempt(s): {}", job, outcome.attempts, reason)
            }
            JobResult::TimedOut { reason } => warn!("{}: TIMED OUT: {}", job, reason),
        }
        self.notify_terminal(&outcome);
        Ok(outcome)
    }

    /// Tell the progress callback that a job is terminal.
    fn notify_terminal(&self, outcome: &JobOutcome) {
        let Some(cb) = &self.config.progress_callback else {
            return;
        };
        let id = &outcome.job.id;
        match &outcome.result {
            JobResult::Succeeded { .. } => {
                let ceiling = self.config.max_attempts(outcome.job.kind);
                cb.on_tick(id, outcome.attempts, ceiling, EngineState::Success);
                cb.on_job_complete(id, outcome.attempts);
            }
            JobResult::Failed { reason } | JobResult::TimedOut { reason } => {
                cb.on_job_error(id, reason);
            }
        }
    }

    /// Poll every job concurrently and join the results.
    ///
    /// Returns only once all jobs are terminal. An `Auth` error from any job
    /// is returned in preference to other errors.
    pub async fn poll_batch(
        &self,
        jobs: Vec<JobRef>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ClientError> {
        let total = jobs.len();
        let order: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id.clone(), i))
            .collect();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let mut stream = poll_stream(self.clone(), jobs, cancel.clone());
        let mut outcomes = Vec::with_capacity(total);
        let mut failure: Option<ClientError> = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let replace = match &failure {
                        None => true,
                        Some(ClientError::Auth { .. }) => false,
                        Some(_) => matches!(e, ClientError::Auth { .. }),
                    };
                    if replace {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        outcomes.sort_by_key(|o| order.get(&o.job.id).copied().unwrap_or(usize::MAX));
        let outcome = BatchOutcome::from_outcomes(&outcomes);
        let report = BatchReport { outcomes, outcome };
        let (ok, bad) = report.counts();
        info!("Batch finished: {} ({} succeeded, {} failed)", report.outcome, ok, bad);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_complete(total, ok);
        }
        Ok(report)
    }
}
