//! Progress-callback trait for polling events.
//!
//! Inject an [`Arc<dyn PollProgressCallback>`] via
//! [`crate::config::ClientConfigBuilder::progress_callback`] to receive
//! events as the engine polls each job.
//!
//! # Example
//!
//! ```rust
//! use pdf2xml_client::{ClientConfig, PollProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PollProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, job_id: &str, attempts: u32) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("job {job_id} finished after {attempts} polls");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = ClientConfig::builder()
//!     .progress_callback(cb as Arc<dyn PollProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::EngineState;
use std::sync::Arc;

/// Called by the polling engine as jobs progress.
///
/// Jobs of a batch are polled concurrently, so every method may be called
/// from several tasks at once. All methods default to no-ops.
pub trait PollProgressCallback: Send + Sync {
    /// Called once before the first tick of a batch.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called after every status observation.
    ///
    /// # Arguments
    /// * `attempt`:      1-indexed attempt number
    /// * `max_attempts`: ceiling for this job's kind
    /// * `state`:        state after this observation
    fn on_tick(&self, job_id: &str, attempt: u32, max_attempts: u32, state: EngineState) {
        let _ = (job_id, attempt, max_attempts, state);
    }

    /// Called when a job reaches `Success`.
    fn on_job_complete(&self, job_id: &str, attempts: u32) {
        let _ = (job_id, attempts);
    }

    /// Called when a job ends in `Failure` or `TimedOut`.
    fn on_job_error(&self, job_id: &str, reason: &str) {
        let _ = (job_id, reason);
    }

    /// Called once every job of the batch is terminal.
    fn on_batch_complete(&self, total_jobs: usize, success_count: usize) {
        let _ = (total_jobs, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PollProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ClientConfig`].
pub type ProgressCallback = Arc<dyn PollProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        ticks: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl PollProgressCallback for TrackingCallback {
        fn on_tick(&self, _job_id: &str, _attempt: u32, _max: u32, _state: EngineState) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _job_id: &str, _attempts: u32) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_error(&self, _job_id: &str, _reason: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_tick("a", 1, 120, EngineState::Pending);
        cb.on_job_complete("a", 3);
        cb.on_job_error("b", "parse error");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_through_arc_dyn() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_tick("a", 1, 5, EngineState::Started);
        cb.on_tick("a", 2, 5, EngineState::Success);
        cb.on_job_complete("a", 2);
        cb.on_job_error("b", "timed out");

        assert_eq!(tracker.ticks.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
