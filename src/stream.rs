//! Streaming polling API: emit job outcomes as they complete.
//!
//! [`crate::engine::PollingEngine::poll_batch`] returns only once every job
//! is terminal. [`poll_stream`] yields each [`JobOutcome`] the moment its
//! job finishes, so callers can decode and record results while slower jobs
//! are still running. Outcomes arrive in completion order, not submission
//! order.

use crate::engine::PollingEngine;
use crate::error::ClientError;
use crate::job::{JobOutcome, JobRef};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// A boxed stream of job outcomes.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = Result<JobOutcome, ClientError>> + Send>>;

/// Poll `jobs` concurrently (bounded by `max_concurrent_polls`), yielding
/// outcomes in completion order.
///
/// # Example
/// ```rust,no_run
/// use futures::StreamExt;
/// use pdf2xml_client::{poll_stream, PollingEngine, JobRef};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run(engine: PollingEngine, jobs: Vec<JobRef>) {
/// let mut outcomes = poll_stream(engine, jobs, CancellationToken::new());
/// while let Some(item) = outcomes.next().await {
///     match item {
///         Ok(o) if o.is_success() => println!("{} done", o.job.id),
///         Ok(o) => eprintln!("{}: {}", o.job.id, o.failure_reason().unwrap_or_default()),
///         Err(e) => eprintln!("polling stopped: {e}"),
///     }
/// }
/// # }
/// ```
pub fn poll_stream(
    engine: PollingEngine,
    jobs: Vec<JobRef>,
    cancel: CancellationToken,
) -> OutcomeStream {
    let concurrency = engine.config().max_concurrent_polls.max(1);
    let s = stream::iter(jobs.into_iter().map(move |job| {
        let engine = engine.clone();
        let cancel = cancel.clone();
        async move { engine.poll_job(job, &cancel).await }
    }))
    .buffer_unordered(concurrency);
    Box::pin(s)
}
