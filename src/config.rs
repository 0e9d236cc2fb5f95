//! Configuration types for the job orchestrator.
//!
//! All client behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. One struct holds every knob (backend location,
//! polling cadence, per-kind ceilings, batch caps, state directory) so a
//! config can be cloned into each concurrent poller.

use crate::error::ClientError;
use crate::job::JobKind;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a client session.
///
/// Built via [`ClientConfig::builder()`] or using [`ClientConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2xml_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .backend_url("https://api.example.com")
///     .poll_interval_ms(2_000)
///     .extraction_max_attempts(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval().as_secs(), 2);
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the extraction backend. Default: `http://localhost:8000`.
    pub backend_url: String,

    /// Delay between two polls of the same job, in milliseconds. Default: 5000.
    ///
    /// Every job waits this long before each status request, including the
    /// first one.
    pub poll_interval_ms: u64,

    /// Polling attempts before an extraction job is declared timed out. Default: 120.
    ///
    /// With the default interval this is ten minutes.
    pub extraction_max_attempts: u32,

    /// Polling attempts before a merge job is declared timed out. Default: 60.
    pub merge_max_attempts: u32,

    /// Polling attempts before a send job is declared timed out. Default: 60.
    pub send_max_attempts: u32,

    /// Maximum files accepted in one conversion batch. Default: 150.
    ///
    /// Larger selections are rejected before any credit check or upload.
    pub max_files_per_batch: usize,

    /// Files per upload request. Default: 150 (one request per batch).
    pub chunk_size: usize,

    /// Number of jobs polled at the same time. Default: 10.
    pub max_concurrent_polls: usize,

    /// Timeout for upload requests in seconds. Default: 300.
    pub upload_timeout_secs: u64,

    /// Timeout for every other request in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Minutes credited to the history per distinct processed file. Default: 3.
    pub time_saved_per_file: u64,

    /// Directory holding `session.json`, `history.json` and `uploads/`. Default: `data`.
    pub state_dir: PathBuf,

    /// Seconds a login stays valid before re-authentication is required. Default: 86400.
    pub login_expiration_secs: u64,

    /// Receives polling events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            poll_interval_ms: 5_000,
            extraction_max_attempts: 120,
            merge_max_attempts: 60,
            send_max_attempts: 60,
            max_files_per_batch: 150,
            chunk_size: 150,
            max_concurrent_polls: 10,
            upload_timeout_secs: 300,
            request_timeout_secs: 30,
            time_saved_per_file: 3,
            state_dir: PathBuf::from("data"),
            login_expiration_secs: 86_400,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("backend_url", &self.backend_url)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("extraction_max_attempts", &self.extraction_max_attempts)
            .field("merge_max_attempts", &self.merge_max_attempts)
            .field("send_max_attempts", &self.send_max_attempts)
            .field("max_files_per_batch", &self.max_files_per_batch)
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrent_polls", &self.max_concurrent_polls)
            .field("state_dir", &self.state_dir)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PollProgressCallback>"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Attempt ceiling for the given job kind.
    pub fn max_attempts(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Extraction => self.extraction_max_attempts,
            JobKind::Merge => self.merge_max_attempts,
            JobKind::Send => self.send_max_attempts,
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.json")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.state_dir.join("uploads")
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn extraction_max_attempts(mut self, n: u32) -> Self {
        self.config.extraction_max_attempts = n.max(1);
        self
    }

    pub fn merge_max_attempts(mut self, n: u32) -> Self {
        self.config.merge_max_attempts = n.max(1);
        self
    }

    pub fn send_max_attempts(mut self, n: u32) -> Self {
        self.config.send_max_attempts = n.max(1);
        self
    }

    pub fn max_files_per_batch(mut self, n: usize) -> Self {
        self.config.max_files_per_batch = n.max(1);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn max_concurrent_polls(mut self, n: usize) -> Self {
        self.config.max_concurrent_polls = n.max(1);
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn time_saved_per_file(mut self, minutes: u64) -> Self {
        self.config.time_saved_per_file = minutes;
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.state_dir = dir.into();
        self
    }

    pub fn login_expiration_secs(mut self, secs: u64) -> Self {
        self.config.login_expiration_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ClientConfig, ClientError> {
        self.config.chunk_size = self.config.chunk_size.min(self.config.max_files_per_batch);
        let c = &self.config;
        let url = c.backend_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "backend URL must start with http:// or https://, got '{}'",
                c.backend_url
            )));
        }
        if c.upload_timeout_secs == 0 || c.request_timeout_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "request timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_limits() {
        let c = ClientConfig::default();
        assert_eq!(c.poll_interval(), Duration::from_secs(5));
        assert_eq!(c.max_attempts(JobKind::Extraction), 120);
        assert_eq!(c.max_attempts(JobKind::Merge), 60);
        assert_eq!(c.max_attempts(JobKind::Send), 60);
        assert_eq!(c.max_files_per_batch, 150);
        assert_eq!(c.time_saved_per_file, 3);
    }

    #[test]
    fn builder_clamps_ceilings_to_one() {
        let c = ClientConfig::builder()
            .extraction_max_attempts(0)
            .max_concurrent_polls(0)
            .build()
            .unwrap();
        assert_eq!(c.extraction_max_attempts, 1);
        assert_eq!(c.max_concurrent_polls, 1);
    }

    #[test]
    fn builder_rejects_bad_url() {
        let err = ClientConfig::builder()
            .backend_url("localhost:8000")
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn chunk_size_never_exceeds_batch_cap() {
        let c = ClientConfig::builder()
            .max_files_per_batch(10)
            .chunk_size(20)
            .build()
            .unwrap();
        assert_eq!(c.chunk_size, 10);
    }

    #[test]
    fn state_paths_live_under_state_dir() {
        let c = ClientConfig::builder().state_dir("/tmp/x").build().unwrap();
        assert_eq!(c.session_path(), PathBuf::from("/tmp/x/session.json"));
        assert_eq!(c.history_path(), PathBuf::from("/tmp/x/history.json"));
        assert_eq!(c.upload_dir(), PathBuf::from("/tmp/x/uploads"));
    }

    #[test]
    fn debug_hides_callback() {
        let c = ClientConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("progress_callback: None"));
    }
}
