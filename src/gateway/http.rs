//! reqwest implementation of [`BackendGateway`].
//!
//! ## 401 handling
//!
//! Every authenticated request goes through [`HttpGateway::authorized`].
//! A session whose login window has closed is refused before anything is
//! sent. Otherwise the request is built, sent with the session's bearer
//! header, and on a 401 the session is refreshed once and the request
//! rebuilt and re-sent. A second 401 invalidates the session and surfaces
//! [`ClientError::Auth`].
//! Requests are rebuilt rather than cloned because multipart bodies cannot
//! be cloned.

use super::wire::{self, SendSubmission, SubmitReceipt};
use super::{BackendGateway, UploadFile};
use crate::auth::CredentialSession;
use crate::config::ClientConfig;
use crate::credit::BalanceSource;
use crate::error::ClientError;
use crate::job::{JobKind, JobRef, JobStatus};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Production gateway speaking HTTP to the extraction backend.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    session: Arc<dyn CredentialSession>,
    upload_timeout: Duration,
}

impl HttpGateway {
    pub fn new(
        config: &ClientConfig,
        session: Arc<dyn CredentialSession>,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.backend_url.clone(),
            session,
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
        })
    }

    /// Direct download URL for a result container.
    pub fn download_url(&self, handle: &str) -> String {
        wire::url(&self.base_url, &wire::download_zip(handle))
    }

    fn endpoint(&self, path: &str) -> String {
        wire::url(&self.base_url, path)
    }

    /// Send an authenticated request, refreshing the credential once on 401.
    async fn authorized<F>(&self, endpoint: &str, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&Client) -> Result<RequestBuilder, ClientError> + Send + Sync,
    {
        if !self.session.is_valid() {
            self.session.invalidate();
            return Err(ClientError::Auth {
                detail: format!("{endpoint}: session expired or not logged in"),
            });
        }

        let first = self.dispatch(endpoint, &build).await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return check_status(first).await;
        }

        warn!("{}: 401 Unauthorized, refreshing credential", endpoint);
        self.session.refresh().await.map_err(|e| match e {
            ClientError::Auth { .. } | ClientError::Network { .. } => e,
            other => ClientError::Auth {
                detail: format!("credential refresh failed: {other}"),
            },
        })?;

        let retry = self.dispatch(endpoint, &build).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            let body = retry.text().await.unwrap_or_default();
            self.session.invalidate();
            return Err(ClientError::Auth {
                detail: format!("{endpoint} still unauthorized after refresh: {}", wire::error_message(&body)),
            });
        }
        check_status(retry).await
    }

    async fn dispatch<F>(&self, endpoint: &str, build: &F) -> Result<Response, ClientError>
    where
        F: Fn(&Client) -> Result<RequestBuilder, ClientError> + Send + Sync,
    {
        build(&self.client)?
            .headers(self.session.headers())
            .send()
            .await
            .map_err(|e| wire::network_error(endpoint, e))
    }

    async fn text(endpoint: &str, resp: Response) -> Result<String, ClientError> {
        resp.text()
            .await
            .map_err(|e| wire::network_error(endpoint, e))
    }
}

/// Turn any non-2xx response into [`ClientError::Backend`].
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Backend {
        status: status.as_u16(),
        message: wire::error_message(&body),
    })
}

fn pdf_part(file: &UploadFile) -> Result<Part, ClientError> {
    Part::bytes(file.bytes.clone())
        .file_name(file.name.clone())
        .mime_str("application/pdf")
        .map_err(|e| ClientError::Internal(format!("multipart: {e}")))
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn submit(&self, files: &[UploadFile]) -> Result<SubmitReceipt, ClientError> {
        let url = self.endpoint(wire::UPLOAD);
        debug!("Uploading {} file(s) to {}", files.len(), url);
        let resp = self
            .authorized(wire::UPLOAD, |c| {
                let mut form = Form::new();
                for f in files {
                    form = form.part("files[]", pdf_part(f)?);
                }
                Ok(c.post(&url).multipart(form).timeout(self.upload_timeout))
            })
            .await?;
        let body = Self::text(wire::UPLOAD, resp).await?;
        wire::parse_submit(&body)
    }

    async fn poll_status(&self, job: &JobRef) -> Result<JobStatus, ClientError> {
        let path = wire::task_status(&job.id);
        let url = self.endpoint(&path);
        let resp = self.authorized(&path, |c| Ok(c.get(&url))).await?;
        let body = Self::text(&path, resp).await?;
        Ok(wire::parse_status(&body))
    }

    async fn fetch_binary(&self, handle: &str) -> Result<Vec<u8>, ClientError> {
        let path = wire::download_zip(handle);
        let url = self.endpoint(&path);
        let resp = self
            .authorized(&path, |c| Ok(c.get(&url).timeout(self.upload_timeout)))
            .await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| wire::network_error(&path, e))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), path);
        Ok(bytes.to_vec())
    }

    async fn submit_merge(
        &self,
        files: &[UploadFile],
        output_filename: &str,
    ) -> Result<JobRef, ClientError> {
        let contents: BTreeMap<&str, String> = files
            .iter()
            .map(|f| (f.name.as_str(), STANDARD.encode(&f.bytes)))
            .collect();
        let body = json!({
            "pdf_contents_base64": contents,
            "output_filename": output_filename,
        });
        let url = self.endpoint(wire::MERGE);
        let resp = self
            .authorized(wire::MERGE, |c| {
                Ok(c.post(&url).json(&body).timeout(self.upload_timeout))
            })
            .await?;
        let text = Self::text(wire::MERGE, resp).await?;
        let id = wire::parse_task_id(wire::MERGE, &text)?;
        Ok(JobRef::new(id, JobKind::Merge))
    }

    async fn submit_send(
        &self,
        file_name: &str,
        content: &str,
    ) -> Result<SendSubmission, ClientError> {
        let body = json!({ "xml_content": content, "file_name": file_name });
        let url = self.endpoint(wire::SEND);
        let resp = self
            .authorized(wire::SEND, |c| Ok(c.post(&url).json(&body)))
            .await?;
        let text = Self::text(wire::SEND, resp).await?;
        wire::parse_send(&text)
    }
}

#[async_trait]
impl BalanceSource for HttpGateway {
    async fn balance(&self) -> Result<u64, ClientError> {
        let url = self.endpoint(wire::BALANCE);
        let resp = self.authorized(wire::BALANCE, |c| Ok(c.get(&url))).await?;
        let body = Self::text(wire::BALANCE, resp).await?;
        wire::parse_balance(&body)
    }
}
