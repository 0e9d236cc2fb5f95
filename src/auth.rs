//! Credential session: the bearer token attached to every backend call.
//!
//! The gateway only needs four things from a session: headers for the next
//! request, whether the session is still usable, a way to refresh after a
//! 401, and a way to drop it when the refresh did not help.
//! [`TokenSession`] implements the backend's login/refresh/verify/logout
//! endpoints; [`StaticToken`] wraps a token obtained elsewhere.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::wire;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Source of the bearer credential.
#[async_trait]
pub trait CredentialSession: Send + Sync {
    /// Current access token, if logged in.
    fn access_token(&self) -> Option<String>;

    /// Whether the session can still be used without logging in again.
    fn is_valid(&self) -> bool;

    /// Obtain a fresh access token. Fails with [`ClientError::Auth`] when
    /// the backend refuses.
    async fn refresh(&self) -> Result<(), ClientError>;

    /// Drop the credential. Subsequent calls go out unauthenticated.
    fn invalidate(&self);

    /// Headers for the next authenticated request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.access_token() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

/// A fixed token. Refresh always fails.
#[derive(Debug)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl CredentialSession for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn is_valid(&self) -> bool {
        self.access_token().is_some()
    }

    async fn refresh(&self) -> Result<(), ClientError> {
        Err(ClientError::Auth {
            detail: "static token cannot be refreshed".into(),
        })
    }

    fn invalidate(&self) {
        if let Ok(mut t) = self.token.write() {
            *t = None;
        }
    }
}

#[derive(Debug, Clone)]
struct Tokens {
    access: String,
    refresh: Option<String>,
    logged_in_at: Instant,
}

/// Session backed by the backend's `/auth/*` endpoints.
pub struct TokenSession {
    client: reqwest::Client,
    base_url: String,
    login_expiration: Duration,
    tokens: RwLock<Option<Tokens>>,
    user: RwLock<Option<Value>>,
}

impl TokenSession {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.backend_url.clone(),
            login_expiration: Duration::from_secs(config.login_expiration_secs),
            tokens: RwLock::new(None),
            user: RwLock::new(None),
        })
    }

    /// Resume from tokens issued earlier. The login clock starts now.
    pub fn with_tokens(self, access: impl Into<String>, refresh: Option<String>) -> Self {
        self.begin(access.into(), refresh);
        self
    }

    /// Start a new login window.
    fn begin(&self, access: String, refresh: Option<String>) {
        if let Ok(mut t) = self.tokens.write() {
            *t = Some(Tokens {
                access,
                refresh,
                logged_in_at: Instant::now(),
            });
        }
    }

    /// Rotate tokens inside the current login window.
    fn store(&self, access: String, refresh: Option<String>) {
        if let Ok(mut t) = self.tokens.write() {
            let previous = t.as_ref();
            let refresh = refresh.or_else(|| previous.and_then(|old| old.refresh.clone()));
            let logged_in_at = previous.map_or_else(Instant::now, |old| old.logged_in_at);
            *t = Some(Tokens {
                access,
                refresh,
                logged_in_at,
            });
        }
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().and_then(|t| t.refresh.clone()))
    }

    /// The `user` object returned by the last login.
    pub fn user(&self) -> Option<Value> {
        self.user.read().ok().and_then(|u| u.clone())
    }

    /// Exchange username and password for a token pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let body = json!({ "username": username, "password": password });
        let text = self.post_json(wire::LOGIN, &body, None).await?;
        let (tokens, user) = wire::parse_tokens(wire::LOGIN, &text)?;
        self.begin(tokens.access_token, tokens.refresh_token);
        if let Ok(mut u) = self.user.write() {
            *u = user;
        }
        info!("Logged in as {}", username);
        Ok(())
    }

    /// Ask the backend whether the current access token is accepted.
    pub async fn verify(&self) -> Result<bool, ClientError> {
        let Some(token) = self.access_token() else {
            return Ok(false);
        };
        match self.post_json(wire::VERIFY, &json!({}), Some(&token)).await {
            Ok(_) => Ok(true),
            Err(ClientError::Auth { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Tell the backend to revoke the token, then forget it locally.
    ///
    /// The local credential is dropped even when the backend call fails.
    pub async fn logout(&self) {
        if let Some(token) = self.access_token() {
            let body = json!({ "refresh_token": self.refresh_token() });
            if let Err(e) = self.post_json(wire::LOGOUT, &body, Some(&token)).await {
                warn!("Logout request failed: {}", e);
            }
        }
        self.invalidate();
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut req = self
            .client
            .post(wire::url(&self.base_url, endpoint))
            .json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| wire::network_error(endpoint, e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| wire::network_error(endpoint, e))?;
        if status.is_success() {
            Ok(text)
        } else if status.is_client_error() {
            Err(ClientError::Auth {
                detail: wire::error_message(&text),
            })
        } else {
            Err(ClientError::Backend {
                status: status.as_u16(),
                message: wire::error_message(&text),
            })
        }
    }
}

#[async_trait]
impl CredentialSession for TokenSession {
    fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|t| t.access.clone()))
    }

    fn is_valid(&self) -> bool {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|t| t.logged_in_at.elapsed() < self.login_expiration))
            .unwrap_or(false)
    }

    async fn refresh(&self) -> Result<(), ClientError> {
        let refresh = self.refresh_token().ok_or_else(|| ClientError::Auth {
            detail: "no refresh token; log in again".into(),
        })?;
        debug!("Refreshing access token");
        let text = self
            .post_json(wire::REFRESH, &json!({ "refresh_token": refresh }), None)
            .await?;
        let (tokens, _) = wire::parse_tokens(wire::REFRESH, &text)?;
        self.store(tokens.access_token, tokens.refresh_token);
        Ok(())
    }

    fn invalidate(&self) {
        if let Ok(mut t) = self.tokens.write() {
            *t = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_headers() {
        let s = StaticToken::new("abc");
        let h = s.headers();
        assert_eq!(h.get(AUTHORIZATION).unwrap(), "Bearer abc");
        s.invalidate();
        assert!(s.headers().is_empty());
        assert!(!s.is_valid());
    }

    #[tokio::test]
    async fn static_token_refresh_is_auth_error() {
        let s = StaticToken::new("abc");
        assert!(matches!(s.refresh().await, Err(ClientError::Auth { .. })));
    }

    #[test]
    fn token_session_expires() {
        let config = ClientConfig::builder()
            .login_expiration_secs(0)
            .build()
            .unwrap();
        let s = TokenSession::new(&config).unwrap().with_tokens("a", None);
        assert_eq!(s.access_token().as_deref(), Some("a"));
        assert!(!s.is_valid());
    }

    #[test]
    fn stored_refresh_token_survives_access_rotation() {
        let s = TokenSession::new(&ClientConfig::default())
            .unwrap()
            .with_tokens("a1", Some("r1".into()));
        let started = s.tokens.read().unwrap().as_ref().unwrap().logged_in_at;
        s.store("a2".into(), None);
        assert_eq!(s.access_token().as_deref(), Some("a2"));
        assert_eq!(
            s.tokens.read().unwrap().as_ref().unwrap().logged_in_at,
            started,
            "a refresh must not extend the login window"
        );
        assert_eq!(s.refresh_token().as_deref(), Some("r1"));
        assert!(s.is_valid());
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let s = TokenSession::new(&ClientConfig::default())
            .unwrap()
            .with_tokens("a", None);
        assert!(matches!(s.refresh().await, Err(ClientError::Auth { .. })));
    }
}
