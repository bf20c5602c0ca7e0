//! Hostman REST transport.
//!
//! Unique responsibility: perform one authenticated request/response exchange.
//!
//! API root:
//! - <https://hostman.com/api/v1>
//! - Header: Authorization: Bearer <token>
//! - Header: Content-Type: application/json
//!
//! Non-2xx responses become [`ReconcileError::Api`] with the status code and
//! the raw body. There is no retry here: the only waiting the engine does is
//! the readiness/deletion polling of the reconcilers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use tracing::debug;

pub use reqwest::Method;

use crate::hostman_config::EngineConfig;
use crate::hostman_error::{ReconcileError, Result};

/// One request/response exchange against the provider API.
///
/// `path` is relative to the API root (for example `/servers/42`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and return the raw response body.
    ///
    /// # Errors
    ///
    /// Returns `Api` for a status >= 400, `Http` for network failures and
    /// `Encode` if `body` cannot be serialized.
    async fn execute(&self, method: Method, path: &str, token: &str, body: Option<&Value>) -> Result<Vec<u8>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    user_agent: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a new transport for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration, user_agent: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReconcileError::Http)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
            http,
        })
    }

    /// Create a transport from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        Self::new(&cfg.api_url, Duration::from_millis(cfg.timeout_ms), &cfg.user_agent)
    }

    /// Build the absolute URL of an API path.
    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, method: Method, path: &str, token: &str, body: Option<&Value>) -> Result<Vec<u8>> {
        let mut req = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.user_agent);

        if let Some(body) = body {
            req = req.body(serde_json::to_vec(body).map_err(ReconcileError::Encode)?);
        }

        let resp = req.send().await.map_err(ReconcileError::Http)?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "hostman api call");

        if status.as_u16() >= 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ReconcileError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(resp.bytes().await.map_err(ReconcileError::Http)?.to_vec())
    }
}
