// HTTP client seam for snode RPC, seed bootstrap and onion entry
//
// Every call exchanges JSON. Connection failures and timeouts are kept apart
// from HTTP-level rejections so callers can attribute blame correctly.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("Unreachable: {0}")]
    Unreachable(String),
    #[error("HTTP request failed with status code {code}")]
    Status { code: u16, body: Option<Value> },
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Client setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request and parse the JSON response body.
    ///
    /// A non-2xx status yields `HttpError::Status` carrying the body if it was JSON.
    async fn execute(&self, verb: Verb, url: &str, body: Option<Value>) -> Result<Value, HttpError>;
}

/// `reqwest` backed client
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client with a fixed per-request timeout.
    ///
    /// Storage nodes serve self-signed certificates, so certificate
    /// validation is disabled; payload confidentiality comes from the onion
    /// layers, not from TLS.
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HttpError::Setup(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(
        &self,
        verb: Verb,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, HttpError> {
        let request = match verb {
            Verb::Get => self.client.get(url),
            Verb::Post => {
                let body = body.ok_or_else(|| HttpError::InvalidJson("missing body".into()))?;
                self.client.post(url).json(&body)
            }
        };

        let response = request.send().await.map_err(|e| {
            debug!("{} request to {} failed: {}", verb.as_str(), url, e);
            HttpError::Unreachable(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HttpError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            debug!(
                "{} request to {} failed with status code {}",
                verb.as_str(),
                url,
                status.as_u16()
            );
            return Err(HttpError::Status {
                code: status.as_u16(),
                body: serde_json::from_str(&text).ok(),
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            debug!("Couldn't parse JSON returned by {} request to {}", verb.as_str(), url);
            HttpError::InvalidJson(e.to_string())
        })
    }
}
