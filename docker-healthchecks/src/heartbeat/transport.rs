//! Outbound heartbeat requests.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

/// Network-level failure of a heartbeat request.
///
/// An endpoint that answers with an error status is not a transport error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        // reqwest's Display omits the underlying cause.
        let cause = std::error::Error::source(&err)
            .map(|source| format!(": {source}"))
            .unwrap_or_default();
        Self::new(format!("{kind}: {err}{cause}"))
    }
}

/// Sends a single heartbeat request and reports the HTTP status code.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<u16, TransportError>;
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HeartbeatTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<u16, TransportError> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}
