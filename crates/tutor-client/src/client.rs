use std::time::Duration;

use reqwest::header::ACCEPT;
use tracing::debug;
use tutor_protocol::AskRequest;

use crate::error::{Error, Result};

pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:3001/api/stream";

const PROXY_URL_VAR: &str = "TUTOR_PROXY_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Full URL of the proxy stream endpoint.
    pub endpoint: String,
    /// Bound on the whole request, body included.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PROXY_URL.into(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `TUTOR_PROXY_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(PROXY_URL_VAR)
            && !url.trim().is_empty()
        {
            config.endpoint = url.trim().to_string();
        }
        config
    }
}

/// HTTP transport to the proxy.
#[derive(Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ProxyClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` and return the response once its headers arrive.
    ///
    /// A non-success status from the proxy itself is an error; backend
    /// failures arrive later as `error` frames inside a 200 stream.
    pub async fn open(&self, request: &AskRequest) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(&self.config.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(timeout) = self.config.timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(endpoint = %self.config.endpoint, "stream opened");
        Ok(resp)
    }
}
