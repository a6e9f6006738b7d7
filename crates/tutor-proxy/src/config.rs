use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3001;

const BACKEND_URL_VAR: &str = "BACKEND_URL";
const PORT_VAR: &str = "PORT";

/// Where the proxy listens and which backend it forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Base address of the tutor backend, without the `/api/ask` path.
    pub backend_url: String,
    pub host: String,
    pub port: u16,
    /// Upper bound for one backend call. `None` leaves it to the transport.
    pub backend_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.into(),
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            backend_timeout: None,
        }
    }
}

impl ProxyConfig {
    /// Defaults overridden by `BACKEND_URL` and `PORT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(BACKEND_URL_VAR)
            && !url.trim().is_empty()
        {
            config.backend_url = url.trim().to_string();
        }
        if let Ok(port) = std::env::var(PORT_VAR) {
            config.port = port.trim().parse().map_err(|_| Error::InvalidEnv {
                name: PORT_VAR,
                value: port,
            })?;
        }
        Ok(config)
    }

    /// Full URL of the backend ask endpoint.
    pub fn ask_url(&self) -> String {
        format!("{}/api/ask", self.backend_url.trim_end_matches('/'))
    }
}
