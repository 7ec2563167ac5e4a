//! Gateway connection settings and URL building.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for connecting to the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Base URL of the gateway (e.g., "https://gateway.example.com/api")
    pub base_url: String,

    /// API version segment inserted between the base URL and every path
    #[serde(default = "default_version")]
    pub version: String,

    /// Whole-request timeout, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Directory downloaded files are saved into
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl GatewayConfig {
    /// Create a config for the given gateway URL with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            version: default_version(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            download_dir: default_download_dir(),
            user_agent: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the URL and version, returning a normalized copy.
    pub fn validate(&self) -> Result<Self, ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidUrl("URL cannot be empty".into()));
        }

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        let version = self.version.trim().trim_matches('/').to_string();
        if version.is_empty() || version.contains('/') {
            return Err(ConfigError::InvalidVersion(self.version.clone()));
        }

        Ok(Self {
            base_url,
            version,
            ..self.clone()
        })
    }

    /// Build the full URL for an API path: `base/version/path`.
    ///
    /// Absolute `http(s)://` paths are returned untouched.
    pub fn build_api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        let version = self.version.trim_matches('/');
        let versioned = if version.is_empty() {
            join_url("", path)
        } else {
            join_url(version, path)
        };
        join_url(&self.base_url, &versioned)
    }
}

/// Join two URL fragments with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    let prefix = base.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    match (prefix.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, suffix),
    }
}
