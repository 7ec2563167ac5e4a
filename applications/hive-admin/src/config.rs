/// hive-admin configuration
use anyhow::{Context, Result};
use hive_gateway_client::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "hive-admin.toml";

/// Gateway used when neither the file nor the environment names one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_gateway")]
    pub gateway: GatewayConfig,

    /// Where the login session is kept between invocations
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

fn default_gateway() -> GatewayConfig {
    GatewayConfig::new(DEFAULT_BASE_URL)
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".hive-admin/session.json")
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            session_file: default_session_file(),
        }
    }
}

impl AdminConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Override with environment variables (HIVE_GATEWAY__BASE_URL, HIVE_SESSION_FILE)
        let environment = config::Environment::with_prefix("HIVE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);

        Self::load_with(path, environment)
    }

    fn load_with(path: Option<&Path>, environment: config::Environment) -> Result<Self> {
        // A partial [gateway] table from the file or environment still needs a URL
        let mut settings = config::Config::builder()
            .set_default("gateway.base_url", DEFAULT_BASE_URL)
            .context("Failed to register configuration defaults")?;

        match path {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    settings = settings.add_source(config::File::from(default_path));
                }
            }
        }

        settings = settings.add_source(environment);

        let config = settings.build().context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.gateway
            .validate()
            .context("Invalid gateway settings")?;

        if self.session_file.as_os_str().is_empty() {
            anyhow::bail!("session_file must not be empty");
        }

        Ok(())
    }
}
