//! Client settings loaded from `<config_dir>/dsq/config.json`.

use std::path::Path;
use std::{env, fs};

use dsq_types::{DataSourceError, RetryPolicy};
use dsq_util::config_file_path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::{Environment, validate_base_url};
use crate::transport::{Transport, TransportSettings};

/// Overrides the location of the settings document.
pub const CONFIG_PATH_ENV: &str = "DSQ_CONFIG_PATH";
/// Overrides the modern base URL regardless of the settings document.
pub const API_BASE_ENV: &str = "DSQ_API_BASE";

const CONFIG_FILE_NAME: &str = "config.json";

fn default_legacy_tls() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub environment: Environment,
    /// Replaces the environment's modern base URL.
    pub api_base: Option<String>,
    /// Replaces the environment's SOAP endpoint.
    pub legacy_endpoint: Option<String>,
    pub retry: RetryPolicy,
    /// Tolerate servers that still rely on older TLS handshake conventions.
    #[serde(default = "default_legacy_tls")]
    pub legacy_tls: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_base: None,
            legacy_endpoint: None,
            retry: RetryPolicy::default(),
            legacy_tls: default_legacy_tls(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientSettings {
    /// Loads settings from `$DSQ_CONFIG_PATH` or the default config location.
    pub fn load() -> Result<Self, DataSourceError> {
        Self::load_from_path(&config_file_path(CONFIG_PATH_ENV, CONFIG_FILE_NAME))
    }

    /// Loads settings from `path`. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, DataSourceError> {
        let settings = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<ClientSettings>(&text).map_err(|error| {
                DataSourceError::configuration(format!("invalid settings file {}: {}", path.display(), error))
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file not found; using defaults");
                ClientSettings::default()
            }
            Err(error) => {
                return Err(DataSourceError::configuration(format!(
                    "failed to read settings file {}: {}",
                    path.display(),
                    error
                )));
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DataSourceError> {
        self.retry.validate()?;
        if self.timeout_secs == 0 {
            return Err(DataSourceError::configuration("timeout_secs must be greater than zero"));
        }
        if let Some(base) = &self.api_base {
            validate_base_url(base)?;
        }
        if let Some(endpoint) = &self.legacy_endpoint {
            validate_base_url(endpoint)?;
        }
        Ok(())
    }

    /// The modern base URL, honoring `DSQ_API_BASE` first and then
    /// `api_base`. Trailing slashes are trimmed.
    pub fn modern_base_url(&self) -> Result<String, DataSourceError> {
        let base = match env::var(API_BASE_ENV) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => self
                .api_base
                .clone()
                .unwrap_or_else(|| self.environment.modern_base_url().to_string()),
        };
        validate_base_url(&base)?;
        Ok(base.trim_end_matches('/').to_string())
    }

    pub fn legacy_endpoint(&self) -> Result<String, DataSourceError> {
        let endpoint = self
            .legacy_endpoint
            .clone()
            .unwrap_or_else(|| self.environment.legacy_endpoint().to_string());
        validate_base_url(&endpoint)?;
        Ok(endpoint)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            legacy_tls: self.legacy_tls,
            timeout_secs: self.timeout_secs,
        }
    }

    pub fn transport(&self) -> Transport {
        Transport::new(self.transport_settings())
    }
}
