//! Configuration for Ferry hosts.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! usable configuration. Values are normalized after parsing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Any valid module exporting linear memory requires at least 1 page (64KiB).
pub const MIN_MEMORY_BYTES: u64 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep the message but not the source snippet `Display` would include.
        ConfigError::Toml(err.message().to_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    #[serde(default)]
    pub guest: GuestConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FerryConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::load_from_str(&text)?;

        // Relative module paths are resolved against the config file's directory.
        if let (Some(module), Some(dir)) = (config.guest.module.as_mut(), path.parent()) {
            if module.is_relative() {
                *module = dir.join(&*module);
                tracing::debug!(
                    config = %path.display(),
                    module = %module.display(),
                    "resolved relative guest module path"
                );
            }
        }
        Ok(config)
    }

    /// Load a config from a TOML string.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: FerryConfig = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.guest.normalize();
        self.driver.normalize();
        self.gateway.normalize();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuestConfig {
    /// Path of the guest `.wasm` module.
    #[serde(default)]
    pub module: Option<PathBuf>,
    /// Optional upper bound for guest linear memory (in bytes).
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
}

impl GuestConfig {
    fn normalize(&mut self) {
        if self
            .module
            .as_ref()
            .is_some_and(|module| module.as_os_str().is_empty())
        {
            self.module = None;
        }

        if let Some(limit) = self.max_memory_bytes.as_mut() {
            if *limit < MIN_MEMORY_BYTES {
                *limit = MIN_MEMORY_BYTES;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Maximum number of `invoke` calls made for one request before giving up
    /// on a guest that keeps reporting pending tasks.
    #[serde(default = "DriverConfig::default_max_invoke_rounds")]
    pub max_invoke_rounds: u32,
    /// Timeout applied to each outbound HTTP task (in milliseconds).
    #[serde(default = "DriverConfig::default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl DriverConfig {
    fn default_max_invoke_rounds() -> u32 {
        3
    }

    fn default_fetch_timeout_ms() -> u64 {
        30_000
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    fn normalize(&mut self) {
        if self.max_invoke_rounds == 0 {
            self.max_invoke_rounds = 1;
        }
        if self.fetch_timeout_ms == 0 {
            self.fetch_timeout_ms = 1;
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_invoke_rounds: Self::default_max_invoke_rounds(),
            fetch_timeout_ms: Self::default_fetch_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Only requests for this origin are routed to the guest. When unset, every
    /// origin is accepted.
    #[serde(default)]
    pub origin: Option<Url>,
    /// Path prefix served by the guest; everything else passes through.
    #[serde(default = "GatewayConfig::default_app_prefix")]
    pub app_prefix: String,
}

impl GatewayConfig {
    fn default_app_prefix() -> String {
        "/app".to_owned()
    }

    fn normalize(&mut self) {
        let trimmed = self.app_prefix.trim().trim_end_matches('/');
        self.app_prefix = if trimmed.is_empty() {
            "/".to_owned()
        } else if trimmed.starts_with('/') {
            trimmed.to_owned()
        } else {
            format!("/{trimmed}")
        };
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: None,
            app_prefix: Self::default_app_prefix(),
        }
    }
}
