use std::fs;
use std::path::Path;

use postrpc_proto::{ConfigError, ContextId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 250;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Origin of the host context; inbound messages must carry it and
    /// outbound requests are filtered to it.
    pub origin: String,
    /// The host context requests are sent to and responses come from.
    pub parent: ContextId,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

impl ClientConfig {
    pub fn new(origin: impl Into<String>, parent: impl Into<ContextId>) -> Self {
        Self {
            origin: origin.into(),
            parent: parent.into(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = interval_ms;
        self
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)
            .map_err(|err| ConfigError::Parse { message: err.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.trim().is_empty() {
            return Err(ConfigError::invalid("client origin must not be empty"));
        }
        if self.parent.as_str().trim().is_empty() {
            return Err(ConfigError::invalid("client parent context must not be empty"));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::invalid("default_timeout_ms must be greater than zero"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid("sweep_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}
