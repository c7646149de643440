//! Module: config
//! Responsibility: runtime configuration loaded from TOML.
//! Does not own: how the settings are applied; lock, schema and query
//! subsystems read the sections they care about.

use crate::error::{ErrorClass, ErrorOrigin, InternalError};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorClass::Usage, ErrorOrigin::Config, err.to_string())
    }
}

///
/// Config
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub lock: LockConfig,
    pub schema: SchemaConfig,
    pub query: QueryConfig,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;

        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.stale_after_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.stale_after_ms must be greater than zero".to_string(),
            ));
        }
        if self.lock.backoff_unit_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.backoff_unit_ms must be greater than zero".to_string(),
            ));
        }
        if self.query.default_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "query.default_limit must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }
}

///
/// LockConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Directory holding lock markers; `None` keeps markers in process memory.
    pub directory: Option<PathBuf>,
    /// Lease length after which a marker may be broken.
    pub stale_after_ms: u64,
    /// Upper bound for a blocking acquire.
    pub max_wait_ms: u64,
    /// Backoff sleeps are 1-3 of these units.
    pub backoff_unit_ms: u64,
}

impl LockConfig {
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    #[must_use]
    pub const fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            directory: None,
            stale_after_ms: 600_000,
            max_wait_ms: 30_000,
            backoff_unit_ms: 1_000,
        }
    }
}

///
/// SchemaConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    /// Permit dropping and recreating a table when its primary key changes.
    pub allow_table_rebuild: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            allow_table_rebuild: true,
        }
    }
}

///
/// QueryConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Limit applied to filters that do not set one.
    pub default_limit: Option<usize>,
}
