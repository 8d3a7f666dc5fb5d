//! Runtime configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or
//! no file at all) yields a working setup under the user's data directory.

use crate::source::RawTableProvider;
use crate::sync::{RetryPolicy, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Canonical graph database
    pub graph_db: PathBuf,
    /// Directory holding one raw database per schema
    pub raw_dir: PathBuf,
    pub batch_size: usize,
    /// Attempt ceiling per raw record
    pub max_attempts: u32,
    /// Pause between passes
    pub pass_interval_secs: u64,
    /// Idle time after which a raw schema handle is closed
    pub pool_ttl_secs: u64,
    /// Polling of the downstream write service for visibility
    pub visibility_retry: RetryPolicy,
}

/// `~/.local/share/syncgraph` or the platform equivalent
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("syncgraph")
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            graph_db: data_dir.join("graph.db"),
            raw_dir: data_dir.join("raw"),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: RawTableProvider::DEFAULT_MAX_ATTEMPTS,
            pass_interval_secs: 60,
            pool_ttl_secs: 600,
            visibility_retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml(text: &str) -> ConfigResult<Self> {
        // An empty document deserializes to unit, not to a map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Load `path` if given, otherwise the defaults
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.pool_ttl_secs == 0 {
            return Err(ConfigError::Invalid("pool_ttl_secs must be at least 1".into()));
        }
        if self.visibility_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("visibility_retry.max_attempts must be at least 1".into()));
        }
        if self.visibility_retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "visibility_retry.multiplier must be >= 1.0, got {}",
                self.visibility_retry.multiplier
            )));
        }
        Ok(())
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }

    pub fn pool_ttl(&self) -> Duration {
        Duration::from_secs(self.pool_ttl_secs)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
