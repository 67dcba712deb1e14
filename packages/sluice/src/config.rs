//! Runtime configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};


/// Error for loading configuration or building a runtime from it
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The file that was being read
        path: PathBuf,
        /// Why it could not be read
        source: io::Error,
    },
    /// The config text is not valid TOML for this config
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The config parsed, but holds a value that is not allowed
    #[error("invalid config: {0}")]
    Invalid(String),
    /// The tokio runtime could not be built
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// Configuration for an [`Orchestrator`](crate::runtime::Orchestrator)
///
/// Every field has a default, so an empty file is a valid config. Unknown keys are rejected.
///
/// ```toml
/// worker_threads = 4
/// thread_name = "orchestrator"
/// channel_capacity = 32
/// collect_deadline_ms = 5000
/// race_deadline_ms = 2000
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of runtime worker threads. Defaults to the number of CPU cores.
    pub worker_threads: Option<usize>,
    /// Name given to runtime worker threads
    pub thread_name: String,
    /// Capacity of channels created by the orchestrator, including pipeline channels
    pub channel_capacity: usize,
    /// Deadline for collecting all results, in milliseconds. No deadline if absent.
    pub collect_deadline_ms: Option<u64>,
    /// Deadline for racing tasks, in milliseconds. No deadline if absent.
    pub race_deadline_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: None,
            thread_name: "sluice-worker".to_owned(),
            channel_capacity: 16,
            collect_deadline_ms: None,
            race_deadline_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading runtime config");
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        Self::from_toml_str(&text)
    }

    /// Check for values which parse but are not allowed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }

    /// The collect deadline, if any
    pub fn collect_deadline(&self) -> Option<Duration> {
        self.collect_deadline_ms.map(Duration::from_millis)
    }

    /// The race deadline, if any
    pub fn race_deadline(&self) -> Option<Duration> {
        self.race_deadline_ms.map(Duration::from_millis)
    }

    /// Build a multi-threaded tokio runtime as configured
    pub fn build_runtime(&self) -> Result<Runtime, ConfigError> {
        self.validate()?;
        let mut builder = Builder::new_multi_thread();
        if let Some(worker_threads) = self.worker_threads {
            builder.worker_threads(worker_threads);
        }
        builder
            .thread_name(self.thread_name.clone())
            .enable_time()
            .build()
            .map_err(ConfigError::Runtime)
    }
}
