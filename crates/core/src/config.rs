//! Configuration management
//!
//! Settings live in `config.toml` under `$XFER_CONFIG_DIR`, falling back to
//! the platform config directory (`~/.config/xfer` on Linux). A missing file
//! means defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capability::IfExists;
use crate::credentials::Environment;
use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::locator::Scheme;
use crate::retry::RetryConfig;

/// Environment variable that overrides the config directory
pub const CONFIG_DIR_ENV: &str = "XFER_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "xfer";

/// Transfer defaults, overridable per run from the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub concurrency: usize,
    pub if_exists: IfExists,
    pub retry: RetryConfig,
    pub stream_threshold_bytes: u64,
    pub chunk_size_bytes: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        Self {
            concurrency: 4,
            if_exists: IfExists::default(),
            retry: executor.retry,
            stream_threshold_bytes: executor.stream_threshold,
            chunk_size_bytes: executor.chunk_size,
        }
    }
}

impl TransferSettings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry: self.retry.clone(),
            stream_threshold: self.stream_threshold_bytes,
            chunk_size: self.chunk_size_bytes,
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferSettings,
    /// Credential values per backend, e.g. `[credentials.s3]`
    pub credentials: BTreeMap<String, BTreeMap<String, String>>,
}

impl Config {
    /// Overrides to hand the credential resolver for `backend`
    pub fn credential_overrides(&self, backend: Scheme) -> HashMap<String, String> {
        self.credentials
            .get(backend.as_str())
            .map(|fields| {
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size_bytes == 0 {
            return Err(Error::Config("transfer.chunk_size_bytes must be positive".into()));
        }
        if self.transfer.retry.max_attempts == 0 {
            return Err(Error::Config("transfer.retry.max_attempts must be at least 1".into()));
        }
        for backend in self.credentials.keys() {
            if !Scheme::ALL.iter().any(|s| s.as_str() == backend) {
                return Err(Error::Config(format!(
                    "unknown backend '{backend}' in [credentials]"
                )));
            }
        }
        Ok(())
    }
}

/// Locates and loads the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Use `$XFER_CONFIG_DIR` from `env`, or the platform config directory
    pub fn new(env: &Environment) -> Result<Self> {
        let dir = match env.get(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join(APP_DIR),
        };
        Ok(Self::with_dir(dir))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: dir.into().join(CONFIG_FILE),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, or defaults when the file does not exist
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.config_path.display(), "No config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %self.config_path.display(), "Loaded config");
        Ok(config)
    }
}
