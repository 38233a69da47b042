use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::{AcceptableStatusSet, CachePolicy};
use crate::retry::RetryPolicy;

/// Session-wide settings, loadable from a JSON file.
///
/// Every field has a default, so an empty object `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Statuses that count as success, e.g. `"200-299,304"`.
    pub acceptable_status_codes: AcceptableStatusSet,
    pub timeout_secs: u64,
    pub cache_policy: CachePolicy,
    /// Retries the default session policy allows; 0 disables retrying.
    pub max_retries: u32,
    /// Extra statuses the default policy retries besides 5xx.
    pub retry_on_status: Vec<u16>,
    pub user_agent: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            acceptable_status_codes: AcceptableStatusSet::default(),
            timeout_secs: 60,
            cache_policy: CachePolicy::default(),
            max_retries: 0,
            retry_on_status: Vec::new(),
            user_agent: format!("reqflow/{}", env!("CARGO_PKG_VERSION")),
            cache_dir: dirs::cache_dir().map(|dir| dir.join("reqflow")),
        }
    }
}

impl SessionConfig {
    /// `<config dir>/reqflow/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("reqflow").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {:?}", path))?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values no transport can honour.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1 second");
        }
        Ok(())
    }

    /// Load `path` when given; otherwise the default path if it exists,
    /// falling back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The retry policy a session built from this config starts with.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            RetryPolicy::never()
        } else {
            RetryPolicy::transient_or_status(self.max_retries, self.retry_on_status.clone())
        }
    }
}
