//! Daemon configuration, loaded from `<project>/.nightfall/config.yaml`.
//!
//! Config *loading* is an external collaborator per the spec (the daemon is
//! handed an already-parsed [`Config`]), but the typed value and its
//! validation still live here so every crate shares one vocabulary for
//! concurrency limits, rework/retry/context ceilings, and log retention.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            task: TaskConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

impl Config {
    /// Load from `<project_root>/.nightfall/config.yaml`, falling back to
    /// defaults when the file does not exist.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = Self::path_for(project_root);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn path_for(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(".nightfall").join("config.yaml")
    }

    /// Sanity-check ranges so a malformed config fails fast at daemon
    /// startup rather than producing confusing orchestrator behavior later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.max_engineers == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max_engineers must be at least 1".into(),
            ));
        }
        if self.task.max_context_tokens == 0 {
            return Err(ConfigError::Invalid(
                "task.max_context_tokens must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            model: None,
            api_key_env: None,
        }
    }
}

fn default_provider_name() -> String {
    "local".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_engineers")]
    pub max_engineers: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_engineers: default_max_engineers(),
        }
    }
}

fn default_max_engineers() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_max_rework_cycles")]
    pub max_rework_cycles: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_rework_cycles: default_max_rework_cycles(),
            max_retries: default_max_retries(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_max_rework_cycles() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    4
}
fn default_max_context_tokens() -> u32 {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_retention")]
    pub retention: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention: default_log_retention(),
        }
    }
}

fn default_log_retention() -> usize {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_engineers_is_invalid() {
        let mut cfg = Config::default();
        cfg.concurrency.max_engineers = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_missing_file_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.concurrency.max_engineers, 3);
    }

    #[test]
    fn round_trips_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".nightfall")).unwrap();
        let path = Config::path_for(dir.path());
        std::fs::write(
            &path,
            "concurrency:\n  max_engineers: 5\ntask:\n  max_rework_cycles: 1\n",
        )
        .unwrap();

        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.concurrency.max_engineers, 5);
        assert_eq!(cfg.task.max_rework_cycles, 1);
        assert_eq!(cfg.task.max_retries, 4); // default still applies
    }
}
