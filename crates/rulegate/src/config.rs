use std::path::{Path, PathBuf};

use anyhow::Context;
use policy_engine::EngineConfig;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
pub struct PolicyConfig {
    /// Directory holding one `<scope>.yaml` per policy scope.
    #[serde(default = "default_policy_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_scope")]
    pub default_scope: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: default_policy_dir(),
            default_scope: default_scope(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_enabled: default_true(),
            audit_log_path: default_audit_path(),
        }
    }
}

fn default_policy_dir() -> PathBuf {
    PathBuf::from("policies")
}

fn default_scope() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

/// Load configuration from a YAML file.
///
/// A missing file yields the defaults with a warning, so the tool runs
/// without any config written.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
