use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::authorization::CodePolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Limits of the code challenge workflow
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Hard cutoff from creation, never extended
    pub request_ttl_secs: i64,
    /// Audit retention of a validated code's proof
    pub code_retention_secs: i64,
    pub max_failed_attempts: u32,
    /// Code labels in challenge order
    pub code_sequence: Vec<String>,
    pub description_max_len: usize,
    /// Re-reads allowed when a concurrent writer bumps the version
    pub max_cas_retries: usize,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            request_ttl_secs: 24 * 60 * 60,
            code_retention_secs: 6 * 60 * 60,
            max_failed_attempts: 3,
            code_sequence: vec!["SMS code".to_string(), "Email code".to_string()],
            description_max_len: 500,
            max_cas_retries: 8,
        }
    }
}

impl AuthorizationConfig {
    pub fn request_ttl(&self) -> Duration {
        Duration::seconds(self.request_ttl_secs)
    }

    pub fn code_policy(&self) -> CodePolicy {
        CodePolicy {
            max_failed_attempts: self.max_failed_attempts,
            code_retention: Duration::seconds(self.code_retention_secs),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// How long expired or cancelled requests are kept before deletion
    pub purge_after_secs: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 500,
            purge_after_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl SweepConfig {
    pub fn purge_after(&self) -> Duration {
        Duration::seconds(self.purge_after_secs)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.authorization.code_sequence.is_empty() {
            anyhow::bail!("authorization.code_sequence must not be empty");
        }
        if config.authorization.max_failed_attempts == 0 {
            anyhow::bail!("authorization.max_failed_attempts must be at least 1");
        }
        Ok(config)
    }
}
