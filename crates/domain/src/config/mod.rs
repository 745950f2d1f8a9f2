mod assets;
mod normalizer;
mod server;
mod services;
mod streaming;

pub use assets::*;
pub use normalizer::*;
pub use server::*;
pub use services::*;
pub use streaming::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub agent: AgentServiceConfig,
    #[serde(default)]
    pub tts: TtsServiceConfig,
    #[serde(default)]
    pub vlm: VlmServiceConfig,
    #[serde(default)]
    pub stm: StmServiceConfig,
    #[serde(default)]
    pub ltm: LtmServiceConfig,
}

impl Config {
    /// Load the config from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate the configuration, returning all issues found.
    ///
    /// Errors make the server refuse to start; warnings are logged and
    /// startup continues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.streaming.queue_capacity == 0 {
            issues.push(ConfigIssue::error(
                "streaming.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        if self.streaming.min_chunk_len == 0 {
            issues.push(ConfigIssue::warning(
                "streaming.min_chunk_len",
                "a minimum chunk length of 0 will emit every fragment verbatim",
            ));
        }
        if self.streaming.interrupt_wait_timeout_ms == 0 {
            issues.push(ConfigIssue::error(
                "streaming.interrupt_wait_timeout_ms",
                "the interrupt wait timeout must be non-zero",
            ));
        }
        if self.streaming.ping_interval_secs == 0 {
            issues.push(ConfigIssue::error(
                "streaming.ping_interval_secs",
                "the heartbeat interval must be non-zero",
            ));
        }

        for (idx, rule) in self.normalizer.rules.iter().enumerate() {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                issues.push(ConfigIssue::error(
                    &format!("normalizer.rules[{idx}].pattern"),
                    &format!("invalid regex: {e}"),
                ));
            }
        }

        for (field, dir) in [
            ("assets.backgrounds_dir", &self.assets.backgrounds_dir),
            ("assets.avatar_configs_dir", &self.assets.avatar_configs_dir),
        ] {
            if !Path::new(dir).is_dir() {
                issues.push(ConfigIssue::warning(
                    field,
                    &format!("directory {dir} does not exist; listings will be empty"),
                ));
            }
        }

        if self.agent.base_url.is_empty() {
            issues.push(ConfigIssue::error(
                "agent.base_url",
                "the agent engine URL is required",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
