//! lambda.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_str;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LambdaConfig {
    pub dispatcher: DispatcherConfig,
    pub readiness: ReadinessConfig,
    pub load: LoadConfig,
    pub invoke: InvokeConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Idle time after which a pooled instance is reclaimed.
    #[serde(with = "serde_str")]
    pub ttl: Duration,
    /// Image every new instance is created from.
    pub image: String,
    /// Shared network created at startup and removed at shutdown.
    pub network: String,
    /// Port the runner listens on inside the instance.
    pub service_port: u16,
    /// Delay between idle sweeps.
    #[serde(with = "serde_str")]
    pub sweep_interval: Duration,
    /// Upper bound on any single container runtime call (create, inspect,
    /// remove). Creation includes pulling a missing image.
    #[serde(with = "serde_str")]
    pub runtime_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            image: "lambda-runner:latest".to_string(),
            network: "lambda_net".to_string(),
            service_port: 8080,
            sweep_interval: Duration::from_secs(1),
            runtime_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Total budget for an instance to become reachable.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
    /// Pause between readiness checks.
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    /// Per-probe timeout against the runner's health endpoint.
    #[serde(with = "serde_str")]
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

/// `[load]`: retries around installing code into a fresh instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    #[serde(with = "serde_str")]
    pub delay: Duration,
    /// Per-attempt timeout.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// `[invoke]`: retries around calling the loaded entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    #[serde(with = "serde_str")]
    pub delay: Duration,
    /// Per-attempt timeout.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Idle time after which a runner exits on its own. Zero disables.
    #[serde(with = "serde_str")]
    pub idle_ttl: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60),
        }
    }
}

impl RunnerConfig {
    /// Environment passed to every instance.
    ///
    /// The runner takes whole seconds, where `0` disables its idle monitor,
    /// so a non-zero sub-second TTL is sent as `1`.
    pub fn instance_env(&self) -> Vec<(String, String)> {
        let secs = match self.idle_ttl.as_secs() {
            0 if !self.idle_ttl.is_zero() => 1,
            secs => secs,
        };
        vec![("RUNNER_IDLE_TTL".to_string(), secs.to_string())]
    }
}

impl LambdaConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LambdaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load.attempts == 0 {
            return Err(ConfigError::Invalid("load.attempts must be at least 1".into()));
        }
        if self.invoke.attempts == 0 {
            return Err(ConfigError::Invalid("invoke.attempts must be at least 1".into()));
        }
        if self.dispatcher.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "dispatcher.sweep_interval must be non-zero".into(),
            ));
        }
        if self.dispatcher.runtime_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "dispatcher.runtime_timeout must be non-zero".into(),
            ));
        }
        if self.dispatcher.image.is_empty() {
            return Err(ConfigError::Invalid("dispatcher.image must be set".into()));
        }
        Ok(())
    }
}
