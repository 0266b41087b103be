//! Process configuration.
//!
//! Layers, lowest first: built-in defaults, an optional TOML file, then
//! environment variables such as `SHUTTLE__QUEUE__BACKEND=sqlite` or
//! `SHUTTLE__DISPATCH__CONCURRENCY=4`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelName, Channels, InvalidChannelName};

pub const ENV_PREFIX: &str = "SHUTTLE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Channel(#[from] InvalidChannelName),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: BackendKind,
    pub database_url: String,
    pub request_channel: String,
    pub response_channel: String,
    pub poll_interval_ms: u64,
    pub visibility_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_url: "sqlite://shuttle.db".to_string(),
            request_channel: "client-queue".to_string(),
            response_channel: "server-queue".to_string(),
            poll_interval_ms: 50,
            visibility_timeout_ms: 30_000,
        }
    }
}

impl QueueConfig {
    pub fn channels(&self) -> Result<Channels, InvalidChannelName> {
        Ok(Channels::new(
            ChannelName::new(self.request_channel.clone())?,
            ChannelName::new(self.response_channel.clone())?,
        ))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ceiling of one consume attempt on the response channel.
    pub consume_timeout_ms: u64,
    /// Ceiling of a whole call.
    pub call_deadline_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            consume_timeout_ms: 2_000,
            call_deadline_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_millis(self.call_deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub consume_timeout_ms: u64,
    pub restart_delay_ms: u64,
    /// 1 dispatches serially; more fans out one task per request.
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            consume_timeout_ms: 1_000,
            restart_delay_ms: 100,
            concurrency: 1,
        }
    }
}

impl DispatchConfig {
    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    pub queue: QueueConfig,
    pub gateway: GatewayConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

impl ShuttleConfig {
    /// Defaults, then `path` (if given and present), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Toml).required(false),
            );
        }
        let config: Self = builder
            .add_source(environment(None))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Same layering with the file and environment given explicitly.
    pub fn from_sources(toml: &str, env: HashMap<String, String>) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(environment(Some(env)))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let channels = self.queue.channels()?;
        if channels.requests == channels.responses {
            return Err(ConfigError::Invalid(format!(
                "request and response channel must differ (both are {})",
                channels.requests
            )));
        }
        if self.queue.backend == BackendKind::Sqlite && self.queue.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "queue.database_url is required for the sqlite backend".into(),
            ));
        }

        let timeouts = [
            ("queue.poll_interval_ms", self.queue.poll_interval_ms),
            ("queue.visibility_timeout_ms", self.queue.visibility_timeout_ms),
            ("gateway.consume_timeout_ms", self.gateway.consume_timeout_ms),
            ("gateway.call_deadline_ms", self.gateway.call_deadline_ms),
            ("dispatch.consume_timeout_ms", self.dispatch.consume_timeout_ms),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
        }
        if self.dispatch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn environment(source: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .source(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = ShuttleConfig::from_sources("", HashMap::new()).unwrap();
        assert_eq!(config, ShuttleConfig::default());
        assert_eq!(config.queue.request_channel, "client-queue");
        assert_eq!(config.gateway.call_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn environment_overrides_file() {
        let toml = r#"
            [queue]
            backend = "sqlite"
            database_url = "sqlite://from-file.db"

            [dispatch]
            concurrency = 2
        "#;
        let env = HashMap::from([
            ("SHUTTLE__DISPATCH__CONCURRENCY".to_string(), "8".to_string()),
            ("SHUTTLE__LOGGING__JSON".to_string(), "true".to_string()),
        ]);

        let config = ShuttleConfig::from_sources(toml, env).unwrap();

        assert_eq!(config.queue.backend, BackendKind::Sqlite);
        assert_eq!(config.queue.database_url, "sqlite://from-file.db");
        assert_eq!(config.dispatch.concurrency, 8);
        assert!(config.logging.json);
    }

    #[rstest]
    #[case::same_channels("[queue]\nresponse_channel = \"client-queue\"")]
    #[case::bad_channel_name("[queue]\nrequest_channel = \"no spaces\"")]
    #[case::zero_deadline("[gateway]\ncall_deadline_ms = 0")]
    #[case::zero_concurrency("[dispatch]\nconcurrency = 0")]
    #[case::sqlite_without_url("[queue]\nbackend = \"sqlite\"\ndatabase_url = \"\"")]
    fn rejects_invalid_settings(#[case] toml: &str) {
        assert!(ShuttleConfig::from_sources(toml, HashMap::new()).is_err());
    }
}
