use crate::engine_api::{ServerSettings, default_socket_path};
use crate::error::ConfigError;
use crate::monitoring::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which engine the facade talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// The in-process synthetic world.
    #[default]
    Mock,
    /// A real container engine over its socket.
    Docker,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: EngineMode,
    /// Where the mock server listens; `<data_dir>/docker.sock` when unset.
    pub socket_path: Option<PathBuf>,
    /// Real engine socket; local defaults when unset.
    pub docker_host: Option<String>,
    pub api_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Mock,
            socket_path: None,
            docker_host: None,
            api_version: "1.43".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StacksConfig {
    pub dir: PathBuf,
    pub override_file: String,
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("stacks"),
            override_file: "mock.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub poll_interval_ms: u64,
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogsConfig {
    pub follow_interval_ms: u64,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            follow_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Upper bound on concurrent per-container stats requests.
    pub concurrency: usize,
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            interval_ms: 1000,
        }
    }
}

/// Stackmock configuration, read from TOML with every section optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StackmockConfig {
    pub engine: EngineConfig,
    pub stacks: StacksConfig,
    pub events: EventsConfig,
    pub logs: LogsConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

impl StackmockConfig {
    /// Loads `path`, or the default config file when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.display().to_string(),
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::InvalidFormat { reason, .. } => ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.stats.concurrency == 0 {
            return Err(invalid("stats.concurrency", "must be at least 1"));
        }
        if self.events.subscriber_buffer == 0 {
            return Err(invalid("events.subscriber_buffer", "must be at least 1"));
        }
        if self.events.poll_interval_ms == 0 || self.logs.follow_interval_ms == 0 {
            return Err(invalid("interval", "must be greater than zero"));
        }
        let well_formed = self
            .engine
            .api_version
            .split_once('.')
            .is_some_and(|(major, minor)| {
                !major.is_empty()
                    && !minor.is_empty()
                    && major.chars().all(|c| c.is_ascii_digit())
                    && minor.chars().all(|c| c.is_ascii_digit())
            });
        if !well_formed {
            return Err(invalid("engine.api_version", "expected MAJOR.MINOR"));
        }
        if self.stacks.override_file.contains('/') {
            return Err(invalid("stacks.override_file", "must be a bare file name"));
        }
        Ok(())
    }

    /// The mock server socket, falling back to the per-user data dir.
    pub fn socket_path(&self) -> PathBuf {
        self.engine
            .socket_path
            .clone()
            .unwrap_or_else(|| default_socket_path(&data_dir()))
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            api_version: self.engine.api_version.clone(),
            follow_interval: Duration::from_millis(self.logs.follow_interval_ms),
            stats_interval: Duration::from_millis(self.stats.interval_ms),
            poll_interval: Duration::from_millis(self.events.poll_interval_ms),
            subscriber_buffer: self.events.subscriber_buffer,
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stackmock")
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stackmock")
}

fn default_config_path() -> Option<PathBuf> {
    Some(config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StackmockConfig::from_toml("").unwrap();
        assert_eq!(config.engine.mode, EngineMode::Mock);
        assert_eq!(config.engine.api_version, "1.43");
        assert_eq!(config.stacks.override_file, "mock.yaml");
        assert_eq!(config.events.poll_interval_ms, 1000);
        assert_eq!(config.events.subscriber_buffer, 256);
        assert_eq!(config.stats.concurrency, 16);
        assert!(config.validate().is_ok());
        assert!(config.socket_path().ends_with("stackmock/docker.sock"));
    }

    #[test]
    fn test_partial_sections() {
        let config = StackmockConfig::from_toml(
            r#"
[engine]
mode = "docker"
docker_host = "unix:///run/user/1000/docker.sock"

[stacks]
dir = "/srv/stacks"

[logging]
level = "debug"
json = true
"#,
        )
        .unwrap();
        assert_eq!(config.engine.mode, EngineMode::Docker);
        assert_eq!(config.engine.api_version, "1.43");
        assert_eq!(config.stacks.dir, PathBuf::from("/srv/stacks"));
        assert_eq!(config.stacks.override_file, "mock.yaml");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = StackmockConfig::default();
        config.stats.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = StackmockConfig::default();
        config.engine.api_version = "v1".to_string();
        assert!(config.validate().is_err());

        assert!(matches!(
            StackmockConfig::from_toml("[engine]\nmode = \"podman\"\n"),
            Err(ConfigError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[events]\npoll_interval_ms = 250\n").unwrap();
        let config = StackmockConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server_settings().poll_interval, Duration::from_millis(250));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            StackmockConfig::load(Some(&missing)),
            Err(ConfigError::NotFound { .. })
        ));
    }
}
