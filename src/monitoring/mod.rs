//! Logging initialisation.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
    /// Also write JSON logs to a daily-rolled file in this directory.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Installs the global subscriber. Keep the returned guard alive for as
    /// long as file logging should flush.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let (file_layer, guard) = match &self.file_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, "stackmock.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let registry = Registry::default().with(self.env_filter()).with(file_layer);
        if self.json {
            registry
                .with(fmt::layer().json().flatten_event(true).with_writer(io::stderr))
                .try_init()?;
        } else {
            registry
                .with(fmt::layer().with_target(false).compact().with_writer(io::stderr))
                .try_init()?;
        }
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.file_dir.is_none());
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [directive".to_string(),
            ..LoggingConfig::default()
        };
        // constructing the filter must not panic
        let _ = config.env_filter();
    }
}
