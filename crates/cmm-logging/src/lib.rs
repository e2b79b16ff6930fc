//! Process-wide logging setup for namespace servers and tools.
//!
//! All crates log through `tracing` macros with structured fields; this
//! crate only builds the subscriber once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("cannot create log appender in {dir:?}: {reason}")]
    Appender { dir: PathBuf, reason: String },

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive (`info`, `cmm_service=debug,info`, ...). `RUST_LOG`
    /// overrides it when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rolling log files; console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// `hourly`, `daily` or `never`.
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "cmm".into()
}

fn default_rotation() -> String {
    "daily".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    fn rotation(&self) -> rolling::Rotation {
        match self.rotation.as_str() {
            "hourly" => rolling::Rotation::HOURLY,
            "never" => rolling::Rotation::NEVER,
            _ => rolling::Rotation::DAILY,
        }
    }
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the process logs.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LogError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<BoxedLayer<_>> = match (config.console_output, config.json_format) {
        (false, _) => None,
        (true, true) => Some(Box::new(fmt::layer().json())),
        (true, false) => Some(Box::new(fmt::layer().with_target(true))),
    };

    let (file_layer, guard): (Option<BoxedLayer<_>>, Option<WorkerGuard>) = match &config.log_dir {
        Some(dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .map_err(|e| LogError::Appender {
                    dir: dir.clone(),
                    reason: e.to_string(),
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer: BoxedLayer<_> = if config.json_format {
                Box::new(fmt::layer().json().with_ansi(false).with_writer(writer))
            } else {
                Box::new(fmt::layer().with_ansi(false).with_writer(writer))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.file_prefix, "cmm");
        assert!(cfg.console_output);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: LogConfig = toml::from_str(r#"level = "debug""#).unwrap();
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.rotation, "daily");
        assert!(!cfg.json_format);
    }

    #[test]
    fn test_rotation_mapping() {
        let mut cfg = LogConfig::default();
        cfg.rotation = "hourly".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::HOURLY);
        cfg.rotation = "bogus".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::DAILY);
    }
}
