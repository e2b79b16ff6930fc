//! TOML-backed configuration with validation and hot update.

pub mod manager;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use manager::ConfigManager;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("type mismatch for key '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: String },

    #[error("value out of range for key '{key}': {message}")]
    OutOfRange { key: String, message: String },

    #[error("invalid value for key '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// A configuration section.
///
/// The provided methods cover serde-shaped configs: parse from a TOML value,
/// render back to TOML text. `validate` checks cross-field constraints;
/// `hot_update` copies the fields that may change on a running process.
pub trait Config: Sized + Send + Sync + 'static {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>
    where
        Self: DeserializeOwned,
    {
        Ok(value.clone().try_into()?)
    }

    fn render(&self) -> Result<String, ConfigError>
    where
        Self: Serialize,
    {
        Ok(toml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn hot_update(&mut self, _other: &Self) {}
}

/// Serde helper that stores `Duration` as floating-point seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
