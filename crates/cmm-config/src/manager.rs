use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;

use crate::{Config, ConfigError};

/// Holds the live configuration; readers get a cheap snapshot, reload swaps
/// in a new value after validation.
pub struct ConfigManager<T: Config> {
    config: ArcSwap<T>,
    path: Option<PathBuf>,
}

impl<T: Config + DeserializeOwned> ConfigManager<T> {
    pub fn new(config: T) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Self::read(path)?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    fn read(path: &Path) -> Result<T, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let value: toml::Value = content.parse()?;
        let config = T::from_toml(&value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn get(&self) -> Arc<T> {
        self.config.load_full()
    }

    pub fn update(&self, new_config: T) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }
}

impl<T: Config + DeserializeOwned + Clone> ConfigManager<T> {
    /// Re-read the backing file and apply its hot-updatable fields.
    /// A manager built with [`ConfigManager::new`] has nothing to reload.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = Self::read(path)?;
        let mut current = (*self.config.load_full()).clone();
        current.hot_update(&fresh);
        current.validate()?;
        self.config.store(Arc::new(current));
        tracing::info!(path = %path.display(), "config reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::io::Write;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Knobs {
        name: String,
        level: u32,
    }

    impl Config for Knobs {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.level > 10 {
                return Err(ConfigError::OutOfRange {
                    key: "level".into(),
                    message: format!("{} > 10", self.level),
                });
            }
            Ok(())
        }

        fn hot_update(&mut self, other: &Self) {
            self.level = other.level;
        }
    }

    fn write_file(file: &mut tempfile::NamedTempFile, text: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        use std::io::Seek;
        f.rewind().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn test_load_and_hot_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_file(&mut file, "name = \"a\"\nlevel = 1\n");
        let mgr = ConfigManager::<Knobs>::load(file.path()).unwrap();
        assert_eq!(mgr.get().level, 1);

        write_file(&mut file, "name = \"b\"\nlevel = 5\n");
        mgr.reload().unwrap();
        let cfg = mgr.get();
        assert_eq!(cfg.level, 5);
        // Only hot-updatable fields change.
        assert_eq!(cfg.name, "a");
    }

    #[test]
    fn test_invalid_update_keeps_old_value() {
        let mgr = ConfigManager::new(Knobs {
            name: "x".into(),
            level: 2,
        });
        let bad = Knobs {
            name: "x".into(),
            level: 11,
        };
        assert!(mgr.update(bad).is_err());
        assert_eq!(mgr.get().level, 2);
        mgr.reload().unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigManager::<Knobs>::load("/nonexistent/cmm.toml")
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
