//! Namespace manager and server configuration.

use std::collections::HashSet;
use std::time::Duration;

use cmm_config::{duration_secs, Config, ConfigError};
use cmm_fld::FldConfig;
use cmm_logging::LogConfig;
use cmm_proto::LockWait;
use serde::{Deserialize, Serialize};

/// Where new directories are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirPlacement {
    /// On the parent's target, like every other object.
    #[default]
    Parent,
    /// Cycle through the registered targets.
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockWaitMode {
    #[default]
    Block,
    NoWait,
    /// Give up after `lock_timeout`.
    Timeout,
}

/// Retry settings for target calls that are eligible for a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total tries including the first one.
    pub max_attempts: u32,

    #[serde(with = "duration_secs")]
    pub init_wait: Duration,

    #[serde(with = "duration_secs")]
    pub max_wait: Duration,

    #[serde(with = "duration_secs")]
    pub total_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            init_wait: Duration::from_millis(50),
            max_wait: Duration::from_secs(2),
            total_time: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub max_name_len: usize,
    pub max_symlink_len: usize,
    pub umask: u32,
    pub dir_placement: DirPlacement,
    pub lock_wait: LockWaitMode,
    #[serde(with = "duration_secs")]
    pub lock_timeout: Duration,
    /// Lock owner id of this manager; the process id when unset.
    pub lock_owner: Option<u64>,
    pub retry: RetryConfig,
    pub fld: FldConfig,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            max_name_len: 255,
            max_symlink_len: 4096,
            umask: 0o022,
            dir_placement: DirPlacement::Parent,
            lock_wait: LockWaitMode::Block,
            lock_timeout: Duration::from_secs(30),
            lock_owner: None,
            retry: RetryConfig::default(),
            fld: FldConfig::default(),
        }
    }
}

impl NamespaceConfig {
    pub fn lock_policy(&self) -> LockWait {
        match self.lock_wait {
            LockWaitMode::Block => LockWait::Block,
            LockWaitMode::NoWait => LockWait::NoWait,
            LockWaitMode::Timeout => LockWait::Timeout(self.lock_timeout),
        }
    }
}

fn out_of_range(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config for NamespaceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_name_len == 0 || self.max_name_len > 4096 {
            return Err(out_of_range("max_name_len", "must be in 1..=4096"));
        }
        if self.umask & !0o777 != 0 {
            return Err(out_of_range("umask", format!("{:#o} has bits above 0o777", self.umask)));
        }
        if self.retry.max_attempts == 0 {
            return Err(out_of_range("retry.max_attempts", "must be positive"));
        }
        if self.retry.init_wait > self.retry.max_wait {
            return Err(ConfigError::Invalid {
                key: "retry.init_wait".into(),
                message: "larger than retry.max_wait".into(),
            });
        }
        if self.fld.seq_width == 0 || self.fld.oids_per_seq == 0 {
            return Err(out_of_range("fld", "seq_width and oids_per_seq must be positive"));
        }
        if self.fld.oids_per_seq == u32::MAX {
            return Err(out_of_range("fld.oids_per_seq", "must be below u32::MAX"));
        }
        if self.fld.node_slots == 0 || u64::from(self.fld.node_slots) > self.fld.seq_width {
            return Err(out_of_range("fld.node_slots", "must be in 1..=seq_width"));
        }
        if self.fld.seq_base.checked_add(self.fld.seq_width).is_none() {
            return Err(out_of_range("fld.seq_width", "range overflows the sequence space"));
        }
        if let Some(r) = self.fld.ranges.iter().find(|r| r.start >= r.end) {
            return Err(ConfigError::Invalid {
                key: "fld.ranges".into(),
                message: format!("empty range [{:#x}, {:#x})", r.start, r.end),
            });
        }
        Ok(())
    }

    /// Everything but the partition layout and the lock owner may change
    /// at runtime.
    fn hot_update(&mut self, other: &Self) {
        self.max_name_len = other.max_name_len;
        self.max_symlink_len = other.max_symlink_len;
        self.umask = other.umask;
        self.dir_placement = other.dir_placement;
        self.lock_wait = other.lock_wait;
        self.lock_timeout = other.lock_timeout;
        self.retry = other.retry.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub index: u32,
    pub connection_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub local_ordinal: u32,
    /// Data stripes per regular file on the in-memory backend.
    pub stripe_count: u32,
    pub targets: Vec<TargetConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            local_ordinal: 0,
            stripe_count: 1,
            targets: vec![
                TargetConfig {
                    index: 0,
                    connection_info: "mem://mdt0".into(),
                },
                TargetConfig {
                    index: 1,
                    connection_info: "mem://mdt1".into(),
                },
            ],
        }
    }
}

/// Top-level configuration of `cmm-server`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log: LogConfig,
    pub cluster: ClusterConfig,
    pub namespace: NamespaceConfig,
}

impl Config for ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for t in &self.cluster.targets {
            if !seen.insert(t.index) {
                return Err(ConfigError::Invalid {
                    key: "cluster.targets".into(),
                    message: format!("target index {} listed twice", t.index),
                });
            }
            if t.connection_info.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "cluster.targets".into(),
                    message: format!("target {} has no connection info", t.index),
                });
            }
        }
        self.namespace.validate()
    }

    fn hot_update(&mut self, other: &Self) {
        self.log.level = other.log.level.clone();
        self.namespace.hot_update(&other.namespace);
    }
}
