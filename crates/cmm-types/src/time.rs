use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp with one second granularity, as stored in object
/// attributes (mtime/ctime).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTime {
    secs: i64,
}

impl UtcTime {
    pub const EPOCH: UtcTime = UtcTime { secs: 0 };

    pub fn now() -> Self {
        Self {
            secs: Utc::now().timestamp(),
        }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self { secs }
    }

    pub fn as_secs(&self) -> i64 {
        self.secs
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, 0)
    }
}

impl fmt::Debug for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtcTime({})", self.secs)
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            None => write!(f, "{}s", self.secs),
        }
    }
}
