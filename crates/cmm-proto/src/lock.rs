//! Namespace lock bits and lock-manager requests.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use cmm_types::{Fid, LockCookie, LockOwnerId, TargetIndex};
use serde::{Deserialize, Serialize};

/// Namespace lock bits held on one object.
///
/// `LOOKUP` protects the existence of names pointing at the object,
/// `UPDATE` protects the content of a directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LockBits(pub u8);

impl LockBits {
    pub const NONE: Self = Self(0);
    pub const LOOKUP: Self = Self(1);
    pub const UPDATE: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Mode requested from the lock manager for these bits.
    pub fn mode(self) -> LockMode {
        if self.intersects(Self::UPDATE) {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

impl BitOr for LockBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for LockBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::LOOKUP), self.contains(Self::UPDATE)) {
            (true, true) => f.write_str("LOOKUP|UPDATE"),
            (true, false) => f.write_str("LOOKUP"),
            (false, true) => f.write_str("UPDATE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

impl fmt::Display for LockBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn conflicts_with(self, other: LockMode) -> bool {
        self == LockMode::Exclusive || other == LockMode::Exclusive
    }
}

/// How long a lock request may wait behind conflicting holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Block,
    NoWait,
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReq {
    pub owner: LockOwnerId,
    pub target: TargetIndex,
    pub resource: Fid,
    pub bits: LockBits,
    pub wait: LockWait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRsp {
    pub cookie: LockCookie,
}

/// A granted lock as described in callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDesc {
    pub cookie: LockCookie,
    pub target: TargetIndex,
    pub resource: Fid,
    pub bits: LockBits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_mode() {
        assert_eq!(LockBits::LOOKUP.mode(), LockMode::Shared);
        assert_eq!(LockBits::UPDATE.mode(), LockMode::Exclusive);
        assert_eq!((LockBits::LOOKUP | LockBits::UPDATE).mode(), LockMode::Exclusive);
    }

    #[test]
    fn test_bits_contains() {
        let all = LockBits::LOOKUP | LockBits::UPDATE;
        assert_eq!(all, LockBits::ALL);
        assert!(all.contains(LockBits::LOOKUP));
        assert!(!LockBits::LOOKUP.contains(LockBits::UPDATE));
        assert!(LockBits::NONE.is_empty());
        assert_eq!(format!("{}", all), "LOOKUP|UPDATE");
    }

    #[test]
    fn test_mode_conflicts() {
        assert!(!LockMode::Shared.conflicts_with(LockMode::Shared));
        assert!(LockMode::Shared.conflicts_with(LockMode::Exclusive));
        assert!(LockMode::Exclusive.conflicts_with(LockMode::Exclusive));
    }
}
