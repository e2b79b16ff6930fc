use std::fmt;

use serde::{Deserialize, Serialize};

strong_type!(
    /// Index of a metadata target inside the cluster.
    TargetIndex,
    u32
);
strong_type!(
    /// Ordinal of this node; ordinal 0 is the master that owns the root.
    NodeOrdinal,
    u32
);
strong_type!(Uid, u32);
strong_type!(Gid, u32);
strong_type!(
    /// Lock owner identity, one per lock adapter instance.
    LockOwnerId,
    u64
);
strong_type!(
    /// Remote handle of a lock granted by the lock manager.
    LockCookie,
    u64
);

/// Globally unique metadata object identifier.
///
/// Totally ordered by `(seq, oid)`; the ordering is what canonical lock
/// acquisition sorts on. The sequence selects the owning target through the
/// partition table; the oid distinguishes objects inside one sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Fid {
    pub seq: u64,
    pub oid: u32,
}

/// Sequence reserved for the namespace root.
pub const ROOT_SEQ: u64 = 0x2_0000_0007;

/// Well-known identifier of the namespace root directory.
pub const ROOT_FID: Fid = Fid::new(ROOT_SEQ, 1);

impl Fid {
    pub const fn new(seq: u64, oid: u32) -> Self {
        Self { seq, oid }
    }

    pub fn is_zero(&self) -> bool {
        self.seq == 0 && self.oid == 0
    }

    pub fn is_root(&self) -> bool {
        *self == ROOT_FID
    }
}

impl fmt::Debug for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fid{}", self)
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}:{:#x}]", self.seq, self.oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fid_order_is_seq_then_oid() {
        let a = Fid::new(1, 9);
        let b = Fid::new(2, 0);
        let c = Fid::new(2, 1);
        assert!(a < b);
        assert!(b < c);

        let mut v = vec![c, a, b];
        v.sort();
        assert_eq!(v, vec![a, b, c]);
    }

    #[test]
    fn test_fid_display() {
        assert_eq!(Fid::new(0x200, 0x1).to_string(), "[0x200:0x1]");
        assert_eq!(format!("{:?}", Fid::new(16, 2)), "Fid[0x10:0x2]");
    }

    #[test]
    fn test_root_fid() {
        assert!(ROOT_FID.is_root());
        assert!(!ROOT_FID.is_zero());
        assert!(Fid::default().is_zero());
    }

    #[test]
    fn test_target_index_ordering() {
        assert!(TargetIndex(0) < TargetIndex(1));
        assert_eq!(TargetIndex::new(7).get(), 7);
    }

    #[test]
    fn test_fid_serde() {
        let fid = Fid::new(5, 6);
        let json = serde_json::to_string(&fid).unwrap();
        assert_eq!(json, r#"{"seq":5,"oid":6}"#);
    }
}
