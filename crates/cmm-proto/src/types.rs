//! Object attributes, operation context and data-layout descriptors.

use cmm_types::{Fid, Gid, Uid, UtcTime};
use serde::{Deserialize, Serialize};

// ---- Mode bits ----

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_ISUID: u32 = 0o4000;
pub const S_ISGID: u32 = 0o2000;
pub const S_ISVTX: u32 = 0o1000;
pub const S_IALLUGO: u32 = S_ISUID | S_ISGID | S_ISVTX | 0o777;

pub fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

pub fn is_reg(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

pub fn is_lnk(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// Attributes of one metadata object as reported by its owning target.
///
/// For directories `size` is the number of entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectAttrs {
    pub fid: Fid,
    pub mode: u32,
    pub nlink: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub rdev: u32,
    pub mtime: UtcTime,
    pub ctime: UtcTime,
}

impl ObjectAttrs {
    pub fn is_dir(&self) -> bool {
        is_dir(self.mode)
    }

    pub fn is_reg(&self) -> bool {
        is_reg(self.mode)
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }
}

/// Modification/change times of a parent directory after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Times {
    pub mtime: UtcTime,
    pub ctime: UtcTime,
}

/// Per-operation context sent with every mutating request.
///
/// `fid1` is the parent (or the source object for link), `fid2` the second
/// parent or the freshly allocated child.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpContext {
    pub fid1: Fid,
    pub fid2: Fid,
    pub name: String,
    pub mode: u32,
    pub mod_time: UtcTime,
    pub uid: Uid,
    pub gid: Gid,
    pub cap: u64,
    pub suppgids: [Option<Gid>; 2],
}

/// One data object backing part of a regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeObject {
    pub ost_index: u32,
    pub object_id: u64,
}

/// Data-object layout of a regular file, returned when its last link goes
/// away so the caller can destroy the objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataLayout {
    pub stripe_size: u32,
    pub stripes: Vec<StripeObject>,
}

impl DataLayout {
    pub fn is_valid(&self) -> bool {
        self.stripe_size > 0 && !self.stripes.is_empty()
    }
}

/// Reported by a target when the last reference to an object was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyInfo {
    pub fid: Fid,
    pub mode: u32,
    /// `None` when the object never had data objects. `Some` with an
    /// invalid layout is a protocol violation.
    pub layout: Option<DataLayout>,
}
