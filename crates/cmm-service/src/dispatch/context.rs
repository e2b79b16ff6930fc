//! Caller identity, name checks and mode rules applied before any target is
//! contacted.

use cmm_proto::{
    OpContext, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, S_ISVTX,
};
use cmm_types::{Fid, Gid, Uid, UtcTime};

use crate::error::{NamespaceError, NsResult};

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
    pub cap: u64,
    pub groups: Vec<Gid>,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Uid(uid),
            gid: Gid(gid),
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = u32>) -> Self {
        self.groups = groups.into_iter().map(Gid).collect();
        self
    }

    pub fn in_group(&self, gid: Gid) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    pub(crate) fn context(&self, fid1: Fid, fid2: Fid, name: &str, mode: u32) -> OpContext {
        OpContext {
            fid1,
            fid2,
            name: name.to_string(),
            mode,
            mod_time: UtcTime::now(),
            uid: self.uid,
            gid: self.gid,
            cap: self.cap,
            suppgids: [None, None],
        }
    }
}

/// The two group ids sent along with a request: the group of each object
/// when the caller belongs to it, then the caller's supplementary groups in
/// the slots still vacant.
pub fn pack_suppgids(creds: &Credentials, first: Option<Gid>, second: Option<Gid>) -> [Option<Gid>; 2] {
    let mut slots = [
        first.filter(|g| creds.in_group(*g)),
        second.filter(|g| creds.in_group(*g)),
    ];
    let mut extra = creds.groups.iter().copied();
    for i in 0..slots.len() {
        if slots[i].is_some() {
            continue;
        }
        slots[i] = extra.find(|g| !slots.contains(&Some(*g)));
    }
    slots
}

pub fn validate_name(name: &str, max_len: usize) -> NsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(NamespaceError::InvalidArgument(format!("bad name {name:?}")));
    }
    if name.len() > max_len {
        return Err(NamespaceError::NameTooLong {
            len: name.len(),
            max: max_len,
        });
    }
    Ok(())
}

/// Final mode of a node created by mknod/create.
pub fn mknod_mode(mode: u32, umask: u32) -> NsResult<u32> {
    let file_type = match mode & S_IFMT {
        0 => S_IFREG,
        t @ (S_IFREG | S_IFCHR | S_IFBLK | S_IFIFO | S_IFSOCK) => t,
        S_IFDIR => {
            return Err(NamespaceError::NoPermission(
                "directories are created with mkdir".into(),
            ))
        }
        other => {
            return Err(NamespaceError::InvalidArgument(format!(
                "unsupported file type {other:#o}"
            )))
        }
    };
    Ok(file_type | (mode & !S_IFMT & !umask))
}

pub fn mkdir_mode(mode: u32, umask: u32) -> u32 {
    (mode & (0o777 | S_ISVTX) & !umask) | S_IFDIR
}

pub fn symlink_mode() -> u32 {
    S_IFLNK | 0o777
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(validate_name("file", 255).is_ok());
        for bad in ["", ".", "..", "a/b"] {
            assert!(matches!(
                validate_name(bad, 255),
                Err(NamespaceError::InvalidArgument(_))
            ));
        }
        let long = "x".repeat(256);
        assert!(matches!(
            validate_name(&long, 255),
            Err(NamespaceError::NameTooLong { len: 256, max: 255 })
        ));
    }

    #[test]
    fn test_mknod_modes() {
        assert_eq!(mknod_mode(0o666, 0o022).unwrap(), S_IFREG | 0o644);
        assert_eq!(mknod_mode(S_IFIFO | 0o600, 0).unwrap(), S_IFIFO | 0o600);
        assert!(matches!(
            mknod_mode(S_IFDIR | 0o755, 0o022),
            Err(NamespaceError::NoPermission(_))
        ));
        assert!(matches!(
            mknod_mode(S_IFLNK | 0o777, 0),
            Err(NamespaceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mkdir_mode_keeps_sticky_bit() {
        assert_eq!(mkdir_mode(0o1777, 0o022), S_IFDIR | 0o1755);
        assert_eq!(mkdir_mode(S_IFREG | 0o4755, 0), S_IFDIR | 0o755);
    }

    #[test]
    fn test_suppgids() {
        let creds = Credentials::new(10, 100).with_groups([200, 300]);
        // Caller owns the first group, not the second.
        assert_eq!(
            pack_suppgids(&creds, Some(Gid(100)), Some(Gid(999))),
            [Some(Gid(100)), Some(Gid(200))]
        );
        // Supplementary groups are not repeated.
        assert_eq!(
            pack_suppgids(&creds, None, Some(Gid(200))),
            [Some(Gid(300)), Some(Gid(200))]
        );
        let lone = Credentials::new(1, 1);
        assert_eq!(pack_suppgids(&lone, Some(Gid(7)), None), [None, None]);
    }
}
