//! Object and directory-entry tables of one in-memory target.

use std::collections::{BTreeMap, HashMap};

use cmm_proto::{
    is_dir, is_reg, DataLayout, DestroyInfo, ObjectAttrs, OpContext, ReplacedEntry,
    StripeObject, Times, S_IFMT,
};
use cmm_types::{
    make_error, make_error_msg, Fid, NamespaceCode, Result, StatusCode, TargetIndex, UtcTime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub fid: Fid,
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Object {
    pub attrs: ObjectAttrs,
    pub layout: Option<DataLayout>,
    pub symlink: Option<String>,
}

/// New object parameters.
pub(crate) struct NewObject<'a> {
    pub fid: Fid,
    pub ctx: &'a OpContext,
    pub rdev: u32,
    pub symlink: Option<String>,
}

#[derive(Default)]
pub(crate) struct Store {
    pub objects: HashMap<Fid, Object>,
    pub dirs: HashMap<Fid, BTreeMap<String, Entry>>,
    next_object_id: u64,
}

impl Store {
    pub fn object(&self, fid: Fid) -> Result<&Object> {
        match self.objects.get(&fid) {
            Some(o) => Ok(o),
            None => make_error_msg(NamespaceCode::NOT_FOUND, format!("no object {fid}")),
        }
    }

    fn object_mut(&mut self, fid: Fid) -> Result<&mut Object> {
        match self.objects.get_mut(&fid) {
            Some(o) => Ok(o),
            None => make_error_msg(NamespaceCode::NOT_FOUND, format!("no object {fid}")),
        }
    }

    pub fn is_local(&self, fid: Fid) -> bool {
        self.objects.contains_key(&fid)
    }

    pub fn dir(&self, fid: Fid) -> Result<&BTreeMap<String, Entry>> {
        self.object(fid)?;
        match self.dirs.get(&fid) {
            Some(d) => Ok(d),
            None => make_error(NamespaceCode::NOT_DIRECTORY),
        }
    }

    pub fn entry(&self, parent: Fid, name: &str) -> Result<Entry> {
        match self.dir(parent)?.get(name) {
            Some(e) => Ok(*e),
            None => make_error(NamespaceCode::NOT_FOUND),
        }
    }

    pub fn ensure_absent(&self, parent: Fid, name: &str) -> Result<()> {
        if self.dir(parent)?.contains_key(name) {
            return make_error(NamespaceCode::EXISTS);
        }
        Ok(())
    }

    /// Refresh `dir`'s times and size after its entries changed.
    fn touch(&mut self, dir: Fid, now: UtcTime) -> Result<Times> {
        let size = self.dirs.get(&dir).map(|d| d.len() as u64).unwrap_or(0);
        let attrs = &mut self.object_mut(dir)?.attrs;
        attrs.mtime = attrs.mtime.max(now);
        attrs.ctime = attrs.ctime.max(now);
        attrs.size = size;
        Ok(Times {
            mtime: attrs.mtime,
            ctime: attrs.ctime,
        })
    }

    pub fn insert_name(&mut self, parent: Fid, name: &str, entry: Entry, now: UtcTime) -> Result<Times> {
        self.ensure_absent(parent, name)?;
        if let Some(dir) = self.dirs.get_mut(&parent) {
            dir.insert(name.to_string(), entry);
        }
        self.touch(parent, now)
    }

    pub fn remove_name(&mut self, parent: Fid, name: &str, now: UtcTime) -> Result<(Entry, Times)> {
        let entry = self.entry(parent, name)?;
        if let Some(dir) = self.dirs.get_mut(&parent) {
            dir.remove(name);
        }
        Ok((entry, self.touch(parent, now)?))
    }

    pub fn new_object(
        &mut self,
        target: TargetIndex,
        stripe_count: u32,
        new: NewObject<'_>,
        now: UtcTime,
    ) -> Result<ObjectAttrs> {
        if self.objects.contains_key(&new.fid) {
            return make_error_msg(
                NamespaceCode::INCONSISTENT,
                format!("object {} already exists", new.fid),
            );
        }
        let mode = new.ctx.mode;
        if mode & S_IFMT == 0 {
            return make_error_msg(StatusCode::INVALID_ARG, "object mode has no file type");
        }
        let attrs = ObjectAttrs {
            fid: new.fid,
            mode,
            nlink: if is_dir(mode) { 2 } else { 1 },
            uid: new.ctx.uid,
            gid: new.ctx.gid,
            size: new.symlink.as_ref().map(|s| s.len() as u64).unwrap_or(0),
            rdev: new.rdev,
            mtime: now,
            ctime: now,
        };
        let layout = if is_reg(mode) && stripe_count > 0 {
            let stripes = (0..stripe_count)
                .map(|i| {
                    self.next_object_id += 1;
                    StripeObject {
                        ost_index: target.get() * stripe_count + i,
                        object_id: self.next_object_id,
                    }
                })
                .collect();
            Some(DataLayout {
                stripe_size: 1 << 20,
                stripes,
            })
        } else {
            None
        };
        if is_dir(mode) {
            self.dirs.insert(new.fid, BTreeMap::new());
        }
        self.objects.insert(
            new.fid,
            Object {
                attrs: attrs.clone(),
                layout,
                symlink: new.symlink,
            },
        );
        Ok(attrs)
    }

    pub fn add_ref(&mut self, fid: Fid, now: UtcTime) -> Result<ObjectAttrs> {
        let obj = self.object_mut(fid)?;
        if obj.attrs.is_dir() {
            return make_error_msg(NamespaceCode::NO_PERMISSION, "hard link to a directory");
        }
        obj.attrs.nlink += 1;
        obj.attrs.ctime = obj.attrs.ctime.max(now);
        Ok(obj.attrs.clone())
    }

    /// Drop one reference on a non-directory; returns what must be destroyed
    /// when it was the last one.
    pub fn drop_ref(&mut self, fid: Fid, now: UtcTime) -> Result<Option<DestroyInfo>> {
        let obj = self.object_mut(fid)?;
        if obj.attrs.is_dir() {
            return make_error(NamespaceCode::IS_DIRECTORY);
        }
        obj.attrs.nlink = obj.attrs.nlink.saturating_sub(1);
        obj.attrs.ctime = obj.attrs.ctime.max(now);
        if obj.attrs.nlink > 0 {
            return Ok(None);
        }
        Ok(self.objects.remove(&fid).map(|o| DestroyInfo {
            fid,
            mode: o.attrs.mode,
            layout: o.layout,
        }))
    }

    pub fn check_empty_dir(&self, fid: Fid) -> Result<()> {
        if !self.dir(fid)?.is_empty() {
            return make_error(NamespaceCode::NOT_EMPTY);
        }
        Ok(())
    }

    pub fn remove_dir(&mut self, fid: Fid) -> Result<DestroyInfo> {
        self.check_empty_dir(fid)?;
        self.dirs.remove(&fid);
        let obj = self.objects.remove(&fid);
        Ok(DestroyInfo {
            fid,
            mode: obj.map(|o| o.attrs.mode).unwrap_or_default(),
            layout: None,
        })
    }

    /// Validate that `src` may replace `old` as the target of a rename.
    pub fn check_replace(&self, src: Entry, old: Entry) -> Result<()> {
        match (is_dir(src.mode), is_dir(old.mode)) {
            (true, false) => make_error(NamespaceCode::NOT_DIRECTORY),
            (false, true) => make_error(NamespaceCode::IS_DIRECTORY),
            (true, true) if self.is_local(old.fid) => self.check_empty_dir(old.fid),
            _ => Ok(()),
        }
    }

    /// Release the object of a displaced rename destination.
    pub fn release_replaced(&mut self, old: Entry, now: UtcTime) -> Result<ReplacedEntry> {
        if !self.is_local(old.fid) {
            return Ok(ReplacedEntry {
                fid: old.fid,
                mode: old.mode,
                remote_object: true,
                released: None,
            });
        }
        let released = if is_dir(old.mode) {
            Some(self.remove_dir(old.fid)?)
        } else {
            self.drop_ref(old.fid, now)?
        };
        Ok(ReplacedEntry {
            fid: old.fid,
            mode: old.mode,
            remote_object: false,
            released,
        })
    }

    pub fn attrs(&self, fid: Fid) -> Option<ObjectAttrs> {
        self.objects.get(&fid).map(|o| o.attrs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_proto::{S_IFDIR, S_IFREG};

    fn ctx(mode: u32) -> OpContext {
        OpContext {
            mode,
            ..Default::default()
        }
    }

    fn store_with_dir(dir: Fid) -> Store {
        let mut store = Store::default();
        let c = ctx(S_IFDIR | 0o755);
        store
            .new_object(
                TargetIndex(0),
                1,
                NewObject {
                    fid: dir,
                    ctx: &c,
                    rdev: 0,
                    symlink: None,
                },
                UtcTime::from_secs(1),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_dir_size_follows_entries() {
        let dir = Fid::new(1, 1);
        let mut store = store_with_dir(dir);
        let file = Entry {
            fid: Fid::new(1, 2),
            mode: S_IFREG,
        };
        let times = store
            .insert_name(dir, "a", file, UtcTime::from_secs(10))
            .unwrap();
        assert_eq!(times.mtime, UtcTime::from_secs(10));
        assert_eq!(store.attrs(dir).unwrap().size, 1);
        assert!(store.insert_name(dir, "a", file, UtcTime::from_secs(11)).is_err());
        store.remove_name(dir, "a", UtcTime::from_secs(5)).unwrap();
        let attrs = store.attrs(dir).unwrap();
        assert_eq!(attrs.size, 0);
        // Times never move backwards.
        assert_eq!(attrs.mtime, UtcTime::from_secs(10));
    }

    #[test]
    fn test_last_ref_releases_layout() {
        let mut store = Store::default();
        let fid = Fid::new(1, 9);
        let c = ctx(S_IFREG | 0o644);
        store
            .new_object(
                TargetIndex(2),
                2,
                NewObject {
                    fid,
                    ctx: &c,
                    rdev: 0,
                    symlink: None,
                },
                UtcTime::EPOCH,
            )
            .unwrap();
        store.add_ref(fid, UtcTime::EPOCH).unwrap();
        assert!(store.drop_ref(fid, UtcTime::EPOCH).unwrap().is_none());
        let info = store.drop_ref(fid, UtcTime::EPOCH).unwrap().unwrap();
        let layout = info.layout.unwrap();
        assert_eq!(layout.stripes.len(), 2);
        assert_eq!(layout.stripes[0].ost_index, 4);
        assert!(!store.is_local(fid));
    }

    #[test]
    fn test_replace_type_rules() {
        let dir = Fid::new(1, 1);
        let store = store_with_dir(dir);
        let file = Entry {
            fid: Fid::new(1, 2),
            mode: S_IFREG,
        };
        let d = Entry {
            fid: dir,
            mode: S_IFDIR,
        };
        assert_eq!(
            store.check_replace(d, file).unwrap_err().code(),
            NamespaceCode::NOT_DIRECTORY
        );
        assert_eq!(
            store.check_replace(file, d).unwrap_err().code(),
            NamespaceCode::IS_DIRECTORY
        );
        assert!(store.check_replace(d, d).is_ok());
    }
}
