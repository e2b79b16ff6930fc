//! Client-side namespace cache: names, attributes and reverse aliases.
//!
//! Entries are only trusted while the lock that protects them is held; the
//! lock adapter calls the invalidation methods when a lock is revoked.

use std::collections::{HashMap, HashSet};

use cmm_proto::{ObjectAttrs, Times};
use cmm_types::Fid;
use dashmap::DashMap;

#[derive(Default)]
pub struct NamespaceCache {
    /// parent -> name -> child
    entries: DashMap<Fid, HashMap<String, Fid>>,
    attrs: DashMap<Fid, ObjectAttrs>,
    /// child -> every (parent, name) pointing at it
    aliases: DashMap<Fid, HashSet<(Fid, String)>>,
}

impl NamespaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `(child, attrs)` for `name` under `parent`. A hit needs both the
    /// entry and the child's attributes.
    pub fn lookup(&self, parent: Fid, name: &str) -> Option<(Fid, ObjectAttrs)> {
        let child = self.lookup_entry(parent, name)?;
        let attrs = self.attrs.get(&child)?.clone();
        Some((child, attrs))
    }

    pub fn lookup_entry(&self, parent: Fid, name: &str) -> Option<Fid> {
        self.entries.get(&parent)?.get(name).copied()
    }

    pub fn attrs(&self, fid: Fid) -> Option<ObjectAttrs> {
        self.attrs.get(&fid).map(|a| a.clone())
    }

    /// Whether the cache knows `fid` at all, by attributes or by name.
    pub fn knows(&self, fid: Fid) -> bool {
        self.attrs.contains_key(&fid) || self.aliases.contains_key(&fid)
    }

    pub fn insert_entry(&self, parent: Fid, name: &str, child: Fid) {
        let previous = self
            .entries
            .entry(parent)
            .or_default()
            .insert(name.to_string(), child);
        if let Some(old) = previous.filter(|old| *old != child) {
            self.drop_alias(old, parent, name);
        }
        self.aliases
            .entry(child)
            .or_default()
            .insert((parent, name.to_string()));
    }

    pub fn insert_attrs(&self, attrs: ObjectAttrs) {
        self.attrs.insert(attrs.fid, attrs);
    }

    pub fn remove_entry(&self, parent: Fid, name: &str) -> Option<Fid> {
        let child = self.entries.get_mut(&parent)?.remove(name)?;
        self.drop_alias(child, parent, name);
        Some(child)
    }

    fn drop_alias(&self, child: Fid, parent: Fid, name: &str) {
        if let Some(mut set) = self.aliases.get_mut(&child) {
            set.remove(&(parent, name.to_string()));
        }
        self.aliases.remove_if(&child, |_, set| set.is_empty());
    }

    pub fn evict_attrs(&self, fid: Fid) {
        self.attrs.remove(&fid);
    }

    /// Forget every cached name under `parent`.
    pub fn invalidate_children(&self, parent: Fid) -> usize {
        let Some((_, children)) = self.entries.remove(&parent) else {
            return 0;
        };
        for (name, child) in &children {
            self.drop_alias(*child, parent, name);
        }
        children.len()
    }

    /// Forget every cached name pointing at `child`.
    pub fn unhash_aliases(&self, child: Fid) -> usize {
        let Some((_, names)) = self.aliases.remove(&child) else {
            return 0;
        };
        for (parent, name) in &names {
            if let Some(mut dir) = self.entries.get_mut(parent) {
                if dir.get(name) == Some(&child) {
                    dir.remove(name);
                }
            }
        }
        names.len()
    }

    /// Apply parent times returned by a mutation; times never go backwards.
    pub fn update_times(&self, fid: Fid, times: Times) {
        if let Some(mut attrs) = self.attrs.get_mut(&fid) {
            attrs.mtime = attrs.mtime.max(times.mtime);
            attrs.ctime = attrs.ctime.max(times.ctime);
        }
    }

    pub fn child_count(&self, parent: Fid) -> usize {
        self.entries.get(&parent).map(|d| d.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.attrs.clear();
        self.aliases.clear();
    }
}
