//! In-memory metadata target.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use cmm_proto::{
    is_dir, CreatePhase, CreateReq, CreateRsp, DataLayout, GetAttrReq, GetAttrRsp, LinkPhase,
    LinkReq, LinkRsp, LookupReq, LookupRsp, MaxSizeReq, MaxSizeRsp, ObjectAttrs, OpContext, RenamePhase,
    RenameReq, RenameRsp, RootGetReq, RootGetRsp, StatFsReq, StatFsRsp, UnlinkPhase, UnlinkReq,
    UnlinkRsp, S_IFDIR,
};
use cmm_stubs::ITargetStub;
use cmm_types::{
    make_error, make_error_msg, status_code_t, Fid, NamespaceCode, Result, StatusCode,
    TargetIndex, UtcTime, ROOT_FID,
};
use parking_lot::{Mutex, RwLock};

use crate::store::{Entry, NewObject, Store};

const CAPACITY: u64 = 1 << 20;
const MAX_NAME_LEN: u32 = 255;

/// A metadata target holding its objects and directory entries in memory.
///
/// Objects are keyed by identifier; an entry may point at an object owned by
/// another target, which lookups report without attributes. Faults queued
/// with [`MemTarget::inject_fault`] fail the next call of a method before it
/// touches any state.
pub struct MemTarget {
    index: TargetIndex,
    stripe_count: u32,
    store: RwLock<Store>,
    faults: Mutex<HashMap<&'static str, VecDeque<status_code_t>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemTarget {
    pub fn new(index: TargetIndex) -> Self {
        Self {
            index,
            stripe_count: 1,
            store: RwLock::new(Store::default()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Host the namespace root on this target.
    pub fn with_root(self) -> Self {
        let ctx = OpContext {
            mode: S_IFDIR | 0o755,
            ..Default::default()
        };
        let created = self.store.write().new_object(
            self.index,
            self.stripe_count,
            NewObject {
                fid: ROOT_FID,
                ctx: &ctx,
                rdev: 0,
                symlink: None,
            },
            UtcTime::now(),
        );
        if let Err(e) = created {
            tracing::error!(target_index = %self.index, error = %e, "failed to create root");
        }
        self
    }

    pub fn with_stripe_count(mut self, stripe_count: u32) -> Self {
        self.stripe_count = stripe_count;
        self
    }

    pub fn index(&self) -> TargetIndex {
        self.index
    }

    /// Fail the next call of `method` with `code`. Faults queue up.
    pub fn inject_fault(&self, method: &'static str, code: status_code_t) {
        self.faults.lock().entry(method).or_default().push_back(code);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    pub fn contains(&self, fid: Fid) -> bool {
        self.store.read().is_local(fid)
    }

    pub fn object_count(&self) -> usize {
        self.store.read().objects.len()
    }

    pub fn entry_names(&self, dir: Fid) -> Vec<String> {
        self.store
            .read()
            .dirs
            .get(&dir)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn layout(&self, fid: Fid) -> Option<DataLayout> {
        self.store
            .read()
            .objects
            .get(&fid)
            .and_then(|o| o.layout.clone())
    }

    /// Overwrite the stored layout of a local object.
    pub fn set_layout(&self, fid: Fid, layout: Option<DataLayout>) -> bool {
        match self.store.write().objects.get_mut(&fid) {
            Some(o) => {
                o.layout = layout;
                true
            }
            None => false,
        }
    }

    pub fn symlink_body(&self, fid: Fid) -> Option<String> {
        self.store
            .read()
            .objects
            .get(&fid)
            .and_then(|o| o.symlink.clone())
    }

    fn enter(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        let fault = self
            .faults
            .lock()
            .get_mut(method)
            .and_then(|q| q.pop_front());
        match fault {
            Some(code) => {
                tracing::debug!(target_index = %self.index, method, code, "injected fault");
                make_error_msg(code, format!("injected fault in {method}"))
            }
            None => Ok(()),
        }
    }

    fn create_object(&self, store: &mut Store, req: &CreateReq, now: UtcTime) -> Result<ObjectAttrs> {
        store.new_object(
            self.index,
            self.stripe_count,
            NewObject {
                fid: req.ctx.fid2,
                ctx: &req.ctx,
                rdev: req.rdev,
                symlink: req.symlink_target.clone(),
            },
            now,
        )
    }

    fn do_create(&self, req: CreateReq) -> Result<CreateRsp> {
        let now = op_time(&req.ctx);
        let ctx = &req.ctx;
        let mut store = self.store.write();
        match req.phase {
            CreatePhase::Local => {
                store.ensure_absent(ctx.fid1, &ctx.name)?;
                let attrs = self.create_object(&mut store, &req, now)?;
                let entry = Entry {
                    fid: ctx.fid2,
                    mode: ctx.mode,
                };
                let times = store.insert_name(ctx.fid1, &ctx.name, entry, now)?;
                Ok(CreateRsp {
                    attrs: Some(attrs),
                    parent_times: Some(times),
                })
            }
            CreatePhase::Object => {
                let attrs = self.create_object(&mut store, &req, now)?;
                Ok(CreateRsp {
                    attrs: Some(attrs),
                    parent_times: None,
                })
            }
            CreatePhase::InsertName => {
                let entry = Entry {
                    fid: ctx.fid2,
                    mode: ctx.mode,
                };
                let times = store.insert_name(ctx.fid1, &ctx.name, entry, now)?;
                Ok(CreateRsp {
                    attrs: None,
                    parent_times: Some(times),
                })
            }
        }
    }

    fn do_unlink(&self, req: UnlinkReq, rmdir: bool) -> Result<UnlinkRsp> {
        let now = op_time(&req.ctx);
        let ctx = &req.ctx;
        let mut store = self.store.write();
        match req.phase {
            UnlinkPhase::Local => {
                let entry = store.entry(ctx.fid1, &ctx.name)?;
                match (rmdir, is_dir(entry.mode)) {
                    (false, true) => return make_error(NamespaceCode::IS_DIRECTORY),
                    (true, false) => return make_error(NamespaceCode::NOT_DIRECTORY),
                    (true, true) if store.is_local(entry.fid) => store.check_empty_dir(entry.fid)?,
                    _ => {}
                }
                let (entry, times) = store.remove_name(ctx.fid1, &ctx.name, now)?;
                let local = store.is_local(entry.fid);
                let released = match (local, rmdir) {
                    (false, _) => None,
                    (true, true) => Some(store.remove_dir(entry.fid)?),
                    (true, false) => store.drop_ref(entry.fid, now)?,
                };
                Ok(UnlinkRsp {
                    fid: entry.fid,
                    mode: entry.mode,
                    remote_object: !local,
                    released,
                    parent_times: Some(times),
                })
            }
            UnlinkPhase::DropRef { fid } => {
                let mode = store.object(fid)?.attrs.mode;
                let released = if rmdir {
                    Some(store.remove_dir(fid)?)
                } else {
                    store.drop_ref(fid, now)?
                };
                Ok(UnlinkRsp {
                    fid,
                    mode,
                    remote_object: false,
                    released,
                    parent_times: None,
                })
            }
        }
    }

    fn do_rename(&self, req: RenameReq) -> Result<RenameRsp> {
        let now = op_time(&req.ctx);
        let ctx = &req.ctx;
        let mut store = self.store.write();
        match req.phase {
            RenamePhase::Local => {
                let src = store.entry(ctx.fid1, &ctx.name)?;
                let old = store.dir(ctx.fid2)?.get(&req.new_name).copied();
                if let Some(old) = old {
                    if old.fid == src.fid {
                        return Ok(RenameRsp {
                            fid: src.fid,
                            mode: src.mode,
                            replaced: None,
                            src_parent_times: None,
                            dst_parent_times: None,
                        });
                    }
                    store.check_replace(src, old)?;
                }
                let (_, src_times) = store.remove_name(ctx.fid1, &ctx.name, now)?;
                let replaced = match old {
                    Some(old) => {
                        store.remove_name(ctx.fid2, &req.new_name, now)?;
                        Some(store.release_replaced(old, now)?)
                    }
                    None => None,
                };
                let dst_times = store.insert_name(ctx.fid2, &req.new_name, src, now)?;
                Ok(RenameRsp {
                    fid: src.fid,
                    mode: src.mode,
                    replaced,
                    src_parent_times: Some(src_times),
                    dst_parent_times: Some(dst_times),
                })
            }
            RenamePhase::RemoveSource => {
                let (src, times) = store.remove_name(ctx.fid1, &ctx.name, now)?;
                Ok(RenameRsp {
                    fid: src.fid,
                    mode: src.mode,
                    replaced: None,
                    src_parent_times: Some(times),
                    dst_parent_times: None,
                })
            }
            RenamePhase::InsertTarget { fid, mode } => {
                let src = Entry { fid, mode };
                let old = store.dir(ctx.fid2)?.get(&req.new_name).copied();
                if let Some(old) = old {
                    store.check_replace(src, old)?;
                }
                let replaced = match old {
                    Some(old) => {
                        store.remove_name(ctx.fid2, &req.new_name, now)?;
                        Some(store.release_replaced(old, now)?)
                    }
                    None => None,
                };
                let times = store.insert_name(ctx.fid2, &req.new_name, src, now)?;
                Ok(RenameRsp {
                    fid,
                    mode,
                    replaced,
                    src_parent_times: None,
                    dst_parent_times: Some(times),
                })
            }
        }
    }
}

fn op_time(ctx: &OpContext) -> UtcTime {
    if ctx.mod_time == UtcTime::EPOCH {
        UtcTime::now()
    } else {
        ctx.mod_time
    }
}

#[async_trait]
impl ITargetStub for MemTarget {
    async fn lookup(&self, req: LookupReq) -> Result<LookupRsp> {
        self.enter("lookup")?;
        let store = self.store.read();
        let entry = store.entry(req.parent, &req.name)?;
        Ok(LookupRsp {
            fid: entry.fid,
            mode: entry.mode,
            attrs: store.attrs(entry.fid),
        })
    }

    async fn getattr(&self, req: GetAttrReq) -> Result<GetAttrRsp> {
        self.enter("getattr")?;
        let attrs = self.store.read().object(req.fid)?.attrs.clone();
        Ok(GetAttrRsp { attrs })
    }

    async fn create(&self, req: CreateReq) -> Result<CreateRsp> {
        self.enter("create")?;
        if req.phase != CreatePhase::InsertName && is_dir(req.ctx.mode) {
            return make_error_msg(StatusCode::INVALID_ARG, "directories are created by mkdir");
        }
        self.do_create(req)
    }

    async fn mkdir(&self, req: CreateReq) -> Result<CreateRsp> {
        self.enter("mkdir")?;
        if !is_dir(req.ctx.mode) {
            return make_error_msg(StatusCode::INVALID_ARG, "mkdir needs a directory mode");
        }
        self.do_create(req)
    }

    async fn link(&self, req: LinkReq) -> Result<LinkRsp> {
        self.enter("link")?;
        let now = op_time(&req.ctx);
        let ctx = &req.ctx;
        let mut store = self.store.write();
        match req.phase {
            LinkPhase::Local => {
                store.ensure_absent(ctx.fid2, &ctx.name)?;
                let attrs = store.add_ref(ctx.fid1, now)?;
                let entry = Entry {
                    fid: ctx.fid1,
                    mode: attrs.mode,
                };
                let times = store.insert_name(ctx.fid2, &ctx.name, entry, now)?;
                Ok(LinkRsp {
                    attrs: Some(attrs),
                    parent_times: Some(times),
                })
            }
            LinkPhase::AddRef => Ok(LinkRsp {
                attrs: Some(store.add_ref(ctx.fid1, now)?),
                parent_times: None,
            }),
            LinkPhase::InsertName { mode } => {
                let entry = Entry {
                    fid: ctx.fid1,
                    mode,
                };
                let times = store.insert_name(ctx.fid2, &ctx.name, entry, now)?;
                Ok(LinkRsp {
                    attrs: None,
                    parent_times: Some(times),
                })
            }
        }
    }

    async fn unlink(&self, req: UnlinkReq) -> Result<UnlinkRsp> {
        self.enter("unlink")?;
        self.do_unlink(req, false)
    }

    async fn rmdir(&self, req: UnlinkReq) -> Result<UnlinkRsp> {
        self.enter("rmdir")?;
        self.do_unlink(req, true)
    }

    async fn rename(&self, req: RenameReq) -> Result<RenameRsp> {
        self.enter("rename")?;
        self.do_rename(req)
    }

    async fn statfs(&self, _req: StatFsReq) -> Result<StatFsRsp> {
        self.enter("statfs")?;
        let files = self.store.read().objects.len() as u64;
        Ok(StatFsRsp {
            blocks: CAPACITY,
            bfree: CAPACITY,
            bavail: CAPACITY,
            files,
            ffree: CAPACITY.saturating_sub(files),
            namelen: MAX_NAME_LEN,
        })
    }

    async fn get_maxsize(&self, _req: MaxSizeReq) -> Result<MaxSizeRsp> {
        self.enter("get_maxsize")?;
        Ok(MaxSizeRsp {
            md_size: 4096,
            cookie_size: 64,
        })
    }

    async fn root_get(&self, _req: RootGetReq) -> Result<RootGetRsp> {
        self.enter("root_get")?;
        if !self.store.read().is_local(ROOT_FID) {
            return make_error_msg(NamespaceCode::NOT_FOUND, "root is not hosted here");
        }
        Ok(RootGetRsp { fid: ROOT_FID })
    }
}
