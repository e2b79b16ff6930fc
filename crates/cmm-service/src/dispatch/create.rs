//! create, mknod, mkdir and symlink.

use cmm_proto::{
    is_dir, AllocHint, CreatePhase, CreateReq, CreateRsp, ObjectAttrs, S_IFMT, S_IFREG,
};
use cmm_types::{Fid, TargetIndex};

use super::{
    mkdir_mode, mknod_mode, pack_suppgids, symlink_mode, Credentials, Dispatcher, OpProgress,
    OpState,
};
use crate::error::{NamespaceError, NsResult};

/// What kind of node to create.
struct NewNode {
    mode: u32,
    rdev: u32,
    symlink: Option<String>,
}

impl Dispatcher {
    /// Create a regular file; only the permission bits of `mode` are used.
    pub async fn create(
        &self,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        mode: u32,
    ) -> NsResult<ObjectAttrs> {
        let umask = self.config.load().umask;
        let node = NewNode {
            mode: mknod_mode(S_IFREG | (mode & !S_IFMT), umask)?,
            rdev: 0,
            symlink: None,
        };
        self.create_node("create", creds, parent, name, node).await
    }

    pub async fn mknod(
        &self,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        mode: u32,
        rdev: u32,
    ) -> NsResult<ObjectAttrs> {
        let umask = self.config.load().umask;
        let node = NewNode {
            mode: mknod_mode(mode, umask)?,
            rdev,
            symlink: None,
        };
        self.create_node("mknod", creds, parent, name, node).await
    }

    pub async fn mkdir(
        &self,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        mode: u32,
    ) -> NsResult<ObjectAttrs> {
        let node = NewNode {
            mode: mkdir_mode(mode, self.config.load().umask),
            rdev: 0,
            symlink: None,
        };
        self.create_node("mkdir", creds, parent, name, node).await
    }

    pub async fn symlink(
        &self,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        target_path: &str,
    ) -> NsResult<ObjectAttrs> {
        let max = self.config.load().max_symlink_len;
        if target_path.is_empty() {
            return Err(NamespaceError::InvalidArgument("empty symlink body".into()));
        }
        if target_path.len() > max {
            return Err(NamespaceError::NameTooLong {
                len: target_path.len(),
                max,
            });
        }
        let node = NewNode {
            mode: symlink_mode(),
            rdev: 0,
            symlink: Some(target_path.to_string()),
        };
        self.create_node("symlink", creds, parent, name, node).await
    }

    async fn create_node(
        &self,
        op: &'static str,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        node: NewNode,
    ) -> NsResult<ObjectAttrs> {
        let mut progress = OpProgress::new(op);
        let result = self
            .do_create(&mut progress, creds, parent, name, node)
            .await;
        self.finish(&mut progress, result)
    }

    async fn do_create(
        &self,
        progress: &mut OpProgress,
        creds: &Credentials,
        parent: Fid,
        name: &str,
        node: NewNode,
    ) -> NsResult<ObjectAttrs> {
        super::validate_name(name, self.config.load().max_name_len)?;
        let parent_target = self.resolve(parent)?;
        let _locks = self
            .lock(progress, &[Self::update_lock(parent_target, parent)])
            .await?;

        progress.enter(OpState::IdentifierAlloc);
        let dir = is_dir(node.mode);
        let hint = AllocHint {
            target: self.placement_target(parent_target, dir),
            parent,
        };
        let fid = self
            .fids
            .allocate_metadata_id(hint)
            .await
            .map_err(|status| NamespaceError::from_remote(hint.target, parent, status))?;
        if self.cache().knows(fid) {
            debug_assert!(false, "allocator returned duplicate identifier {fid}");
            tracing::error!(%fid, %parent, name, "allocator returned duplicate identifier");
            return Err(NamespaceError::InternalInconsistency(format!(
                "duplicate identifier {fid}"
            )));
        }
        let owner = self.resolve(fid)?;

        progress.enter(OpState::Execute);
        let mut ctx = creds.context(parent, fid, name, node.mode);
        ctx.suppgids = pack_suppgids(creds, self.cached_gid(parent), None);
        let req = CreateReq {
            ctx,
            phase: CreatePhase::Local,
            rdev: node.rdev,
            symlink_target: node.symlink,
        };

        let (attrs, parent_times) = if owner == parent_target {
            let rsp = self.send_create(progress, parent_target, parent, dir, &req).await?;
            (rsp.attrs, rsp.parent_times)
        } else {
            let object = CreateReq {
                phase: CreatePhase::Object,
                ..req.clone()
            };
            let created = self.send_create(progress, owner, fid, dir, &object).await?;

            progress.enter(OpState::SecondTargetExecute);
            let insert = CreateReq {
                phase: CreatePhase::InsertName,
                symlink_target: None,
                ..req
            };
            match self.send_create(progress, parent_target, parent, dir, &insert).await {
                Ok(rsp) => (created.attrs, rsp.parent_times),
                Err(e) => {
                    let op = progress.op();
                    return Err(self
                        .rollback_object(progress, op, owner, parent_target, fid, dir, e)
                        .await);
                }
            }
        };

        let attrs = attrs.ok_or_else(|| {
            NamespaceError::InternalInconsistency(format!("create of {fid} returned no attributes"))
        })?;
        let cache = self.cache();
        cache.insert_entry(parent, name, fid);
        cache.insert_attrs(attrs.clone());
        if let Some(times) = parent_times {
            cache.update_times(parent, times);
        }
        tracing::debug!(%parent, name, %fid, owner = %owner, "created");
        Ok(attrs)
    }

    async fn send_create(
        &self,
        progress: &mut OpProgress,
        index: TargetIndex,
        fid: Fid,
        dir: bool,
        req: &CreateReq,
    ) -> NsResult<CreateRsp> {
        self.call(progress, index, fid, false, |stub| {
            let req = req.clone();
            async move {
                if dir {
                    stub.mkdir(req).await
                } else {
                    stub.create(req).await
                }
            }
        })
        .await
    }

    /// Undo the first phase of a two-target create after the name insert
    /// failed. Returns the error to surface.
    #[allow(clippy::too_many_arguments)]
    async fn rollback_object(
        &self,
        progress: &mut OpProgress,
        op: &'static str,
        owner: TargetIndex,
        parent_target: TargetIndex,
        fid: Fid,
        dir: bool,
        cause: NamespaceError,
    ) -> NamespaceError {
        tracing::warn!(op, %fid, owner = %owner, error = %cause, "name insert failed, dropping new object");
        match self.send_drop_ref(progress, owner, fid, dir).await {
            Ok(rsp) => {
                if let Some(info) = rsp.released {
                    self.destroy_released(info).await;
                }
                cause
            }
            Err(rollback) => {
                tracing::error!(op, %fid, owner = %owner, error = %rollback, "rollback failed, object left without a name");
                NamespaceError::PartialCompletion {
                    op,
                    phase: "insert_name",
                    completed_on: owner,
                    failed_on: parent_target,
                    source: Box::new(cause),
                }
            }
        }
    }
}
