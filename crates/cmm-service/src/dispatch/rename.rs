use cmm_dlm::LockRequest;
use cmm_proto::{is_dir, LookupRsp, RenamePhase, RenameReq, RenameRsp, ReplacedEntry};
use cmm_types::{Fid, NamespaceCode, Status, TargetIndex};

use super::{pack_suppgids, Credentials, Dispatcher, OpProgress, OpState};
use crate::error::{NamespaceError, NsResult};

/// What a rename found before changing anything.
struct RenameCheck {
    src: LookupRsp,
    /// Empty directory the rename replaces.
    replaced_dir: Option<Fid>,
}

impl Dispatcher {
    /// Move `src_name` under `src_parent` to `dst_name` under `dst_parent`,
    /// replacing whatever `dst_name` pointed at.
    pub async fn rename(
        &self,
        creds: &Credentials,
        src_parent: Fid,
        src_name: &str,
        dst_parent: Fid,
        dst_name: &str,
    ) -> NsResult<()> {
        let mut progress = OpProgress::new("rename");
        let result = self
            .do_rename(&mut progress, creds, src_parent, src_name, dst_parent, dst_name)
            .await;
        self.finish(&mut progress, result)
    }

    async fn do_rename(
        &self,
        progress: &mut OpProgress,
        creds: &Credentials,
        src_parent: Fid,
        src_name: &str,
        dst_parent: Fid,
        dst_name: &str,
    ) -> NsResult<()> {
        let max = self.config.load().max_name_len;
        super::validate_name(src_name, max)?;
        super::validate_name(dst_name, max)?;
        let src_target = self.resolve(src_parent)?;
        let dst_target = self.resolve(dst_parent)?;

        let mut ctx = creds.context(src_parent, dst_parent, src_name, 0);
        ctx.suppgids = pack_suppgids(
            creds,
            self.cached_gid(src_parent),
            self.cached_gid(dst_parent),
        );
        let req = RenameReq {
            ctx,
            new_name: dst_name.to_string(),
            phase: RenamePhase::Local,
        };

        let parents = [
            Self::update_lock(src_target, src_parent),
            Self::update_lock(dst_target, dst_parent),
        ];
        let attempts = self.config.load().retry.max_attempts.max(1);
        let mut victim: Option<LockRequest> = None;
        let mut tries = 0;
        // A replaced directory stays locked from its emptiness check through
        // the rename.
        let (_locks, checked) = loop {
            let mut requests = parents.to_vec();
            requests.extend(victim);
            let locks = self.lock(progress, &requests).await?;

            progress.enter(OpState::Execute);
            let Some(checked) = self
                .precheck_rename(progress, src_target, dst_target, &req)
                .await?
            else {
                return Ok(());
            };
            let wanted = match checked.replaced_dir {
                Some(fid) => Some(Self::update_lock(self.resolve(fid)?, fid)),
                None => None,
            };
            if wanted.map(|r| r.fid) == victim.map(|r| r.fid) {
                break (locks, checked);
            }
            drop(locks);
            tries += 1;
            if tries >= attempts {
                return Err(NamespaceError::Rejected {
                    target: dst_target,
                    status: Status::new(NamespaceCode::BUSY),
                });
            }
            victim = wanted;
        };

        let (moved, replaced, src_times, dst_times) = if src_target == dst_target {
            let rsp = self.send_rename(progress, src_target, src_parent, &req).await?;
            (rsp.fid, rsp.replaced, rsp.src_parent_times, rsp.dst_parent_times)
        } else {
            let remove = RenameReq {
                phase: RenamePhase::RemoveSource,
                ..req.clone()
            };
            let removed = self.send_rename(progress, src_target, src_parent, &remove).await?;
            if removed.fid != checked.src.fid {
                tracing::warn!(
                    expected = %checked.src.fid,
                    removed = %removed.fid,
                    "source entry changed between check and removal"
                );
            }

            progress.enter(OpState::SecondTargetExecute);
            let insert = RenameReq {
                phase: RenamePhase::InsertTarget {
                    fid: removed.fid,
                    mode: removed.mode,
                },
                ..req
            };
            let inserted = match self.send_rename(progress, dst_target, dst_parent, &insert).await {
                Ok(rsp) => rsp,
                Err(e) => {
                    self.cache().remove_entry(src_parent, src_name);
                    tracing::error!(
                        fid = %removed.fid,
                        %src_parent,
                        src_name,
                        %dst_parent,
                        dst_name,
                        completed_on = %src_target,
                        failed_on = %dst_target,
                        error = %e,
                        "irrecoverable partial rename: source name removed, destination not inserted"
                    );
                    return Err(NamespaceError::PartialCompletion {
                        op: "rename",
                        phase: "insert_target",
                        completed_on: src_target,
                        failed_on: dst_target,
                        source: Box::new(e),
                    });
                }
            };
            (
                removed.fid,
                inserted.replaced,
                removed.src_parent_times,
                inserted.dst_parent_times,
            )
        };

        let cache = self.cache();
        cache.remove_entry(src_parent, src_name);
        cache.insert_entry(dst_parent, dst_name, moved);
        cache.evict_attrs(moved);
        if let Some(times) = src_times {
            cache.update_times(src_parent, times);
        }
        if let Some(times) = dst_times {
            cache.update_times(dst_parent, times);
        }

        if let Some(old) = replaced {
            self.release_replaced(progress, dst_target, old).await?;
        }
        Ok(())
    }

    /// Type and emptiness checks made before anything changes. A target
    /// cannot see into a directory owned by another target, and on two
    /// targets the source name is already gone when the destination would
    /// check. Returns `None` when source and destination are the same
    /// object.
    async fn precheck_rename(
        &self,
        progress: &mut OpProgress,
        src_target: TargetIndex,
        dst_target: TargetIndex,
        req: &RenameReq,
    ) -> NsResult<Option<RenameCheck>> {
        let src = self
            .raw_lookup(progress, src_target, req.ctx.fid1, &req.ctx.name)
            .await?;
        let old = match self
            .raw_lookup(progress, dst_target, req.ctx.fid2, &req.new_name)
            .await
        {
            Ok(old) => old,
            Err(NamespaceError::NotFound) => {
                return Ok(Some(RenameCheck {
                    src,
                    replaced_dir: None,
                }))
            }
            Err(e) => return Err(e),
        };
        if old.fid == src.fid {
            return Ok(None);
        }
        let rejected = |code| NamespaceError::Rejected {
            target: dst_target,
            status: Status::new(code),
        };
        let replaced_dir = match (is_dir(src.mode), is_dir(old.mode)) {
            (true, false) => return Err(rejected(NamespaceCode::NOT_DIRECTORY)),
            (false, true) => return Err(rejected(NamespaceCode::IS_DIRECTORY)),
            (true, true) => {
                let size = match &old.attrs {
                    Some(attrs) => attrs.size,
                    None => {
                        let owner = self.resolve(old.fid)?;
                        self.fetch_attrs(progress, owner, old.fid).await?.size
                    }
                };
                if size > 0 {
                    return Err(rejected(NamespaceCode::NOT_EMPTY));
                }
                Some(old.fid)
            }
            (false, false) => None,
        };
        Ok(Some(RenameCheck { src, replaced_dir }))
    }

    async fn send_rename(
        &self,
        progress: &mut OpProgress,
        index: TargetIndex,
        fid: Fid,
        req: &RenameReq,
    ) -> NsResult<RenameRsp> {
        self.call(progress, index, fid, false, |stub| {
            let req = req.clone();
            async move { stub.rename(req).await }
        })
        .await
    }

    /// Finish off the entry a rename displaced: drop its reference on the
    /// owner when the object lives elsewhere, then destroy whatever was
    /// released.
    async fn release_replaced(
        &self,
        progress: &mut OpProgress,
        dst_target: TargetIndex,
        old: ReplacedEntry,
    ) -> NsResult<()> {
        let cache = self.cache();
        cache.evict_attrs(old.fid);
        if is_dir(old.mode) {
            cache.invalidate_children(old.fid);
        }
        let released = if old.remote_object {
            self.drop_remote_ref(progress, "rename", dst_target, old.fid, is_dir(old.mode))
                .await?
        } else {
            old.released
        };
        if let Some(info) = released {
            self.destroy_released(info).await;
        }
        Ok(())
    }
}
