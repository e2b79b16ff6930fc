//! unlink/rmdir and the compensating destroy of released data objects.

use cmm_dlm::LockRequest;
use cmm_proto::{
    DataLayout, DestroyInfo, DestroyObjectsReq, LockBits, UnlinkPhase, UnlinkReq, UnlinkRsp,
};
use cmm_types::{Fid, NamespaceCode, Status, TargetIndex, UtcTime};
use parking_lot::Mutex;

use super::{pack_suppgids, Credentials, Dispatcher, OpProgress, OpState};
use crate::error::{NamespaceError, NsResult};

/// Data objects that could not be destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanRecord {
    pub fid: Fid,
    pub layout: Option<DataLayout>,
    pub reason: String,
    pub recorded_at: UtcTime,
}

/// Orphans kept for later reclamation.
#[derive(Default)]
pub struct OrphanLog {
    records: Mutex<Vec<OrphanRecord>>,
}

impl OrphanLog {
    fn record(&self, fid: Fid, layout: Option<DataLayout>, reason: impl Into<String>) {
        self.records.lock().push(OrphanRecord {
            fid,
            layout,
            reason: reason.into(),
            recorded_at: UtcTime::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn records(&self) -> Vec<OrphanRecord> {
        self.records.lock().clone()
    }

    /// Take every record out of the log.
    pub fn drain(&self) -> Vec<OrphanRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl Dispatcher {
    pub async fn unlink(&self, creds: &Credentials, parent: Fid, name: &str) -> NsResult<Fid> {
        let mut progress = OpProgress::new("unlink");
        let result = self.do_unlink(&mut progress, creds, parent, name).await;
        self.finish(&mut progress, result)
    }

    pub async fn rmdir(&self, creds: &Credentials, parent: Fid, name: &str) -> NsResult<Fid> {
        let mut progress = OpProgress::new("rmdir");
        let result = self.do_rmdir(&mut progress, creds, parent, name).await;
        self.finish(&mut progress, result)
    }

    async fn do_unlink(
        &self,
        progress: &mut OpProgress,
        creds: &Credentials,
        parent: Fid,
        name: &str,
    ) -> NsResult<Fid> {
        super::validate_name(name, self.config.load().max_name_len)?;
        let parent_target = self.resolve(parent)?;
        let _locks = self
            .lock(progress, &[Self::update_lock(parent_target, parent)])
            .await?;

        progress.enter(OpState::Execute);
        let mut ctx = creds.context(parent, Fid::default(), name, 0);
        ctx.suppgids = pack_suppgids(creds, self.cached_gid(parent), None);
        let req = UnlinkReq {
            ctx,
            phase: UnlinkPhase::Local,
        };
        let rsp = self
            .call(progress, parent_target, parent, false, |stub| {
                let req = req.clone();
                async move { stub.unlink(req).await }
            })
            .await?;
        self.forget_entry(parent, name, &rsp);

        let released = if rsp.remote_object {
            self.drop_remote_ref(progress, "unlink", parent_target, rsp.fid, false)
                .await?
        } else {
            rsp.released
        };
        if let Some(info) = released {
            self.destroy_released(info).await;
        }
        Ok(rsp.fid)
    }

    async fn do_rmdir(
        &self,
        progress: &mut OpProgress,
        creds: &Credentials,
        parent: Fid,
        name: &str,
    ) -> NsResult<Fid> {
        let parent_target = self.resolve(parent)?;
        let attempts = self.config.load().retry.max_attempts.max(1);
        let mut tries = 0;
        let (_locks, child, child_target) = loop {
            let child = self.do_lookup(progress, parent, name).await?;
            if !child.is_dir() {
                return Err(NamespaceError::Rejected {
                    target: parent_target,
                    status: Status::new(NamespaceCode::NOT_DIRECTORY),
                });
            }

            progress.enter(OpState::Resolve);
            let child_target = self.resolve(child.fid)?;
            let locks = self
                .lock(
                    progress,
                    &[
                        Self::update_lock(parent_target, parent),
                        LockRequest::new(child_target, child.fid, LockBits::ALL),
                    ],
                )
                .await?;

            // The name may have been pointed elsewhere before the locks
            // were granted.
            progress.enter(OpState::Execute);
            let current = self.raw_lookup(progress, parent_target, parent, name).await?;
            if current.fid == child.fid {
                break (locks, child, child_target);
            }
            drop(locks);
            tracing::debug!(
                %parent,
                name,
                was = %child.fid,
                now = %current.fid,
                "rmdir target changed, resolving again"
            );
            self.cache().remove_entry(parent, name);
            tries += 1;
            if tries >= attempts {
                return Err(NamespaceError::Rejected {
                    target: parent_target,
                    status: Status::new(NamespaceCode::BUSY),
                });
            }
        };

        if child_target != parent_target {
            // The parent's target cannot see into a remote directory.
            let attrs = self.fetch_attrs(progress, child_target, child.fid).await?;
            if attrs.size > 0 {
                return Err(NamespaceError::Rejected {
                    target: child_target,
                    status: Status::new(NamespaceCode::NOT_EMPTY),
                });
            }
        }

        let mut ctx = creds.context(parent, child.fid, name, child.mode);
        ctx.suppgids = pack_suppgids(creds, self.cached_gid(parent), Some(child.gid));
        let req = UnlinkReq {
            ctx,
            phase: UnlinkPhase::Local,
        };
        let rsp = self
            .call(progress, parent_target, parent, false, |stub| {
                let req = req.clone();
                async move { stub.rmdir(req).await }
            })
            .await?;
        self.forget_entry(parent, name, &rsp);
        self.cache().invalidate_children(rsp.fid);

        if rsp.remote_object {
            self.drop_remote_ref(progress, "rmdir", parent_target, rsp.fid, true)
                .await?;
        }
        Ok(rsp.fid)
    }

    fn forget_entry(&self, parent: Fid, name: &str, rsp: &UnlinkRsp) {
        let cache = self.cache();
        cache.remove_entry(parent, name);
        cache.evict_attrs(rsp.fid);
        if let Some(times) = rsp.parent_times {
            cache.update_times(parent, times);
        }
    }

    /// Second phase of removing a name whose object lives elsewhere: drop
    /// the reference on the object's owner.
    pub(super) async fn drop_remote_ref(
        &self,
        progress: &mut OpProgress,
        op: &'static str,
        completed_on: TargetIndex,
        fid: Fid,
        dir: bool,
    ) -> NsResult<Option<DestroyInfo>> {
        progress.enter(OpState::SecondTargetExecute);
        let owner = self.resolve(fid).map_err(|e| NamespaceError::PartialCompletion {
            op,
            phase: "drop_ref",
            completed_on,
            failed_on: completed_on,
            source: Box::new(e),
        })?;
        match self.send_drop_ref(progress, owner, fid, dir).await {
            Ok(rsp) => Ok(rsp.released),
            Err(e) => {
                tracing::error!(
                    op,
                    %fid,
                    completed_on = %completed_on,
                    failed_on = %owner,
                    error = %e,
                    "name removed but the object kept its reference"
                );
                Err(NamespaceError::PartialCompletion {
                    op,
                    phase: "drop_ref",
                    completed_on,
                    failed_on: owner,
                    source: Box::new(e),
                })
            }
        }
    }

    pub(super) async fn send_drop_ref(
        &self,
        progress: &mut OpProgress,
        owner: TargetIndex,
        fid: Fid,
        dir: bool,
    ) -> NsResult<UnlinkRsp> {
        let req = UnlinkReq {
            ctx: Default::default(),
            phase: UnlinkPhase::DropRef { fid },
        };
        self.call(progress, owner, fid, false, |stub| {
            let req = req.clone();
            async move {
                if dir {
                    stub.rmdir(req).await
                } else {
                    stub.unlink(req).await
                }
            }
        })
        .await
    }

    /// Destroy the data objects of an object whose last reference is gone.
    /// Never fails: problems are logged and recorded as orphans.
    pub(super) async fn destroy_released(&self, info: DestroyInfo) {
        let Some(layout) = info.layout else {
            return;
        };
        if !layout.is_valid() {
            tracing::error!(
                fid = %info.fid,
                mode = format_args!("{:#o}", info.mode),
                "target reported data objects with an empty layout"
            );
            self.orphans
                .record(info.fid, Some(layout), "empty layout in destroy reply");
            return;
        }
        let req = DestroyObjectsReq {
            fid: info.fid,
            layout: layout.clone(),
        };
        match self.data.destroy(req).await {
            Ok(rsp) => {
                tracing::debug!(fid = %info.fid, destroyed = rsp.destroyed, "data objects destroyed");
            }
            Err(status) => {
                tracing::warn!(fid = %info.fid, %status, "failed to destroy data objects, recorded as orphan");
                self.orphans.record(info.fid, Some(layout), status.describe());
            }
        }
    }

    /// Retry destroying every orphan with a usable layout. Returns how many
    /// were reclaimed.
    pub async fn retry_orphans(&self) -> usize {
        let mut reclaimed = 0;
        for record in self.orphans.drain() {
            match record.layout {
                Some(layout) if layout.is_valid() => {
                    let req = DestroyObjectsReq {
                        fid: record.fid,
                        layout: layout.clone(),
                    };
                    match self.data.destroy(req).await {
                        Ok(_) => reclaimed += 1,
                        Err(status) => {
                            self.orphans.record(record.fid, Some(layout), status.describe())
                        }
                    }
                }
                layout => self.orphans.record(record.fid, layout, record.reason),
            }
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, remaining = self.orphans.len(), "orphans reclaimed");
        }
        reclaimed
    }
}

