use cmm_proto::{LinkPhase, LinkReq, LinkRsp, ObjectAttrs};
use cmm_types::{Fid, TargetIndex};

use super::{pack_suppgids, Credentials, Dispatcher, OpProgress, OpState};
use crate::error::{NamespaceError, NsResult};

impl Dispatcher {
    /// Add the name `name` under `dst_parent` for the existing object `src`.
    pub async fn link(
        &self,
        creds: &Credentials,
        src: Fid,
        dst_parent: Fid,
        name: &str,
    ) -> NsResult<ObjectAttrs> {
        let mut progress = OpProgress::new("link");
        let result = self
            .do_link(&mut progress, creds, src, dst_parent, name)
            .await;
        self.finish(&mut progress, result)
    }

    async fn do_link(
        &self,
        progress: &mut OpProgress,
        creds: &Credentials,
        src: Fid,
        dst_parent: Fid,
        name: &str,
    ) -> NsResult<ObjectAttrs> {
        super::validate_name(name, self.config.load().max_name_len)?;
        let src_target = self.resolve(src)?;
        let dst_target = self.resolve(dst_parent)?;
        let _locks = self
            .lock(
                progress,
                &[
                    Self::update_lock(src_target, src),
                    Self::update_lock(dst_target, dst_parent),
                ],
            )
            .await?;

        progress.enter(OpState::Execute);
        let mut ctx = creds.context(src, dst_parent, name, 0);
        ctx.suppgids = pack_suppgids(creds, self.cached_gid(src), self.cached_gid(dst_parent));

        let (attrs, parent_times) = if src_target == dst_target {
            let req = LinkReq {
                ctx,
                phase: LinkPhase::Local,
            };
            let rsp = self.send_link(progress, src_target, src, &req).await?;
            (rsp.attrs, rsp.parent_times)
        } else {
            let add_ref = LinkReq {
                ctx: ctx.clone(),
                phase: LinkPhase::AddRef,
            };
            let added = self.send_link(progress, src_target, src, &add_ref).await?;
            let attrs = added.attrs.ok_or_else(|| {
                NamespaceError::InternalInconsistency(format!("add_ref on {src} returned no attributes"))
            })?;

            progress.enter(OpState::SecondTargetExecute);
            let insert = LinkReq {
                ctx,
                phase: LinkPhase::InsertName { mode: attrs.mode },
            };
            match self.send_link(progress, dst_target, dst_parent, &insert).await {
                Ok(rsp) => (Some(attrs), rsp.parent_times),
                Err(e) => {
                    return Err(self
                        .rollback_ref(progress, src_target, dst_target, src, e)
                        .await)
                }
            }
        };

        let attrs = attrs.ok_or_else(|| {
            NamespaceError::InternalInconsistency(format!("link of {src} returned no attributes"))
        })?;
        let cache = self.cache();
        cache.insert_entry(dst_parent, name, src);
        cache.insert_attrs(attrs.clone());
        if let Some(times) = parent_times {
            cache.update_times(dst_parent, times);
        }
        Ok(attrs)
    }

    async fn send_link(
        &self,
        progress: &mut OpProgress,
        index: TargetIndex,
        fid: Fid,
        req: &LinkReq,
    ) -> NsResult<LinkRsp> {
        self.call(progress, index, fid, false, |stub| {
            let req = req.clone();
            async move { stub.link(req).await }
        })
        .await
    }

    /// Give back the reference taken in the first phase.
    async fn rollback_ref(
        &self,
        progress: &mut OpProgress,
        src_target: TargetIndex,
        dst_target: TargetIndex,
        src: Fid,
        cause: NamespaceError,
    ) -> NamespaceError {
        tracing::warn!(%src, dst_target = %dst_target, error = %cause, "link name insert failed, dropping added reference");
        match self.send_drop_ref(progress, src_target, src, false).await {
            Ok(rsp) => {
                // The object may have lost its last name meanwhile.
                if let Some(info) = rsp.released {
                    self.destroy_released(info).await;
                }
                self.cache().evict_attrs(src);
                cause
            }
            Err(rollback) => {
                tracing::error!(%src, src_target = %src_target, error = %rollback, "link rollback failed, object holds an extra reference");
                NamespaceError::PartialCompletion {
                    op: "link",
                    phase: "insert_name",
                    completed_on: src_target,
                    failed_on: dst_target,
                    source: Box::new(cause),
                }
            }
        }
    }
}
