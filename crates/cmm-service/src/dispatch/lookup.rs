use cmm_dlm::LockRequest;
use cmm_proto::{GetAttrReq, LockBits, LookupReq, LookupRsp, ObjectAttrs};
use cmm_types::{Fid, TargetIndex};

use super::{Credentials, Dispatcher, OpProgress, OpState};
use crate::error::NsResult;

impl Dispatcher {
    /// Resolve `name` under `parent`.
    ///
    /// Served from the cache while the parent's LOOKUP lock is held. An entry
    /// whose object lives on another target is completed with attributes
    /// from the object's owner.
    pub async fn lookup(&self, _creds: &Credentials, parent: Fid, name: &str) -> NsResult<ObjectAttrs> {
        let mut progress = OpProgress::new("lookup");
        let result = self.do_lookup(&mut progress, parent, name).await;
        self.finish(&mut progress, result)
    }

    pub(super) async fn do_lookup(
        &self,
        progress: &mut OpProgress,
        parent: Fid,
        name: &str,
    ) -> NsResult<ObjectAttrs> {
        super::validate_name(name, self.config.load().max_name_len)?;
        let parent_target = self.resolve(parent)?;
        let _locks = self
            .lock(
                progress,
                &[LockRequest::new(parent_target, parent, LockBits::LOOKUP)],
            )
            .await?;

        if let Some((_, attrs)) = self.cache().lookup(parent, name) {
            tracing::trace!(%parent, name, "lookup served from cache");
            return Ok(attrs);
        }

        progress.enter(OpState::Execute);
        let req = LookupReq {
            parent,
            name: name.to_string(),
        };
        let rsp = self
            .call(progress, parent_target, parent, true, |stub| {
                let req = req.clone();
                async move { stub.lookup(req).await }
            })
            .await?;

        let attrs = match rsp.attrs {
            Some(attrs) => attrs,
            None => {
                progress.enter(OpState::SecondTargetExecute);
                let owner = self.resolve(rsp.fid)?;
                self.fetch_attrs(progress, owner, rsp.fid).await?
            }
        };
        self.cache().insert_entry(parent, name, rsp.fid);
        self.cache().insert_attrs(attrs.clone());
        Ok(attrs)
    }

    /// Current attributes of `fid` from its owning target.
    pub async fn getattr(&self, _creds: &Credentials, fid: Fid) -> NsResult<ObjectAttrs> {
        let mut progress = OpProgress::new("getattr");
        let result = self.do_getattr(&mut progress, fid).await;
        self.finish(&mut progress, result)
    }

    async fn do_getattr(&self, progress: &mut OpProgress, fid: Fid) -> NsResult<ObjectAttrs> {
        let owner = self.resolve(fid)?;
        let _locks = self
            .lock(progress, &[LockRequest::new(owner, fid, LockBits::LOOKUP)])
            .await?;
        if let Some(attrs) = self.cache().attrs(fid) {
            return Ok(attrs);
        }
        progress.enter(OpState::Execute);
        let attrs = self.fetch_attrs(progress, owner, fid).await?;
        self.cache().insert_attrs(attrs.clone());
        Ok(attrs)
    }

    /// Look `name` up on `index` itself, bypassing the cache.
    pub(super) async fn raw_lookup(
        &self,
        progress: &mut OpProgress,
        index: TargetIndex,
        parent: Fid,
        name: &str,
    ) -> NsResult<LookupRsp> {
        let req = LookupReq {
            parent,
            name: name.to_string(),
        };
        self.call(progress, index, parent, true, |stub| {
            let req = req.clone();
            async move { stub.lookup(req).await }
        })
        .await
    }

    pub(super) async fn fetch_attrs(
        &self,
        progress: &mut OpProgress,
        owner: TargetIndex,
        fid: Fid,
    ) -> NsResult<ObjectAttrs> {
        let rsp = self
            .call(progress, owner, fid, true, |stub| async move {
                stub.getattr(GetAttrReq { fid }).await
            })
            .await?;
        Ok(rsp.attrs)
    }
}
