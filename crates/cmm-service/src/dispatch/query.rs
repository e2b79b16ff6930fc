//! Target-wide queries, answered by this node's own target.

use cmm_proto::{MaxSizeReq, MaxSizeRsp, RootGetReq, StatFsReq, StatFsRsp};
use cmm_types::{Fid, NodeOrdinal, TargetIndex};

use super::{Dispatcher, OpProgress, OpState};
use crate::error::{NamespaceError, NsResult};

impl Dispatcher {
    fn local_target(&self) -> TargetIndex {
        TargetIndex(self.local_ordinal().get())
    }

    /// Identifier of the namespace root. Only the master node (ordinal 0)
    /// answers it.
    pub async fn root_get(&self) -> NsResult<Fid> {
        let mut progress = OpProgress::new("root_get");
        let result = self.do_root_get(&mut progress).await;
        self.finish(&mut progress, result)
    }

    async fn do_root_get(&self, progress: &mut OpProgress) -> NsResult<Fid> {
        let ordinal = self.local_ordinal();
        if ordinal != NodeOrdinal(0) {
            return Err(NamespaceError::InvalidArgument(format!(
                "root_get on node {ordinal}, only the master knows the root"
            )));
        }
        progress.enter(OpState::Execute);
        let rsp = self
            .call(progress, self.local_target(), Fid::default(), true, |stub| async move {
                stub.root_get(RootGetReq {}).await
            })
            .await?;
        Ok(rsp.fid)
    }

    pub async fn statfs(&self) -> NsResult<StatFsRsp> {
        let mut progress = OpProgress::new("statfs");
        progress.enter(OpState::Execute);
        let result = self
            .call(&mut progress, self.local_target(), Fid::default(), true, |stub| async move {
                stub.statfs(StatFsReq {}).await
            })
            .await;
        self.finish(&mut progress, result)
    }

    /// Largest layout and cookie sizes the local target may return.
    pub async fn get_maxsize(&self) -> NsResult<MaxSizeRsp> {
        let mut progress = OpProgress::new("get_maxsize");
        progress.enter(OpState::Execute);
        let result = self
            .call(&mut progress, self.local_target(), Fid::default(), true, |stub| async move {
                stub.get_maxsize(MaxSizeReq {}).await
            })
            .await;
        self.finish(&mut progress, result)
    }
}
