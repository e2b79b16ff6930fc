//! Namespace operations routed across metadata targets.
//!
//! Every operation walks the same stages (see [`OpState`]): resolve the
//! owning targets through the partition table, take namespace locks in
//! canonical order, optionally allocate an identifier, then execute on one
//! target or, for objects and names living on different targets, on two
//! targets in a fixed order. Remote statuses are translated into
//! [`NamespaceError`] here and nowhere else.

mod context;
mod create;
mod link;
mod lookup;
mod progress;
mod query;
mod rename;
mod unlink;

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use cmm_dlm::{LockAdapter, LockError, LockRequest, LockSet, NamespaceCache};
use cmm_fld::ObjectLocator;
use cmm_proto::LockBits;
use cmm_stubs::{IDataObjectStub, IFidAllocator, ITargetStub};
use cmm_types::{Fid, Gid, NodeOrdinal, Result, TargetIndex};

use crate::config::{DirPlacement, NamespaceConfig};
use crate::error::{delivery_of, Delivery, NamespaceError, NsResult};
use crate::registry::{TargetRef, TargetRegistry};
use crate::retry::ExponentialBackoff;

pub use context::{
    mkdir_mode, mknod_mode, pack_suppgids, symlink_mode, validate_name, Credentials,
};
pub use progress::{OpProgress, OpState};
pub use unlink::{OrphanLog, OrphanRecord};

/// Shared services an operation needs.
pub struct Dispatcher {
    config: ArcSwap<NamespaceConfig>,
    locator: Arc<ObjectLocator>,
    registry: Arc<TargetRegistry>,
    locks: Arc<LockAdapter>,
    fids: Arc<dyn IFidAllocator>,
    data: Arc<dyn IDataObjectStub>,
    orphans: OrphanLog,
    placement: AtomicUsize,
    ordinal: AtomicU32,
}

impl Dispatcher {
    pub(crate) fn new(
        config: NamespaceConfig,
        locator: Arc<ObjectLocator>,
        registry: Arc<TargetRegistry>,
        locks: Arc<LockAdapter>,
        fids: Arc<dyn IFidAllocator>,
        data: Arc<dyn IDataObjectStub>,
    ) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            locator,
            registry,
            locks,
            fids,
            data,
            orphans: OrphanLog::default(),
            placement: AtomicUsize::new(0),
            ordinal: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> Arc<NamespaceConfig> {
        self.config.load_full()
    }

    /// Apply the runtime-changeable part of `next`.
    pub fn update_config(&self, next: &NamespaceConfig) {
        let mut config = NamespaceConfig::clone(&self.config.load());
        cmm_config::Config::hot_update(&mut config, next);
        self.config.store(Arc::new(config));
    }

    pub fn local_ordinal(&self) -> NodeOrdinal {
        NodeOrdinal(self.ordinal.load(Ordering::Acquire))
    }

    pub(crate) fn set_local_ordinal(&self, ordinal: NodeOrdinal) {
        self.ordinal.store(ordinal.get(), Ordering::Release);
    }

    pub fn cache(&self) -> &NamespaceCache {
        self.locks.cache()
    }

    pub fn orphans(&self) -> &OrphanLog {
        &self.orphans
    }

    fn resolve(&self, fid: Fid) -> NsResult<TargetIndex> {
        Ok(self.locator.resolve(fid)?)
    }

    fn target(&self, index: TargetIndex, fid: Fid) -> NsResult<TargetRef> {
        self.registry
            .find(index)
            .ok_or(NamespaceError::StaleMapping { fid, target: index })
    }

    /// Target that should own a new object created under `parent`.
    fn placement_target(&self, parent_target: TargetIndex, is_dir: bool) -> TargetIndex {
        if !is_dir || self.config.load().dir_placement != DirPlacement::RoundRobin {
            return parent_target;
        }
        let indices = self.registry.indices();
        if indices.is_empty() {
            return parent_target;
        }
        let n = self.placement.fetch_add(1, Ordering::Relaxed);
        indices[n % indices.len()]
    }

    /// Group of `fid` as far as the cache knows it.
    fn cached_gid(&self, fid: Fid) -> Option<Gid> {
        self.cache().attrs(fid).map(|a| a.gid)
    }

    /// Take `requests` in canonical order. Failures to reach a lock manager
    /// are retried: nothing has been changed yet.
    async fn lock(&self, progress: &mut OpProgress, requests: &[LockRequest]) -> NsResult<LockSet> {
        progress.enter(OpState::LockAcquire);
        let config = self.config.load_full();
        let mut backoff = ExponentialBackoff::from_config(&config.retry);
        loop {
            match self.locks.acquire_ordered(requests, config.lock_policy()).await {
                Ok(set) => return Ok(set),
                Err(LockError::Remote { fid, target, status })
                    if delivery_of(status.code()) != Delivery::Answered =>
                {
                    let Some(wait) = backoff.next_wait() else {
                        return Err(LockError::Remote { fid, target, status }.into());
                    };
                    tracing::warn!(
                        op = progress.op(),
                        %fid,
                        target_index = %target,
                        %status,
                        retry = backoff.attempts(),
                        "lock manager unreachable, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn update_lock(target: TargetIndex, fid: Fid) -> LockRequest {
        LockRequest::new(target, fid, LockBits::UPDATE)
    }

    /// Issue one request to `index`.
    ///
    /// Requests that provably never left this node are retried for every
    /// operation; a request whose delivery is unknown is retried only when
    /// `idempotent`.
    async fn call<T, F, Fut>(
        &self,
        progress: &mut OpProgress,
        index: TargetIndex,
        fid: Fid,
        idempotent: bool,
        f: F,
    ) -> NsResult<T>
    where
        F: Fn(Arc<dyn ITargetStub>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config.load_full();
        let mut backoff = ExponentialBackoff::from_config(&config.retry);
        loop {
            let target = self.target(index, fid)?;
            let result = f(target.stub().clone()).await;
            drop(target);

            let status = match result {
                Ok(v) => {
                    progress.mark_side_effect();
                    return Ok(v);
                }
                Err(status) => status,
            };
            let delivery = delivery_of(status.code());
            if delivery != Delivery::NotSent {
                progress.mark_side_effect();
            }
            let retry = match delivery {
                Delivery::NotSent => true,
                Delivery::Unknown => idempotent,
                Delivery::Answered => false,
            };
            if retry {
                if let Some(wait) = backoff.next_wait() {
                    tracing::debug!(
                        op = progress.op(),
                        target_index = %index,
                        %status,
                        retry = backoff.attempts(),
                        "retrying target request"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }
            return Err(NamespaceError::from_remote(index, fid, status));
        }
    }

    /// Record the outcome in `progress`.
    fn finish<T>(&self, progress: &mut OpProgress, result: NsResult<T>) -> NsResult<T> {
        match &result {
            Ok(_) => progress.complete(),
            Err(e) => {
                let stage = progress.state();
                progress.fail(failed_target(e));
                // Ordinary outcomes are not worth more than a trace line.
                if e.is_not_found() || matches!(e, NamespaceError::AlreadyExists) {
                    tracing::trace!(op = progress.op(), %stage, error = %e, "op failed");
                } else {
                    tracing::debug!(
                        op = progress.op(),
                        %stage,
                        side_effects = progress.has_side_effects(),
                        error = %e,
                        "op failed"
                    );
                }
            }
        }
        result
    }
}

fn failed_target(err: &NamespaceError) -> Option<TargetIndex> {
    match err {
        NamespaceError::StaleMapping { target, .. }
        | NamespaceError::RemoteUnavailable { target, .. }
        | NamespaceError::Rejected { target, .. } => Some(*target),
        NamespaceError::PartialCompletion { failed_on, .. } => Some(*failed_on),
        NamespaceError::Lock(LockError::Remote { target, .. }) => Some(*target),
        _ => None,
    }
}
