//! Live metadata targets and their connection handles.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use cmm_stubs::{ITargetConnector, ITargetStub};
use cmm_types::TargetIndex;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::RegistryError;

/// One registered metadata target.
pub struct Target {
    index: TargetIndex,
    info: String,
    stub: Arc<dyn ITargetStub>,
    refs: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,
}

impl Target {
    pub fn index(&self) -> TargetIndex {
        self.index
    }

    pub fn connection_info(&self) -> &str {
        &self.info
    }

    pub fn stub(&self) -> &Arc<dyn ITargetStub> {
        &self.stub
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.ref_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A transient reference to a target held by an in-flight operation.
pub struct TargetRef {
    target: Arc<Target>,
}

impl Deref for TargetRef {
    type Target = Target;

    fn deref(&self) -> &Target {
        &self.target
    }
}

impl Drop for TargetRef {
    fn drop(&mut self) {
        if self.target.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.target.idle.notify_waiters();
        }
    }
}

/// Index -> target map.
///
/// Readers load an immutable snapshot; writers serialize on `mutate` and
/// publish a modified copy.
pub struct TargetRegistry {
    mutate: Mutex<()>,
    targets: ArcSwap<BTreeMap<TargetIndex, Arc<Target>>>,
    connector: Arc<dyn ITargetConnector>,
}

impl TargetRegistry {
    pub fn new(connector: Arc<dyn ITargetConnector>) -> Self {
        Self {
            mutate: Mutex::new(()),
            targets: ArcSwap::from_pointee(BTreeMap::new()),
            connector,
        }
    }

    pub fn connector(&self) -> &Arc<dyn ITargetConnector> {
        &self.connector
    }

    pub fn add(
        &self,
        index: TargetIndex,
        stub: Arc<dyn ITargetStub>,
        info: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let _guard = self.mutate.lock();
        let current = self.targets.load_full();
        if current.contains_key(&index) {
            return Err(RegistryError::AlreadyExists { index });
        }
        let mut next = BTreeMap::clone(&current);
        next.insert(
            index,
            Arc::new(Target {
                index,
                info: info.into(),
                stub,
                refs: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        );
        self.targets.store(Arc::new(next));
        tracing::info!(target_index = %index, "target registered");
        Ok(())
    }

    pub fn contains(&self, index: TargetIndex) -> bool {
        self.targets.load().contains_key(&index)
    }

    /// A reference to `index`, unless it is missing or draining.
    pub fn find(&self, index: TargetIndex) -> Option<TargetRef> {
        let target = self.targets.load().get(&index)?.clone();
        if target.is_draining() {
            return None;
        }
        target.refs.fetch_add(1, Ordering::AcqRel);
        let guard = TargetRef { target };
        // A drain that started after the first check must not see us.
        if guard.is_draining() {
            return None;
        }
        Some(guard)
    }

    /// Drain `index`, wait for its in-flight references, then drop it and
    /// tear its connection down.
    pub async fn remove(&self, index: TargetIndex) -> Result<(), RegistryError> {
        let target = {
            let _guard = self.mutate.lock();
            let target = self
                .targets
                .load()
                .get(&index)
                .cloned()
                .ok_or(RegistryError::NotFound { index })?;
            target.draining.store(true, Ordering::Release);
            target
        };
        target.wait_idle().await;
        if !self.unpublish(index) {
            return Err(RegistryError::NotFound { index });
        }
        self.connector.disconnect(index, target.stub.clone()).await;
        tracing::info!(target_index = %index, "target removed");
        Ok(())
    }

    fn unpublish(&self, index: TargetIndex) -> bool {
        let _guard = self.mutate.lock();
        let current = self.targets.load_full();
        if !current.contains_key(&index) {
            return false;
        }
        let mut next = BTreeMap::clone(&current);
        next.remove(&index);
        self.targets.store(Arc::new(next));
        true
    }

    pub fn count(&self) -> usize {
        self.targets.load().len()
    }

    pub fn indices(&self) -> Vec<TargetIndex> {
        self.targets.load().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.load().is_empty()
    }

    /// Drain and remove every target. Safe to call more than once; returns
    /// how many targets this call removed.
    pub async fn shutdown_all(&self) -> usize {
        let targets: Vec<Arc<Target>> = {
            let _guard = self.mutate.lock();
            let current = self.targets.load();
            for t in current.values() {
                t.draining.store(true, Ordering::Release);
            }
            current.values().cloned().collect()
        };

        let mut removed = 0;
        for target in targets {
            if target.ref_count() > 0 {
                tracing::debug!(
                    target_index = %target.index,
                    refs = target.ref_count(),
                    "waiting for in-flight operations"
                );
            }
            target.wait_idle().await;
            if self.unpublish(target.index) {
                self.connector
                    .disconnect(target.index, target.stub.clone())
                    .await;
                removed += 1;
            }
        }
        tracing::info!(removed, "all targets shut down");
        removed
    }
}
