//! Configuration events and the manager's lifecycle.

use std::sync::Arc;

use cmm_dlm::{LockAdapter, NamespaceCache};
use cmm_fld::{ObjectLocator, SeqFidAllocator};
use cmm_proto::ConfigEvent;
use cmm_stubs::{IDataObjectStub, IFidAllocator, ILockManager, ITargetConnector};
use cmm_types::{Fid, LockOwnerId, NodeOrdinal, TargetIndex};
use parking_lot::Mutex;

use crate::config::NamespaceConfig;
use crate::dispatch::Dispatcher;
use crate::error::{NamespaceError, NsResult};
use crate::registry::TargetRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Closed,
}

/// External services the manager is wired to.
pub struct Collaborators {
    pub connector: Arc<dyn ITargetConnector>,
    pub lock_manager: Arc<dyn ILockManager>,
    /// Identifier allocator. When unset, each node allocates from its own
    /// sequence slot of the partition table ranges, picked by its ordinal.
    pub fids: Option<Arc<dyn IFidAllocator>>,
    pub data: Arc<dyn IDataObjectStub>,
}

/// Owns the registry, partition table and lock adapter of one node and
/// applies configuration events to them.
pub struct NamespaceManager {
    state: Mutex<ManagerState>,
    ordinal: Mutex<Option<NodeOrdinal>>,
    locator: Arc<ObjectLocator>,
    registry: Arc<TargetRegistry>,
    locks: Arc<LockAdapter>,
    seq_fids: Option<Arc<SeqFidAllocator>>,
    dispatcher: Dispatcher,
}

impl NamespaceManager {
    pub fn new(config: NamespaceConfig, collaborators: Collaborators) -> Self {
        let locator = Arc::new(ObjectLocator::new(config.fld.clone()));
        let registry = Arc::new(TargetRegistry::new(collaborators.connector));
        let owner = LockOwnerId(config.lock_owner.unwrap_or(u64::from(std::process::id())));
        let locks = Arc::new(LockAdapter::new(
            owner,
            collaborators.lock_manager,
            Arc::new(NamespaceCache::new()),
        ));
        let (fids, seq_fids) = match collaborators.fids {
            Some(fids) => (fids, None),
            None => {
                let seq = Arc::new(SeqFidAllocator::new(locator.clone()));
                (seq.clone() as Arc<dyn IFidAllocator>, Some(seq))
            }
        };
        let dispatcher = Dispatcher::new(
            config,
            locator.clone(),
            registry.clone(),
            locks.clone(),
            fids,
            collaborators.data,
        );
        Self {
            state: Mutex::new(ManagerState::Uninitialized),
            ordinal: Mutex::new(None),
            locator,
            registry,
            locks,
            seq_fids,
            dispatcher,
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn locator(&self) -> &ObjectLocator {
        &self.locator
    }

    pub fn locks(&self) -> &LockAdapter {
        &self.locks
    }

    /// Namespace operations; refused unless the manager is initialized.
    pub fn ops(&self) -> NsResult<&Dispatcher> {
        match self.state() {
            ManagerState::Initialized => Ok(&self.dispatcher),
            state => Err(NamespaceError::NotReady { state }),
        }
    }

    pub fn update_config(&self, next: &NamespaceConfig) {
        self.dispatcher.update_config(next);
    }

    pub async fn process_config(&self, event: ConfigEvent) -> NsResult<()> {
        tracing::debug!(event = event.name(), "processing config event");
        match event {
            ConfigEvent::Setup { local_ordinal } => self.setup(local_ordinal),
            ConfigEvent::AddTarget {
                index,
                connection_info,
            } => self.add_target(index, &connection_info).await,
            ConfigEvent::Cleanup => self.cleanup().await,
        }
    }

    fn setup(&self, local_ordinal: NodeOrdinal) -> NsResult<()> {
        let state = self.state();
        if matches!(state, ManagerState::ShuttingDown | ManagerState::Closed) {
            return Err(NamespaceError::NotReady { state });
        }
        {
            let mut ordinal = self.ordinal.lock();
            if let Some(current) = *ordinal {
                return Err(NamespaceError::InvalidArgument(format!(
                    "node already set up with ordinal {current}"
                )));
            }
            if let Some(seq) = &self.seq_fids {
                seq.set_node(local_ordinal)
                    .map_err(|e| NamespaceError::InvalidArgument(e.to_string()))?;
            }
            *ordinal = Some(local_ordinal);
        }
        self.dispatcher.set_local_ordinal(local_ordinal);
        self.locks.start();
        tracing::info!(%local_ordinal, lock_owner = %self.locks.owner(), "namespace manager set up");
        Ok(())
    }

    pub async fn add_target(&self, index: TargetIndex, connection_info: &str) -> NsResult<()> {
        if self.ordinal.lock().is_none() {
            return Err(NamespaceError::InvalidArgument(
                "target added before setup".into(),
            ));
        }
        let state = self.state();
        if matches!(state, ManagerState::ShuttingDown | ManagerState::Closed) {
            return Err(NamespaceError::NotReady { state });
        }
        if self.registry.contains(index) {
            return Err(NamespaceError::AlreadyExists);
        }

        let connector = self.registry.connector().clone();
        let stub = connector
            .connect(index, connection_info)
            .await
            .map_err(|status| NamespaceError::from_remote(index, Fid::default(), status))?;
        if let Err(e) = self.registry.add(index, stub.clone(), connection_info) {
            tracing::info!(target_index = %index, "target registered concurrently, dropping new connection");
            connector.disconnect(index, stub).await;
            return Err(e.into());
        }
        if let Err(e) = self.locator.attach_target(index) {
            tracing::error!(target_index = %index, error = %e, "cannot attach target to partition table");
            if let Err(removed) = self.registry.remove(index).await {
                tracing::warn!(target_index = %index, error = %removed, "target vanished during rollback");
            }
            return Err(e.into());
        }

        {
            let mut state = self.state.lock();
            if *state == ManagerState::Uninitialized {
                *state = ManagerState::Initialized;
            }
        }
        tracing::info!(target_index = %index, connection_info, "target added");
        Ok(())
    }

    /// Drain one target and drop it from the registry and partition table.
    pub async fn remove_target(&self, index: TargetIndex) -> NsResult<()> {
        let state = self.state();
        if state != ManagerState::Initialized {
            return Err(NamespaceError::NotReady { state });
        }
        self.locator.begin_drain(index)?;
        if let Err(e) = self.registry.remove(index).await {
            if let Err(restore) = self.locator.mark_up(index) {
                tracing::warn!(target_index = %index, error = %restore, "cannot reactivate target");
            }
            return Err(e.into());
        }
        self.locator.detach_target(index)?;
        tracing::info!(target_index = %index, "target removed");
        Ok(())
    }

    async fn cleanup(&self) -> NsResult<()> {
        {
            let mut state = self.state.lock();
            if *state == ManagerState::Closed {
                return Ok(());
            }
            *state = ManagerState::ShuttingDown;
        }

        let attached: Vec<TargetIndex> = self
            .locator
            .snapshot()
            .targets()
            .map(|(index, _)| index)
            .collect();
        for index in &attached {
            if let Err(e) = self.locator.begin_drain(*index) {
                tracing::warn!(target_index = %index, error = %e, "cannot drain target");
            }
        }

        let removed = self.registry.shutdown_all().await;

        for index in &attached {
            if let Err(e) = self.locator.detach_target(*index) {
                tracing::warn!(target_index = %index, error = %e, "cannot detach target");
            }
        }
        self.locks.stop().await;

        if self.registry.count() != 0 || !self.registry.is_empty() {
            debug_assert!(false, "targets registered after shutdown");
            return Err(NamespaceError::InternalInconsistency(format!(
                "{} targets still registered after shutdown",
                self.registry.count()
            )));
        }
        *self.state.lock() = ManagerState::Closed;
        tracing::info!(removed, "namespace manager cleaned up");
        Ok(())
    }

    /// Tear the manager down.
    ///
    /// # Panics
    ///
    /// When targets are still registered: `Cleanup` must run first.
    pub fn destroy(self) {
        let remaining = self.registry.count();
        if remaining > 0 {
            panic!("namespace manager destroyed with {remaining} targets still registered");
        }
    }
}

impl Drop for NamespaceManager {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if matches!(state, ManagerState::Initialized | ManagerState::ShuttingDown) {
            tracing::error!(?state, targets = self.registry.count(), "namespace manager dropped without cleanup");
        }
    }
}
