//! Connector handing out in-memory targets as if they were remote nodes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cmm_stubs::{ITargetConnector, ITargetStub};
use cmm_types::{make_error_msg, RPCCode, Result, TargetIndex};
use parking_lot::Mutex;

use crate::target::MemTarget;

/// Scheme accepted in connection info strings, e.g. `mem://node-3`.
pub const MEM_SCHEME: &str = "mem://";

/// Keeps one [`MemTarget`] per index alive across connects and disconnects,
/// so a reconnect sees the same namespace. Target 0 hosts the root.
pub struct MemConnector {
    stripe_count: u32,
    targets: Mutex<HashMap<TargetIndex, Arc<MemTarget>>>,
    live: Mutex<HashMap<TargetIndex, usize>>,
}

impl MemConnector {
    pub fn new(stripe_count: u32) -> Self {
        Self {
            stripe_count,
            targets: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// The target behind `index`, created on first use.
    pub fn target(&self, index: TargetIndex) -> Arc<MemTarget> {
        self.targets
            .lock()
            .entry(index)
            .or_insert_with(|| {
                let target = MemTarget::new(index).with_stripe_count(self.stripe_count);
                let target = if index == TargetIndex(0) {
                    target.with_root()
                } else {
                    target
                };
                Arc::new(target)
            })
            .clone()
    }

    /// Number of connections to `index` not yet torn down.
    pub fn live_connections(&self, index: TargetIndex) -> usize {
        self.live.lock().get(&index).copied().unwrap_or(0)
    }
}

impl Default for MemConnector {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ITargetConnector for MemConnector {
    async fn connect(&self, index: TargetIndex, info: &str) -> Result<Arc<dyn ITargetStub>> {
        if !info.starts_with(MEM_SCHEME) {
            return make_error_msg(
                RPCCode::INVALID_ADDR,
                format!("unsupported connection info {info:?}"),
            );
        }
        let target = self.target(index);
        *self.live.lock().entry(index).or_insert(0) += 1;
        tracing::debug!(target_index = %index, info, "connected to in-memory target");
        Ok(target)
    }

    async fn disconnect(&self, index: TargetIndex, _stub: Arc<dyn ITargetStub>) {
        let mut live = self.live.lock();
        if let Some(n) = live.get_mut(&index) {
            *n = n.saturating_sub(1);
        }
        tracing::debug!(target_index = %index, "disconnected from in-memory target");
    }
}
