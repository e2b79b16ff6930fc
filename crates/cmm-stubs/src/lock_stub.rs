//! Distributed lock manager contract and a recording mock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cmm_proto::{EnqueueReq, EnqueueRsp, LockDesc};
use cmm_types::{make_error, LockCode, LockCookie, LockOwnerId, Result};
use parking_lot::Mutex;

/// Callbacks the lock manager invokes on a lock holder.
///
/// Both run on the lock manager's thread and must not block or await.
pub trait LockCallbacks: Send + Sync {
    /// Another owner is waiting for a lock conflicting with `lock`.
    fn blocking(&self, lock: &LockDesc);

    /// `lock` has been cancelled and is no longer held.
    fn canceling(&self, lock: &LockDesc);
}

#[async_trait]
pub trait ILockManager: Send + Sync {
    fn register_callbacks(&self, owner: LockOwnerId, callbacks: Arc<dyn LockCallbacks>);

    fn unregister_callbacks(&self, owner: LockOwnerId);

    /// Request a lock; resolves once granted or when the wait policy gives up.
    async fn enqueue(&self, req: EnqueueReq) -> Result<EnqueueRsp>;

    /// Give a granted lock back. Fires the owner's `canceling` callback.
    async fn cancel(&self, owner: LockOwnerId, cookie: LockCookie) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

type EnqueueHandler = Box<dyn Fn(&EnqueueReq) -> Result<()> + Send + Sync>;

/// Grants every request immediately unless an enqueue handler rejects it.
///
/// Tests drive revocation with [`MockLockManager::fire_blocking`].
#[derive(Default)]
pub struct MockLockManager {
    next_cookie: AtomicU64,
    callbacks: Mutex<HashMap<LockOwnerId, Arc<dyn LockCallbacks>>>,
    granted: Mutex<HashMap<LockCookie, (LockOwnerId, LockDesc)>>,
    enqueue_handler: Mutex<Option<EnqueueHandler>>,
    enqueued: Mutex<Vec<EnqueueReq>>,
    cancelled: Mutex<Vec<LockCookie>>,
}

impl MockLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enqueue(&self, f: impl Fn(&EnqueueReq) -> Result<()> + Send + Sync + 'static) {
        *self.enqueue_handler.lock() = Some(Box::new(f));
    }

    pub fn enqueued(&self) -> Vec<EnqueueReq> {
        self.enqueued.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<LockCookie> {
        self.cancelled.lock().clone()
    }

    pub fn granted(&self) -> Vec<LockDesc> {
        self.granted.lock().values().map(|(_, d)| d.clone()).collect()
    }

    /// Invoke the holder's `blocking` callback for every granted lock on
    /// `resource`.
    pub fn fire_blocking(&self, resource: cmm_types::Fid) -> usize {
        let targets: Vec<(LockOwnerId, LockDesc)> = self
            .granted
            .lock()
            .values()
            .filter(|(_, d)| d.resource == resource)
            .cloned()
            .collect();
        let callbacks = self.callbacks.lock().clone();
        for (owner, desc) in &targets {
            if let Some(cb) = callbacks.get(owner) {
                cb.blocking(desc);
            }
        }
        targets.len()
    }
}

#[async_trait]
impl ILockManager for MockLockManager {
    fn register_callbacks(&self, owner: LockOwnerId, callbacks: Arc<dyn LockCallbacks>) {
        self.callbacks.lock().insert(owner, callbacks);
    }

    fn unregister_callbacks(&self, owner: LockOwnerId) {
        self.callbacks.lock().remove(&owner);
    }

    async fn enqueue(&self, req: EnqueueReq) -> Result<EnqueueRsp> {
        self.enqueued.lock().push(req.clone());
        if let Some(f) = self.enqueue_handler.lock().as_ref() {
            f(&req)?;
        }
        let cookie = LockCookie(self.next_cookie.fetch_add(1, Ordering::Relaxed) + 1);
        let desc = LockDesc {
            cookie,
            target: req.target,
            resource: req.resource,
            bits: req.bits,
        };
        self.granted.lock().insert(cookie, (req.owner, desc));
        Ok(EnqueueRsp { cookie })
    }

    async fn cancel(&self, owner: LockOwnerId, cookie: LockCookie) -> Result<()> {
        self.cancelled.lock().push(cookie);
        let removed = self.granted.lock().remove(&cookie);
        let Some((holder, desc)) = removed else {
            return make_error(LockCode::UNKNOWN_LOCK);
        };
        debug_assert_eq!(holder, owner);
        let cb = self.callbacks.lock().get(&holder).cloned();
        if let Some(cb) = cb {
            cb.canceling(&desc);
        }
        Ok(())
    }
}
