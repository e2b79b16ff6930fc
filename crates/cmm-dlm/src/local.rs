//! In-process lock manager for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cmm_proto::{EnqueueReq, EnqueueRsp, LockDesc, LockMode, LockWait};
use cmm_stubs::{ILockManager, LockCallbacks};
use cmm_types::{make_error, Fid, LockCode, LockCookie, LockOwnerId, Result, TargetIndex};
use parking_lot::Mutex;
use tokio::sync::Notify;

struct Granted {
    owner: LockOwnerId,
    mode: LockMode,
    desc: LockDesc,
    blocking_sent: bool,
}

type Blocked = Vec<(Arc<dyn LockCallbacks>, LockDesc)>;

#[derive(Default)]
struct State {
    next_cookie: u64,
    granted: HashMap<(TargetIndex, Fid), Vec<Granted>>,
    by_cookie: HashMap<LockCookie, (TargetIndex, Fid)>,
    callbacks: HashMap<LockOwnerId, Arc<dyn LockCallbacks>>,
}

/// Grants shared and exclusive locks per `(target, object)`.
///
/// A request that conflicts with another owner's lock makes the manager
/// send `blocking` to that owner once, then waits until a cancel frees the
/// object. Waiters are woken together and race for the grant.
#[derive(Default)]
pub struct LocalLockManager {
    state: Mutex<State>,
    released: Notify,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granted_count(&self) -> usize {
        self.state.lock().by_cookie.len()
    }

    /// Grant `req` if nothing conflicts, otherwise collect the holders that
    /// still need a blocking notification.
    fn try_grant(&self, req: &EnqueueReq) -> std::result::Result<LockCookie, Blocked> {
        let mode = req.bits.mode();
        let key = (req.target, req.resource);
        let mut state = self.state.lock();
        let state = &mut *state;

        let holders = state.granted.entry(key).or_default();
        let conflicting: Vec<&mut Granted> = holders
            .iter_mut()
            .filter(|g| g.owner != req.owner && g.mode.conflicts_with(mode))
            .collect();
        if !conflicting.is_empty() {
            let mut notify = Vec::new();
            for g in conflicting {
                if g.blocking_sent {
                    continue;
                }
                g.blocking_sent = true;
                if let Some(cb) = state.callbacks.get(&g.owner) {
                    notify.push((cb.clone(), g.desc.clone()));
                }
            }
            return Err(notify);
        }

        state.next_cookie += 1;
        let cookie = LockCookie(state.next_cookie);
        holders.push(Granted {
            owner: req.owner,
            mode,
            desc: LockDesc {
                cookie,
                target: req.target,
                resource: req.resource,
                bits: req.bits,
            },
            blocking_sent: false,
        });
        state.by_cookie.insert(cookie, key);
        Ok(cookie)
    }
}

#[async_trait]
impl ILockManager for LocalLockManager {
    fn register_callbacks(&self, owner: LockOwnerId, callbacks: Arc<dyn LockCallbacks>) {
        self.state.lock().callbacks.insert(owner, callbacks);
    }

    fn unregister_callbacks(&self, owner: LockOwnerId) {
        self.state.lock().callbacks.remove(&owner);
    }

    async fn enqueue(&self, req: EnqueueReq) -> Result<EnqueueRsp> {
        let deadline = match req.wait {
            LockWait::Timeout(d) => Some(tokio::time::Instant::now() + d),
            _ => None,
        };
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let blocked = match self.try_grant(&req) {
                Ok(cookie) => {
                    tracing::trace!(owner = %req.owner, fid = %req.resource, %cookie, "local lock granted");
                    return Ok(EnqueueRsp { cookie });
                }
                Err(blocked) => blocked,
            };
            if req.wait == LockWait::NoWait {
                return make_error(LockCode::CONFLICT);
            }
            for (cb, desc) in &blocked {
                cb.blocking(desc);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return make_error(LockCode::TIMEOUT);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn cancel(&self, owner: LockOwnerId, cookie: LockCookie) -> Result<()> {
        let (desc, cb) = {
            let mut state = self.state.lock();
            let Some(key) = state.by_cookie.get(&cookie).copied() else {
                return make_error(LockCode::UNKNOWN_LOCK);
            };
            let Some(holders) = state.granted.get_mut(&key) else {
                return make_error(LockCode::UNKNOWN_LOCK);
            };
            let Some(pos) = holders
                .iter()
                .position(|g| g.desc.cookie == cookie && g.owner == owner)
            else {
                return make_error(LockCode::UNKNOWN_OWNER);
            };
            let granted = holders.swap_remove(pos);
            if holders.is_empty() {
                state.granted.remove(&key);
            }
            state.by_cookie.remove(&cookie);
            (granted.desc, state.callbacks.get(&owner).cloned())
        };
        if let Some(cb) = cb {
            cb.canceling(&desc);
        }
        self.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LockAdapter, NamespaceCache};
    use cmm_proto::LockBits;
    use std::time::Duration;

    const T0: TargetIndex = TargetIndex(0);
    const DIR: Fid = Fid::new(0x10, 1);

    fn req(owner: u64, bits: LockBits, wait: LockWait) -> EnqueueReq {
        EnqueueReq {
            owner: LockOwnerId(owner),
            target: T0,
            resource: DIR,
            bits,
            wait,
        }
    }

    #[tokio::test]
    async fn test_shared_locks_coexist() {
        let mgr = LocalLockManager::new();
        mgr.enqueue(req(1, LockBits::LOOKUP, LockWait::NoWait))
            .await
            .unwrap();
        mgr.enqueue(req(2, LockBits::LOOKUP, LockWait::NoWait))
            .await
            .unwrap();
        let err = mgr
            .enqueue(req(3, LockBits::UPDATE, LockWait::NoWait))
            .await
            .unwrap_err();
        assert_eq!(err.code(), LockCode::CONFLICT);
        assert_eq!(mgr.granted_count(), 2);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let mgr = LocalLockManager::new();
        mgr.enqueue(req(1, LockBits::UPDATE, LockWait::Block))
            .await
            .unwrap();
        let err = mgr
            .enqueue(req(
                2,
                LockBits::LOOKUP,
                LockWait::Timeout(Duration::from_millis(20)),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), LockCode::TIMEOUT);
    }

    #[tokio::test]
    async fn test_unknown_cookie() {
        let mgr = LocalLockManager::new();
        let err = mgr.cancel(LockOwnerId(1), LockCookie(42)).await.unwrap_err();
        assert_eq!(err.code(), LockCode::UNKNOWN_LOCK);
    }

    #[tokio::test]
    async fn test_conflict_revokes_cached_lock_of_other_adapter() {
        let mgr = Arc::new(LocalLockManager::new());
        let a = LockAdapter::new(LockOwnerId(1), mgr.clone(), Arc::new(NamespaceCache::new()));
        let b = LockAdapter::new(LockOwnerId(2), mgr.clone(), Arc::new(NamespaceCache::new()));
        a.start();
        b.start();

        a.acquire(T0, DIR, LockBits::UPDATE, LockWait::Block)
            .await
            .unwrap()
            .release();
        a.cache().insert_entry(DIR, "x", Fid::new(0x10, 2));
        assert_eq!(a.held_bits(DIR), LockBits::UPDATE);

        // b's request blocks a's cached lock, a cancels it, b is granted.
        let h = tokio::time::timeout(
            Duration::from_secs(5),
            b.acquire(T0, DIR, LockBits::UPDATE, LockWait::Block),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(h.bits(), LockBits::UPDATE);
        assert_eq!(a.held_bits(DIR), LockBits::NONE);
        assert!(a.cache().lookup_entry(DIR, "x").is_none());
        assert_eq!(mgr.granted_count(), 1);

        drop(h);
        a.stop().await;
        b.stop().await;
        assert_eq!(mgr.granted_count(), 0);
    }
}
