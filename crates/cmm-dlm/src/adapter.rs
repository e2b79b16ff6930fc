//! Namespace lock acquisition and revocation handling.
//!
//! A granted lock is cached after the operation that took it finishes and is
//! only given back when the lock manager reports a conflicting waiter
//! (blocking callback). Cancellation fires the canceling callback, which
//! invalidates the cache entries the lock protected.
//!
//! Each object also has a local gate: LOOKUP users share it, UPDATE users
//! take it exclusively, so operations of this client on the same directory
//! serialize without a round trip to the lock manager.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use cmm_proto::{EnqueueReq, LockBits, LockDesc, LockWait};
use cmm_stubs::{ILockManager, LockCallbacks};
use cmm_types::{Fid, LockCookie, LockOwnerId, TargetIndex};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::NamespaceCache;
use crate::error::LockError;

struct CachedLock {
    desc: LockDesc,
    users: usize,
    /// A conflicting waiter exists; no new local user may pick this lock up.
    cancel_pending: bool,
    cancel_sent: bool,
}

#[derive(Default)]
struct SlotState {
    granted: Vec<CachedLock>,
    /// Blocking callbacks that arrived before the grant was recorded.
    early_blocks: HashSet<LockCookie>,
}

impl SlotState {
    fn held_bits(&self) -> LockBits {
        self.granted
            .iter()
            .fold(LockBits::NONE, |acc, l| acc | l.desc.bits)
    }
}

struct LockSlot {
    gate: Arc<RwLock<()>>,
    enqueue: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl LockSlot {
    fn new() -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            enqueue: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState::default()),
        }
    }
}

enum LockEvent {
    Blocking(LockDesc),
    Cancel(LockDesc),
}

struct Inner {
    owner: LockOwnerId,
    manager: Arc<dyn ILockManager>,
    cache: Arc<NamespaceCache>,
    slots: DashMap<Fid, Arc<LockSlot>>,
    events: mpsc::UnboundedSender<LockEvent>,
    running: watch::Sender<bool>,
}

/// One lock to take as part of an ordered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub target: TargetIndex,
    pub fid: Fid,
    pub bits: LockBits,
}

impl LockRequest {
    pub fn new(target: TargetIndex, fid: Fid, bits: LockBits) -> Self {
        Self { target, fid, bits }
    }
}

enum GateGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Local use of a granted lock. Dropping it ends the use; the granted lock
/// itself stays cached.
pub struct LockHandle {
    desc: LockDesc,
    slot: Arc<LockSlot>,
    events: mpsc::UnboundedSender<LockEvent>,
    _gate: GateGuard,
}

impl LockHandle {
    pub fn fid(&self) -> Fid {
        self.desc.resource
    }

    pub fn target(&self) -> TargetIndex {
        self.desc.target
    }

    pub fn bits(&self) -> LockBits {
        self.desc.bits
    }

    pub fn cookie(&self) -> LockCookie {
        self.desc.cookie
    }

    pub fn release(self) {}
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("fid", &self.desc.resource)
            .field("target", &self.desc.target)
            .field("bits", &self.desc.bits)
            .field("cookie", &self.desc.cookie)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        let Some(lock) = state
            .granted
            .iter_mut()
            .find(|l| l.desc.cookie == self.desc.cookie)
        else {
            return;
        };
        lock.users = lock.users.saturating_sub(1);
        if lock.users == 0 && lock.cancel_pending && !lock.cancel_sent {
            lock.cancel_sent = true;
            let _ = self.events.send(LockEvent::Cancel(lock.desc.clone()));
        }
    }
}

/// Locks acquired in canonical `(target, fid)` order.
#[derive(Debug, Default)]
pub struct LockSet {
    handles: Vec<LockHandle>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[LockHandle] {
        &self.handles
    }

    pub fn get(&self, fid: Fid) -> Option<&LockHandle> {
        self.handles.iter().find(|h| h.fid() == fid)
    }

    pub fn release(self) {}
}

/// Client side of the distributed namespace locks.
pub struct LockAdapter {
    inner: Arc<Inner>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LockEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LockAdapter {
    pub fn new(
        owner: LockOwnerId,
        manager: Arc<dyn ILockManager>,
        cache: Arc<NamespaceCache>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                owner,
                manager,
                cache,
                slots: DashMap::new(),
                events: tx,
                running,
            }),
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> LockOwnerId {
        self.inner.owner
    }

    pub fn cache(&self) -> &Arc<NamespaceCache> {
        &self.inner.cache
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Register callbacks with the lock manager and start the event loop.
    /// Calling it again is a no-op.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let callbacks = Arc::new(AdapterCallbacks {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner
            .manager
            .register_callbacks(self.inner.owner, callbacks);
        self.inner.running.send_replace(true);

        let inner = self.inner.clone();
        let stop = self.inner.running.subscribe();
        *self.task.lock() = Some(tokio::spawn(event_loop(inner, rx, stop)));
        tracing::debug!(owner = %self.inner.owner, "lock adapter started");
    }

    /// Stop the event loop and hand every unused cached lock back.
    pub async fn stop(&self) {
        if !self.inner.running.send_replace(false) {
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let cancelled = self.cancel_all_unused().await;
        self.inner.manager.unregister_callbacks(self.inner.owner);
        tracing::debug!(owner = %self.inner.owner, cancelled, "lock adapter stopped");
    }

    pub async fn acquire(
        &self,
        target: TargetIndex,
        fid: Fid,
        bits: LockBits,
        wait: LockWait,
    ) -> Result<LockHandle, LockError> {
        let deadline = match wait {
            LockWait::Timeout(d) => Some(Instant::now() + d),
            _ => None,
        };
        self.acquire_until(LockRequest::new(target, fid, bits), wait, deadline)
            .await
    }

    /// Acquire several locks in ascending `(target, fid)` order. Requests on
    /// the same object are merged. On failure nothing stays held.
    pub async fn acquire_ordered(
        &self,
        requests: &[LockRequest],
        wait: LockWait,
    ) -> Result<LockSet, LockError> {
        let mut merged: BTreeMap<(TargetIndex, Fid), LockBits> = BTreeMap::new();
        for req in requests {
            let bits = merged.entry((req.target, req.fid)).or_insert(LockBits::NONE);
            *bits = *bits | req.bits;
        }
        let deadline = match wait {
            LockWait::Timeout(d) => Some(Instant::now() + d),
            _ => None,
        };

        let mut set = LockSet::default();
        for ((target, fid), bits) in merged {
            let handle = self
                .acquire_until(LockRequest::new(target, fid, bits), wait, deadline)
                .await?;
            set.handles.push(handle);
        }
        Ok(set)
    }

    async fn acquire_until(
        &self,
        req: LockRequest,
        wait: LockWait,
        deadline: Option<Instant>,
    ) -> Result<LockHandle, LockError> {
        if !self.is_running() {
            return Err(LockError::ShuttingDown);
        }
        let fid = req.fid;
        let slot = self
            .inner
            .slots
            .entry(fid)
            .or_insert_with(|| Arc::new(LockSlot::new()))
            .clone();

        let gate = self.enter_gate(&slot, req.bits, wait, deadline, fid).await?;

        if let Some(desc) = take_cached(&slot, req.bits) {
            return Ok(self.handle(desc, slot, gate));
        }

        let desc = {
            let _enqueue = match (wait, deadline) {
                (LockWait::NoWait, _) => {
                    slot.enqueue.try_lock().map_err(|_| LockError::Busy { fid })?
                }
                (_, Some(deadline)) => tokio::time::timeout_at(deadline, slot.enqueue.lock())
                    .await
                    .map_err(|_| LockError::Timeout { fid })?,
                _ => slot.enqueue.lock().await,
            };
            // Another task may have been granted a covering lock meanwhile.
            match take_cached(&slot, req.bits) {
                Some(desc) => desc,
                None => self.enqueue_remote(&slot, req, wait, deadline).await?,
            }
        };
        Ok(self.handle(desc, slot, gate))
    }

    async fn enqueue_remote(
        &self,
        slot: &LockSlot,
        req: LockRequest,
        wait: LockWait,
        deadline: Option<Instant>,
    ) -> Result<LockDesc, LockError> {
        let fid = req.fid;
        let remote_wait = match deadline {
            Some(deadline) => {
                LockWait::Timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => wait,
        };
        let rsp = self
            .inner
            .manager
            .enqueue(EnqueueReq {
                owner: self.inner.owner,
                target: req.target,
                resource: fid,
                bits: req.bits,
                wait: remote_wait,
            })
            .await
            .map_err(|status| LockError::from_status(fid, req.target, status))?;

        let desc = LockDesc {
            cookie: rsp.cookie,
            target: req.target,
            resource: fid,
            bits: req.bits,
        };
        let mut state = slot.state.lock();
        let cancel_pending = state.early_blocks.remove(&rsp.cookie);
        state.granted.push(CachedLock {
            desc: desc.clone(),
            users: 1,
            cancel_pending,
            cancel_sent: false,
        });
        tracing::trace!(%fid, bits = %req.bits, cookie = %rsp.cookie, "lock granted");
        Ok(desc)
    }

    async fn enter_gate(
        &self,
        slot: &LockSlot,
        bits: LockBits,
        wait: LockWait,
        deadline: Option<Instant>,
        fid: Fid,
    ) -> Result<GateGuard, LockError> {
        let gate = slot.gate.clone();
        let exclusive = bits.contains(LockBits::UPDATE);
        match (wait, deadline, exclusive) {
            (LockWait::NoWait, _, true) => gate
                .try_write_owned()
                .map(GateGuard::Exclusive)
                .map_err(|_| LockError::Busy { fid }),
            (LockWait::NoWait, _, false) => gate
                .try_read_owned()
                .map(GateGuard::Shared)
                .map_err(|_| LockError::Busy { fid }),
            (_, Some(deadline), true) => tokio::time::timeout_at(deadline, gate.write_owned())
                .await
                .map(GateGuard::Exclusive)
                .map_err(|_| LockError::Timeout { fid }),
            (_, Some(deadline), false) => tokio::time::timeout_at(deadline, gate.read_owned())
                .await
                .map(GateGuard::Shared)
                .map_err(|_| LockError::Timeout { fid }),
            (_, None, true) => Ok(GateGuard::Exclusive(gate.write_owned().await)),
            (_, None, false) => Ok(GateGuard::Shared(gate.read_owned().await)),
        }
    }

    fn handle(&self, desc: LockDesc, slot: Arc<LockSlot>, gate: GateGuard) -> LockHandle {
        LockHandle {
            desc,
            slot,
            events: self.inner.events.clone(),
            _gate: gate,
        }
    }

    /// Hand back every cached lock on `fid` that no operation is using.
    pub async fn cancel_unused(&self, fid: Fid) -> usize {
        let Some(slot) = self.inner.slots.get(&fid).map(|s| s.clone()) else {
            return 0;
        };
        let victims = mark_unused(&slot);
        for desc in &victims {
            self.inner.cancel(desc).await;
        }
        victims.len()
    }

    pub async fn cancel_all_unused(&self) -> usize {
        let slots: Vec<Arc<LockSlot>> = self.inner.slots.iter().map(|s| s.clone()).collect();
        let mut total = 0;
        for slot in slots {
            for desc in mark_unused(&slot) {
                self.inner.cancel(&desc).await;
                total += 1;
            }
        }
        total
    }

    /// Bits currently granted to this client on `fid`.
    pub fn held_bits(&self, fid: Fid) -> LockBits {
        self.inner
            .slots
            .get(&fid)
            .map(|s| s.state.lock().held_bits())
            .unwrap_or(LockBits::NONE)
    }

    pub fn cached_lock_count(&self) -> usize {
        self.inner
            .slots
            .iter()
            .map(|s| s.state.lock().granted.len())
            .sum()
    }
}

fn take_cached(slot: &LockSlot, bits: LockBits) -> Option<LockDesc> {
    let mut state = slot.state.lock();
    let lock = state
        .granted
        .iter_mut()
        .find(|l| !l.cancel_pending && l.desc.bits.contains(bits))?;
    lock.users += 1;
    Some(lock.desc.clone())
}

fn mark_unused(slot: &LockSlot) -> Vec<LockDesc> {
    let mut state = slot.state.lock();
    state
        .granted
        .iter_mut()
        .filter(|l| l.users == 0 && !l.cancel_sent)
        .map(|l| {
            l.cancel_pending = true;
            l.cancel_sent = true;
            l.desc.clone()
        })
        .collect()
}

impl Inner {
    async fn cancel(&self, desc: &LockDesc) {
        if let Err(status) = self.manager.cancel(self.owner, desc.cookie).await {
            // The manager no longer knows the lock; drop it locally anyway.
            tracing::warn!(fid = %desc.resource, cookie = %desc.cookie, %status, "lock cancel failed");
            self.on_canceled(desc);
        }
    }

    fn on_blocking(&self, desc: &LockDesc) -> Option<LockDesc> {
        let slot = self.slots.get(&desc.resource).map(|s| s.clone())?;
        let mut state = slot.state.lock();
        match state
            .granted
            .iter_mut()
            .find(|l| l.desc.cookie == desc.cookie)
        {
            Some(lock) => {
                lock.cancel_pending = true;
                if lock.users == 0 && !lock.cancel_sent {
                    lock.cancel_sent = true;
                    return Some(lock.desc.clone());
                }
                None
            }
            None => {
                state.early_blocks.insert(desc.cookie);
                None
            }
        }
    }

    /// Invalidation path; runs inside the lock manager's cancel.
    fn on_canceled(&self, desc: &LockDesc) {
        let fid = desc.resource;
        let remaining = match self.slots.get(&fid).map(|s| s.clone()) {
            Some(slot) => {
                let mut state = slot.state.lock();
                state.granted.retain(|l| l.desc.cookie != desc.cookie);
                state.early_blocks.remove(&desc.cookie);
                state.held_bits()
            }
            None => LockBits::NONE,
        };

        self.cache.evict_attrs(fid);
        let mut dropped_children = 0;
        if desc.bits.contains(LockBits::UPDATE) || remaining.is_empty() {
            dropped_children = self.cache.invalidate_children(fid);
        }
        let mut dropped_aliases = 0;
        if desc.bits.contains(LockBits::LOOKUP) && !fid.is_root() {
            dropped_aliases = self.cache.unhash_aliases(fid);
        }
        self.slots.remove_if(&fid, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.state.lock().granted.is_empty()
        });
        tracing::debug!(
            %fid,
            bits = %desc.bits,
            dropped_children,
            dropped_aliases,
            "lock canceled, cache invalidated"
        );
    }
}

async fn event_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<LockEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let victim = match event {
                    LockEvent::Blocking(desc) => inner.on_blocking(&desc),
                    LockEvent::Cancel(desc) => Some(desc),
                };
                if let Some(desc) = victim {
                    inner.cancel(&desc).await;
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || !*stop.borrow() {
                    break;
                }
            }
        }
    }
}

struct AdapterCallbacks {
    inner: Weak<Inner>,
}

impl LockCallbacks for AdapterCallbacks {
    fn blocking(&self, lock: &LockDesc) {
        if let Some(inner) = self.inner.upgrade() {
            let _ = inner.events.send(LockEvent::Blocking(lock.clone()));
        }
    }

    fn canceling(&self, lock: &LockDesc) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_canceled(lock);
        }
    }
}
