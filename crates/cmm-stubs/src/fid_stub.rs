use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use cmm_proto::AllocHint;
use cmm_types::{Fid, Result};
use parking_lot::Mutex;

/// Hands out fresh metadata object identifiers.
///
/// An identifier is never handed out twice, even when the operation it was
/// allocated for fails.
#[async_trait]
pub trait IFidAllocator: Send + Sync {
    async fn allocate_metadata_id(&self, hint: AllocHint) -> Result<Fid>;
}

type AllocHandler = Box<dyn Fn(AllocHint) -> Result<Fid> + Send + Sync>;

/// Allocates `(seq, 1), (seq, 2), ...` from a fixed sequence unless a handler
/// is installed.
pub struct MockFidAllocator {
    seq: u64,
    next_oid: AtomicU32,
    handler: Mutex<Option<AllocHandler>>,
    hints: Mutex<Vec<AllocHint>>,
}

impl MockFidAllocator {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            next_oid: AtomicU32::new(1),
            handler: Mutex::new(None),
            hints: Mutex::new(Vec::new()),
        }
    }

    pub fn on_allocate(&self, f: impl Fn(AllocHint) -> Result<Fid> + Send + Sync + 'static) {
        *self.handler.lock() = Some(Box::new(f));
    }

    pub fn hints(&self) -> Vec<AllocHint> {
        self.hints.lock().clone()
    }
}

#[async_trait]
impl IFidAllocator for MockFidAllocator {
    async fn allocate_metadata_id(&self, hint: AllocHint) -> Result<Fid> {
        self.hints.lock().push(hint);
        if let Some(f) = self.handler.lock().as_ref() {
            return f(hint);
        }
        Ok(Fid::new(self.seq, self.next_oid.fetch_add(1, Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_types::TargetIndex;

    #[tokio::test]
    async fn test_sequential_allocation() {
        let alloc = MockFidAllocator::new(0x400);
        let hint = AllocHint {
            target: TargetIndex(0),
            parent: Fid::new(0x400, 0),
        };
        let a = alloc.allocate_metadata_id(hint).await.unwrap();
        let b = alloc.allocate_metadata_id(hint).await.unwrap();
        assert_eq!(a, Fid::new(0x400, 1));
        assert_eq!(b, Fid::new(0x400, 2));
        assert_eq!(alloc.hints().len(), 2);
    }
}
