//! Sequence-based identifier allocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cmm_proto::AllocHint;
use cmm_stubs::IFidAllocator;
use cmm_types::{Fid, NodeOrdinal, Result, TargetIndex, ROOT_SEQ};
use parking_lot::Mutex;

use crate::error::FldError;
use crate::locator::ObjectLocator;
use crate::table::{PartitionTable, TargetState};

#[derive(Debug, Clone, Copy)]
struct Cursor {
    seq: u64,
    next_oid: u64,
}

/// Allocates identifiers from the sequence ranges the hinted target owns, so
/// every identifier resolves back to that target.
///
/// Nodes sharing the targets allocate from disjoint sequences: node `n`
/// only uses the sequences at offset `n` modulo `node_slots` inside each
/// range. Identifiers are handed out exactly once; a failed operation simply
/// leaves its identifier unused.
pub struct SeqFidAllocator {
    locator: Arc<ObjectLocator>,
    slot: AtomicU32,
    cursors: Mutex<HashMap<TargetIndex, Cursor>>,
}

impl SeqFidAllocator {
    pub fn new(locator: Arc<ObjectLocator>) -> Self {
        Self {
            locator,
            slot: AtomicU32::new(0),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate from the sequences of node `ordinal` from now on.
    pub fn set_node(&self, ordinal: NodeOrdinal) -> std::result::Result<(), FldError> {
        let slots = self.locator.config().node_slots.max(1);
        if ordinal.get() >= slots {
            return Err(FldError::NoNodeSlot { ordinal, slots });
        }
        let mut cursors = self.cursors.lock();
        self.slot.store(ordinal.get(), Ordering::Release);
        cursors.clear();
        Ok(())
    }

    fn allocate(&self, target: TargetIndex) -> std::result::Result<Fid, FldError> {
        let table = self.locator.snapshot();
        match table.state(target) {
            Some(TargetState::Active) => {}
            Some(state) => {
                return Err(FldError::StaleMapping {
                    fid: Fid::default(),
                    target,
                    state,
                })
            }
            None => return Err(FldError::UnknownTarget { target }),
        }
        let config = self.locator.config();
        let oids_per_seq = u64::from(config.oids_per_seq.max(1));
        let slots = Slots {
            slot: u64::from(self.slot.load(Ordering::Acquire)),
            count: u64::from(config.node_slots.max(1)),
        };

        let mut cursors = self.cursors.lock();
        let mut cursor = match cursors.get(&target) {
            Some(c) if table.range_for(c.seq).map(|r| r.target) == Some(target) => *c,
            _ => Cursor {
                seq: owned_seq(&table, target, 0, slots)?,
                next_oid: 1,
            },
        };
        if cursor.next_oid > oids_per_seq {
            let from = cursor.seq.checked_add(1).ok_or(FldError::NoRange { target })?;
            cursor = Cursor {
                seq: owned_seq(&table, target, from, slots)?,
                next_oid: 1,
            };
        }
        // next_oid <= oids_per_seq <= u32::MAX here.
        let fid = Fid::new(cursor.seq, cursor.next_oid as u32);
        cursor.next_oid += 1;
        cursors.insert(target, cursor);
        Ok(fid)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slots {
    slot: u64,
    count: u64,
}

/// First sequence at or past `from` that `target` owns, belongs to this
/// node's slot and is not the root sequence.
fn owned_seq(
    table: &PartitionTable,
    target: TargetIndex,
    from: u64,
    slots: Slots,
) -> std::result::Result<u64, FldError> {
    for range in table.ranges_of(target) {
        if range.end <= from {
            continue;
        }
        let Some(base) = range.start.checked_add(slots.slot) else {
            continue;
        };
        let lo = from.max(range.start);
        let mut seq = if base >= lo {
            Some(base)
        } else {
            (lo - base)
                .div_ceil(slots.count)
                .checked_mul(slots.count)
                .and_then(|step| base.checked_add(step))
        };
        while let Some(s) = seq.filter(|s| *s < range.end) {
            if s != ROOT_SEQ {
                return Ok(s);
            }
            seq = s.checked_add(slots.count);
        }
    }
    Err(FldError::NoRange { target })
}

#[async_trait]
impl IFidAllocator for SeqFidAllocator {
    async fn allocate_metadata_id(&self, hint: AllocHint) -> Result<Fid> {
        let fid = self.allocate(hint.target)?;
        tracing::trace!(target_index = %hint.target, %fid, parent = %hint.parent, "allocated fid");
        Ok(fid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FldConfig;
    use crate::table::FldRange;
    use std::collections::HashSet;

    fn setup(oids_per_seq: u32) -> (Arc<ObjectLocator>, SeqFidAllocator) {
        setup_slots(oids_per_seq, 1)
    }

    fn setup_slots(oids_per_seq: u32, node_slots: u32) -> (Arc<ObjectLocator>, SeqFidAllocator) {
        let fld = Arc::new(ObjectLocator::new(FldConfig {
            seq_base: 0x100,
            seq_width: 4,
            oids_per_seq,
            node_slots,
            ranges: Vec::new(),
        }));
        fld.attach_target(TargetIndex(0)).unwrap();
        fld.attach_target(TargetIndex(1)).unwrap();
        let alloc = SeqFidAllocator::new(fld.clone());
        (fld, alloc)
    }

    fn hint(target: u32) -> AllocHint {
        AllocHint {
            target: TargetIndex(target),
            parent: Fid::default(),
        }
    }

    #[tokio::test]
    async fn test_ids_resolve_to_hinted_target() {
        let (fld, alloc) = setup(3);
        for target in [0, 1] {
            for _ in 0..10 {
                let fid = alloc.allocate_metadata_id(hint(target)).await.unwrap();
                assert_eq!(fld.resolve(fid).unwrap(), TargetIndex(target));
            }
        }
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_advance_sequences() {
        let (_fld, alloc) = setup(2);
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let fid = alloc.allocate_metadata_id(hint(0)).await.unwrap();
            assert!(seen.insert(fid));
        }
        let seqs: HashSet<u64> = seen.iter().map(|f| f.seq).collect();
        assert_eq!(seqs.len(), 4);
        // Range of target 0 is [0x100, 0x104): exhausted now.
        assert!(alloc.allocate_metadata_id(hint(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_moves_to_next_owned_range() {
        let (fld, alloc) = setup(1);
        fld.insert_range(FldRange {
            start: 0x900,
            end: 0x901,
            target: TargetIndex(0),
        })
        .unwrap();
        let mut last = Fid::default();
        for _ in 0..5 {
            last = alloc.allocate_metadata_id(hint(0)).await.unwrap();
        }
        assert_eq!(last, Fid::new(0x900, 1));
    }

    #[tokio::test]
    async fn test_draining_target_refused() {
        let (fld, alloc) = setup(8);
        fld.begin_drain(TargetIndex(1)).unwrap();
        let err = alloc.allocate_metadata_id(hint(1)).await.unwrap_err();
        assert_eq!(err.code(), cmm_types::NamespaceCode::STALE_MAPPING);
        assert!(alloc.allocate_metadata_id(hint(7)).await.is_err());
    }

    #[tokio::test]
    async fn test_nodes_use_disjoint_sequences() {
        let (fld, a) = setup_slots(2, 2);
        let b = SeqFidAllocator::new(fld.clone());
        b.set_node(NodeOrdinal(1)).unwrap();

        let mut from_a = HashSet::new();
        let mut from_b = HashSet::new();
        for _ in 0..4 {
            from_a.insert(a.allocate_metadata_id(hint(0)).await.unwrap());
            from_b.insert(b.allocate_metadata_id(hint(0)).await.unwrap());
        }
        assert!(from_a.is_disjoint(&from_b));
        assert!(from_a.iter().all(|f| (f.seq - 0x100) % 2 == 0));
        assert!(from_b.iter().all(|f| (f.seq - 0x100) % 2 == 1));
        assert!(from_b.iter().all(|f| fld.resolve(*f).unwrap() == TargetIndex(0)));
        // Each node owns two of the four sequences.
        assert!(a.allocate_metadata_id(hint(0)).await.is_err());

        assert_eq!(
            b.set_node(NodeOrdinal(2)),
            Err(FldError::NoNodeSlot {
                ordinal: NodeOrdinal(2),
                slots: 2
            })
        );
    }

    #[tokio::test]
    async fn test_last_oid_of_sequence_does_not_overflow() {
        let (_fld, alloc) = setup(u32::MAX);
        let first = alloc.allocate_metadata_id(hint(1)).await.unwrap();
        {
            let mut cursors = alloc.cursors.lock();
            let cursor = cursors.get_mut(&TargetIndex(1)).unwrap();
            cursor.next_oid = u64::from(u32::MAX);
        }
        let last = alloc.allocate_metadata_id(hint(1)).await.unwrap();
        assert_eq!(last, Fid::new(first.seq, u32::MAX));
        let next = alloc.allocate_metadata_id(hint(1)).await.unwrap();
        assert_eq!(next, Fid::new(first.seq + 1, 1));
    }
}
