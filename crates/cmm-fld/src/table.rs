//! Immutable partition table snapshots.

use std::collections::BTreeMap;

use cmm_types::{Fid, TargetIndex};
use serde::{Deserialize, Serialize};

use crate::error::FldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Active,
    Down,
    Draining,
}

/// Half-open sequence range `[start, end)` owned by one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FldRange {
    pub start: u64,
    pub end: u64,
    pub target: TargetIndex,
}

impl FldRange {
    pub fn contains(&self, seq: u64) -> bool {
        self.start <= seq && seq < self.end
    }

    fn overlaps(&self, other: &FldRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One version of the partition table. Never mutated after publication;
/// resolution against a snapshot depends only on its content.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    version: u64,
    /// Sorted by `start`, pairwise disjoint.
    ranges: Vec<FldRange>,
    states: BTreeMap<TargetIndex, TargetState>,
}

impl PartitionTable {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ranges(&self) -> &[FldRange] {
        &self.ranges
    }

    pub fn state(&self, target: TargetIndex) -> Option<TargetState> {
        self.states.get(&target).copied()
    }

    pub fn targets(&self) -> impl Iterator<Item = (TargetIndex, TargetState)> + '_ {
        self.states.iter().map(|(k, v)| (*k, *v))
    }

    pub fn ranges_of(&self, target: TargetIndex) -> impl Iterator<Item = &FldRange> + '_ {
        self.ranges.iter().filter(move |r| r.target == target)
    }

    pub fn range_for(&self, seq: u64) -> Option<&FldRange> {
        let idx = self.ranges.partition_point(|r| r.start <= seq);
        if idx == 0 {
            return None;
        }
        let range = &self.ranges[idx - 1];
        range.contains(seq).then_some(range)
    }

    pub fn resolve(&self, fid: Fid) -> Result<TargetIndex, FldError> {
        let range = self.range_for(fid.seq).ok_or(FldError::NotFound { fid })?;
        match self.states.get(&range.target) {
            None => Err(FldError::NotFound { fid }),
            Some(TargetState::Active) => Ok(range.target),
            Some(&state) => Err(FldError::StaleMapping {
                fid,
                target: range.target,
                state,
            }),
        }
    }

    // ---- mutation, only on private copies before publication ----

    pub(crate) fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn set_state(&mut self, target: TargetIndex, state: TargetState) {
        self.states.insert(target, state);
    }

    pub(crate) fn remove_target(&mut self, target: TargetIndex) {
        self.states.remove(&target);
        self.ranges.retain(|r| r.target != target);
    }

    pub(crate) fn insert_range(&mut self, range: FldRange) -> Result<(), FldError> {
        check_range(&range)?;
        if self.ranges.iter().any(|r| r.overlaps(&range)) {
            return Err(FldError::Overlap {
                start: range.start,
                end: range.end,
            });
        }
        let pos = self.ranges.partition_point(|r| r.start < range.start);
        self.ranges.insert(pos, range);
        Ok(())
    }

    pub(crate) fn replace_ranges(&mut self, mut ranges: Vec<FldRange>) -> Result<(), FldError> {
        ranges.sort_by_key(|r| r.start);
        for r in &ranges {
            check_range(r)?;
        }
        if let Some(w) = ranges.windows(2).find(|w| w[0].overlaps(&w[1])) {
            return Err(FldError::Overlap {
                start: w[1].start,
                end: w[1].end,
            });
        }
        self.ranges = ranges;
        Ok(())
    }
}

fn check_range(range: &FldRange) -> Result<(), FldError> {
    if range.start >= range.end {
        return Err(FldError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}
