use cmm_types::TargetIndex;
use serde::{Deserialize, Serialize};

use crate::error::FldError;
use crate::table::FldRange;

/// An explicitly configured sequence range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub start: u64,
    pub end: u64,
    pub target: u32,
}

impl From<&RangeConfig> for FldRange {
    fn from(r: &RangeConfig) -> Self {
        FldRange {
            start: r.start,
            end: r.end,
            target: TargetIndex(r.target),
        }
    }
}

/// Partition layout. Targets without an explicit range get
/// `[seq_base + index * seq_width, seq_base + (index + 1) * seq_width)`
/// when they attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FldConfig {
    pub seq_base: u64,
    pub seq_width: u64,
    /// Highest oid handed out inside one sequence before moving to the next.
    /// Must stay below `u32::MAX`.
    pub oids_per_seq: u32,
    /// Nodes allocating from one range. Node `n` takes every sequence at
    /// offset `n` modulo `node_slots` from the range start.
    pub node_slots: u32,
    pub ranges: Vec<RangeConfig>,
}

impl Default for FldConfig {
    fn default() -> Self {
        Self {
            seq_base: 0x2_0000_0000,
            seq_width: 0x1_0000,
            oids_per_seq: 0x2_0000,
            node_slots: 16,
            ranges: Vec::new(),
        }
    }
}

impl FldConfig {
    pub fn default_range(&self, index: TargetIndex) -> Result<FldRange, FldError> {
        let start = u64::from(index.get())
            .checked_mul(self.seq_width)
            .and_then(|offset| offset.checked_add(self.seq_base));
        let end = start.and_then(|start| start.checked_add(self.seq_width));
        match (start, end) {
            (Some(start), Some(end)) => Ok(FldRange {
                start,
                end,
                target: index,
            }),
            _ => Err(FldError::LayoutOverflow { target: index }),
        }
    }

    pub fn configured_ranges(&self, index: TargetIndex) -> Vec<FldRange> {
        self.ranges
            .iter()
            .filter(|r| r.target == index.get())
            .map(FldRange::from)
            .collect()
    }
}
