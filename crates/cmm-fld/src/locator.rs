//! Lock-free resolution over atomically published partition tables.

use std::sync::Arc;

use arc_swap::ArcSwap;
use cmm_types::{Fid, TargetIndex};
use parking_lot::Mutex;

use crate::config::FldConfig;
use crate::error::FldError;
use crate::table::{FldRange, PartitionTable, TargetState};

/// Resolves object identifiers to owning targets.
///
/// Readers load the current snapshot without locking. Writers serialize on
/// `write`, build a modified copy and publish it with a new version, so a
/// resolve never sees a half-applied update.
pub struct ObjectLocator {
    table: ArcSwap<PartitionTable>,
    write: Mutex<()>,
    config: FldConfig,
}

impl ObjectLocator {
    pub fn new(config: FldConfig) -> Self {
        Self {
            table: ArcSwap::from_pointee(PartitionTable::default()),
            write: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &FldConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<PartitionTable> {
        self.table.load_full()
    }

    pub fn version(&self) -> u64 {
        self.table.load().version()
    }

    pub fn resolve(&self, fid: Fid) -> Result<TargetIndex, FldError> {
        self.table.load().resolve(fid)
    }

    fn publish(
        &self,
        f: impl FnOnce(&mut PartitionTable) -> Result<(), FldError>,
    ) -> Result<u64, FldError> {
        let _guard = self.write.lock();
        let mut next = PartitionTable::clone(&self.table.load());
        f(&mut next)?;
        let version = next.bump();
        self.table.store(Arc::new(next));
        Ok(version)
    }

    /// Attach a target as `Active`. A target that owns no range yet gets its
    /// configured ranges, or the default range for its index.
    pub fn attach_target(&self, target: TargetIndex) -> Result<u64, FldError> {
        let version = self.publish(|t| {
            if t.state(target).is_some() {
                return Err(FldError::AlreadyAttached { target });
            }
            if t.ranges_of(target).next().is_none() {
                let mut ranges = self.config.configured_ranges(target);
                if ranges.is_empty() {
                    ranges.push(self.config.default_range(target)?);
                }
                for r in ranges {
                    t.insert_range(r)?;
                }
            }
            t.set_state(target, TargetState::Active);
            Ok(())
        })?;
        tracing::info!(target_index = %target, version, "target attached to partition table");
        Ok(version)
    }

    pub fn insert_range(&self, range: FldRange) -> Result<u64, FldError> {
        self.publish(|t| t.insert_range(range))
    }

    /// Replace the range set with an update from the authoritative source.
    ///
    /// The version must move forward, and ranges of targets that are not
    /// draining must survive unchanged.
    pub fn apply_update(&self, version: u64, ranges: Vec<FldRange>) -> Result<u64, FldError> {
        let _guard = self.write.lock();
        let current = self.table.load_full();
        if version <= current.version() {
            return Err(FldError::StaleVersion {
                current: current.version(),
                proposed: version,
            });
        }
        for old in current.ranges() {
            if current.state(old.target) == Some(TargetState::Draining) {
                continue;
            }
            if !ranges.contains(old) {
                return Err(FldError::MappingDropped { target: old.target });
            }
        }
        let mut next = PartitionTable::clone(&current);
        next.replace_ranges(ranges)?;
        next.set_version(version);
        self.table.store(Arc::new(next));
        tracing::info!(version, "partition table replaced");
        Ok(version)
    }

    fn set_state(&self, target: TargetIndex, state: TargetState) -> Result<u64, FldError> {
        let version = self.publish(|t| {
            if t.state(target).is_none() {
                return Err(FldError::UnknownTarget { target });
            }
            t.set_state(target, state);
            Ok(())
        })?;
        tracing::info!(target_index = %target, ?state, version, "target state changed");
        Ok(version)
    }

    pub fn mark_down(&self, target: TargetIndex) -> Result<u64, FldError> {
        self.set_state(target, TargetState::Down)
    }

    pub fn mark_up(&self, target: TargetIndex) -> Result<u64, FldError> {
        self.set_state(target, TargetState::Active)
    }

    /// Stop routing new resolutions to `target` ahead of its removal.
    pub fn begin_drain(&self, target: TargetIndex) -> Result<u64, FldError> {
        self.set_state(target, TargetState::Draining)
    }

    /// Drop a drained target and every range it owns.
    pub fn detach_target(&self, target: TargetIndex) -> Result<u64, FldError> {
        let version = self.publish(|t| match t.state(target) {
            None => Err(FldError::UnknownTarget { target }),
            Some(TargetState::Draining) => {
                t.remove_target(target);
                Ok(())
            }
            Some(_) => Err(FldError::NotDrained { target }),
        })?;
        tracing::info!(target_index = %target, version, "target detached from partition table");
        Ok(version)
    }
}
