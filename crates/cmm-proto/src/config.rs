use cmm_types::{NodeOrdinal, TargetIndex};
use serde::{Deserialize, Serialize};

/// Configuration events replayed into the namespace manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConfigEvent {
    /// Records this node's ordinal. Must come before any `AddTarget`.
    Setup { local_ordinal: NodeOrdinal },
    AddTarget {
        index: TargetIndex,
        connection_info: String,
    },
    Cleanup,
}

impl ConfigEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigEvent::Setup { .. } => "setup",
            ConfigEvent::AddTarget { .. } => "add_target",
            ConfigEvent::Cleanup => "cleanup",
        }
    }
}
