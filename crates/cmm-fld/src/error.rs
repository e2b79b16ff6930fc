use cmm_types::{Fid, NamespaceCode, NodeOrdinal, Status, StatusCode, TargetIndex};

use crate::table::TargetState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FldError {
    #[error("no target owns {fid}")]
    NotFound { fid: Fid },

    #[error("{fid} maps to target {target} which is {state:?}")]
    StaleMapping {
        fid: Fid,
        target: TargetIndex,
        state: TargetState,
    },

    #[error("invalid range [{start:#x}, {end:#x})")]
    InvalidRange { start: u64, end: u64 },

    #[error("range [{start:#x}, {end:#x}) overlaps an existing range")]
    Overlap { start: u64, end: u64 },

    #[error("partition table version {proposed} is not newer than {current}")]
    StaleVersion { current: u64, proposed: u64 },

    #[error("update drops ranges of target {target} which is not draining")]
    MappingDropped { target: TargetIndex },

    #[error("target {target} is already attached")]
    AlreadyAttached { target: TargetIndex },

    #[error("target {target} is not attached")]
    UnknownTarget { target: TargetIndex },

    #[error("target {target} must be drained before it is detached")]
    NotDrained { target: TargetIndex },

    #[error("target {target} owns no sequence range")]
    NoRange { target: TargetIndex },

    #[error("default range of target {target} does not fit in the sequence space")]
    LayoutOverflow { target: TargetIndex },

    #[error("node ordinal {ordinal} has no sequence slot among {slots}")]
    NoNodeSlot { ordinal: NodeOrdinal, slots: u32 },
}

impl From<FldError> for Status {
    fn from(err: FldError) -> Self {
        let code = match &err {
            FldError::NotFound { .. } | FldError::UnknownTarget { .. } => NamespaceCode::NOT_FOUND,
            FldError::StaleMapping { .. } => NamespaceCode::STALE_MAPPING,
            FldError::AlreadyAttached { .. } => NamespaceCode::EXISTS,
            FldError::NotDrained { .. } => NamespaceCode::BUSY,
            _ => StatusCode::INVALID_ARG,
        };
        Status::with_message(code, err.to_string())
    }
}
