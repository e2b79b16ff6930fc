use cmm_dlm::LockError;
use cmm_fld::FldError;
use cmm_types::{
    status_code_t, Fid, LockCode, NamespaceCode, RPCCode, Status, StatusCode, TargetIndex,
};

use crate::lifecycle::ManagerState;

pub type NsResult<T> = std::result::Result<T, NamespaceError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("target {index} is already registered")]
    AlreadyExists { index: TargetIndex },

    #[error("target {index} is not registered")]
    NotFound { index: TargetIndex },
}

/// Errors surfaced by namespace operations and lifecycle events.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NamespaceError {
    #[error("no such entry")]
    NotFound,

    #[error("entry already exists")]
    AlreadyExists,

    /// The partition table routes `fid` to a target that is down or
    /// draining. Resolve again after the table is refreshed.
    #[error("{fid} maps to unavailable target {target}")]
    StaleMapping { fid: Fid, target: TargetIndex },

    #[error("target {target} unavailable: {status}")]
    RemoteUnavailable { target: TargetIndex, status: Status },

    /// A two-target operation took effect on `completed_on` and failed on
    /// `failed_on`; the namespace needs operator attention.
    #[error("{op} completed on target {completed_on} but failed on target {failed_on} in phase {phase}: {source}")]
    PartialCompletion {
        op: &'static str,
        phase: &'static str,
        completed_on: TargetIndex,
        failed_on: TargetIndex,
        source: Box<NamespaceError>,
    },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name of {len} bytes exceeds the {max} byte limit")]
    NameTooLong { len: usize, max: usize },

    #[error("operation not permitted: {0}")]
    NoPermission(String),

    #[error("namespace manager is {state:?}")]
    NotReady { state: ManagerState },

    /// Any other refusal from a target, e.g. a non-empty directory.
    #[error("target {target} rejected the request: {status}")]
    Rejected { target: TargetIndex, status: Status },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Whether a failed request may have reached the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The request provably never left this node.
    NotSent,
    /// The request may or may not have been applied.
    Unknown,
    /// The target answered.
    Answered,
}

pub(crate) fn delivery_of(code: status_code_t) -> Delivery {
    match code {
        RPCCode::CONNECT_FAILED | RPCCode::SEND_FAILED | RPCCode::INVALID_ADDR => {
            Delivery::NotSent
        }
        RPCCode::TIMEOUT
        | RPCCode::SOCKET_CLOSED
        | RPCCode::REQUEST_REFUSED
        | NamespaceCode::TARGET_UNAVAILABLE => Delivery::Unknown,
        _ => Delivery::Answered,
    }
}

impl NamespaceError {
    /// Translate a target's reply status.
    pub(crate) fn from_remote(target: TargetIndex, fid: Fid, status: Status) -> Self {
        if delivery_of(status.code()) != Delivery::Answered {
            return NamespaceError::RemoteUnavailable { target, status };
        }
        match status.code() {
            NamespaceCode::NOT_FOUND => NamespaceError::NotFound,
            NamespaceCode::EXISTS => NamespaceError::AlreadyExists,
            NamespaceCode::STALE_MAPPING => NamespaceError::StaleMapping { fid, target },
            NamespaceCode::INCONSISTENT | NamespaceCode::FOUND_BUG | StatusCode::FOUND_BUG => {
                NamespaceError::InternalInconsistency(status.describe())
            }
            _ => NamespaceError::Rejected { target, status },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NamespaceError::NotFound)
    }

    /// Remote status code carried by the error, if any.
    pub fn status_code(&self) -> Option<status_code_t> {
        match self {
            NamespaceError::RemoteUnavailable { status, .. }
            | NamespaceError::Rejected { status, .. } => Some(status.code()),
            NamespaceError::PartialCompletion { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// POSIX errno for the VFS adapter.
    pub fn errno(&self) -> i32 {
        match self {
            NamespaceError::NotFound => 2,
            NamespaceError::AlreadyExists => 17,
            NamespaceError::StaleMapping { .. } => 116,
            NamespaceError::RemoteUnavailable { status, .. } => match status.code() {
                RPCCode::TIMEOUT => 110,
                _ => 107,
            },
            NamespaceError::PartialCompletion { .. } => 5,
            NamespaceError::InternalInconsistency(_) => 71,
            NamespaceError::InvalidArgument(_) => 22,
            NamespaceError::NameTooLong { .. } => 36,
            NamespaceError::NoPermission(_) => 1,
            NamespaceError::NotReady { .. } => 11,
            NamespaceError::Rejected { status, .. } => errno_of(status.code()),
            NamespaceError::Lock(LockError::Busy { .. }) => 11,
            NamespaceError::Lock(LockError::Timeout { .. }) => 110,
            NamespaceError::Lock(LockError::ShuttingDown) => 108,
            NamespaceError::Lock(LockError::Remote { status, .. }) => errno_of(status.code()),
        }
    }
}

fn errno_of(code: status_code_t) -> i32 {
    match code {
        NamespaceCode::NOT_FOUND => 2,
        NamespaceCode::EXISTS => 17,
        NamespaceCode::NOT_EMPTY => 39,
        NamespaceCode::NOT_DIRECTORY => 20,
        NamespaceCode::IS_DIRECTORY => 21,
        NamespaceCode::NO_PERMISSION => 1,
        NamespaceCode::NAME_TOO_LONG => 36,
        NamespaceCode::BUSY | LockCode::CONFLICT => 16,
        NamespaceCode::STALE_MAPPING => 116,
        StatusCode::INVALID_ARG => 22,
        StatusCode::NOT_IMPLEMENTED => 38,
        RPCCode::TIMEOUT | LockCode::TIMEOUT => 110,
        _ => 5,
    }
}

impl From<FldError> for NamespaceError {
    fn from(err: FldError) -> Self {
        match err {
            FldError::NotFound { .. } | FldError::UnknownTarget { .. } => NamespaceError::NotFound,
            FldError::StaleMapping { fid, target, .. } => {
                NamespaceError::StaleMapping { fid, target }
            }
            FldError::AlreadyAttached { .. } => NamespaceError::AlreadyExists,
            other => NamespaceError::InternalInconsistency(other.to_string()),
        }
    }
}

impl From<RegistryError> for NamespaceError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists { .. } => NamespaceError::AlreadyExists,
            RegistryError::NotFound { .. } => NamespaceError::NotFound,
        }
    }
}
