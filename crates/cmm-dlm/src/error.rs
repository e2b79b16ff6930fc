use cmm_types::{Fid, LockCode, Status, TargetIndex};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// A conflicting lock is held and the request may not wait.
    #[error("lock on {fid} is busy")]
    Busy { fid: Fid },

    #[error("timed out waiting for lock on {fid}")]
    Timeout { fid: Fid },

    /// The lock manager for `target` refused or could not be reached.
    #[error("lock request on {fid} at target {target} failed: {status}")]
    Remote {
        fid: Fid,
        target: TargetIndex,
        status: Status,
    },

    #[error("lock adapter is shut down")]
    ShuttingDown,
}

impl LockError {
    pub(crate) fn from_status(fid: Fid, target: TargetIndex, status: Status) -> Self {
        match status.code() {
            LockCode::CONFLICT => LockError::Busy { fid },
            LockCode::TIMEOUT => LockError::Timeout { fid },
            _ => LockError::Remote {
                fid,
                target,
                status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_types::RPCCode;

    #[test]
    fn test_status_translation() {
        let fid = Fid::new(1, 1);
        assert!(matches!(
            LockError::from_status(fid, TargetIndex(0), Status::new(LockCode::CONFLICT)),
            LockError::Busy { .. }
        ));
        assert!(matches!(
            LockError::from_status(fid, TargetIndex(0), Status::new(RPCCode::CONNECT_FAILED)),
            LockError::Remote { .. }
        ));
    }
}
