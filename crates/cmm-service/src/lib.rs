//! Clustered metadata namespace manager.
//!
//! Routes POSIX namespace operations to the metadata targets owning the
//! objects involved, splitting operations that span two targets into
//! ordered phases.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod retry;

#[cfg(test)]
mod scenario_tests;

pub use config::{
    ClusterConfig, DirPlacement, LockWaitMode, NamespaceConfig, RetryConfig, ServerConfig,
    TargetConfig,
};
pub use dispatch::{Credentials, Dispatcher, OpState, OrphanRecord};
pub use error::{NamespaceError, NsResult, RegistryError};
pub use lifecycle::{Collaborators, ManagerState, NamespaceManager};
pub use registry::{Target, TargetRef, TargetRegistry};
