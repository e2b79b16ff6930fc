//! Distributed lock adapter: namespace locks on metadata objects, cached
//! until the lock manager asks for them back, with cache invalidation on
//! revocation.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod local;

pub use adapter::{LockAdapter, LockHandle, LockRequest, LockSet};
pub use cache::NamespaceCache;
pub use error::LockError;
pub use local::LocalLockManager;
