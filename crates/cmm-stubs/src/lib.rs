//! Traits for the collaborators the namespace manager consumes, plus
//! configurable mocks for unit tests.
//!
//! Real implementations live outside this crate: the metadata target RPC
//! client, the lock manager client, the identifier allocator and the
//! data-object store. In-process reference implementations are provided by
//! `cmm-memtarget`, `cmm-dlm` and `cmm-fld`.

pub mod data_stub;
pub mod fid_stub;
pub mod lock_stub;
pub mod target_stub;

pub use data_stub::{IDataObjectStub, MockDataObjectStub};
pub use fid_stub::{IFidAllocator, MockFidAllocator};
pub use lock_stub::{ILockManager, LockCallbacks, MockLockManager};
pub use target_stub::{ITargetConnector, ITargetStub, MockTargetConnector, MockTargetStub};
