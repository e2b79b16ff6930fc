//! Request, response and event types exchanged between the namespace
//! manager and its collaborators (metadata targets, lock manager,
//! identifier allocator, data-object store).

pub mod config;
pub mod lock;
pub mod ops;
pub mod types;

pub use config::ConfigEvent;
pub use lock::*;
pub use ops::*;
pub use types::*;
