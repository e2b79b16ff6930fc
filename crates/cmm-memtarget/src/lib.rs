//! In-memory reference backends: metadata targets, their connector and a
//! data-object store. Used by tests and the demo server.

pub mod connector;
pub mod data;
mod store;
pub mod target;

pub use connector::{MemConnector, MEM_SCHEME};
pub use data::MemDataObjectStore;
pub use target::MemTarget;
