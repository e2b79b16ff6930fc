//! Object locator: maps object identifiers to the metadata target that owns
//! them through a versioned partition table of sequence ranges.

pub mod alloc;
pub mod config;
pub mod error;
pub mod locator;
pub mod table;

pub use alloc::SeqFidAllocator;
pub use config::{FldConfig, RangeConfig};
pub use error::FldError;
pub use locator::ObjectLocator;
pub use table::{FldRange, PartitionTable, TargetState};
