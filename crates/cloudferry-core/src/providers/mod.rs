//! Provider implementations shipped with the engine.
//!
//! Cloud clients live outside this crate and plug in through
//! [`SourceProvider`](crate::provider::SourceProvider) and
//! [`DestinationProvider`](crate::provider::DestinationProvider).

pub mod local;
pub mod memory;

pub use local::{LocalDestination, LocalSource};
pub use memory::{MemoryDestination, MemorySource};
