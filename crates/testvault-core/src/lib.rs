//! Test-result archiving engine.
//!
//! A [`Tracker`] receives begin/end events from a report adapter or a live listener, keeps
//! the open execution tree on an explicit stack, fingerprints every closed node and writes the
//! results through an [`testvault_store::ArchiveStore`].

pub mod config;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod live;
pub mod node;
pub mod numbering;
mod persist;
pub mod propagation;
pub mod stack;
pub mod statistics;
pub mod status;
pub mod timestamps;
pub mod tracker;

pub use config::*;
pub use errors::*;
pub use events::*;
pub use fingerprint::*;
pub use live::*;
pub use node::*;
pub use numbering::*;
pub use propagation::*;
pub use stack::*;
pub use statistics::*;
pub use status::*;
pub use timestamps::*;
pub use tracker::*;
