//! Worker identity for distributed execution.
//!
//! Gates only need to know where they sit in the group; collective
//! communication is left to the dispatcher.

mod process_group;

pub use process_group::{LocalProcessGroup, ProcessGroup};
