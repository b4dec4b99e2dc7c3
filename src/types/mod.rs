//! Type definitions for collbench
//!
//! Element data types, packet framing modes and human-readable sizes
//! shared by the CLI, the benchmark engine and the collective backends.

mod dtype;
mod packet;
mod size;

pub use dtype::*;
pub use packet::*;
pub use size::*;
