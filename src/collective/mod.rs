//! Collective operations
//!
//! Provides:
//! - Execution plans and the collective family they implement
//! - Buffer role resolution per family and placement
//! - The engine interface and its in-process loopback implementation

mod engine;
mod loopback;
mod plan;
mod roles;

pub use engine::*;
pub use loopback::*;
pub use plan::*;
pub use roles::*;
