//! Cluster membership
//!
//! The process group trait the harness coordinates through, and a
//! thread-backed implementation for single-host runs.

mod group;

pub use group::*;
