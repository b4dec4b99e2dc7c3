//! Network identity and rendezvous
//!
//! Provides:
//! - Selection of a routable local endpoint
//! - Agreement on the root rank's address across the group

mod endpoint;
mod rendezvous;

pub use endpoint::*;
pub use rendezvous::*;
