//! Buffer role resolution
//!
//! Collective families alias their buffers differently. All-gather writes
//! every contribution into slices of one large receive region, so in-place
//! calls read this rank's slice from there too. All-reduce either overwrites
//! the send buffer or writes into a separate receive buffer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CollectiveKind;

/// One of the two buffers allocated for a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferRole {
    Send,
    Recv,
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferRole::Send => write!(f, "send"),
            BufferRole::Recv => write!(f, "recv"),
        }
    }
}

/// Which buffer feeds the call and which one holds its result
///
/// The same pair decides both the engine arguments and the buffer compared
/// against the expected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePair {
    pub input: BufferRole,
    pub result: BufferRole,
}

impl RolePair {
    /// Whether the call reads and writes the same buffer
    pub fn aliased(&self) -> bool {
        self.input == self.result
    }
}

/// Resolve buffer roles for a collective call
pub fn resolve_roles(kind: CollectiveKind, in_place: bool) -> RolePair {
    match (kind, in_place) {
        (CollectiveKind::AllGather, true) => RolePair {
            input: BufferRole::Recv,
            result: BufferRole::Recv,
        },
        (CollectiveKind::AllGather, false) => RolePair {
            input: BufferRole::Send,
            result: BufferRole::Recv,
        },
        (CollectiveKind::AllReduce, in_place) => RolePair {
            input: BufferRole::Send,
            result: if in_place {
                BufferRole::Send
            } else {
                BufferRole::Recv
            },
        },
    }
}
