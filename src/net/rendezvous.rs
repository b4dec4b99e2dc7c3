//! Rendezvous address agreement
//!
//! The root rank publishes its endpoint address to every other rank. The
//! process group only broadcasts numeric tensors, so the address travels as
//! four octet-valued integers and is re-joined into dotted-decimal form on
//! arrival.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::ProcessGroup;
use crate::error::{Error, Result};

use super::NetworkEndpoint;

/// Port the collective engine listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 50000;

/// Tensor the root broadcasts when it has no usable endpoint
pub const NO_ENDPOINT: [i64; 4] = [-1, -1, -1, -1];

// ─────────────────────────────────────────────────────────────────
// Address Encoding
// ─────────────────────────────────────────────────────────────────

/// Split an address into one integer per octet
pub fn encode_ipv4(addr: Ipv4Addr) -> [i64; 4] {
    addr.octets().map(i64::from)
}

/// Re-join four octet integers; anything outside 0..=255 is rejected
pub fn decode_ipv4(tensor: &[i64]) -> Result<Ipv4Addr> {
    let octets: [i64; 4] = tensor.try_into().map_err(|_| {
        Error::rendezvous(format!(
            "address tensor has {} elements, expected 4",
            tensor.len()
        ))
    })?;

    let mut bytes = [0u8; 4];
    for (byte, value) in bytes.iter_mut().zip(octets) {
        *byte = u8::try_from(value).map_err(|_| {
            Error::rendezvous(format!("octet {} is outside 0..=255", value))
        })?;
    }
    Ok(Ipv4Addr::from(bytes))
}

// ─────────────────────────────────────────────────────────────────
// Rendezvous Address
// ─────────────────────────────────────────────────────────────────

/// `<interface>:<dotted-ip>:<port>`, the sole input the engine needs to
/// join the group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RendezvousAddress {
    pub interface: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for RendezvousAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.interface, self.ip, self.port)
    }
}

impl FromStr for RendezvousAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = |why: &str| Error::rendezvous(format!("malformed address '{}': {}", s, why));

        let (rest, port) = s.rsplit_once(':').ok_or_else(|| malformed("missing port"))?;
        let (interface, ip) = rest.rsplit_once(':').ok_or_else(|| malformed("missing interface"))?;
        if interface.is_empty() {
            return Err(malformed("empty interface"));
        }
        Ok(Self {
            interface: interface.to_string(),
            ip: ip.parse().map_err(|_| malformed("bad IPv4 address"))?,
            port: port.parse().map_err(|_| malformed("bad port"))?,
        })
    }
}

/// Membership of one rank once the rendezvous address is agreed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupIdentity {
    pub rank: usize,
    pub world_size: usize,
    pub rendezvous: RendezvousAddress,
}

// ─────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────

/// Distributes the root rank's endpoint to the whole group
#[derive(Debug, Clone)]
pub struct RendezvousCoordinator {
    root_rank: usize,
    port: u16,
}

impl RendezvousCoordinator {
    pub fn new(root_rank: usize, port: u16) -> Self {
        Self { root_rank, port }
    }

    /// Agree on the rendezvous address
    ///
    /// Every rank takes part in the broadcast before looking at its own
    /// endpoint, so a rank without one fails without stranding its peers.
    pub fn establish(
        &self,
        group: &dyn ProcessGroup,
        local: Option<&NetworkEndpoint>,
    ) -> Result<GroupIdentity> {
        let rank = group.rank();
        let world_size = group.world_size();
        if self.root_rank >= world_size {
            return Err(Error::rendezvous(format!(
                "root rank {} is outside a group of {} ranks",
                self.root_rank, world_size
            )));
        }

        let mut tensor = if rank == self.root_rank {
            local.map_or(NO_ENDPOINT, |e| encode_ipv4(e.address()))
        } else {
            [0; 4]
        };
        group.broadcast(&mut tensor, self.root_rank)?;

        let root_ip = decode_ipv4(&tensor).map_err(|_| {
            Error::rendezvous(format!(
                "root rank {} published no usable endpoint",
                self.root_rank
            ))
        })?;
        debug!(rank, root_ip = %root_ip, "Received root address");

        let local = local.ok_or_else(|| Error::NoEndpoint {
            message: format!("rank {} has no interface with a routable IPv4 address", rank),
        })?;

        let rendezvous = RendezvousAddress {
            interface: local.interface().to_string(),
            ip: root_ip,
            port: self.port,
        };
        info!(rank, world_size, address = %rendezvous, "Rendezvous established");

        Ok(GroupIdentity {
            rank,
            world_size,
            rendezvous,
        })
    }
}

impl Default for RendezvousCoordinator {
    fn default() -> Self {
        Self::new(0, DEFAULT_PORT)
    }
}
