//! Local network endpoint selection
//!
//! Picks the first (interface, IPv4 address) pair that other nodes can
//! route to. Enumeration order is whatever the platform reports, so on a
//! multi-homed host the choice is only as stable as that order.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Network Endpoint
// ─────────────────────────────────────────────────────────────────

/// An interface name paired with a routable IPv4 address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    interface: String,
    address: Ipv4Addr,
}

impl NetworkEndpoint {
    /// Create an endpoint, rejecting addresses other nodes cannot reach
    pub fn new(interface: impl Into<String>, address: Ipv4Addr) -> Result<Self> {
        let interface = interface.into();
        if interface.is_empty() {
            return Err(Error::invalid_endpoint(
                format!(":{}", address),
                "interface name is empty",
            ));
        }
        if !is_routable(&address) {
            return Err(Error::invalid_endpoint(
                format!("{}:{}", interface, address),
                "address is loopback, link-local or multicast",
            ));
        }
        Ok(Self { interface, address })
    }

    /// Interface name (e.g. "eth0")
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// IPv4 address bound to the interface
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.address)
    }
}

impl FromStr for NetworkEndpoint {
    type Err = Error;

    /// Parse `<interface>:<dotted-ipv4>`
    fn from_str(s: &str) -> Result<Self> {
        let (interface, ip) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_endpoint(s, "expected <interface>:<ipv4>"))?;
        let address: Ipv4Addr = ip
            .parse()
            .map_err(|_| Error::invalid_endpoint(s, format!("'{}' is not an IPv4 address", ip)))?;
        Self::new(interface, address)
    }
}

/// Whether an address can be used between cluster nodes
pub fn is_routable(addr: &Ipv4Addr) -> bool {
    !(addr.is_loopback() || addr.is_link_local() || addr.is_multicast())
}

// ─────────────────────────────────────────────────────────────────
// Interface Sources
// ─────────────────────────────────────────────────────────────────

/// One address bound to one local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub ip: IpAddr,
}

impl InterfaceAddr {
    pub fn new(name: impl Into<String>, ip: impl Into<IpAddr>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
        }
    }
}

/// Something that can list local interface addresses
pub trait InterfaceSource {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>>;
}

/// The host's interfaces, in platform order
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        let ifaces = if_addrs::get_if_addrs()
            .map_err(|source| Error::InterfaceEnumeration { source })?;
        Ok(ifaces
            .into_iter()
            .map(|iface| {
                let ip = iface.ip();
                InterfaceAddr::new(iface.name, ip)
            })
            .collect())
    }
}

/// A fixed list of interfaces
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticInterfaces(pub Vec<InterfaceAddr>);

#[cfg(test)]
impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        Ok(self.0.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────

/// Return the first candidate with a routable IPv4 address
///
/// `None` means no interface qualifies; callers must treat that as fatal.
/// With `only_interface` set, other interfaces are skipped.
pub fn select_endpoint(
    candidates: &[InterfaceAddr],
    only_interface: Option<&str>,
) -> Option<NetworkEndpoint> {
    candidates
        .iter()
        .filter(|c| only_interface.map_or(true, |name| c.name == name))
        .find_map(|c| match c.ip {
            IpAddr::V4(v4) if is_routable(&v4) => Some(NetworkEndpoint {
                interface: c.name.clone(),
                address: v4,
            }),
            ip => {
                trace!(interface = %c.name, ip = %ip, "Skipping unusable address");
                None
            }
        })
}

/// Resolves this process's endpoint from config and the interface list
#[derive(Debug, Clone, Default)]
pub struct EndpointSelector {
    only_interface: Option<String>,
    static_endpoint: Option<NetworkEndpoint>,
}

impl EndpointSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only consider addresses bound to this interface
    pub fn with_interface(mut self, name: Option<String>) -> Self {
        self.only_interface = name;
        self
    }

    /// Skip discovery and use this endpoint
    pub fn with_static_endpoint(mut self, endpoint: Option<NetworkEndpoint>) -> Self {
        self.static_endpoint = endpoint;
        self
    }

    pub fn select(&self, source: &dyn InterfaceSource) -> Result<Option<NetworkEndpoint>> {
        if let Some(ref endpoint) = self.static_endpoint {
            debug!(endpoint = %endpoint, "Using static endpoint");
            return Ok(Some(endpoint.clone()));
        }

        let candidates = source.interfaces()?;
        let selected = select_endpoint(&candidates, self.only_interface.as_deref());
        debug!(
            candidates = candidates.len(),
            filter = ?self.only_interface,
            selected = ?selected.as_ref().map(|e| e.to_string()),
            "Endpoint selection finished"
        );
        Ok(selected)
    }
}
