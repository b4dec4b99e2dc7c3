//! Packet framing modes understood by the collective engine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Low-latency packet framing used for small messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// 8-byte packets: 4 bytes payload, 4 bytes flag
    #[serde(rename = "LL8")]
    Ll8,
    /// 16-byte packets: 8 bytes payload, 8 bytes flag
    #[serde(rename = "LL16")]
    Ll16,
}

impl PacketType {
    /// Name as accepted on the command line
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Ll8 => "LL8",
            PacketType::Ll16 => "LL16",
        }
    }
}

impl Default for PacketType {
    fn default() -> Self {
        PacketType::Ll16
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for PacketType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LL8" => Ok(PacketType::Ll8),
            "LL16" => Ok(PacketType::Ll16),
            _ => Err(Error::UnknownPacketType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("LL8".parse::<PacketType>().unwrap(), PacketType::Ll8);
        assert_eq!("ll16".parse::<PacketType>().unwrap(), PacketType::Ll16);
        assert!("LL32".parse::<PacketType>().is_err());
        assert!("".parse::<PacketType>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for p in [PacketType::Ll8, PacketType::Ll16] {
            assert_eq!(p.to_string().parse::<PacketType>().unwrap(), p);
        }
        assert_eq!(PacketType::default(), PacketType::Ll16);
    }
}
