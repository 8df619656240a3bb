//! Device port numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A device port number.
///
/// Values at the top of the 32-bit range are reserved logical ports, as on
/// OpenFlow switches (`IN_PORT`, `FLOOD`, `CONTROLLER`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(u32);

impl PortNumber {
    /// Send the packet out the input port.
    pub const IN_PORT: PortNumber = PortNumber(0xffff_fff8);
    /// Submit the packet to the first flow table.
    pub const TABLE: PortNumber = PortNumber(0xffff_fff9);
    /// Process with normal L2/L3 switching.
    pub const NORMAL: PortNumber = PortNumber(0xffff_fffa);
    /// All physical ports except input port and blocked ports.
    pub const FLOOD: PortNumber = PortNumber(0xffff_fffb);
    /// All physical ports except input port.
    pub const ALL: PortNumber = PortNumber(0xffff_fffc);
    /// Send to controller.
    pub const CONTROLLER: PortNumber = PortNumber(0xffff_fffd);
    /// Local openflow "port".
    pub const LOCAL: PortNumber = PortNumber(0xffff_fffe);
    /// Wildcard port, also used as "no watch port" by fast-failover buckets.
    pub const ANY: PortNumber = PortNumber(0xffff_ffff);

    const MAX_PHYSICAL: u32 = 0xffff_ff00;

    pub const fn new(number: u32) -> Self {
        PortNumber(number)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns true if this is a reserved logical port.
    pub const fn is_logical(&self) -> bool {
        self.0 > Self::MAX_PHYSICAL
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PortNumber::IN_PORT => write!(f, "IN_PORT"),
            PortNumber::TABLE => write!(f, "TABLE"),
            PortNumber::NORMAL => write!(f, "NORMAL"),
            PortNumber::FLOOD => write!(f, "FLOOD"),
            PortNumber::ALL => write!(f, "ALL"),
            PortNumber::CONTROLLER => write!(f, "CONTROLLER"),
            PortNumber::LOCAL => write!(f, "LOCAL"),
            PortNumber::ANY => write!(f, "ANY"),
            PortNumber(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for PortNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IN_PORT" => Ok(PortNumber::IN_PORT),
            "TABLE" => Ok(PortNumber::TABLE),
            "NORMAL" => Ok(PortNumber::NORMAL),
            "FLOOD" => Ok(PortNumber::FLOOD),
            "ALL" => Ok(PortNumber::ALL),
            "CONTROLLER" => Ok(PortNumber::CONTROLLER),
            "LOCAL" => Ok(PortNumber::LOCAL),
            "ANY" => Ok(PortNumber::ANY),
            _ => s
                .parse::<u32>()
                .map(PortNumber)
                .map_err(|_| ParseError::InvalidPortNumber(s.to_string())),
        }
    }
}

impl From<u32> for PortNumber {
    fn from(number: u32) -> Self {
        PortNumber(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_logical_ports() {
        assert!(PortNumber::CONTROLLER.is_logical());
        assert!(PortNumber::ANY.is_logical());
        assert!(!PortNumber::new(31).is_logical());
    }

    #[test]
    fn test_port_parse() {
        assert_eq!("31".parse::<PortNumber>().unwrap(), PortNumber::new(31));
        assert_eq!("controller".parse::<PortNumber>().unwrap(), PortNumber::CONTROLLER);
        assert!("eth0".parse::<PortNumber>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(PortNumber::new(42).to_string(), "42");
        assert_eq!(PortNumber::FLOOD.to_string(), "FLOOD");
    }
}
