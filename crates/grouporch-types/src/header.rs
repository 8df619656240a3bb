//! Header field values that bucket treatments rewrite.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// 48-bit Ethernet address.
///
/// Parses colon- or dash-separated octets (one separator style per
/// address) and prints colon-separated upper-case hex, the way device
/// group dumps show it.
///
/// ```
/// use grouporch_types::MacAddress;
///
/// let mac: MacAddress = "0a-00-27-00-00-0f".parse().unwrap();
/// assert_eq!(mac.to_string(), "0A:00:27:00:00:0F");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMacAddress(s.to_string());
        let sep = match (s.contains(':'), s.contains('-')) {
            (true, false) => ':',
            (false, true) => '-',
            _ => return Err(invalid()),
        };

        let mut octets = [0u8; 6];
        let mut parts = s.split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().filter(|p| p.len() == 2).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }
}

/// 802.1Q VLAN id a treatment can push or rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Ids usable on the wire; 0 and 4095 are reserved.
    pub const VALID: RangeInclusive<u16> = 1..=4094;

    pub fn new(id: u16) -> Result<Self, ParseError> {
        if Self::VALID.contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim_start_matches("vlan")
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidVlanId(0))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mac_separators() {
        let colon: MacAddress = "00:1b:21:3a:4f:02".parse().unwrap();
        let dash: MacAddress = "00-1B-21-3A-4F-02".parse().unwrap();
        assert_eq!(colon, dash);
        assert_eq!(colon.octets(), [0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x02]);
        assert_eq!(colon.to_string(), "00:1B:21:3A:4F:02");
    }

    #[test]
    fn test_mac_rejects_malformed() {
        for bad in ["", "00:1b:21:3a:4f", "00:1b:21:3a:4f:02:03", "00:1b-21:3a:4f:02", "0:1b:21:3a:4f:02", "zz:1b:21:3a:4f:02"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad}");
        }
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(!MacAddress::new([0x02, 0, 0, 0, 0, 1]).is_multicast());
    }

    #[test]
    fn test_vlan_range() {
        assert_eq!("vlan100".parse::<VlanId>().unwrap().as_u16(), 100);
        assert_eq!("4094".parse::<VlanId>().unwrap(), VlanId::new(4094).unwrap());
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert!(serde_json::from_str::<VlanId>("4095").is_err());
    }
}
