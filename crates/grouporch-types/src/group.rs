//! Group identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Device-visible group identifier.
///
/// Printed in hex (`0x10`), matching how switches report group table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u32);

impl GroupId {
    pub const fn new(id: u32) -> Self {
        GroupId(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed
            .map(GroupId)
            .map_err(|_| ParseError::InvalidGroupId(s.to_string()))
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        GroupId(id)
    }
}

/// Opaque application cookie identifying a group within a device.
///
/// Keys are compared byte-wise; the engine never interprets them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(Arc<[u8]>);

impl GroupKey {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        GroupKey(Arc::from(bytes.as_ref()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        GroupKey::new(s.as_bytes())
    }
}

impl From<Vec<u8>> for GroupKey {
    fn from(bytes: Vec<u8>) -> Self {
        GroupKey(Arc::from(bytes))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => f.write_str(s),
            _ => {
                f.write_str("0x")?;
                for b in self.0.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_group_id_display_and_parse() {
        let id = GroupId::new(0x2a);
        assert_eq!(id.to_string(), "0x2a");
        assert_eq!("0x2a".parse::<GroupId>().unwrap(), id);
        assert_eq!("42".parse::<GroupId>().unwrap(), id);
        assert!("0xzz".parse::<GroupId>().is_err());
    }

    #[test]
    fn test_group_key_equality_is_bytewise() {
        let a = GroupKey::from("group1");
        let b = GroupKey::new(b"group1");
        assert_eq!(a, b);
        assert_ne!(a, GroupKey::from("group2"));
    }

    #[test]
    fn test_group_key_display() {
        assert_eq!(GroupKey::from("ecmp-10.0.0.0/24").to_string(), "ecmp-10.0.0.0/24");
        assert_eq!(GroupKey::new([0x00, 0xff]).to_string(), "0x00ff");
    }
}
