//! Device and application identities.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// URI-style identifier of a network device.
///
/// The part before the first `:` is the scheme (`of`, `p4rt`, `sim`, ...),
/// which selects the southbound provider responsible for the device.
///
/// # Examples
///
/// ```
/// use grouporch_types::DeviceId;
///
/// let dev: DeviceId = "of:0000000000000001".parse().unwrap();
/// assert_eq!(dev.scheme(), "of");
/// assert_eq!(dev.to_string(), "of:0000000000000001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a device ID, validating the `scheme:identifier` shape.
    pub fn new(uri: impl AsRef<str>) -> Result<Self, ParseError> {
        let uri = uri.as_ref();
        match uri.split_once(':') {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {
                Ok(DeviceId(Arc::from(uri)))
            }
            _ => Err(ParseError::InvalidDeviceId(uri.to_string())),
        }
    }

    /// Returns the URI scheme of this device.
    pub fn scheme(&self) -> &str {
        match self.0.split_once(':') {
            Some((scheme, _)) => scheme,
            None => self.as_str(),
        }
    }

    /// Returns the full URI.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DeviceId::new(s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> String {
        id.0.to_string()
    }
}

/// Identity of an application that owns groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    id: u16,
    name: Arc<str>,
}

impl ApplicationId {
    pub fn new(id: u16, name: impl AsRef<str>) -> Self {
        Self {
            id,
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}
