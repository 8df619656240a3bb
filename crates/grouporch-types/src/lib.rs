//! Common types for group table orchestration.
//!
//! This crate provides type-safe representations of the identifiers and
//! network primitives shared between the group reconciliation engine and the
//! southbound providers that program devices:
//!
//! - [`DeviceId`]: URI-style device identifier (`of:0000000000000001`)
//! - [`ApplicationId`]: Identity of the application owning a group
//! - [`GroupKey`]: Opaque application-supplied correlation cookie
//! - [`GroupId`]: Device-visible group identifier
//! - [`PortNumber`]: Device port number, including reserved logical ports
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers

mod device;
mod group;
mod header;
mod port;

pub use device::{ApplicationId, DeviceId};
pub use group::{GroupId, GroupKey};
pub use header::{MacAddress, VlanId};
pub use port::PortNumber;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid device ID: {0} (expected scheme:identifier)")]
    InvalidDeviceId(String),

    #[error("invalid port number: {0}")]
    InvalidPortNumber(String),

    #[error("invalid group ID: {0}")]
    InvalidGroupId(String),
}
