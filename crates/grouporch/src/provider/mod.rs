//! Southbound contract: providers, driver fallback, and dispatch.

mod dispatch;
mod registry;
mod service;

pub use dispatch::Transport;
pub use registry::ProviderRegistry;
pub use service::ProviderService;

use crate::error::DispatchError;
use crate::model::{GroupOperations, ObservedGroup};
use grouporch_types::DeviceId;
use std::fmt;
use std::sync::Arc;

/// Ability to program a device's group table.
///
/// Implemented by registered providers and by device drivers alike.
/// Calls are made from the device's reconciliation task and must not block
/// on the device; results come back later through a [`ProviderService`] or
/// a driver poll.
pub trait GroupProgrammable: Send + Sync {
    fn perform_group_operation(
        &self,
        device_id: &DeviceId,
        ops: &GroupOperations,
    ) -> Result<(), DispatchError>;

    /// Current group table of the device, if the transport can read it.
    fn get_groups(&self, _device_id: &DeviceId) -> Option<Vec<ObservedGroup>> {
        None
    }
}

/// Identity of a provider: the device URI scheme it serves plus a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId {
    pub scheme: String,
    pub id: String,
}

impl ProviderId {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

/// A southbound provider registered for one URI scheme.
pub trait GroupProvider: GroupProgrammable {
    fn id(&self) -> &ProviderId;
}

/// Looks up the group programming capability exposed by a device's driver.
pub trait DriverResolver: Send + Sync {
    fn group_programmable(&self, device_id: &DeviceId) -> Option<Arc<dyn GroupProgrammable>>;

    /// Devices the driver layer knows about, polled even before any request.
    fn devices(&self) -> Vec<DeviceId> {
        Vec::new()
    }
}
