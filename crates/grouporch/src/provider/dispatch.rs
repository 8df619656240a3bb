use super::{DriverResolver, GroupProgrammable, ProviderRegistry};
use crate::error::DispatchError;
use crate::model::{GroupOperations, ObservedGroup};
use grouporch_types::DeviceId;
use std::sync::Arc;

/// Picks the southbound transport for a device.
///
/// A provider registered for the device's URI scheme wins; otherwise the
/// driver's group programming capability is used.
pub struct Transport {
    providers: Arc<ProviderRegistry>,
    driver: Option<Arc<dyn DriverResolver>>,
}

impl Transport {
    pub fn new(providers: Arc<ProviderRegistry>, driver: Option<Arc<dyn DriverResolver>>) -> Self {
        Self { providers, driver }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn driver(&self) -> Option<&Arc<dyn DriverResolver>> {
        self.driver.as_ref()
    }

    /// True when a provider, not the driver, serves the device.
    pub fn has_provider(&self, device_id: &DeviceId) -> bool {
        self.providers.provider(device_id.scheme()).is_some()
    }

    fn driver_capability(&self, device_id: &DeviceId) -> Option<Arc<dyn GroupProgrammable>> {
        self.driver
            .as_ref()
            .and_then(|driver| driver.group_programmable(device_id))
    }

    /// Hands `ops` to the device; returns the name of the transport used.
    pub fn dispatch(
        &self,
        device_id: &DeviceId,
        ops: &GroupOperations,
    ) -> Result<String, DispatchError> {
        if let Some(provider) = self.providers.provider(device_id.scheme()) {
            provider.perform_group_operation(device_id, ops)?;
            return Ok(provider.id().to_string());
        }
        if let Some(capability) = self.driver_capability(device_id) {
            capability.perform_group_operation(device_id, ops)?;
            return Ok("driver".to_string());
        }
        Err(DispatchError::Unavailable(device_id.clone()))
    }

    /// Reads the device's group table through the driver.
    ///
    /// Returns `None` for devices served by a provider, which report on
    /// their own.
    pub fn poll_driver(&self, device_id: &DeviceId) -> Option<Vec<ObservedGroup>> {
        if self.has_provider(device_id) {
            return None;
        }
        self.driver_capability(device_id)?.get_groups(device_id)
    }
}
