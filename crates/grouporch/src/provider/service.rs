use super::{ProviderId, ProviderRegistry};
use crate::error::{GroupError, GroupResult};
use crate::manager::{DeviceCommand, ManagerInner};
use crate::model::{GroupOperation, ObservedGroup};
use grouporch_types::{DeviceId, GroupId};
use std::sync::{Arc, Weak};

/// Handle a registered provider uses to report back to the engine.
///
/// Reports are queued on the device's reconciliation task and processed in
/// arrival order. Once the provider is unregistered every call fails with
/// [`GroupError::ProviderNotRegistered`].
#[derive(Clone)]
pub struct ProviderService {
    provider_id: ProviderId,
    token: u64,
    registry: Arc<ProviderRegistry>,
    manager: Weak<ManagerInner>,
}

impl ProviderService {
    pub(crate) fn new(
        provider_id: ProviderId,
        token: u64,
        registry: Arc<ProviderRegistry>,
        manager: Weak<ManagerInner>,
    ) -> Self {
        Self {
            provider_id,
            token,
            registry,
            manager,
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    pub fn is_valid(&self) -> bool {
        self.registry.is_current(&self.provider_id, self.token)
    }

    /// Reports the full group table of a device.
    pub fn push_group_metrics(
        &self,
        device_id: &DeviceId,
        groups: Vec<ObservedGroup>,
    ) -> GroupResult<()> {
        self.submit(device_id, DeviceCommand::Metrics(groups))
    }

    /// Reports that the device rejected one operation.
    pub fn group_operation_failed(
        &self,
        device_id: &DeviceId,
        operation: GroupOperation,
    ) -> GroupResult<()> {
        self.submit(device_id, DeviceCommand::OperationFailed(operation))
    }

    /// Reports failover groups that switched to another bucket.
    pub fn notify_of_failovers(&self, device_id: &DeviceId, group_ids: Vec<GroupId>) -> GroupResult<()> {
        self.submit(device_id, DeviceCommand::Failovers(group_ids))
    }

    fn submit(&self, device_id: &DeviceId, command: DeviceCommand) -> GroupResult<()> {
        if !self.is_valid() {
            return Err(GroupError::ProviderNotRegistered(self.provider_id.to_string()));
        }
        let manager = self.manager.upgrade().ok_or(GroupError::Shutdown)?;
        manager.submit(device_id, command)
    }
}
