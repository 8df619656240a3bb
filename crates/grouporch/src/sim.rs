//! In-memory device group tables.
//!
//! [`SimulatedDeviceProvider`] behaves like a southbound provider for a set
//! of devices: it applies operations to a per-device table, reports
//! rejected operations, and pushes the resulting table back after every
//! batch. Without an attached service, as when it stands in for a driver,
//! refused operations are returned as a [`DispatchError::Rejected`]
//! instead. Reference counts are derived from group chaining plus any flow
//! references set with [`SimulatedDeviceProvider::set_flow_references`].

use crate::error::DispatchError;
use crate::model::{FailureCode, GroupOperation, GroupOperations, ObservedGroup, OperationType};
use crate::provider::{DriverResolver, GroupProgrammable, GroupProvider, ProviderId, ProviderService};
use grouporch_types::{DeviceId, GroupId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SimDevice {
    groups: BTreeMap<GroupId, ObservedGroup>,
    flow_refs: HashMap<GroupId, u32>,
    reject: HashSet<GroupId>,
}

impl SimDevice {
    fn apply(&mut self, op: &GroupOperation) -> Result<(), FailureCode> {
        if self.reject.remove(&op.group_id) {
            return Err(FailureCode::Rejected);
        }
        match op.op_type {
            OperationType::Add => {
                if self.groups.contains_key(&op.group_id) {
                    return Err(FailureCode::GroupExists);
                }
                self.groups.insert(
                    op.group_id,
                    ObservedGroup::new(op.group_id, op.kind, op.buckets.clone()),
                );
            }
            OperationType::Modify => {
                let group = self
                    .groups
                    .get_mut(&op.group_id)
                    .ok_or(FailureCode::UnknownGroup)?;
                group.kind = op.kind;
                group.buckets = op.buckets.clone();
            }
            OperationType::Delete => {
                self.groups
                    .remove(&op.group_id)
                    .ok_or(FailureCode::UnknownGroup)?;
                self.flow_refs.remove(&op.group_id);
            }
        }
        Ok(())
    }

    /// Table with reference counts recomputed.
    fn report(&self) -> Vec<ObservedGroup> {
        let mut refs: HashMap<GroupId, u32> = self.flow_refs.clone();
        for group in self.groups.values() {
            for bucket in &group.buckets {
                for target in bucket.treatment().chained_groups() {
                    *refs.entry(target).or_default() += 1;
                }
            }
        }
        self.groups
            .values()
            .map(|group| ObservedGroup {
                reference_count: refs.get(&group.id).copied().unwrap_or(0),
                ..group.clone()
            })
            .collect()
    }
}

/// Provider backed by simulated devices.
pub struct SimulatedDeviceProvider {
    id: ProviderId,
    devices: Mutex<HashMap<DeviceId, SimDevice>>,
    service: OnceLock<ProviderService>,
}

impl SimulatedDeviceProvider {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            id: ProviderId::new(scheme, "simulator"),
            devices: Mutex::new(HashMap::new()),
            service: OnceLock::new(),
        }
    }

    /// Connects the provider to the service returned by registration.
    ///
    /// Returns false if a service was already attached.
    pub fn attach(&self, service: ProviderService) -> bool {
        self.service.set(service).is_ok()
    }

    pub fn add_device(&self, device_id: DeviceId) {
        self.lock().entry(device_id).or_default();
    }

    pub fn remove_device(&self, device_id: &DeviceId) -> bool {
        self.lock().remove(device_id).is_some()
    }

    pub fn has_device(&self, device_id: &DeviceId) -> bool {
        self.lock().contains_key(device_id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Puts a group on the device behind the engine's back.
    pub fn install(&self, device_id: &DeviceId, group: ObservedGroup) {
        if let Some(device) = self.lock().get_mut(device_id) {
            device.groups.insert(group.id, group);
        }
    }

    /// Removes a group from the device behind the engine's back.
    pub fn evict(&self, device_id: &DeviceId, id: GroupId) -> bool {
        self.lock()
            .get_mut(device_id)
            .is_some_and(|device| device.groups.remove(&id).is_some())
    }

    /// Number of flows pointing at a group.
    pub fn set_flow_references(&self, device_id: &DeviceId, id: GroupId, count: u32) {
        if let Some(device) = self.lock().get_mut(device_id) {
            device.flow_refs.insert(id, count);
        }
    }

    /// Makes the next operation on `id` fail.
    pub fn reject_next(&self, device_id: &DeviceId, id: GroupId) {
        if let Some(device) = self.lock().get_mut(device_id) {
            device.reject.insert(id);
        }
    }

    pub fn groups(&self, device_id: &DeviceId) -> Vec<ObservedGroup> {
        self.lock()
            .get(device_id)
            .map(SimDevice::report)
            .unwrap_or_default()
    }

    /// Pushes the current table of a device to the engine.
    pub fn report(&self, device_id: &DeviceId) {
        let Some(groups) = self.lock().get(device_id).map(SimDevice::report) else {
            return;
        };
        if let Some(service) = self.service.get() {
            if let Err(e) = service.push_group_metrics(device_id, groups) {
                warn!(device = %device_id, error = %e, "Failed to push group metrics");
            }
        }
    }

    /// Pushes the tables of every simulated device.
    pub fn report_all(&self) {
        let devices: Vec<DeviceId> = self.lock().keys().cloned().collect();
        for device_id in devices {
            self.report(&device_id);
        }
    }

    /// Announces that failover groups switched buckets.
    pub fn fail_over(&self, device_id: &DeviceId, ids: Vec<GroupId>) {
        if let Some(service) = self.service.get() {
            if let Err(e) = service.notify_of_failovers(device_id, ids) {
                warn!(device = %device_id, error = %e, "Failed to notify failovers");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, SimDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GroupProgrammable for SimulatedDeviceProvider {
    fn perform_group_operation(
        &self,
        device_id: &DeviceId,
        ops: &GroupOperations,
    ) -> Result<(), DispatchError> {
        let (failed, report) = {
            let mut devices = self.lock();
            let device = devices
                .get_mut(device_id)
                .ok_or_else(|| DispatchError::Unavailable(device_id.clone()))?;

            let failed: Vec<GroupOperation> = ops
                .iter()
                .filter_map(|op| match device.apply(op) {
                    Ok(()) => None,
                    Err(code) => {
                        debug!(device = %device_id, op = %op, code = %code, "Simulated device refused operation");
                        Some(op.failed_with(code))
                    }
                })
                .collect();
            (failed, device.report())
        };

        let Some(service) = self.service.get() else {
            if failed.is_empty() {
                return Ok(());
            }
            return Err(DispatchError::Rejected {
                transport: self.id.to_string(),
                reason: format!("{} of {} operations refused", failed.len(), ops.len()),
                failed,
            });
        };
        for op in failed {
            if let Err(e) = service.group_operation_failed(device_id, op) {
                warn!(device = %device_id, error = %e, "Failed to report operation failure");
            }
        }
        if let Err(e) = service.push_group_metrics(device_id, report) {
            warn!(device = %device_id, error = %e, "Failed to push group metrics");
        }
        Ok(())
    }

    fn get_groups(&self, device_id: &DeviceId) -> Option<Vec<ObservedGroup>> {
        self.lock().get(device_id).map(SimDevice::report)
    }
}

impl GroupProvider for SimulatedDeviceProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }
}

/// Exposes simulated devices as driver-managed devices.
///
/// The wrapped simulator should not be attached to a provider service:
/// driver-managed devices are only read through polling, and refused
/// operations come back from the dispatch call itself.
pub struct SimulatedDriver(pub Arc<SimulatedDeviceProvider>);

impl DriverResolver for SimulatedDriver {
    fn group_programmable(&self, device_id: &DeviceId) -> Option<Arc<dyn GroupProgrammable>> {
        if self.0.has_device(device_id) {
            Some(Arc::clone(&self.0) as Arc<dyn GroupProgrammable>)
        } else {
            None
        }
    }

    fn devices(&self) -> Vec<DeviceId> {
        self.0.device_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBucket, GroupBuckets, GroupType, Treatment};
    use grouporch_types::PortNumber;
    use pretty_assertions::assert_eq;

    fn device() -> DeviceId {
        DeviceId::new("sim:leaf1").unwrap()
    }

    fn add(id: u32, buckets: GroupBuckets) -> GroupOperation {
        GroupOperation::add(GroupId::new(id), GroupType::All, buckets)
    }

    fn output(port: u32) -> GroupBuckets {
        GroupBuckets::new(vec![GroupBucket::all(
            Treatment::builder().output(PortNumber::new(port)).build(),
        )])
    }

    #[test]
    fn test_apply_and_reference_counts() {
        let sim = SimulatedDeviceProvider::new("sim");
        sim.add_device(device());

        let chained = GroupBuckets::new(vec![GroupBucket::all(
            Treatment::builder().group(GroupId::new(1)).build(),
        )]);
        let ops = GroupOperations::new(vec![add(1, output(1)), add(2, chained)]);
        sim.perform_group_operation(&device(), &ops).unwrap();
        sim.set_flow_references(&device(), GroupId::new(2), 3);

        let groups = sim.groups(&device());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].reference_count, 1);
        assert_eq!(groups[1].reference_count, 3);
    }

    #[test]
    fn test_driver_resolves_known_devices() {
        let sim = Arc::new(SimulatedDeviceProvider::new("p4"));
        sim.add_device(DeviceId::new("p4:spine1").unwrap());
        let driver = SimulatedDriver(Arc::clone(&sim));

        assert!(driver.group_programmable(&DeviceId::new("p4:spine1").unwrap()).is_some());
        assert!(driver.group_programmable(&DeviceId::new("p4:spine2").unwrap()).is_none());
        assert_eq!(driver.devices(), vec![DeviceId::new("p4:spine1").unwrap()]);
    }

    #[test]
    fn test_unknown_device_is_unavailable() {
        let sim = SimulatedDeviceProvider::new("sim");
        let result = sim.perform_group_operation(&device(), &GroupOperations::single(add(1, output(1))));
        assert!(matches!(result, Err(DispatchError::Unavailable(_))));
    }

    #[test]
    fn test_refused_operations_come_back_with_codes() {
        let sim = SimulatedDeviceProvider::new("sim");
        sim.add_device(device());
        sim.install(&device(), ObservedGroup::new(GroupId::new(3), GroupType::All, output(3)));
        sim.reject_next(&device(), GroupId::new(1));

        let ops = GroupOperations::new(vec![
            add(1, output(1)),
            GroupOperation::delete(GroupId::new(5), GroupType::All),
            add(2, output(2)),
            add(3, output(3)),
        ]);
        let Err(DispatchError::Rejected { transport, failed, .. }) =
            sim.perform_group_operation(&device(), &ops)
        else {
            panic!("expected refused operations to be returned");
        };

        assert_eq!(transport, "sim:simulator");
        let codes: Vec<(GroupId, Option<FailureCode>)> =
            failed.iter().map(|op| (op.group_id, op.failure)).collect();
        assert_eq!(
            codes,
            vec![
                (GroupId::new(1), Some(FailureCode::Rejected)),
                (GroupId::new(5), Some(FailureCode::UnknownGroup)),
                (GroupId::new(3), Some(FailureCode::GroupExists)),
            ]
        );
        let ids: Vec<GroupId> = sim.groups(&device()).iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![GroupId::new(2), GroupId::new(3)]);
    }
}
