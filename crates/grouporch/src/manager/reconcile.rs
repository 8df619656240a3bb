//! Comparison of desired groups against a device report.
//!
//! [`plan_audit`] is a pure function of the table and the report; the actor
//! applies the resulting actions. Keeping the two apart makes the audit
//! rules testable without a runtime.

use crate::model::{GroupState, ObservedGroup};
use crate::store::DeviceGroupTable;
use grouporch_types::GroupId;
use std::collections::HashSet;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuditAction {
    /// Pending group found with its target buckets.
    Confirm(ObservedGroup),
    /// Installed group with new counters.
    RefreshStats(ObservedGroup),
    /// Installed (or updating) group missing from the device.
    Reinstall(GroupId),
    /// Group being deleted is gone.
    ConfirmRemoved(GroupId),
    /// Undesired group with zero references and no delete in flight.
    DeleteExtraneous(ObservedGroup),
    /// Undesired group that stays for now; its entry is new or changed.
    TrackExtraneous(ObservedGroup),
}

#[derive(Debug, Default)]
pub(crate) struct AuditPlan {
    pub actions: Vec<AuditAction>,
    /// Undesired ids present in the report.
    pub extraneous_seen: HashSet<GroupId>,
}

impl AuditPlan {
    pub fn count(&self, pred: impl Fn(&AuditAction) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(a)).count()
    }
}

/// Decides what a report means for the device.
///
/// Actions on reported groups come first, in report order, followed by
/// actions on desired groups the report does not mention, in id order.
/// Applying the plan and then planning the same report again yields no
/// actions.
pub(crate) fn plan_audit(table: &DeviceGroupTable, observed: &[ObservedGroup]) -> AuditPlan {
    let mut plan = AuditPlan::default();
    let mut reported: HashSet<GroupId> = HashSet::with_capacity(observed.len());

    for entry in observed {
        if !reported.insert(entry.id) {
            debug!(device = %table.device_id(), id = %entry.id, "Duplicate id in report, ignoring");
            continue;
        }

        match table.get_by_id(entry.id) {
            Some(group) => match group.state() {
                GroupState::PendingAdd | GroupState::PendingUpdate => {
                    if entry.kind == group.kind() && entry.buckets == *group.buckets() {
                        plan.actions.push(AuditAction::Confirm(entry.clone()));
                    } else {
                        trace!(
                            device = %table.device_id(),
                            group = %group,
                            "Reported buckets differ from target, operation in flight"
                        );
                    }
                }
                GroupState::Added => {
                    if entry.buckets != *group.buckets() {
                        debug!(device = %table.device_id(), group = %group, "Reported buckets drifted");
                    }
                    if !group.same_stats(entry) {
                        plan.actions.push(AuditAction::RefreshStats(entry.clone()));
                    }
                }
                GroupState::PendingDelete => {}
            },
            None => {
                plan.extraneous_seen.insert(entry.id);
                let known = table.extraneous_entry(entry.id);
                let delete_issued = known.is_some_and(|e| e.delete_issued);
                if entry.reference_count == 0 && !delete_issued {
                    plan.actions.push(AuditAction::DeleteExtraneous(entry.clone()));
                } else if known.map_or(true, |e| e.group != *entry) {
                    plan.actions.push(AuditAction::TrackExtraneous(entry.clone()));
                }
            }
        }
    }

    for group in table.groups() {
        if reported.contains(&group.id()) {
            continue;
        }
        match group.state() {
            GroupState::Added | GroupState::PendingUpdate => {
                plan.actions.push(AuditAction::Reinstall(group.id()));
            }
            GroupState::PendingDelete => {
                plan.actions.push(AuditAction::ConfirmRemoved(group.id()));
            }
            // ADD still in flight
            GroupState::PendingAdd => {}
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBucket, GroupBuckets, GroupDescription, GroupType, Treatment};
    use grouporch_types::{ApplicationId, DeviceId, PortNumber};
    use pretty_assertions::assert_eq;

    fn buckets(ports: &[u32]) -> GroupBuckets {
        GroupBuckets::new(
            ports
                .iter()
                .map(|p| GroupBucket::select(Treatment::builder().output(PortNumber::new(*p)).build()))
                .collect(),
        )
    }

    fn table() -> DeviceGroupTable {
        let mut table = DeviceGroupTable::new(DeviceId::new("of:1").unwrap(), 1);
        table.mark_audited();
        table
    }

    fn create(table: &mut DeviceGroupTable, key: &str, ports: &[u32]) -> GroupId {
        let desc = GroupDescription::new(
            table.device_id().clone(),
            GroupType::Select,
            buckets(ports),
            key,
            ApplicationId::new(1, "t"),
        );
        table.create_desired(desc).unwrap().id()
    }

    fn observed(id: u32, ports: &[u32], refs: u32) -> ObservedGroup {
        ObservedGroup::new(GroupId::new(id), GroupType::Select, buckets(ports)).with_reference_count(refs)
    }

    #[test]
    fn test_extraneous_reference_count_deferral() {
        let table = table();
        let plan = plan_audit(&table, &[observed(1, &[1], 0), observed(2, &[2], 2)]);

        assert_eq!(
            plan.actions,
            vec![
                AuditAction::DeleteExtraneous(observed(1, &[1], 0)),
                AuditAction::TrackExtraneous(observed(2, &[2], 2)),
            ]
        );
        assert_eq!(plan.extraneous_seen.len(), 2);
    }

    #[test]
    fn test_confirm_requires_matching_buckets() {
        let mut table = table();
        let id = create(&mut table, "a", &[1, 2]);

        let stale = plan_audit(&table, &[observed(id.as_u32(), &[1], 0)]);
        assert!(stale.actions.is_empty());

        let reordered = plan_audit(&table, &[observed(id.as_u32(), &[2, 1], 0)]);
        assert_eq!(
            reordered.actions,
            vec![AuditAction::Confirm(observed(id.as_u32(), &[2, 1], 0))]
        );
    }

    #[test]
    fn test_missing_groups_by_state() {
        let mut table = table();
        let pending = create(&mut table, "pending", &[1]);
        let added = create(&mut table, "added", &[2]);
        let deleting = create(&mut table, "deleting", &[3]);
        table.set_state(added, GroupState::Added);
        table.set_state(deleting, GroupState::PendingDelete);

        let plan = plan_audit(&table, &[]);
        assert_eq!(
            plan.actions,
            vec![
                AuditAction::Reinstall(added),
                AuditAction::ConfirmRemoved(deleting),
            ]
        );
        assert!(table.get_by_id(pending).is_some());
    }

    #[test]
    fn test_installed_group_same_stats_is_quiet() {
        let mut table = table();
        let id = create(&mut table, "a", &[1]);
        table.set_state(id, GroupState::Added);

        assert!(plan_audit(&table, &[observed(id.as_u32(), &[1], 0)]).actions.is_empty());
        assert_eq!(
            plan_audit(&table, &[observed(id.as_u32(), &[1], 4)]).actions,
            vec![AuditAction::RefreshStats(observed(id.as_u32(), &[1], 4))]
        );
    }

    #[test]
    fn test_delete_issued_is_not_repeated() {
        let mut table = table();
        table.record_extraneous(observed(9, &[1], 0));
        table.mark_extraneous_deleted(GroupId::new(9));

        assert!(plan_audit(&table, &[observed(9, &[1], 0)]).actions.is_empty());

        table.extraneous_delete_failed(GroupId::new(9));
        assert_eq!(
            plan_audit(&table, &[observed(9, &[1], 0)]).actions,
            vec![AuditAction::DeleteExtraneous(observed(9, &[1], 0))]
        );
    }
}
