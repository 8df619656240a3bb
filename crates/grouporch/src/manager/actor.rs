//! Per-device reconciliation task.
//!
//! Every request and southbound report for a device is a [`DeviceCommand`]
//! on the device's channel. The actor owns the device's table and handles
//! commands one at a time, so table transitions never interleave.

use super::reconcile::{plan_audit, AuditAction, AuditPlan};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{DispatchError, GroupResult};
use crate::event::{EventDispatcher, GroupEvent, GroupEventType};
use crate::model::{
    FailureCode, Group, GroupDescription, GroupOperation, GroupOperations, GroupState, GroupType,
    ObservedGroup, OperationType,
};
use crate::provider::Transport;
use crate::store::{AuditState, BucketUpdate, DeviceGroupTable, PendingRequest, TableStats};
use grouporch_types::{ApplicationId, DeviceId, GroupId, GroupKey};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SOURCE: &str = "GroupManager";

pub(crate) enum DeviceCommand {
    AddGroup {
        desc: GroupDescription,
        reply: oneshot::Sender<GroupResult<()>>,
    },
    UpdateBuckets {
        update: BucketUpdate,
        reply: oneshot::Sender<GroupResult<()>>,
    },
    RemoveGroup {
        key: GroupKey,
        app_id: ApplicationId,
        reply: oneshot::Sender<GroupResult<()>>,
    },
    GetGroup {
        key: GroupKey,
        reply: oneshot::Sender<Option<Group>>,
    },
    GetGroups {
        app_id: Option<ApplicationId>,
        reply: oneshot::Sender<Vec<Group>>,
    },
    GetExtraneous {
        reply: oneshot::Sender<Vec<ObservedGroup>>,
    },
    Status {
        reply: oneshot::Sender<DeviceStatus>,
    },
    Purge {
        reply: oneshot::Sender<usize>,
    },
    Metrics(Vec<ObservedGroup>),
    OperationFailed(GroupOperation),
    Failovers(Vec<GroupId>),
    /// Retry operations parked for lack of a transport.
    Redispatch,
    /// Replies once earlier commands are handled; `true` if nothing else
    /// was queued behind it.
    Sync {
        reply: oneshot::Sender<bool>,
    },
}

/// Point-in-time summary of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub audit_state: AuditState,
    pub groups: usize,
    pub pending_requests: usize,
    pub parked_operations: usize,
    pub extraneous_groups: usize,
    pub stats: TableStats,
}

/// Where a newly requested group ended up.
enum Placement {
    /// Fresh record; the device needs an ADD.
    Install(Group),
    /// Took over an identical group already on the device.
    Adopted(Group),
    /// Took over a group already on the device whose contents differ.
    Rewrite(Group),
}

pub(crate) struct DeviceActor {
    table: DeviceGroupTable,
    transport: Arc<Transport>,
    events: EventDispatcher,
}

impl DeviceActor {
    pub fn new(
        device_id: DeviceId,
        first_group_id: u32,
        transport: Arc<Transport>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            table: DeviceGroupTable::new(device_id, first_group_id),
            transport,
            events,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DeviceCommand>) {
        debug!(device = %self.table.device_id(), "Device task started");
        while let Some(command) = rx.recv().await {
            match command {
                DeviceCommand::Sync { reply } => {
                    let _ = reply.send(rx.is_empty());
                }
                command => self.handle(command),
            }
        }
        debug!(device = %self.table.device_id(), "Device task stopped");
    }

    fn handle(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::AddGroup { desc, reply } => {
                let _ = reply.send(self.add_group(desc));
            }
            DeviceCommand::UpdateBuckets { update, reply } => {
                let _ = reply.send(self.update_buckets(update));
            }
            DeviceCommand::RemoveGroup { key, app_id, reply } => {
                let _ = reply.send(self.remove_group(key, app_id));
            }
            DeviceCommand::GetGroup { key, reply } => {
                let _ = reply.send(self.table.get(&key).cloned());
            }
            DeviceCommand::GetGroups { app_id, reply } => {
                let groups = match app_id {
                    Some(app_id) => self.table.groups_of(&app_id),
                    None => self.table.groups(),
                };
                let _ = reply.send(groups);
            }
            DeviceCommand::GetExtraneous { reply } => {
                let groups = self.table.extraneous().map(|e| e.group.clone()).collect();
                let _ = reply.send(groups);
            }
            DeviceCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            DeviceCommand::Purge { reply } => {
                let _ = reply.send(self.purge());
            }
            DeviceCommand::Metrics(observed) => self.reconcile(observed),
            DeviceCommand::OperationFailed(op) => {
                let events: Vec<GroupEvent> = self.operation_failed(&op).into_iter().collect();
                self.events.post(events);
            }
            DeviceCommand::Failovers(ids) => self.failovers(&ids),
            DeviceCommand::Redispatch => self.send(Vec::new()),
            DeviceCommand::Sync { reply } => {
                let _ = reply.send(true);
            }
        }
    }

    fn device_id(&self) -> &DeviceId {
        self.table.device_id()
    }

    fn object_id(&self, id: GroupId) -> String {
        format!("{}/{}", self.device_id(), id)
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.device_id().clone(),
            audit_state: self.table.audit_state(),
            groups: self.table.len(),
            pending_requests: self.table.pending_len(),
            parked_operations: self.table.parked_len(),
            extraneous_groups: self.table.extraneous().count(),
            stats: self.table.stats().clone(),
        }
    }

    fn record_request<T>(
        &self,
        category: AuditCategory,
        action: &str,
        key: &GroupKey,
        app_id: &ApplicationId,
        result: &GroupResult<T>,
    ) {
        let mut record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(format!("{}/{}", self.device_id(), key))
            .with_object_type("group")
            .with_details(serde_json::json!({
                "app": app_id.to_string(),
                "audited": self.table.is_audited(),
            }));
        record = match result {
            Ok(_) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        };
        audit_log!(record);
    }

    fn add_group(&mut self, desc: GroupDescription) -> GroupResult<()> {
        let key = desc.key.clone();
        let app_id = desc.app_id.clone();

        if !self.table.is_audited() {
            let result = self.table.enqueue_pending(PendingRequest::Add(desc));
            self.record_request(AuditCategory::ResourceCreate, "add_group", &key, &app_id, &result);
            return result;
        }

        let result = self.place(desc);
        self.record_request(AuditCategory::ResourceCreate, "add_group", &key, &app_id, &result);
        let (mut ops, mut events) = (Vec::new(), Vec::new());
        self.settle(result?, &mut ops, &mut events);
        self.events.post(events);
        self.send(ops);
        Ok(())
    }

    /// Records a desired group, taking over a matching extraneous group
    /// when the device has one.
    fn place(&mut self, desc: GroupDescription) -> GroupResult<Placement> {
        let Some(observed) = self.table.matching_extraneous(&desc).cloned() else {
            return self.table.create_desired(desc).map(Placement::Install);
        };
        let group = self.table.adopt(desc, &observed)?;
        info!(device = %self.device_id(), group = %group, "Reusing group already on device");
        Ok(match group.state() {
            GroupState::Added => Placement::Adopted(group),
            _ => Placement::Rewrite(group),
        })
    }

    fn settle(&mut self, placement: Placement, ops: &mut Vec<GroupOperation>, events: &mut Vec<GroupEvent>) {
        match placement {
            Placement::Install(group) => ops.push(GroupOperation::add_of(&group)),
            Placement::Rewrite(group) => ops.push(GroupOperation::modify_of(&group)),
            Placement::Adopted(group) => {
                self.table.stats_mut().groups_confirmed += 1;
                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "group_adopted")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(self.object_id(group.id()))
                        .with_object_type("group")
                        .with_details(serde_json::json!({
                            "key": group.key().to_string(),
                            "buckets": group.buckets().len(),
                        }))
                );
                events.push(GroupEvent::new(GroupEventType::GroupAdded, group));
            }
        }
    }

    fn update_buckets(&mut self, update: BucketUpdate) -> GroupResult<()> {
        let key = update.key.clone();
        let app_id = update.app_id.clone();

        if !self.table.is_audited() {
            let result = self.table.enqueue_pending(PendingRequest::Update(update));
            self.record_request(AuditCategory::ResourceModify, "update_buckets", &key, &app_id, &result);
            return result;
        }

        let result = self.table.stage_update(&update);
        self.record_request(AuditCategory::ResourceModify, "update_buckets", &key, &app_id, &result);
        match result? {
            Some(group) => self.send(vec![GroupOperation::modify_of(&group)]),
            None => debug!(device = %self.device_id(), key = %key, "Bucket update changes nothing"),
        }
        Ok(())
    }

    fn remove_group(&mut self, key: GroupKey, app_id: ApplicationId) -> GroupResult<()> {
        if !self.table.is_audited() {
            let result = self.table.enqueue_pending(PendingRequest::Remove {
                key: key.clone(),
                app_id: app_id.clone(),
            });
            self.record_request(AuditCategory::ResourceDelete, "remove_group", &key, &app_id, &result);
            return result;
        }

        let result = self.table.mark_delete(&key);
        self.record_request(AuditCategory::ResourceDelete, "remove_group", &key, &app_id, &result);
        match result? {
            Some(group) => self.send(vec![GroupOperation::delete_of(&group)]),
            None => debug!(device = %self.device_id(), key = %key, "Delete already in flight"),
        }
        Ok(())
    }

    fn purge(&mut self) -> usize {
        let removed = self.table.purge();
        info!(device = %self.device_id(), removed, "Purged group entries");
        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "purge_group_entries")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(self.device_id().to_string())
                .with_object_type("device")
                .with_details(serde_json::json!({ "removed": removed }))
        );
        removed
    }

    /// Applies a device report.
    fn reconcile(&mut self, observed: Vec<ObservedGroup>) {
        let first_audit = !self.table.is_audited();
        let mut queued_ops = Vec::new();
        let mut queued_events = Vec::new();
        let mut drained = 0usize;

        // Queued groups go in first so that they can claim what the device
        // already holds instead of having it deleted.
        if first_audit {
            self.table.mark_audited();
            for entry in &observed {
                if self.table.get_by_id(entry.id).is_none() && self.table.extraneous_entry(entry.id).is_none() {
                    self.table.record_extraneous(entry.clone());
                }
            }
            for desc in self.table.drain_pending() {
                let key = desc.key.clone();
                let app_id = desc.app_id.clone();
                match self.place(desc) {
                    Ok(placement) => {
                        self.settle(placement, &mut queued_ops, &mut queued_events);
                        drained += 1;
                    }
                    Err(e) => {
                        let result: GroupResult<()> = Err(e);
                        self.record_request(AuditCategory::ResourceCreate, "add_group", &key, &app_id, &result);
                    }
                }
            }
        }

        let AuditPlan {
            actions,
            extraneous_seen,
        } = plan_audit(&self.table, &observed);

        let mut ops = Vec::new();
        let mut events = Vec::new();
        let mut reinstalled = 0usize;

        for action in actions {
            match action {
                AuditAction::Confirm(entry) => {
                    if let Some(event) = self.confirm(&entry) {
                        events.push(event);
                    }
                }
                AuditAction::RefreshStats(entry) => {
                    if let Some(group) = self.table.get_by_id(entry.id) {
                        let refreshed = group.with_stats(&entry);
                        self.table.replace(refreshed);
                    }
                }
                AuditAction::Reinstall(id) => {
                    if let Some(group) = self.table.set_state(id, GroupState::PendingAdd) {
                        warn!(device = %self.device_id(), group = %group, "Group missing on device, reinstalling");
                        ops.push(GroupOperation::add_of(&group));
                        reinstalled += 1;
                    }
                }
                AuditAction::ConfirmRemoved(id) => {
                    if let Some(group) = self.table.remove(id) {
                        self.table.stats_mut().groups_removed += 1;
                        audit_log!(
                            AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "group_removed")
                                .with_outcome(AuditOutcome::Success)
                                .with_object_id(self.object_id(id))
                                .with_object_type("group")
                                .with_details(serde_json::json!({ "key": group.key().to_string() }))
                        );
                        events.push(GroupEvent::new(GroupEventType::GroupRemoved, group));
                    }
                }
                AuditAction::DeleteExtraneous(entry) => {
                    debug!(device = %self.device_id(), id = %entry.id, "Deleting extraneous group");
                    ops.push(GroupOperation::delete(entry.id, entry.kind));
                    let id = entry.id;
                    self.table.record_extraneous(entry);
                    self.table.mark_extraneous_deleted(id);
                }
                AuditAction::TrackExtraneous(entry) => {
                    debug!(
                        device = %self.device_id(),
                        id = %entry.id,
                        references = entry.reference_count,
                        "Extraneous group still referenced"
                    );
                    self.table.record_extraneous(entry);
                }
            }
        }
        let forgotten = self.table.retain_extraneous(&extraneous_seen);
        ops.extend(queued_ops);
        events.extend(queued_events);

        if first_audit {
            info!(
                device = %self.device_id(),
                reported = observed.len(),
                queued = drained,
                "Initial audit complete"
            );
        }
        self.table.stats_mut().audits += 1;

        if first_audit || !ops.is_empty() || !events.is_empty() {
            let (adds, _, deletes) = GroupOperations::new(ops.clone()).counts();
            audit_log!(
                AuditRecord::new(AuditCategory::Reconciliation, SOURCE, "push_group_metrics")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(self.device_id().to_string())
                    .with_object_type("device")
                    .with_details(serde_json::json!({
                        "first_audit": first_audit,
                        "reported": observed.len(),
                        "events": events.len(),
                        "adds": adds,
                        "deletes": deletes,
                        "reinstalled": reinstalled,
                        "queued_flushed": drained,
                        "extraneous_forgotten": forgotten,
                    }))
            );
        }

        self.events.post(events);
        self.send(ops);
    }

    /// Marks a pending group `Added` with the reported counters.
    fn confirm(&mut self, entry: &ObservedGroup) -> Option<GroupEvent> {
        let group = self.table.get_by_id(entry.id)?;
        let (event_type, category) = match group.state() {
            GroupState::PendingAdd => (GroupEventType::GroupAdded, AuditCategory::ResourceCreate),
            GroupState::PendingUpdate => (GroupEventType::GroupUpdated, AuditCategory::ResourceModify),
            _ => return None,
        };
        let confirmed = group.with_stats(entry).with_state(GroupState::Added);
        self.table.replace(confirmed.clone());
        self.table.stats_mut().groups_confirmed += 1;

        debug!(device = %self.device_id(), group = %confirmed, "Group confirmed");
        audit_log!(
            AuditRecord::new(category, SOURCE, "group_confirmed")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(self.object_id(entry.id))
                .with_object_type("group")
                .with_details(serde_json::json!({
                    "event": event_type.to_string(),
                    "key": confirmed.key().to_string(),
                    "buckets": confirmed.buckets().len(),
                }))
        );
        Some(GroupEvent::new(event_type, confirmed))
    }

    /// Applies a southbound failure report.
    fn operation_failed(&mut self, op: &GroupOperation) -> Option<GroupEvent> {
        let Some(group) = self.table.get_by_id(op.group_id).cloned() else {
            if op.op_type == OperationType::Delete && self.table.extraneous_delete_failed(op.group_id) {
                debug!(device = %self.device_id(), id = %op.group_id, "Extraneous group delete failed");
                return None;
            }
            warn!(device = %self.device_id(), op = %op, "Failure reported for unknown group");
            return None;
        };

        if op.failure == Some(FailureCode::GroupExists) {
            if let Some(event) = self.already_installed(op, &group) {
                return Some(event);
            }
        }

        let id = group.id();
        let (event_type, snapshot) = match op.op_type {
            OperationType::Add if group.state() == GroupState::PendingAdd => {
                self.table.remove(id);
                (GroupEventType::GroupAddFailed, group)
            }
            OperationType::Add => {
                warn!(device = %self.device_id(), group = %group, op = %op, "Ignoring ADD failure for group past PENDING_ADD");
                return None;
            }
            OperationType::Modify if group.state() == GroupState::PendingUpdate => {
                let restored = self.table.rollback(id).unwrap_or(group);
                (GroupEventType::GroupUpdateFailed, restored)
            }
            OperationType::Modify => (GroupEventType::GroupUpdateFailed, group),
            OperationType::Delete if group.state() == GroupState::PendingDelete => {
                let restored = self.table.set_state(id, GroupState::Added).unwrap_or(group);
                (GroupEventType::GroupRemoveFailed, restored)
            }
            OperationType::Delete => (GroupEventType::GroupRemoveFailed, group),
        };
        self.table.stats_mut().groups_failed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ErrorCondition, SOURCE, "group_operation_failed")
                .with_object_id(self.object_id(id))
                .with_object_type("group")
                .with_error(format!("{} rejected by device", op))
                .with_details(serde_json::json!({
                    "event": event_type.to_string(),
                    "state": snapshot.state().to_string(),
                    "key": snapshot.key().to_string(),
                }))
        );
        Some(GroupEvent::new(event_type, snapshot))
    }

    /// An ADD refused because the device already holds the id counts as
    /// installed when the group is still pending and the device was asked
    /// for the buckets the group has now.
    fn already_installed(&mut self, op: &GroupOperation, group: &Group) -> Option<GroupEvent> {
        if op.op_type != OperationType::Add || group.state() != GroupState::PendingAdd {
            warn!(device = %self.device_id(), group = %group, op = %op, "Group exists on device, state does not allow confirming");
            return None;
        }
        if op.kind != group.kind() || op.buckets != *group.buckets() {
            warn!(device = %self.device_id(), group = %group, op = %op, "Group exists on device with other buckets");
            return None;
        }

        let installed = group.with_state(GroupState::Added);
        self.table.replace(installed.clone());
        self.table.stats_mut().groups_confirmed += 1;
        info!(device = %self.device_id(), group = %installed, "Group already on device, marking installed");
        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "group_confirmed")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(self.object_id(installed.id()))
                .with_object_type("group")
                .with_details(serde_json::json!({
                    "event": GroupEventType::GroupAdded.to_string(),
                    "key": installed.key().to_string(),
                    "failure": FailureCode::GroupExists.to_string(),
                }))
        );
        Some(GroupEvent::new(GroupEventType::GroupAdded, installed))
    }

    fn failovers(&self, ids: &[GroupId]) {
        let events: Vec<GroupEvent> = ids
            .iter()
            .filter_map(|id| match self.table.get_by_id(*id) {
                Some(group) if group.kind() == GroupType::Failover => Some(GroupEvent::new(
                    GroupEventType::GroupBucketFailover,
                    group.clone(),
                )),
                Some(group) => {
                    debug!(device = %self.device_id(), group = %group, "Failover reported for non-failover group");
                    None
                }
                None => {
                    debug!(device = %self.device_id(), id = %id, "Failover reported for unknown group");
                    None
                }
            })
            .collect();
        self.events.post(events);
    }

    /// Hands operations (behind any parked ones) to the device's transport.
    fn send(&mut self, ops: Vec<GroupOperation>) {
        let mut batch = self.table.take_parked();
        let redispatched = batch.len();
        batch.extend(ops);
        if batch.is_empty() {
            return;
        }

        let ops = GroupOperations::new(batch);
        let (adds, modifies, deletes) = ops.counts();
        let correlation_id = Uuid::new_v4().to_string();
        let details = serde_json::json!({
            "adds": adds,
            "modifies": modifies,
            "deletes": deletes,
            "redispatched": redispatched,
        });

        match self.transport.dispatch(self.device_id(), &ops) {
            Ok(transport) => {
                debug!(device = %self.device_id(), transport = %transport, count = ops.len(), "Operations dispatched");
                audit_log!(
                    AuditRecord::new(AuditCategory::SouthboundDispatch, SOURCE, "perform_group_operation")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(self.device_id().to_string())
                        .with_object_type(transport)
                        .with_correlation_id(correlation_id)
                        .with_details(details)
                );
            }
            Err(DispatchError::Unavailable(_)) => {
                debug!(device = %self.device_id(), count = ops.len(), "No transport for device, parking operations");
                audit_log!(
                    AuditRecord::new(AuditCategory::SouthboundDispatch, SOURCE, "perform_group_operation")
                        .with_outcome(AuditOutcome::InProgress)
                        .with_object_id(self.device_id().to_string())
                        .with_correlation_id(correlation_id)
                        .with_details(details)
                );
                self.table.park(ops.into_vec());
            }
            Err(DispatchError::Rejected {
                transport,
                reason,
                failed,
            }) => {
                warn!(device = %self.device_id(), transport = %transport, reason = %reason, failed = failed.len(), "Operations rejected");
                audit_log!(
                    AuditRecord::new(AuditCategory::SouthboundDispatch, SOURCE, "perform_group_operation")
                        .with_object_id(self.device_id().to_string())
                        .with_object_type(transport)
                        .with_correlation_id(correlation_id)
                        .with_error(reason)
                        .with_details(details)
                );
                let events: Vec<GroupEvent> = failed
                    .iter()
                    .filter_map(|op| self.operation_failed(op))
                    .collect();
                self.events.post(events);
            }
        }
    }
}
