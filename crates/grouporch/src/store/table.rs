//! Desired-state group table for one device.

use super::types::{
    AuditState, BucketUpdate, ExtraneousGroup, PendingRequest, Rollback, StoredGroup, TableStats,
};
use crate::error::{GroupError, GroupResult};
use crate::model::{Group, GroupDescription, GroupOperation, GroupState, ObservedGroup};
use grouporch_types::{ApplicationId, DeviceId, GroupId, GroupKey};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Groups, pending requests, and extraneous entries of a single device.
///
/// The table is owned by the device's reconciliation actor, so every method
/// takes `&mut self` and no locking is needed.
#[derive(Debug)]
pub struct DeviceGroupTable {
    device_id: DeviceId,
    audit_state: AuditState,
    groups: HashMap<GroupKey, StoredGroup>,
    ids: HashMap<GroupId, GroupKey>,
    pending: VecDeque<PendingRequest>,
    extraneous: BTreeMap<GroupId, ExtraneousGroup>,
    parked: Vec<GroupOperation>,
    first_id: u32,
    next_id: u32,
    stats: TableStats,
}

impl DeviceGroupTable {
    pub fn new(device_id: DeviceId, first_id: u32) -> Self {
        let first_id = first_id.max(1);
        Self {
            device_id,
            audit_state: AuditState::Unaudited,
            groups: HashMap::new(),
            ids: HashMap::new(),
            pending: VecDeque::new(),
            extraneous: BTreeMap::new(),
            parked: Vec::new(),
            first_id,
            next_id: first_id,
            stats: TableStats::default(),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn audit_state(&self) -> AuditState {
        self.audit_state
    }

    pub fn is_audited(&self) -> bool {
        self.audit_state == AuditState::Audited
    }

    pub fn mark_audited(&mut self) {
        self.audit_state = AuditState::Audited;
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TableStats {
        &mut self.stats
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&Group> {
        self.groups.get(key).map(|stored| &stored.group)
    }

    pub fn get_by_id(&self, id: GroupId) -> Option<&Group> {
        self.ids.get(&id).and_then(|key| self.get(key))
    }

    /// All desired groups, ordered by id.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.values().map(|s| s.group.clone()).collect();
        groups.sort_by_key(Group::id);
        groups
    }

    pub fn groups_of(&self, app_id: &ApplicationId) -> Vec<Group> {
        let mut groups: Vec<Group> = self
            .groups
            .values()
            .filter(|s| s.group.app_id() == app_id)
            .map(|s| s.group.clone())
            .collect();
        groups.sort_by_key(Group::id);
        groups
    }

    /// Records a new desired group in `PendingAdd`.
    pub fn create_desired(&mut self, desc: GroupDescription) -> GroupResult<Group> {
        desc.buckets
            .validate(desc.kind)
            .map_err(GroupError::invalid_buckets)?;
        if self.groups.contains_key(&desc.key) {
            return Err(GroupError::duplicate_key(&self.device_id, &desc.key));
        }
        let id = match desc.given_id {
            Some(id) if self.ids.contains_key(&id) => {
                return Err(GroupError::DuplicateId {
                    device_id: self.device_id.clone(),
                    group_id: id,
                });
            }
            Some(id) => id,
            None => self.allocate_id(),
        };

        let group = Group::pending(desc, id);
        self.insert(StoredGroup {
            group: group.clone(),
            rollback: None,
        });
        self.stats.groups_requested += 1;
        debug!(device = %self.device_id, group = %group, "Desired group recorded");
        Ok(group)
    }

    /// Extraneous group that a new description can take over.
    ///
    /// With a given id, only the extraneous group under that id matches.
    /// Otherwise the lowest-id group of the same type and buckets does.
    /// Groups with a DELETE in flight never match.
    pub fn matching_extraneous(&self, desc: &GroupDescription) -> Option<&ObservedGroup> {
        let mut candidates = self
            .extraneous
            .values()
            .filter(|e| !e.delete_issued)
            .map(|e| &e.group);
        match desc.given_id {
            Some(id) => candidates.find(|g| g.id == id),
            None => candidates.find(|g| g.kind == desc.kind && g.buckets == desc.buckets),
        }
    }

    /// Records `desc` as the desired state of a group already on the device.
    ///
    /// The record is `Added` when the device copy already has the requested
    /// type and buckets, and `PendingUpdate` otherwise; a failed MODIFY then
    /// reverts to what the device reported.
    pub fn adopt(&mut self, desc: GroupDescription, observed: &ObservedGroup) -> GroupResult<Group> {
        desc.buckets
            .validate(desc.kind)
            .map_err(GroupError::invalid_buckets)?;
        if self.groups.contains_key(&desc.key) {
            return Err(GroupError::duplicate_key(&self.device_id, &desc.key));
        }
        if self.ids.contains_key(&observed.id) {
            return Err(GroupError::DuplicateId {
                device_id: self.device_id.clone(),
                group_id: observed.id,
            });
        }

        let in_place = desc.kind == observed.kind && desc.buckets == observed.buckets;
        let rollback = (!in_place).then(|| Rollback {
            buckets: observed.buckets.clone(),
            key: desc.key.clone(),
            app_id: desc.app_id.clone(),
        });
        let state = if in_place {
            GroupState::Added
        } else {
            GroupState::PendingUpdate
        };
        let group = Group::pending(desc, observed.id)
            .with_stats(observed)
            .with_state(state);

        self.extraneous.remove(&observed.id);
        self.insert(StoredGroup {
            group: group.clone(),
            rollback,
        });
        self.stats.groups_requested += 1;
        debug!(device = %self.device_id, group = %group, "Extraneous group adopted");
        Ok(group)
    }

    /// Moves a group to `PendingUpdate` with the mutated bucket list.
    ///
    /// Returns `Ok(None)` when the mutation would not change the buckets.
    /// The snapshot taken when the group was last `Added` is kept across
    /// successive updates.
    pub fn stage_update(&mut self, update: &BucketUpdate) -> GroupResult<Option<Group>> {
        let stored = self
            .groups
            .get(&update.key)
            .ok_or_else(|| GroupError::not_found(&self.device_id, &update.key))?;
        let current = &stored.group;

        if !matches!(current.state(), GroupState::Added | GroupState::PendingUpdate) {
            return Err(GroupError::InvalidState {
                device_id: self.device_id.clone(),
                key: update.key.clone(),
                state: current.state().to_string(),
                action: "update buckets",
            });
        }

        let Some(buckets) = update.update_type.apply(current.buckets(), &update.buckets) else {
            return Ok(None);
        };
        buckets
            .validate(current.kind())
            .map_err(GroupError::invalid_buckets)?;

        let new_key = update.new_key.clone().unwrap_or_else(|| update.key.clone());
        if new_key != update.key && self.groups.contains_key(&new_key) {
            return Err(GroupError::duplicate_key(&self.device_id, &new_key));
        }

        let rollback = stored
            .rollback
            .clone()
            .unwrap_or_else(|| Rollback::of(current));
        let updated = current.with_update(buckets, new_key, update.app_id.clone());

        self.remove_key(&update.key);
        self.insert(StoredGroup {
            group: updated.clone(),
            rollback: Some(rollback),
        });
        Ok(Some(updated))
    }

    /// Moves a group to `PendingDelete`.
    ///
    /// Returns `Ok(None)` when a delete is already in flight.
    pub fn mark_delete(&mut self, key: &GroupKey) -> GroupResult<Option<Group>> {
        let stored = self
            .groups
            .get_mut(key)
            .ok_or_else(|| GroupError::not_found(&self.device_id, key))?;
        if stored.group.state() == GroupState::PendingDelete {
            return Ok(None);
        }
        stored.group = stored.group.with_state(GroupState::PendingDelete);
        stored.rollback = None;
        Ok(Some(stored.group.clone()))
    }

    /// Replaces the stored snapshot of `group` (matched by id).
    pub fn replace(&mut self, group: Group) {
        if let Some(stored) = self
            .ids
            .get(&group.id())
            .and_then(|key| self.groups.get_mut(key))
        {
            if group.state() == GroupState::Added {
                stored.rollback = None;
            }
            stored.group = group;
        } else {
            warn!(device = %self.device_id, group = %group, "Replacing unknown group");
        }
    }

    /// Sets the state of a group and drops its rollback snapshot.
    pub fn set_state(&mut self, id: GroupId, state: GroupState) -> Option<Group> {
        let key = self.ids.get(&id)?.clone();
        let stored = self.groups.get_mut(&key)?;
        stored.group = stored.group.with_state(state);
        stored.rollback = None;
        Some(stored.group.clone())
    }

    /// Restores the pre-update buckets, key, and app of a group and marks it
    /// `Added`.
    ///
    /// If another group took the old key meanwhile, only the buckets are
    /// restored.
    pub fn rollback(&mut self, id: GroupId) -> Option<Group> {
        let key = self.ids.get(&id)?.clone();
        let stored = self.groups.get(&key)?.clone();
        let restored = match stored.rollback {
            Some(snapshot) => {
                let key = if snapshot.key == key || !self.groups.contains_key(&snapshot.key) {
                    snapshot.key
                } else {
                    warn!(
                        device = %self.device_id,
                        old_key = %snapshot.key,
                        key = %key,
                        "Old key reused, keeping current key on rollback"
                    );
                    key.clone()
                };
                stored
                    .group
                    .with_contents(snapshot.buckets, key, snapshot.app_id)
                    .with_state(GroupState::Added)
            }
            None => stored.group.with_state(GroupState::Added),
        };

        self.remove_key(&key);
        self.insert(StoredGroup {
            group: restored.clone(),
            rollback: None,
        });
        Some(restored)
    }

    /// Removes a group record, freeing its key and id.
    pub fn remove(&mut self, id: GroupId) -> Option<Group> {
        let key = self.ids.get(&id)?.clone();
        self.remove_key(&key).map(|stored| stored.group)
    }

    // --- pending queue ---

    /// Queues a request received before the first audit.
    ///
    /// The request is checked against the queue as it would look once
    /// drained, so the same errors are reported as for an audited device.
    pub fn enqueue_pending(&mut self, request: PendingRequest) -> GroupResult<()> {
        let folded = self.fold_pending();
        let keys: HashSet<&GroupKey> = folded.iter().map(|d| &d.key).collect();

        match &request {
            PendingRequest::Add(desc) => {
                desc.buckets
                    .validate(desc.kind)
                    .map_err(GroupError::invalid_buckets)?;
                if keys.contains(&desc.key) {
                    return Err(GroupError::duplicate_key(&self.device_id, &desc.key));
                }
                if let Some(id) = desc.given_id {
                    if folded.iter().any(|d| d.given_id == Some(id)) {
                        return Err(GroupError::DuplicateId {
                            device_id: self.device_id.clone(),
                            group_id: id,
                        });
                    }
                }
            }
            PendingRequest::Update(update) => {
                let Some(desc) = folded.iter().find(|d| d.key == update.key) else {
                    return Err(GroupError::not_found(&self.device_id, &update.key));
                };
                if let Some(buckets) = update.update_type.apply(&desc.buckets, &update.buckets) {
                    buckets
                        .validate(desc.kind)
                        .map_err(GroupError::invalid_buckets)?;
                }
                if let Some(new_key) = &update.new_key {
                    if *new_key != update.key && keys.contains(new_key) {
                        return Err(GroupError::duplicate_key(&self.device_id, new_key));
                    }
                }
            }
            PendingRequest::Remove { key, .. } => {
                if !keys.contains(key) {
                    return Err(GroupError::not_found(&self.device_id, key));
                }
            }
        }

        debug!(device = %self.device_id, key = %request.key(), "Request queued until first audit");
        self.pending.push_back(request);
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Descriptions the queue resolves to, in order of first submission.
    pub fn fold_pending(&self) -> Vec<GroupDescription> {
        let mut descs: Vec<GroupDescription> = Vec::new();
        for request in &self.pending {
            match request {
                PendingRequest::Add(desc) => descs.push(desc.clone()),
                PendingRequest::Update(update) => {
                    if let Some(desc) = descs.iter_mut().find(|d| d.key == update.key) {
                        if let Some(buckets) = update.update_type.apply(&desc.buckets, &update.buckets) {
                            desc.buckets = buckets;
                        }
                        if let Some(new_key) = &update.new_key {
                            desc.key = new_key.clone();
                        }
                        desc.app_id = update.app_id.clone();
                    }
                }
                PendingRequest::Remove { key, .. } => descs.retain(|d| d.key != *key),
            }
        }
        descs
    }

    /// Empties the queue, returning what it resolves to.
    pub fn drain_pending(&mut self) -> Vec<GroupDescription> {
        let descs = self.fold_pending();
        self.pending.clear();
        descs
    }

    // --- extraneous groups ---

    pub fn extraneous(&self) -> impl Iterator<Item = &ExtraneousGroup> {
        self.extraneous.values()
    }

    pub fn extraneous_entry(&self, id: GroupId) -> Option<&ExtraneousGroup> {
        self.extraneous.get(&id)
    }

    /// Records (or refreshes) an observed group nothing asked for.
    pub fn record_extraneous(&mut self, observed: ObservedGroup) {
        match self.extraneous.get_mut(&observed.id) {
            Some(entry) => entry.group = observed,
            None => {
                self.extraneous.insert(
                    observed.id,
                    ExtraneousGroup {
                        group: observed,
                        delete_issued: false,
                    },
                );
            }
        }
    }

    pub fn mark_extraneous_deleted(&mut self, id: GroupId) {
        if let Some(entry) = self.extraneous.get_mut(&id) {
            entry.delete_issued = true;
            self.stats.extraneous_deleted += 1;
        }
    }

    /// Makes an extraneous group eligible for deletion again.
    ///
    /// Returns false if the id is not tracked.
    pub fn extraneous_delete_failed(&mut self, id: GroupId) -> bool {
        match self.extraneous.get_mut(&id) {
            Some(entry) => {
                entry.delete_issued = false;
                true
            }
            None => false,
        }
    }

    pub fn forget_extraneous(&mut self, id: GroupId) -> Option<ExtraneousGroup> {
        self.extraneous.remove(&id)
    }

    /// Drops entries whose ids are absent from `seen`.
    pub fn retain_extraneous(&mut self, seen: &HashSet<GroupId>) -> usize {
        let before = self.extraneous.len();
        self.extraneous.retain(|id, _| seen.contains(id));
        before - self.extraneous.len()
    }

    // --- undeliverable operations ---

    pub fn park(&mut self, ops: Vec<GroupOperation>) {
        self.parked.extend(ops);
    }

    pub fn take_parked(&mut self) -> Vec<GroupOperation> {
        std::mem::take(&mut self.parked)
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Drops everything known about the device and returns it to `Unaudited`.
    ///
    /// Returns the number of desired groups removed.
    pub fn purge(&mut self) -> usize {
        let removed = self.groups.len();
        self.groups.clear();
        self.ids.clear();
        self.pending.clear();
        self.extraneous.clear();
        self.parked.clear();
        self.audit_state = AuditState::Unaudited;
        self.next_id = self.first_id;
        removed
    }

    fn allocate_id(&mut self) -> GroupId {
        loop {
            let candidate = GroupId::new(self.next_id);
            self.next_id = self.next_id.checked_add(1).unwrap_or(self.first_id);
            if !self.ids.contains_key(&candidate) && !self.extraneous.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn insert(&mut self, stored: StoredGroup) {
        self.ids
            .insert(stored.group.id(), stored.group.key().clone());
        self.groups.insert(stored.group.key().clone(), stored);
    }

    fn remove_key(&mut self, key: &GroupKey) -> Option<StoredGroup> {
        let stored = self.groups.remove(key)?;
        self.ids.remove(&stored.group.id());
        Some(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBucket, GroupBuckets, GroupType, Treatment};
    use crate::store::UpdateType;
    use grouporch_types::PortNumber;
    use pretty_assertions::assert_eq;

    fn device() -> DeviceId {
        DeviceId::new("of:0000000000000001").unwrap()
    }

    fn app() -> ApplicationId {
        ApplicationId::new(1, "fwd")
    }

    fn buckets(ports: &[u32]) -> GroupBuckets {
        GroupBuckets::new(
            ports
                .iter()
                .map(|p| GroupBucket::select(Treatment::builder().output(PortNumber::new(*p)).build()))
                .collect(),
        )
    }

    fn desc(key: &str, ports: &[u32]) -> GroupDescription {
        GroupDescription::new(device(), GroupType::Select, buckets(ports), key, app())
    }

    fn update(key: &str, update_type: UpdateType, ports: &[u32], new_key: Option<&str>) -> BucketUpdate {
        BucketUpdate {
            key: GroupKey::from(key),
            update_type,
            buckets: buckets(ports),
            new_key: new_key.map(GroupKey::from),
            app_id: app(),
        }
    }

    fn other_app() -> ApplicationId {
        ApplicationId::new(99, "org.example.other")
    }

    fn added(table: &mut DeviceGroupTable, key: &str, ports: &[u32]) -> Group {
        let group = table.create_desired(desc(key, ports)).unwrap();
        table.set_state(group.id(), GroupState::Added).unwrap()
    }

    #[test]
    fn test_create_desired_allocates_ids() {
        let mut table = DeviceGroupTable::new(device(), 1);
        let g1 = table.create_desired(desc("a", &[1])).unwrap();
        let g2 = table.create_desired(desc("b", &[2])).unwrap();

        assert_eq!(g1.id(), GroupId::new(1));
        assert_eq!(g2.id(), GroupId::new(2));
        assert_eq!(g1.state(), GroupState::PendingAdd);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_by_id(GroupId::new(2)).unwrap().key(), &GroupKey::from("b"));
    }

    #[test]
    fn test_create_desired_duplicates() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table
            .create_desired(desc("a", &[1]).with_given_id(GroupId::new(9)))
            .unwrap();

        let err = table.create_desired(desc("a", &[2])).unwrap_err();
        assert!(matches!(err, GroupError::DuplicateKey { .. }));

        let err = table
            .create_desired(desc("b", &[2]).with_given_id(GroupId::new(9)))
            .unwrap_err();
        assert!(matches!(err, GroupError::DuplicateId { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_allocation_skips_extraneous_ids() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.record_extraneous(ObservedGroup::new(GroupId::new(1), GroupType::Select, buckets(&[1])));
        table.record_extraneous(ObservedGroup::new(GroupId::new(2), GroupType::Select, buckets(&[2])));

        let group = table.create_desired(desc("a", &[3])).unwrap();
        assert_eq!(group.id(), GroupId::new(3));
    }

    #[test]
    fn test_stage_update_rekeys() {
        let mut table = DeviceGroupTable::new(device(), 1);
        added(&mut table, "old", &[1, 2]);

        let updated = table
            .stage_update(&update("old", UpdateType::Add, &[3], Some("new")))
            .unwrap()
            .unwrap();

        assert_eq!(updated.state(), GroupState::PendingUpdate);
        assert_eq!(updated.buckets(), &buckets(&[1, 2, 3]));
        assert!(table.get(&GroupKey::from("old")).is_none());
        assert_eq!(table.get(&GroupKey::from("new")).unwrap().id(), updated.id());
    }

    #[test]
    fn test_stage_update_noop_and_errors() {
        let mut table = DeviceGroupTable::new(device(), 1);
        added(&mut table, "a", &[1]);
        table.create_desired(desc("pending", &[5])).unwrap();
        added(&mut table, "c", &[6]);

        assert_eq!(
            table.stage_update(&update("a", UpdateType::Remove, &[9], None)).unwrap(),
            None
        );
        assert!(matches!(
            table.stage_update(&update("missing", UpdateType::Add, &[2], None)),
            Err(GroupError::NotFound { .. })
        ));
        assert!(matches!(
            table.stage_update(&update("pending", UpdateType::Add, &[2], None)),
            Err(GroupError::InvalidState { .. })
        ));
        assert!(matches!(
            table.stage_update(&update("a", UpdateType::Add, &[2], Some("c"))),
            Err(GroupError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_rollback_restores_oldest_snapshot() {
        let mut table = DeviceGroupTable::new(device(), 1);
        let original = added(&mut table, "k0", &[1, 2]);

        table
            .stage_update(&update("k0", UpdateType::Add, &[3], Some("k1")))
            .unwrap();
        table
            .stage_update(&BucketUpdate {
                app_id: other_app(),
                ..update("k1", UpdateType::Remove, &[1], Some("k2"))
            })
            .unwrap();
        assert!(table.groups_of(&app()).is_empty());

        let restored = table.rollback(original.id()).unwrap();
        assert_eq!(restored.state(), GroupState::Added);
        assert!(restored.buckets().identical(original.buckets()));
        assert_eq!(restored.key(), original.key());
        assert_eq!(restored.app_id(), &app());
        assert_eq!(table.groups_of(&app()), vec![restored.clone()]);
        assert!(table.groups_of(&other_app()).is_empty());
        assert!(table.get(&GroupKey::from("k2")).is_none());
        assert_eq!(table.get(&GroupKey::from("k0")).unwrap().id(), original.id());
    }

    #[test]
    fn test_adopt_matching_extraneous() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.record_extraneous(ObservedGroup::new(GroupId::new(5), GroupType::Select, buckets(&[1])));
        table.record_extraneous(
            ObservedGroup::new(GroupId::new(6), GroupType::Select, buckets(&[2])).with_reference_count(3),
        );

        // Buckets alone pick the group when no id is given.
        let by_buckets = desc("a", &[2]);
        let observed = table.matching_extraneous(&by_buckets).cloned().unwrap();
        assert_eq!(observed.id, GroupId::new(6));
        let a = table.adopt(by_buckets, &observed).unwrap();
        assert_eq!(a.id(), GroupId::new(6));
        assert_eq!(a.state(), GroupState::Added);
        assert_eq!(a.reference_count(), 3);

        // A given id wins over buckets, and differing buckets need a MODIFY.
        let by_id = desc("b", &[9]).with_given_id(GroupId::new(5));
        let observed = table.matching_extraneous(&by_id).cloned().unwrap();
        let b = table.adopt(by_id, &observed).unwrap();
        assert_eq!(b.state(), GroupState::PendingUpdate);
        assert_eq!(b.buckets(), &buckets(&[9]));
        assert_eq!(table.extraneous().count(), 0);

        let reverted = table.rollback(b.id()).unwrap();
        assert_eq!(reverted.buckets(), &buckets(&[1]));
        assert_eq!(reverted.key(), &GroupKey::from("b"));
    }

    #[test]
    fn test_no_adoption_while_delete_in_flight() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.record_extraneous(ObservedGroup::new(GroupId::new(5), GroupType::Select, buckets(&[1])));
        table.mark_extraneous_deleted(GroupId::new(5));

        assert!(table.matching_extraneous(&desc("a", &[1])).is_none());
        assert!(table
            .matching_extraneous(&desc("a", &[1]).with_given_id(GroupId::new(5)))
            .is_none());
        assert!(table.matching_extraneous(&desc("a", &[2])).is_none());
    }

    #[test]
    fn test_mark_delete_and_remove() {
        let mut table = DeviceGroupTable::new(device(), 1);
        let group = added(&mut table, "a", &[1]);

        let deleting = table.mark_delete(&GroupKey::from("a")).unwrap().unwrap();
        assert_eq!(deleting.state(), GroupState::PendingDelete);
        assert_eq!(table.mark_delete(&GroupKey::from("a")).unwrap(), None);

        let removed = table.remove(group.id()).unwrap();
        assert_eq!(removed.id(), group.id());
        assert!(table.get(&GroupKey::from("a")).is_none());
        assert!(table.get_by_id(group.id()).is_none());
    }

    #[test]
    fn test_pending_queue_folds_in_order() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.enqueue_pending(PendingRequest::Add(desc("a", &[1]))).unwrap();
        table.enqueue_pending(PendingRequest::Add(desc("b", &[2]))).unwrap();
        table
            .enqueue_pending(PendingRequest::Update(update("a", UpdateType::Add, &[3], Some("a2"))))
            .unwrap();
        table.enqueue_pending(PendingRequest::Add(desc("c", &[4]))).unwrap();
        table
            .enqueue_pending(PendingRequest::Remove {
                key: GroupKey::from("b"),
                app_id: app(),
            })
            .unwrap();

        let drained = table.drain_pending();
        let keys: Vec<String> = drained.iter().map(|d| d.key.to_string()).collect();
        assert_eq!(keys, vec!["a2", "c"]);
        assert_eq!(drained[0].buckets, buckets(&[1, 3]));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_pending_queue_rejects_like_table() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.enqueue_pending(PendingRequest::Add(desc("a", &[1]))).unwrap();

        assert!(matches!(
            table.enqueue_pending(PendingRequest::Add(desc("a", &[2]))),
            Err(GroupError::DuplicateKey { .. })
        ));
        assert!(matches!(
            table.enqueue_pending(PendingRequest::Remove {
                key: GroupKey::from("zz"),
                app_id: app(),
            }),
            Err(GroupError::NotFound { .. })
        ));
        assert_eq!(table.pending_len(), 1);
    }

    #[test]
    fn test_extraneous_tracking() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.record_extraneous(ObservedGroup::new(GroupId::new(7), GroupType::All, GroupBuckets::empty()));
        table.mark_extraneous_deleted(GroupId::new(7));
        assert!(table.extraneous_entry(GroupId::new(7)).unwrap().delete_issued);

        assert!(table.extraneous_delete_failed(GroupId::new(7)));
        assert!(!table.extraneous_entry(GroupId::new(7)).unwrap().delete_issued);
        assert!(!table.extraneous_delete_failed(GroupId::new(8)));

        assert_eq!(table.retain_extraneous(&HashSet::new()), 1);
        assert_eq!(table.extraneous().count(), 0);
    }

    #[test]
    fn test_purge_resets_everything() {
        let mut table = DeviceGroupTable::new(device(), 1);
        table.mark_audited();
        added(&mut table, "a", &[1]);
        table.park(vec![GroupOperation::delete(GroupId::new(3), GroupType::Select)]);

        assert_eq!(table.purge(), 1);
        assert!(table.is_empty());
        assert_eq!(table.audit_state(), AuditState::Unaudited);
        assert_eq!(table.parked_len(), 0);
        assert_eq!(table.create_desired(desc("b", &[1])).unwrap().id(), GroupId::new(1));
    }
}
