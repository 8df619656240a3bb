//! Group descriptions, records, and device-reported entries.

use super::bucket::{GroupBuckets, GroupType};
use grouporch_types::{ApplicationId, DeviceId, GroupId, GroupKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a desired group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupState {
    PendingAdd,
    Added,
    PendingUpdate,
    PendingDelete,
}

impl GroupState {
    pub fn is_pending(&self) -> bool {
        !matches!(self, GroupState::Added)
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupState::PendingAdd => "PENDING_ADD",
            GroupState::Added => "ADDED",
            GroupState::PendingUpdate => "PENDING_UPDATE",
            GroupState::PendingDelete => "PENDING_DELETE",
        };
        f.write_str(s)
    }
}

/// Application intent for a group on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub device_id: DeviceId,
    pub kind: GroupType,
    pub buckets: GroupBuckets,
    pub key: GroupKey,
    /// Preferred id; allocated by the engine when absent.
    pub given_id: Option<GroupId>,
    pub app_id: ApplicationId,
}

impl GroupDescription {
    pub fn new(
        device_id: DeviceId,
        kind: GroupType,
        buckets: GroupBuckets,
        key: impl Into<GroupKey>,
        app_id: ApplicationId,
    ) -> Self {
        Self {
            device_id,
            kind,
            buckets,
            key: key.into(),
            given_id: None,
            app_id,
        }
    }

    pub fn with_given_id(mut self, id: GroupId) -> Self {
        self.given_id = Some(id);
        self
    }
}

/// Authoritative record of a desired group.
///
/// Records are immutable snapshots: every transition returns a new value
/// that replaces the old one in the device table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    id: GroupId,
    device_id: DeviceId,
    kind: GroupType,
    buckets: GroupBuckets,
    key: GroupKey,
    app_id: ApplicationId,
    given_id: Option<GroupId>,
    state: GroupState,
    reference_count: u32,
    packets: u64,
    bytes: u64,
    life: u64,
}

impl Group {
    /// New record in `PendingAdd` for `desc` under `id`.
    pub fn pending(desc: GroupDescription, id: GroupId) -> Self {
        Self {
            id,
            device_id: desc.device_id,
            kind: desc.kind,
            buckets: desc.buckets,
            key: desc.key,
            app_id: desc.app_id,
            given_id: desc.given_id,
            state: GroupState::PendingAdd,
            reference_count: 0,
            packets: 0,
            bytes: 0,
            life: 0,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn kind(&self) -> GroupType {
        self.kind
    }

    pub fn buckets(&self) -> &GroupBuckets {
        &self.buckets
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn app_id(&self) -> &ApplicationId {
        &self.app_id
    }

    pub fn given_id(&self) -> Option<GroupId> {
        self.given_id
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Seconds the group has been installed, as last reported.
    pub fn life(&self) -> u64 {
        self.life
    }

    pub fn with_state(&self, state: GroupState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Target of a bucket mutation: new buckets, new key, `PendingUpdate`.
    pub fn with_update(&self, buckets: GroupBuckets, key: GroupKey, app_id: ApplicationId) -> Self {
        Self {
            buckets,
            key,
            app_id,
            state: GroupState::PendingUpdate,
            ..self.clone()
        }
    }

    /// Restores a prior bucket list, key, and owner.
    pub fn with_contents(&self, buckets: GroupBuckets, key: GroupKey, app_id: ApplicationId) -> Self {
        Self {
            buckets,
            key,
            app_id,
            ..self.clone()
        }
    }

    /// Copies the counters from a device report.
    pub fn with_stats(&self, observed: &ObservedGroup) -> Self {
        Self {
            reference_count: observed.reference_count,
            packets: observed.packets,
            bytes: observed.bytes,
            life: observed.life,
            ..self.clone()
        }
    }

    pub fn same_stats(&self, observed: &ObservedGroup) -> bool {
        self.reference_count == observed.reference_count
            && self.packets == observed.packets
            && self.bytes == observed.bytes
            && self.life == observed.life
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} key={} {} {} buckets={}",
            self.device_id,
            self.id,
            self.key,
            self.kind,
            self.state,
            self.buckets.len()
        )
    }
}

/// A group entry as reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedGroup {
    pub id: GroupId,
    pub kind: GroupType,
    pub buckets: GroupBuckets,
    pub reference_count: u32,
    #[serde(default)]
    pub packets: u64,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub life: u64,
}

impl ObservedGroup {
    pub fn new(id: GroupId, kind: GroupType, buckets: GroupBuckets) -> Self {
        Self {
            id,
            kind,
            buckets,
            reference_count: 0,
            packets: 0,
            bytes: 0,
            life: 0,
        }
    }

    pub fn with_reference_count(mut self, count: u32) -> Self {
        self.reference_count = count;
        self
    }

    /// Report entry mirroring a desired group's current content.
    pub fn of(group: &Group) -> Self {
        Self::new(group.id(), group.kind(), group.buckets().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBucket, Treatment};
    use grouporch_types::PortNumber;
    use pretty_assertions::assert_eq;

    fn desc() -> GroupDescription {
        let buckets = GroupBuckets::new(vec![GroupBucket::select(
            Treatment::builder().output(PortNumber::new(1)).build(),
        )]);
        GroupDescription::new(
            DeviceId::new("of:001").unwrap(),
            GroupType::Select,
            buckets,
            "k1",
            ApplicationId::new(1, "test"),
        )
    }

    #[test]
    fn test_pending_record() {
        let group = Group::pending(desc().with_given_id(GroupId::new(7)), GroupId::new(7));
        assert_eq!(group.state(), GroupState::PendingAdd);
        assert_eq!(group.given_id(), Some(GroupId::new(7)));
        assert_eq!(group.reference_count(), 0);
        assert!(group.state().is_pending());
    }

    #[test]
    fn test_transitions_leave_original_untouched() {
        let group = Group::pending(desc(), GroupId::new(1));
        let added = group.with_state(GroupState::Added);

        assert_eq!(group.state(), GroupState::PendingAdd);
        assert_eq!(added.state(), GroupState::Added);

        let updated = added.with_update(
            GroupBuckets::empty(),
            GroupKey::from("k2"),
            ApplicationId::new(1, "test"),
        );
        assert_eq!(updated.state(), GroupState::PendingUpdate);
        assert_eq!(updated.key(), &GroupKey::from("k2"));
        assert_eq!(added.key(), &GroupKey::from("k1"));
    }

    #[test]
    fn test_with_stats() {
        let group = Group::pending(desc(), GroupId::new(1));
        let observed = ObservedGroup::of(&group).with_reference_count(3);
        assert!(!group.same_stats(&observed));

        let refreshed = group.with_stats(&observed);
        assert_eq!(refreshed.reference_count(), 3);
        assert!(refreshed.same_stats(&observed));
    }

    #[test]
    fn test_display() {
        let group = Group::pending(desc(), GroupId::new(0x10));
        assert_eq!(group.to_string(), "of:001/0x10 key=k1 SELECT PENDING_ADD buckets=1");
    }
}
