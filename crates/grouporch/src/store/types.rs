//! Types held by the per-device group table.

use crate::model::{Group, GroupBuckets, GroupDescription, ObservedGroup};
use grouporch_types::{ApplicationId, GroupKey};
use serde::Serialize;
use std::fmt;

/// Whether a device has delivered its first group report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditState {
    #[default]
    Unaudited,
    Audited,
}

impl fmt::Display for AuditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditState::Unaudited => f.write_str("UNAUDITED"),
            AuditState::Audited => f.write_str("AUDITED"),
        }
    }
}

/// How a bucket mutation combines with the current bucket list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    Add,
    Remove,
    Set,
}

impl UpdateType {
    /// Applies the mutation; `None` when the result equals `current`.
    pub fn apply(&self, current: &GroupBuckets, buckets: &GroupBuckets) -> Option<GroupBuckets> {
        match self {
            UpdateType::Add => current.with_added(buckets),
            UpdateType::Remove => current.with_removed(buckets),
            UpdateType::Set => (!current.identical(buckets)).then(|| buckets.clone()),
        }
    }
}

/// Bucket mutation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUpdate {
    pub key: GroupKey,
    pub update_type: UpdateType,
    pub buckets: GroupBuckets,
    /// Key the group is known by afterwards; the old key when `None`.
    pub new_key: Option<GroupKey>,
    pub app_id: ApplicationId,
}

/// Request accepted while the device is unaudited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    Add(GroupDescription),
    Update(BucketUpdate),
    Remove { key: GroupKey, app_id: ApplicationId },
}

impl PendingRequest {
    pub fn key(&self) -> &GroupKey {
        match self {
            PendingRequest::Add(desc) => &desc.key,
            PendingRequest::Update(update) => &update.key,
            PendingRequest::Remove { key, .. } => key,
        }
    }
}

/// Buckets and key a `PendingUpdate` group reverts to if its MODIFY fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollback {
    pub buckets: GroupBuckets,
    pub key: GroupKey,
    pub app_id: ApplicationId,
}

impl Rollback {
    pub fn of(group: &Group) -> Self {
        Self {
            buckets: group.buckets().clone(),
            key: group.key().clone(),
            app_id: group.app_id().clone(),
        }
    }
}

/// A desired group plus its rollback snapshot.
#[derive(Debug, Clone)]
pub(crate) struct StoredGroup {
    pub group: Group,
    pub rollback: Option<Rollback>,
}

/// A group present on the device that nothing asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraneousGroup {
    pub group: ObservedGroup,
    /// A DELETE has been sent and not reported as failed.
    pub delete_issued: bool,
}

/// Counters kept per device table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub groups_requested: u64,
    pub groups_confirmed: u64,
    pub groups_removed: u64,
    pub groups_failed: u64,
    pub audits: u64,
    pub extraneous_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupBucket, Treatment};
    use grouporch_types::PortNumber;

    fn buckets(ports: &[u32]) -> GroupBuckets {
        GroupBuckets::new(
            ports
                .iter()
                .map(|p| GroupBucket::all(Treatment::builder().output(PortNumber::new(*p)).build()))
                .collect(),
        )
    }

    #[test]
    fn test_update_type_apply() {
        let current = buckets(&[1, 2]);
        assert!(UpdateType::Add.apply(&current, &buckets(&[3])).is_some());
        assert!(UpdateType::Add.apply(&current, &buckets(&[2])).is_none());
        assert!(UpdateType::Remove.apply(&current, &buckets(&[4])).is_none());
        assert!(UpdateType::Set.apply(&current, &buckets(&[1, 2])).is_none());

        let set = UpdateType::Set.apply(&current, &buckets(&[2, 1])).unwrap();
        assert!(set.identical(&buckets(&[2, 1])));
    }
}
