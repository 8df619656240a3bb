//! Group events and listener contract.

use crate::model::Group;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupEventType {
    GroupAdded,
    GroupUpdated,
    GroupRemoved,
    GroupAddFailed,
    GroupUpdateFailed,
    GroupRemoveFailed,
    GroupBucketFailover,
}

impl GroupEventType {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            GroupEventType::GroupAddFailed
                | GroupEventType::GroupUpdateFailed
                | GroupEventType::GroupRemoveFailed
        )
    }
}

impl fmt::Display for GroupEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupEventType::GroupAdded => "GROUP_ADDED",
            GroupEventType::GroupUpdated => "GROUP_UPDATED",
            GroupEventType::GroupRemoved => "GROUP_REMOVED",
            GroupEventType::GroupAddFailed => "GROUP_ADD_FAILED",
            GroupEventType::GroupUpdateFailed => "GROUP_UPDATE_FAILED",
            GroupEventType::GroupRemoveFailed => "GROUP_REMOVE_FAILED",
            GroupEventType::GroupBucketFailover => "GROUP_BUCKET_FAILOVER",
        };
        f.write_str(s)
    }
}

/// Outward notification about a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupEvent {
    pub event_type: GroupEventType,
    /// Snapshot of the group at the time of the event.
    pub group: Group,
}

impl GroupEvent {
    pub fn new(event_type: GroupEventType, group: Group) -> Self {
        Self { event_type, group }
    }
}

impl fmt::Display for GroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type, self.group)
    }
}

/// Receives group events.
///
/// Called on tokio's blocking pool, never from a device actor, one batch
/// at a time. A slow or blocking listener delays later events but not
/// reconciliation.
pub trait GroupListener: Send + Sync {
    fn event(&self, event: &GroupEvent);
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}
