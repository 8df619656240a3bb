//! Southbound group operations.

use super::bucket::{GroupBuckets, GroupType};
use super::group::Group;
use grouporch_types::GroupId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Add => "ADD",
            OperationType::Modify => "MODIFY",
            OperationType::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Why a device refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// ADD for an id the device already holds.
    GroupExists,
    /// MODIFY or DELETE for an id the device does not hold.
    UnknownGroup,
    /// Group type or buckets not supported by the device.
    InvalidGroup,
    /// Any other refusal.
    Rejected,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureCode::GroupExists => "GROUP_EXISTS",
            FailureCode::UnknownGroup => "UNKNOWN_GROUP",
            FailureCode::InvalidGroup => "INVALID_GROUP",
            FailureCode::Rejected => "REJECTED",
        })
    }
}

/// One instruction to a device's group table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOperation {
    pub op_type: OperationType,
    pub group_id: GroupId,
    pub kind: GroupType,
    /// Empty for DELETE.
    pub buckets: GroupBuckets,
    /// Set by the reporter when the operation comes back as failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCode>,
}

impl GroupOperation {
    pub fn add(group_id: GroupId, kind: GroupType, buckets: GroupBuckets) -> Self {
        Self {
            op_type: OperationType::Add,
            group_id,
            kind,
            buckets,
            failure: None,
        }
    }

    pub fn modify(group_id: GroupId, kind: GroupType, buckets: GroupBuckets) -> Self {
        Self {
            op_type: OperationType::Modify,
            group_id,
            kind,
            buckets,
            failure: None,
        }
    }

    pub fn delete(group_id: GroupId, kind: GroupType) -> Self {
        Self {
            op_type: OperationType::Delete,
            group_id,
            kind,
            buckets: GroupBuckets::empty(),
            failure: None,
        }
    }

    /// ADD carrying the group's current buckets.
    pub fn add_of(group: &Group) -> Self {
        Self::add(group.id(), group.kind(), group.buckets().clone())
    }

    pub fn modify_of(group: &Group) -> Self {
        Self::modify(group.id(), group.kind(), group.buckets().clone())
    }

    pub fn delete_of(group: &Group) -> Self {
        Self::delete(group.id(), group.kind())
    }

    /// The same operation, reported as failed with `code`.
    pub fn failed_with(&self, code: FailureCode) -> Self {
        Self {
            failure: Some(code),
            ..self.clone()
        }
    }
}

impl fmt::Display for GroupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.op_type, self.kind, self.group_id)?;
        if let Some(code) = self.failure {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

/// Batch of operations for a single device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupOperations(Vec<GroupOperation>);

impl GroupOperations {
    pub fn new(ops: Vec<GroupOperation>) -> Self {
        GroupOperations(ops)
    }

    pub fn single(op: GroupOperation) -> Self {
        GroupOperations(vec![op])
    }

    pub fn push(&mut self, op: GroupOperation) {
        self.0.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = GroupOperation>) {
        self.0.extend(ops);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupOperation> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[GroupOperation] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<GroupOperation> {
        self.0
    }

    /// Number of operations of each type, as `(add, modify, delete)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.0.iter().fold((0, 0, 0), |(a, m, d), op| match op.op_type {
            OperationType::Add => (a + 1, m, d),
            OperationType::Modify => (a, m + 1, d),
            OperationType::Delete => (a, m, d + 1),
        })
    }
}

impl From<Vec<GroupOperation>> for GroupOperations {
    fn from(ops: Vec<GroupOperation>) -> Self {
        GroupOperations(ops)
    }
}

impl IntoIterator for GroupOperations {
    type Item = GroupOperation;
    type IntoIter = std::vec::IntoIter<GroupOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a GroupOperations {
    type Item = &'a GroupOperation;
    type IntoIter = std::slice::Iter<'a, GroupOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delete_has_no_buckets() {
        let op = GroupOperation::delete(GroupId::new(2), GroupType::Select);
        assert!(op.buckets.is_empty());
        assert_eq!(op.to_string(), "DELETE SELECT 0x2");
    }

    #[test]
    fn test_counts() {
        let ops = GroupOperations::new(vec![
            GroupOperation::delete(GroupId::new(1), GroupType::All),
            GroupOperation::add(GroupId::new(2), GroupType::All, GroupBuckets::empty()),
            GroupOperation::add(GroupId::new(3), GroupType::All, GroupBuckets::empty()),
        ]);
        assert_eq!(ops.counts(), (2, 0, 1));
    }

    #[test]
    fn test_serialize() {
        let op = GroupOperation::delete(GroupId::new(5), GroupType::Failover);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op_type"], "DELETE");
        assert_eq!(json["kind"], "FAILOVER");
        assert_eq!(json["group_id"], 5);
        assert!(json.get("failure").is_none());

        let failed = op.failed_with(FailureCode::UnknownGroup);
        assert_eq!(serde_json::to_value(&failed).unwrap()["failure"], "UNKNOWN_GROUP");
        assert_eq!(failed.to_string(), "DELETE FAILOVER 0x5 (UNKNOWN_GROUP)");
    }
}
