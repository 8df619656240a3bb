//! Error types for group orchestration.
//!
//! Synchronous rejections (duplicate key, malformed buckets) are returned to
//! the caller as [`GroupError`]. Southbound failures are never surfaced here;
//! they arrive later as failure events.

use grouporch_types::{DeviceId, GroupId, GroupKey};
use thiserror::Error;

/// Result type alias for engine operations.
pub type GroupResult<T> = Result<T, GroupError>;

/// Errors returned synchronously by the group engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// A group with this key already exists (or is queued) on the device.
    #[error("group key {key} already exists on {device_id}")]
    DuplicateKey { device_id: DeviceId, key: GroupKey },

    /// The requested group id is already taken on the device.
    #[error("group id {group_id} already in use on {device_id}")]
    DuplicateId { device_id: DeviceId, group_id: GroupId },

    /// The operation requires a group that does not exist.
    #[error("group key {key} not found on {device_id}")]
    NotFound { device_id: DeviceId, key: GroupKey },

    /// The bucket list does not fit the group kind.
    #[error("invalid buckets: {0}")]
    InvalidBuckets(String),

    /// The group is in a state that does not allow the operation.
    #[error("group {key} on {device_id} is {state}, cannot {action}")]
    InvalidState {
        device_id: DeviceId,
        key: GroupKey,
        state: String,
        action: &'static str,
    },

    /// A provider with the same identity is already registered.
    #[error("provider {0} already registered")]
    ProviderAlreadyRegistered(String),

    /// The provider behind a service handle has been unregistered.
    #[error("provider {0} is not registered")]
    ProviderNotRegistered(String),

    /// The engine has been shut down.
    #[error("group engine is shut down")]
    Shutdown,
}

impl GroupError {
    pub fn duplicate_key(device_id: &DeviceId, key: &GroupKey) -> Self {
        GroupError::DuplicateKey {
            device_id: device_id.clone(),
            key: key.clone(),
        }
    }

    pub fn not_found(device_id: &DeviceId, key: &GroupKey) -> Self {
        GroupError::NotFound {
            device_id: device_id.clone(),
            key: key.clone(),
        }
    }

    pub fn invalid_buckets(message: impl Into<String>) -> Self {
        GroupError::InvalidBuckets(message.into())
    }

    /// Returns true if resubmitting the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GroupError::DuplicateKey { .. }
                | GroupError::DuplicateId { .. }
                | GroupError::InvalidState { .. }
        )
    }
}

/// Reasons a batch could not be handed to a southbound transport.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Neither a registered provider nor a driver capability serves the device.
    #[error("no group programming capability available for {0}")]
    Unavailable(DeviceId),

    /// The transport refused some operations outright.
    #[error("operations rejected by {transport}: {reason}")]
    Rejected {
        transport: String,
        reason: String,
        failed: Vec<crate::model::GroupOperation>,
    },
}
