//! Per-device desired-state store.

mod table;
mod types;

pub use table::DeviceGroupTable;
pub use types::{
    AuditState, BucketUpdate, ExtraneousGroup, PendingRequest, Rollback, TableStats, UpdateType,
};
