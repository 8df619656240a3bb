//! Group value types.

mod bucket;
mod group;
mod operation;

pub use bucket::{GroupBucket, GroupBuckets, GroupType, Instruction, Treatment, TreatmentBuilder};
pub use group::{Group, GroupDescription, GroupState, ObservedGroup};
pub use operation::{FailureCode, GroupOperation, GroupOperations, OperationType};
