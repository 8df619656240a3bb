//! Group reconciliation engine for SDN-controlled switches.
//!
//! Applications declare forwarding groups (bucket lists keyed by an opaque
//! application cookie). The engine records that intent per device, turns
//! it into ADD/MODIFY/DELETE operations for the device's southbound
//! provider, and reconciles against the group tables devices report back.
//!
//! # Architecture
//!
//! ```text
//! [application] ──> [GroupManager] ──> [device task] ──> [provider | driver] ──> [device]
//!                                           ↑    │
//!                     reports, failures ────┘    └──> [EventDispatcher] ──> [listeners]
//! ```
//!
//! # Key Components
//!
//! - [`manager::GroupManager`]: application and provider entry point
//! - [`store::DeviceGroupTable`]: per-device desired state and audit bookkeeping
//! - [`provider`]: southbound traits, registry, and dispatch
//! - [`event`]: group events and ordered delivery
//! - [`daemon::GroupOrchDaemon`]: configuration-driven wiring used by `grouporchd`

pub mod audit;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod manager;
pub mod model;
pub mod provider;
pub mod sim;
pub mod store;

pub use config::GroupOrchConfig;
pub use daemon::GroupOrchDaemon;
pub use error::{DispatchError, GroupError, GroupResult};
pub use event::{GroupEvent, GroupEventType, GroupListener, ListenerId};
pub use manager::{DeviceStatus, GroupManager};
pub use model::{
    FailureCode, Group, GroupBucket, GroupBuckets, GroupDescription, GroupOperation,
    GroupOperations, GroupState, GroupType, ObservedGroup, OperationType, Treatment,
};
pub use provider::{DriverResolver, GroupProgrammable, GroupProvider, ProviderId, ProviderService};
