//! Group event notification.

mod dispatcher;
mod types;

pub use dispatcher::{EventDispatcher, ListenerRegistry};
pub use types::{GroupEvent, GroupEventType, GroupListener, ListenerId};
