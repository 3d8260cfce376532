#![doc = "Mailbox coordination core: shared records, per-field change tracking and the deferred-apply control loop."]

pub mod control;
pub mod dirty;
pub mod gate;
pub mod mailbox;
pub mod record;
pub mod service;
pub mod shutdown;
pub mod value;

pub use control::*;
pub use dirty::DirtyTracker;
pub use gate::GateDecision;
pub use mailbox::*;
pub use record::*;
pub use service::*;
pub use shutdown::*;
pub use value::*;
