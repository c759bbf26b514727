//! Actors owning in-process mutable state.
//!
//! Each actor exposes a cloneable handle; all mutation goes through its
//! mailbox.

pub mod presence;

pub use presence::{
    LiveConnection, PresenceActor, PresenceEvent, PresenceHandle, PresenceState, PresenceStatus,
};
