//! Background tasks for the Chatdesk service.
//!
//! # Tasks
//!
//! - `presence_sync` - Persists presence transitions to the identity `online` flag

pub mod presence_sync;

pub use presence_sync::start_presence_sync;
