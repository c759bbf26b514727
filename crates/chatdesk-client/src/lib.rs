//! Client-side building blocks for the chat desk UI.
//!
//! - `playback`: keeps at most one audio message audible at a time

pub mod playback;

pub use playback::{AudioEnvironment, AudioHandle, PlaybackArbiter};
