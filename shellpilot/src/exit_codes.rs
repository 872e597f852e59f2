//! Stable exit codes for the shellpilot CLI.

/// The model signalled completion.
pub const OK: i32 = 0;
/// Invalid goal/config or any other unclassified error.
pub const INVALID: i32 = 1;
/// The model backend could not produce a completion.
pub const BACKEND: i32 = 2;
/// The run was aborted because the model got stuck (repeats or malformed replies).
pub const STUCK: i32 = 3;
/// The run stopped on a configured bound (iteration cap or cancellation).
pub const STOPPED: i32 = 4;
