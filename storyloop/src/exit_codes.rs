//! Stable exit codes for storyloop CLI commands.

/// Command succeeded and its goal was met.
pub const OK: i32 = 0;
/// Command failed: bad arguments, config, input files or an unrecoverable run.
pub const INVALID: i32 = 1;
/// The run finished but the outline missed its target or a repair was not accepted.
pub const UNMET: i32 = 2;
