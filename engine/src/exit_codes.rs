//! Stable exit codes for `storycheck` commands.

/// Command succeeded; for `run`/`trigger`, the run passed, was skipped, or
/// the event was ignored.
pub const OK: i32 = 0;
/// Invalid config, unknown repo or run, or any other command failure.
pub const INVALID: i32 = 1;
/// The run finished with status `fail`.
pub const FAILED: i32 = 2;
/// The run finished with status `error`.
pub const ERRORED: i32 = 3;
