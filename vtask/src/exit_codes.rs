//! Stable exit codes for vtask CLI commands.

/// Invalid input, configuration, storage, or any error without a dedicated code.
pub const INVALID: i32 = 1;
/// Unknown task id or dependency target.
pub const NOT_FOUND: i32 = 2;
/// Optimistic write lost the race on every retry.
pub const CONFLICT: i32 = 3;
/// `edit`/`delete` attempted in agent mode, or a write touched frozen fields.
pub const IMMUTABLE: i32 = 4;
/// `done` on a task that is already done.
pub const ALREADY_DONE: i32 = 5;
/// Id generation exhausted its retries.
pub const ID_COLLISION: i32 = 6;
/// `vtask run` could not resolve the configured executor.
pub const EXECUTOR_MISSING: i32 = 7;
