//! Stable exit codes for questline CLI commands.

/// Command succeeded; for `demo`, the quest completed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments or other errors.
pub const INVALID: i32 = 1;
/// `demo` stopped before the quest completed (tick limit, retry budget).
pub const INCOMPLETE: i32 = 2;
