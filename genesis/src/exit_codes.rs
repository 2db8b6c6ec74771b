//! Stable exit codes for `genesis` CLI commands.

/// Session completed, or the checked artifact passed validation.
pub const OK: i32 = 0;
/// Invalid config, unreadable input, or any other command error.
pub const INVALID: i32 = 1;
/// Session failed after spending its repair budget, or the checked
/// artifact has validation errors.
pub const FAILED: i32 = 3;
