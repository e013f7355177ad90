//! Exit code policy.
//!
//! This tool has no "findings" axis the way a diagnostic command does — it
//! either anonymizes a dump successfully or it doesn't — so it uses a plain
//! operational failure band rather than a parallel 0/1/2 findings scheme.

/// Exit code: success.
pub const SUCCESS: i32 = 0;

/// Exit code: invocation error (missing `-f`, bad flags).
pub const INVOCATION_ERROR: i32 = 10;

/// Exit code: configuration load/validation error.
pub const CONFIG_ERROR: i32 = 12;

/// Exit code: dump parse error.
pub const DUMP_PARSE_ERROR: i32 = 14;
