//! Foundational low-level utilities shared across loopcheck crates.
//!
//! Provides atomic file-replacement helpers used by shim installation and
//! operator state files, plus clock helpers for session bookkeeping.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{replace_file_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp_ms, elapsed_ms};
