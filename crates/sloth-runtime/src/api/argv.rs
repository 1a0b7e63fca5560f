//! Process argument snapshot
//!
//! Startup records the program's arguments (program name first, RTS flags
//! removed) and shutdown clears them. The snapshot can be read or replaced
//! at any time, with or without a running runtime.

use std::sync::{PoisonError, RwLock};

static PROG_ARGV: RwLock<Vec<String>> = RwLock::new(Vec::new());

/// Replace the argument snapshot
pub fn set_prog_argv<I, S>(args: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    *PROG_ARGV.write().unwrap_or_else(PoisonError::into_inner) = args;
}

/// Copy of the argument snapshot; `argc` is its length
pub fn get_prog_argv() -> Vec<String> {
    PROG_ARGV
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Program name from the snapshot, if one has been recorded
pub fn prog_name() -> Option<String> {
    PROG_ARGV
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .first()
        .cloned()
}

pub(crate) fn clear_prog_argv() {
    PROG_ARGV
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}
