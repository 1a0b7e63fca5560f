//! Scheduler status and the uniform failure check
//!
//! Every blocking evaluation reports a [`SchedulerStatus`]. Hosts that do not
//! want to handle failures themselves pass it to [`check_sched_status`], which
//! prints a diagnostic and exits with a status-specific code.

use crate::api::prog_name;
use std::fmt;
use thiserror::Error;

/// Process exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for an uncaught exception or refused startup
pub const EXIT_FAILURE: i32 = 1;

/// Process exit code for an interrupted evaluation
pub const EXIT_INTERRUPTED: i32 = 252;

/// Process exit code for a deadlocked evaluation
pub const EXIT_DEADLOCK: i32 = 253;

/// Process exit code for an internal error
pub const EXIT_INTERNAL_ERROR: i32 = 254;

/// Terminal state of one evaluation request
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerStatus {
    /// Reserved for non-blocking submission; never returned by a blocking call
    NotFinished = 0,
    Success = 1,
    /// Terminated by an uncaught exception
    Killed = 2,
    Interrupted = 3,
    Deadlock = 4,
}

impl SchedulerStatus {
    pub fn is_success(self) -> bool {
        self == SchedulerStatus::Success
    }

    /// Decide whether the evaluation at `site` succeeded
    ///
    /// This is [`check_sched_status`] without the exit.
    pub fn check(self, site: &str) -> Result<(), SchedError> {
        let site = site.to_string();
        match self {
            SchedulerStatus::Success => Ok(()),
            SchedulerStatus::Killed => Err(SchedError::Killed { site }),
            SchedulerStatus::Interrupted => Err(SchedError::Interrupted { site }),
            SchedulerStatus::Deadlock => Err(SchedError::Deadlock { site }),
            SchedulerStatus::NotFinished => Err(SchedError::NotFinished { site }),
        }
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerStatus::NotFinished => "not finished",
            SchedulerStatus::Success => "success",
            SchedulerStatus::Killed => "killed",
            SchedulerStatus::Interrupted => "interrupted",
            SchedulerStatus::Deadlock => "deadlock",
        };
        f.write_str(name)
    }
}

/// A non-successful status, tagged with the call site that observed it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    #[error("{site}: uncaught exception")]
    Killed { site: String },

    #[error("{site}: interrupted")]
    Interrupted { site: String },

    #[error("{site}: no threads to run: infinite loop or deadlock?")]
    Deadlock { site: String },

    #[error("{site}: return code (0) not ok")]
    NotFinished { site: String },
}

impl SchedError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedError::Killed { .. } => EXIT_FAILURE,
            SchedError::Interrupted { .. } => EXIT_INTERRUPTED,
            SchedError::Deadlock { .. } => EXIT_DEADLOCK,
            SchedError::NotFinished { .. } => EXIT_INTERNAL_ERROR,
        }
    }
}

/// Abort the process unless `status` is [`SchedulerStatus::Success`]
///
/// Prints `<prog>: <site>: <reason>` on stderr and exits with the code for
/// the status (1 for an uncaught exception, 252 interrupted, 253 deadlock,
/// 254 internal error).
pub fn check_sched_status(site: &str, status: SchedulerStatus) {
    if let Err(err) = status.check(site) {
        tracing::error!(site, %status, "evaluation did not succeed");
        let prog = prog_name().unwrap_or_else(|| "sloth".to_string());
        eprintln!("{prog}: {err}");
        std::process::exit(err.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_success_passes() {
        assert_eq!(SchedulerStatus::Success.check("main"), Ok(()));
    }

    #[rstest]
    #[case(SchedulerStatus::Killed, "main: uncaught exception", 1)]
    #[case(SchedulerStatus::Interrupted, "main: interrupted", 252)]
    #[case(
        SchedulerStatus::Deadlock,
        "main: no threads to run: infinite loop or deadlock?",
        253
    )]
    #[case(SchedulerStatus::NotFinished, "main: return code (0) not ok", 254)]
    fn test_failure_messages(
        #[case] status: SchedulerStatus,
        #[case] message: &str,
        #[case] code: i32,
    ) {
        let err = status.check("main").unwrap_err();
        assert_eq!(err.to_string(), message);
        assert_eq!(err.exit_code(), code);
    }

    #[test]
    fn test_c_layout() {
        assert_eq!(SchedulerStatus::NotFinished as i32, 0);
        assert_eq!(SchedulerStatus::Success as i32, 1);
        assert_eq!(SchedulerStatus::Deadlock as i32, 4);
    }
}
