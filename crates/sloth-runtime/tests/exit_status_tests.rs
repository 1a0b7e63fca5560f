//! Process-level tests for the status reporter and exit codes
//!
//! `check_sched_status` and `shutdown_and_exit` end the process, so each case
//! re-runs this test binary with [`CHILD_ENV`] set and inspects the child's
//! exit status and stderr.

mod common;

use assert_cmd::prelude::*;
use common::*;
use predicates::prelude::*;
use rstest::rstest;
use sloth_runtime::{check_sched_status, startup_with_config};
use std::env;
use std::process::Command;

const CHILD_ENV: &str = "SLOTH_EXIT_STATUS_CASE";
const CHILD_PROG: &str = "exit-prog";

/// Child side: does nothing unless started by [`child`]
#[test]
fn exit_status_child() {
    let Ok(case) = env::var(CHILD_ENV) else {
        return;
    };

    let counters = Counters::default();
    let rts = startup_with_config([CHILD_PROG], &test_image(&counters), test_config());
    match case.as_str() {
        "killed" => {
            let (status, _) = rts.eval(closure(&rts, "boom"));
            check_sched_status("boom", status);
        }
        "deadlock" => {
            let (status, _) = rts.eval_io(closure(&rts, "deadlock"));
            check_sched_status("deadlock", status);
        }
        "success" => {
            let (status, _) = rts.eval(closure(&rts, "answer"));
            check_sched_status("answer", status);
        }
        other => panic!("unknown exit status case '{other}'"),
    }
    rts.shutdown_and_exit(7)
}

fn child(case: &str) -> Command {
    let mut cmd = Command::new(env::current_exe().unwrap());
    cmd.args(["--exact", "exit_status_child", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, case)
        .env_remove("SLOTH_LOG");
    cmd
}

#[rstest]
#[case("killed", 1, "exit-prog: boom: uncaught exception\n")]
#[case(
    "deadlock",
    253,
    "exit-prog: deadlock: no threads to run: infinite loop or deadlock?\n"
)]
fn test_failed_status_reports_and_exits(
    #[case] case: &str,
    #[case] code: i32,
    #[case] message: &str,
) {
    child(case)
        .assert()
        .code(code)
        .stderr(predicate::str::contains(message));
}

#[test]
fn test_success_passes_exit_code_through() {
    child("success")
        .assert()
        .code(7)
        .stderr(predicate::str::contains(CHILD_PROG).not());
}
