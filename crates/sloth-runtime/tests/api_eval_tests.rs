//! Integration tests for application and the evaluation entry points

mod common;

use common::*;
use common::assert_eq;
use rstest::rstest;
use serial_test::serial;
use sloth_runtime::{startup_with_config, ProgramImage, RtsConfig, SchedError, SchedulerStatus};

/// Image with a lazy `range` and a native renderer for integer lists
fn list_image() -> ProgramImage {
    ProgramImage::builder("list-image")
        .function("range", 2, |m, args| {
            let lo: isize = m.get(args[0])?;
            let hi: isize = m.get(args[1])?;
            if lo > hi {
                return m.lookup("nil");
            }
            let next = m.mk(lo + 1);
            let tail = m.call("range", &[next, args[1]])?;
            let head = m.mk(lo);
            m.call("cons", &[head, tail])
        })
        .function("render", 1, |m, args| {
            let mut parts = Vec::new();
            for item in m.list_items(args[0])? {
                let n: isize = m.get(item)?;
                parts.push(n.to_string());
            }
            Ok(m.mk(parts.join(",")))
        })
        .build()
}

// ============================================================================
// Application
// ============================================================================

#[test]
#[serial]
fn test_apply_builds_without_evaluating() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let plus = closure(rts, "plusInt");
        let counted = closure(rts, "countedAnswer");

        let sum = rts.apply_n(plus, &[counted, rts.mk_int(1)]);
        assert!(!rts.is_evaluated(sum));
        assert_eq!(counters.caf_runs(), 0);

        let (status, result) = rts.eval(sum);
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 8);
    });
}

#[test]
#[serial]
fn test_partial_application_is_a_value() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let plus = closure(rts, "plusInt");
        let add_ten = rts.apply(plus, rts.mk_int(10));

        let (status, pap) = rts.eval(add_ten);
        assert_eq!(status, SchedulerStatus::Success);

        let (status, result) = rts.eval(rts.apply(pap.unwrap(), rts.mk_int(5)));
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 15);
    });
}

#[test]
#[serial]
fn test_bad_application_is_killed_not_a_build_error() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let not_a_function = rts.mk_int(3);
        let nonsense = rts.apply(not_a_function, rts.mk_int(4));

        assert_eq!(rts.eval(nonsense), (SchedulerStatus::Killed, None));
    });
}

// ============================================================================
// Pure evaluation
// ============================================================================

#[test]
#[serial]
fn test_eval_success_roundtrips() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let (status, result) = rts.eval(closure(rts, "answer"));
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 42);
        assert!(status.check("answer").is_ok());
    });
}

#[test]
#[serial]
fn test_eval_forces_to_normal_form() {
    with_runtime(&list_image(), |rts| {
        let range = closure(rts, "range");
        let list = rts.apply_n(range, &[rts.mk_int(1), rts.mk_int(5)]);

        let (status, result) = rts.eval(list);
        assert_eq!(status, SchedulerStatus::Success);
        let result = result.unwrap();
        assert!(rts.is_evaluated(result));

        let length = rts.apply(closure(rts, "length"), result);
        assert_eq!(rts.get_int(length), 5);
        let rendered = rts.apply(closure(rts, "render"), result);
        assert_eq!(rts.get_string(rendered), "1,2,3,4,5");
    });
}

#[test]
#[serial]
fn test_long_tail_call_chain_fits_small_budget() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let count_down = closure(rts, "countDown");
        let call = rts.apply(count_down, rts.mk_int(100_000));

        let (status, result) = rts.eval_with_stack(call, 8);
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 0);
    });
}

#[rstest]
#[case(50, SchedulerStatus::Killed)]
#[case(500, SchedulerStatus::Success)]
#[serial]
fn test_stack_budget(#[case] budget: usize, #[case] expected: SchedulerStatus) {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let deep_sum = closure(rts, "deepSum");
        let call = rts.apply(deep_sum, rts.mk_int(100));

        let (status, result) = rts.eval_with_stack(call, budget);
        assert_eq!(status, expected);
        if expected.is_success() {
            assert_eq!(rts.get_int(result.unwrap()), 5050);
        } else {
            assert_eq!(result, None);
        }
    });
}

#[test]
#[serial]
fn test_budget_is_clamped_to_maximum() {
    let counters = Counters::default();
    let config = RtsConfig {
        stack_size: 64,
        max_stack_size: 128,
        ..test_config()
    };
    let rts = startup_with_config([PROG], &test_image(&counters), config);

    let deep_sum = closure(&rts, "deepSum");
    let too_deep = rts.apply(deep_sum, rts.mk_int(500));
    let fits = rts.apply(deep_sum, rts.mk_int(100));
    let too_deep_status = rts.eval_with_stack(too_deep, usize::MAX).0;
    let (fits_status, fits_result) = rts.eval_with_stack(fits, usize::MAX);
    let sum = fits_result.map(|value| rts.get_int(value));
    rts.shutdown();

    assert_eq!(too_deep_status, SchedulerStatus::Killed);
    assert_eq!(fits_status, SchedulerStatus::Success);
    assert_eq!(sum, Some(5050));
}

#[test]
#[serial]
fn test_default_maximum_budget_never_overflows_native_stack() {
    let counters = Counters::default();
    with_config(&test_image(&counters), RtsConfig::default(), |rts| {
        let deep_sum = closure(rts, "deepSum");
        let call = rts.apply(deep_sum, rts.mk_int(16_000));

        let (status, result) = rts.eval_with_stack(call, usize::MAX);
        match status {
            SchedulerStatus::Success => {
                assert_eq!(rts.get_int(result.unwrap()), 16_000 * 16_001 / 2)
            }
            SchedulerStatus::Killed => assert_eq!(result, None),
            other => panic!("unexpected status {other}"),
        }
    });
}

#[test]
#[serial]
fn test_deep_evaluation_outgrows_small_worker_stack() {
    let counters = Counters::default();
    let config = RtsConfig {
        max_stack_size: 1 << 20,
        worker_stack_bytes: 1024 * 1024,
        ..test_config()
    };
    with_config(&test_image(&counters), config, |rts| {
        let deep_sum = closure(rts, "deepSum");
        let call = rts.apply(deep_sum, rts.mk_int(5_000));

        let (status, result) = rts.eval_with_stack(call, usize::MAX);
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 5_000 * 5_001 / 2);
    });
}

#[test]
#[serial]
fn test_self_demanding_thunk_is_killed_and_restored() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let looping = closure(rts, "selfLoop");

        assert_eq!(rts.eval(looping), (SchedulerStatus::Killed, None));
        assert!(!rts.is_evaluated(looping));
        assert_eq!(rts.eval(looping).0, SchedulerStatus::Killed);
    });
}

#[test]
#[serial]
fn test_thunk_is_shared() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let counted = closure(rts, "countedAnswer");

        assert_eq!(rts.eval(counted).0, SchedulerStatus::Success);
        assert_eq!(rts.eval(counted).0, SchedulerStatus::Success);
        assert_eq!(rts.get_int(counted), 7);
        assert_eq!(counters.caf_runs(), 1);
    });
}

#[test]
#[serial]
fn test_failed_thunk_can_be_retried() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let boom = closure(rts, "boom");
        assert_eq!(rts.eval(boom).0, SchedulerStatus::Killed);
        assert_eq!(rts.eval(boom).0, SchedulerStatus::Killed);
    });
}

#[test]
#[serial]
fn test_panic_in_native_code_is_killed() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        assert_eq!(
            rts.eval(closure(rts, "panicky")),
            (SchedulerStatus::Killed, None)
        );
        // The runtime keeps working afterwards
        assert_eq!(rts.eval(closure(rts, "answer")).0, SchedulerStatus::Success);
    });
}

#[test]
#[serial]
fn test_division_by_zero_is_killed() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let quot = closure(rts, "quotInt");
        let call = rts.apply_n(quot, &[rts.mk_int(1), rts.mk_int(0)]);
        assert_eq!(rts.eval(call).0, SchedulerStatus::Killed);
    });
}

#[test]
#[serial]
fn test_reentrant_evaluation_from_native_code() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let reenter = closure(rts, "reenter");
        let call = rts.apply(reenter, closure(rts, "answer"));

        let (status, result) = rts.eval(call);
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_int(result.unwrap()), 42);
    });
}

// ============================================================================
// IO evaluation
// ============================================================================

#[test]
#[serial]
fn test_failing_action_is_killed() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let (status, result) = rts.eval_io(closure(rts, "failingAction"));
        assert_eq!(status, SchedulerStatus::Killed);
        assert_eq!(result, None);
        assert_eq!(
            status.check("failingAction"),
            Err(SchedError::Killed {
                site: "failingAction".to_string()
            })
        );
    });
}

#[test]
#[serial]
fn test_eval_lazy_io_runs_effect_once_and_leaves_result_unevaluated() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let stack_size = rts.config().stack_size;
        let (status, result) = rts.eval_lazy_io(closure(rts, "tickThen"), stack_size);
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(counters.effects(), 1);

        let result = result.unwrap();
        assert!(!rts.is_evaluated(result));
        assert_eq!(rts.get_int(result), 3);
        assert_eq!(counters.effects(), 1);
    });
}

#[test]
#[serial]
fn test_eval_io_forces_result() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let (status, result) = rts.eval_io(closure(rts, "tickThen"));
        assert_eq!(status, SchedulerStatus::Success);
        assert!(rts.is_evaluated(result.unwrap()));
    });
}

#[test]
#[serial]
fn test_action_effect_runs_each_time() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let tick = closure(rts, "tickThen");
        rts.eval_io(tick);
        rts.eval_io(tick);
        assert_eq!(counters.effects(), 2);
    });
}

#[test]
#[serial]
fn test_catch_recovers_from_thrown_exception() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let (status, result) = rts.eval_io(closure(rts, "caught"));
        assert_eq!(status, SchedulerStatus::Success);
        assert_eq!(rts.get_string(result.unwrap()), "recovered: io failure");
    });
}

#[test]
#[serial]
fn test_running_a_non_action_is_killed() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        assert_eq!(rts.eval_io(rts.mk_int(1)).0, SchedulerStatus::Killed);
    });
}

#[test]
#[serial]
fn test_blocking_calls_never_report_not_finished() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let stack_size = rts.config().stack_size;
        let statuses = [
            rts.eval(closure(rts, "answer")).0,
            rts.eval(closure(rts, "boom")).0,
            rts.eval_with_stack(closure(rts, "answer"), 10).0,
            rts.eval_io(closure(rts, "failingAction")).0,
            rts.eval_lazy_io(closure(rts, "tickThen"), stack_size).0,
            rts.eval_io(closure(rts, "deadlock")).0,
        ];
        assert!(statuses
            .iter()
            .all(|status| *status != SchedulerStatus::NotFinished));
    });
}
