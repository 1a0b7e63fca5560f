//! Integration tests for value marshaling
//!
//! Every primitive kind survives build-then-extract, extraction forces
//! unevaluated objects, and mismatches are reported rather than
//! reinterpreted.

mod common;

use common::*;
use common::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use serial_test::serial;
use sloth_runtime::{Boxable, ConversionError, ProgramImage, SchedulerStatus};
use std::ffi::c_void;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};

fn empty_image() -> ProgramImage {
    ProgramImage::builder("conversion").build()
}

fn roundtrip<T: Boxable + Clone + PartialEq + Debug>(value: T) {
    with_runtime(&empty_image(), |rts| {
        let boxed = rts.mk(value.clone());
        assert_eq!(rts.get::<T>(boxed), value);
        assert!(rts.is_evaluated(boxed));
    });
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
#[serial]
fn test_named_pairs_roundtrip() {
    with_runtime(&empty_image(), |rts| {
        assert_eq!(rts.get_char(rts.mk_char('λ')), 'λ');
        assert_eq!(rts.get_int(rts.mk_int(isize::MIN)), isize::MIN);
        assert_eq!(rts.get_int8(rts.mk_int8(-128)), -128);
        assert_eq!(rts.get_int16(rts.mk_int16(i16::MAX)), i16::MAX);
        assert_eq!(rts.get_int32(rts.mk_int32(-7)), -7);
        assert_eq!(rts.get_int64(rts.mk_int64(i64::MAX)), i64::MAX);
        assert_eq!(rts.get_word(rts.mk_word(usize::MAX)), usize::MAX);
        assert_eq!(rts.get_word8(rts.mk_word8(255)), 255);
        assert_eq!(rts.get_word16(rts.mk_word16(65535)), 65535);
        assert_eq!(rts.get_word32(rts.mk_word32(0)), 0);
        assert_eq!(rts.get_word64(rts.mk_word64(u64::MAX)), u64::MAX);
        assert_eq!(rts.get_float(rts.mk_float(1.5)), 1.5);
        assert_eq!(rts.get_double(rts.mk_double(-0.25)), -0.25);
        assert!(rts.get_bool(rts.mk_bool(true)));
        assert_eq!(rts.get_string(rts.mk_string("héllo")), "héllo");
    });
}

#[test]
#[serial]
fn test_addr_roundtrip() {
    let mut target = [0u8; 4];
    let addr = target.as_mut_ptr() as *mut c_void;
    with_runtime(&empty_image(), |rts| {
        assert_eq!(rts.get_addr(rts.mk_addr(addr)), addr);
        assert!(rts.get_addr(rts.mk_addr(std::ptr::null_mut())).is_null());
    });
}

#[test]
#[serial]
fn test_stable_ptr_roundtrip() {
    with_runtime(&empty_image(), |rts| {
        let obj = rts.mk_int(5);
        let ptr = rts.new_stable_ptr(obj);
        let boxed = rts.mk_stable_ptr(ptr);
        let back = rts.get_stable_ptr(boxed);
        assert_eq!(back, ptr);
        assert_eq!(rts.get_int(rts.deref_stable_ptr(back)), 5);
        rts.free_stable_ptr(ptr);
    });
}

#[test]
#[serial]
fn test_nan_is_preserved() {
    with_runtime(&empty_image(), |rts| {
        assert!(rts.get_double(rts.mk_double(f64::NAN)).is_nan());
        assert!(rts.get_float(rts.mk_float(f32::NAN)).is_nan());
    });
}

#[rstest]
#[case(0)]
#[case(-1)]
#[case(i64::MIN)]
#[case(i64::MAX)]
#[serial]
fn test_int64_edges(#[case] value: i64) {
    roundtrip(value);
}

#[rstest]
#[case("")]
#[case("plain")]
#[case("multi\nline\ttext")]
#[case("emoji 🦥")]
#[serial]
fn test_string_cases(#[case] value: &str) {
    roundtrip(value.to_string());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    #[serial]
    fn prop_int_roundtrip(value in any::<isize>()) {
        roundtrip(value);
    }

    #[test]
    #[serial]
    fn prop_word32_roundtrip(value in any::<u32>()) {
        roundtrip(value);
    }

    #[test]
    #[serial]
    fn prop_char_roundtrip(value in any::<char>()) {
        roundtrip(value);
    }
}

// ============================================================================
// Forcing and mismatches
// ============================================================================

#[test]
#[serial]
fn test_get_forces_unevaluated_object() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let answer = closure(rts, "answer");
        assert!(!rts.is_evaluated(answer));
        assert_eq!(rts.get_int(answer), 42);
        assert!(rts.is_evaluated(answer));
    });
}

#[test]
#[serial]
fn test_try_get_reports_kind_mismatch() {
    with_runtime(&empty_image(), |rts| {
        let boxed = rts.mk_int32(1);
        assert_eq!(
            rts.try_get::<i64>(boxed),
            Err(ConversionError::TypeMismatch {
                expected: "Int64",
                found: "Int32"
            })
        );
    });
}

#[test]
#[serial]
fn test_try_get_of_non_primitive() {
    with_runtime(&empty_image(), |rts| {
        let unit = rts.unit();
        assert_eq!(
            rts.try_get::<bool>(unit),
            Err(ConversionError::TypeMismatch {
                expected: "Bool",
                found: "constructor"
            })
        );
    });
}

#[test]
#[serial]
fn test_try_get_reports_failed_evaluation() {
    let counters = Counters::default();
    with_runtime(&test_image(&counters), |rts| {
        let boom = closure(rts, "boom");
        assert_eq!(
            rts.try_get::<isize>(boom),
            Err(ConversionError::EvaluationFailed(SchedulerStatus::Killed))
        );
    });
}

#[test]
#[serial]
fn test_mismatched_get_is_contract_violation() {
    with_runtime(&empty_image(), |rts| {
        let boxed = rts.mk_bool(true);
        let result = panic::catch_unwind(AssertUnwindSafe(|| rts.get_int(boxed)));
        let payload = result.unwrap_err();
        let msg = payload.downcast_ref::<String>().unwrap();
        assert!(msg.contains("contract violation"), "{msg}");
        assert!(msg.contains("expected Int, found Bool"), "{msg}");
    });
}
