//! Sloth Runtime - native embedding interface for a lazy functional runtime
//!
//! This library is the boundary between host (Rust or C) code and the managed,
//! garbage-collected heap of closures that sloth programs live in:
//! - Runtime lifecycle: startup, shutdown, captured program arguments
//! - Value marshaling between native primitives and boxed heap objects
//! - Closure application without evaluation
//! - Four blocking evaluation entry points reporting a scheduler status
//! - A uniform status check for failed evaluations
//!
//! The heap, evaluator and scheduler sit behind that boundary and are reached
//! only through it.
//!
//! # Example
//!
//! ```
//! use sloth_runtime::{startup_with_config, ProgramImage, RtsConfig, SchedulerStatus};
//!
//! let image = ProgramImage::builder("demo").build();
//! let rts = startup_with_config(["demo"], &image, RtsConfig::default());
//!
//! let plus = rts.lookup("plusInt").unwrap();
//! let sum = rts.apply_n(plus, &[rts.mk_int(40), rts.mk_int(2)]);
//! let (status, result) = rts.eval(sum);
//!
//! assert_eq!(status, SchedulerStatus::Success);
//! assert_eq!(rts.get_int(result.unwrap()), 42);
//! rts.shutdown();
//! ```

/// Abort on a broken boundary contract (double startup, use after shutdown,
/// mismatched extraction, dangling handle).
macro_rules! contract_violation {
    ($($arg:tt)*) => {
        panic!("sloth: contract violation: {}", format_args!($($arg)*))
    };
}

/// Sloth runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod closure;
pub mod exception;
pub mod heap;
pub mod image;
pub mod machine;
pub mod rts_main;
pub mod stable;
pub mod status;

mod prelude;
mod scheduler;

// Re-export commonly used types
pub use api::{
    get_prog_argv, prog_name, set_prog_argv, shutdown, shutdown_and_exit, startup,
    startup_with_config, Boxable, ConversionError, Rts,
};
pub use closure::{Prim, PrimKind};
pub use exception::{EvalResult, Exception, Unwind};
pub use heap::{BoxedValue, GcStats, HeapStats};
pub use image::{ImageBuilder, ProgramImage};
pub use machine::Machine;
pub use rts_main::run_main;
pub use sloth_config::RtsConfig;
pub use stable::StablePtr;
pub use status::{check_sched_status, SchedError, SchedulerStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
