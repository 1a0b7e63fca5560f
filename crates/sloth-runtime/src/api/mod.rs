//! Public embedding API for the sloth runtime
//!
//! This module is the boundary host code talks to:
//! - Lifecycle: [`startup`], [`shutdown`], [`shutdown_and_exit`] and the
//!   [`Rts`] handle
//! - Process arguments: [`set_prog_argv`], [`get_prog_argv`]
//! - Marshaling: [`Boxable`], `Rts::mk`, `Rts::get` and the named pairs
//! - Application: `Rts::apply`, `Rts::apply_n`
//! - Evaluation: `Rts::eval`, `Rts::eval_with_stack`, `Rts::eval_io`,
//!   `Rts::eval_lazy_io`
//!
//! # Examples
//!
//! ```
//! use sloth_runtime::api::{startup_with_config, Rts};
//! use sloth_runtime::{ProgramImage, RtsConfig, SchedulerStatus};
//!
//! let image = ProgramImage::builder("demo")
//!     .function("square", 1, |m, args| {
//!         let n: i64 = m.get(args[0])?;
//!         Ok(m.mk(n * n))
//!     })
//!     .build();
//! let rts = startup_with_config(["demo"], &image, RtsConfig::default());
//!
//! let square = rts.lookup("square").unwrap();
//! let (status, result) = rts.eval(rts.apply(square, rts.mk_int64(12)));
//! assert_eq!(status, SchedulerStatus::Success);
//! assert_eq!(rts.get_int64(result.unwrap()), 144);
//!
//! Rts::current().shutdown();
//! ```

pub mod argv;
pub mod conversion;
pub mod eval;
pub mod runtime;

// Re-export main types for convenience
pub use argv::{get_prog_argv, prog_name, set_prog_argv};
pub use conversion::{Boxable, ConversionError};
pub use runtime::{shutdown, shutdown_and_exit, startup, startup_with_config, Rts};
