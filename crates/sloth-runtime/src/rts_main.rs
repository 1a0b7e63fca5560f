//! Standard program entry
//!
//! A compiled sloth program's `main` is a one-liner:
//!
//! ```rust,no_run
//! use sloth_runtime::ProgramImage;
//!
//! fn main() {
//!     let image = ProgramImage::builder("hello")
//!         .action("main", |m| {
//!             let greet = m.call("putStrLn", &[m.mk("hello, world".to_string())])?;
//!             m.run_io(greet)
//!         })
//!         .build();
//!     sloth_runtime::run_main(&image)
//! }
//! ```

use crate::api::Rts;
use crate::image::ProgramImage;
use crate::status::{check_sched_status, EXIT_SUCCESS};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "SLOTH_LOG";

/// Name of the action [`run_main`] runs
pub const MAIN_CLOSURE: &str = "main";

/// Install the stderr log subscriber, filtered by `$SLOTH_LOG` (default `warn`)
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Start the runtime with the process arguments, run the image's `main`
/// action, and exit
///
/// The exit status is 0 on success, otherwise the code
/// [`check_sched_status`] assigns to the failure.
pub fn run_main(image: &ProgramImage) -> ! {
    init_logging();

    let args = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let rts = Rts::startup(args, image);

    let Some(main) = rts.lookup(MAIN_CLOSURE) else {
        contract_violation!("program image '{}' defines no main action", image.name());
    };
    let stack_size = rts.config().stack_size;
    let (status, _) = rts.eval_lazy_io(main, stack_size);
    check_sched_status(MAIN_CLOSURE, status);

    rts.shutdown_and_exit(EXIT_SUCCESS)
}
