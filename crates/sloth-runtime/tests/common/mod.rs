//! Shared test utilities
//!
//! Every integration test starts the process-wide runtime, so tests touching
//! it are `#[serial]`. [`with_runtime`] guarantees shutdown even when the
//! test body panics, keeping one failure from cascading into the rest.

#![allow(dead_code)]

use sloth_runtime::{startup_with_config, BoxedValue, ProgramImage, Rts, RtsConfig};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// Program name recorded by [`start`]
pub const PROG: &str = "sloth-test";

/// Options for tests: modest worker stacks, short shutdown grace
pub fn test_config() -> RtsConfig {
    RtsConfig {
        max_workers: 32,
        worker_stack_bytes: 16 * 1024 * 1024,
        shutdown_grace_ms: 500,
        ..Default::default()
    }
}

/// Counters observed by the test image's native code
#[derive(Clone, Default)]
pub struct Counters {
    pub caf_runs: Arc<AtomicUsize>,
    pub slow_runs: Arc<AtomicUsize>,
    pub effects: Arc<AtomicUsize>,
    pub spinning: Arc<AtomicBool>,
}

impl Counters {
    pub fn caf_runs(&self) -> usize {
        self.caf_runs.load(Ordering::SeqCst)
    }

    pub fn slow_runs(&self) -> usize {
        self.slow_runs.load(Ordering::SeqCst)
    }

    pub fn effects(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Block until the `spin` CAF is running
    pub fn wait_spinning(&self) {
        while !self.spinning.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Program image exercising every part of the evaluator
pub fn test_image(counters: &Counters) -> ProgramImage {
    let caf_runs = Arc::clone(&counters.caf_runs);
    let slow_runs = Arc::clone(&counters.slow_runs);
    let effects = Arc::clone(&counters.effects);
    let spinning = Arc::clone(&counters.spinning);

    ProgramImage::builder("test-image")
        // Pure values
        .caf("answer", |m| {
            let (a, b) = (m.mk(40isize), m.mk(2isize));
            m.call("plusInt", &[a, b])
        })
        .caf("countedAnswer", move |m| {
            caf_runs.fetch_add(1, Ordering::SeqCst);
            Ok(m.mk(7isize))
        })
        .caf("slowShared", move |m| {
            slow_runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(m.mk(99isize))
        })
        .function("deepSum", 1, |m, args| {
            let n: isize = m.get(args[0])?;
            if n <= 0 {
                return Ok(m.mk(0isize));
            }
            let below = m.mk(n - 1);
            let rest = m.call("deepSum", &[below])?;
            let rest: isize = m.get(rest)?;
            Ok(m.mk(n + rest))
        })
        .function("countDown", 1, |m, args| {
            let n: isize = m.get(args[0])?;
            if n == 0 {
                return Ok(m.mk(0isize));
            }
            let next = m.mk(n - 1);
            m.call("countDown", &[next])
        })
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
        // Failures
        .caf("boom", |m| m.throw("boom"))
        .caf("selfLoop", |m| {
            let me = m.lookup("selfLoop")?;
            let n: isize = m.get(me)?;
            Ok(m.mk(n))
        })
        .caf("panicky", |_| panic!("native bug"))
        .caf("spin", move |m| loop {
            m.safe_point()?;
            spinning.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        // IO
        .action("tickThen", move |m| {
            effects.fetch_add(1, Ordering::SeqCst);
            let (a, b) = (m.mk(1isize), m.mk(2isize));
            m.call("plusInt", &[a, b])
        })
        .caf("failingAction", |m| {
            let msg = m.mk("io failure".to_string());
            m.call("throwIO", &[msg])
        })
        .caf("deadlock", |m| {
            let new = m.lookup("newEmptyMVar")?;
            let take = m.lookup("takeMVar")?;
            Ok(m.io_bind(new, take))
        })
        .function("handoffWith", 1, |m, args| {
            let mvar = args[0];
            let payload = m.mk(42isize);
            let child = m.io_put_mvar(mvar, payload);
            let fork = m.io_fork(child);
            let take = m.io_take_mvar(mvar);
            Ok(m.io_then(fork, take))
        })
        .caf("handoff", |m| {
            let new = m.lookup("newEmptyMVar")?;
            let rest = m.lookup("handoffWith")?;
            Ok(m.io_bind(new, rest))
        })
        .function("recover", 1, |m, args| {
            let prefix = m.mk("recovered: ".to_string());
            let msg = m.call("appendString", &[prefix, args[0]])?;
            Ok(m.io_return(msg))
        })
        .caf("caught", |m| {
            let failing = m.lookup("failingAction")?;
            let handler = m.lookup("recover")?;
            m.call("catchIO", &[failing, handler])
        })
        .function("reenter", 1, |m, args| {
            let rts = m.rts();
            let (status, value) = rts.eval(args[0]);
            match value {
                Some(value) if status.is_success() => Ok(value),
                _ => m.throw(format!("re-entrant evaluation ended with {status}")),
            }
        })
        .build()
}

/// Start the runtime on `image` with [`test_config`]
pub fn start(image: &ProgramImage) -> Rts {
    startup_with_config([PROG], image, test_config())
}

/// Run `f` against a fresh runtime, shutting it down afterwards even if
/// `f` panics
pub fn with_runtime<R>(image: &ProgramImage, f: impl FnOnce(&Rts) -> R) -> R {
    with_config(image, test_config(), f)
}

/// [`with_runtime`] with explicit options
pub fn with_config<R>(image: &ProgramImage, config: RtsConfig, f: impl FnOnce(&Rts) -> R) -> R {
    let rts = startup_with_config([PROG], image, config);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&rts)));
    rts.shutdown();
    match outcome {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Look up a top-level closure that must exist
pub fn closure(rts: &Rts, name: &str) -> BoxedValue {
    rts.lookup(name)
        .unwrap_or_else(|| panic!("test image defines no '{name}'"))
}
