//! Runtime lifecycle
//!
//! Provides the [`Rts`] handle to the running runtime. At most one runtime
//! exists per process: [`Rts::startup`] creates it and [`Rts::shutdown`] tears
//! it down. Handles are cheap clones of one shared context; any clone used
//! after shutdown is a contract violation.
//!
//! # Examples
//!
//! ```
//! use sloth_runtime::{ProgramImage, Rts, RtsConfig};
//!
//! let image = ProgramImage::builder("demo").build();
//! let rts = Rts::startup_with_config(["demo", "input.txt"], &image, RtsConfig::default());
//!
//! assert_eq!(sloth_runtime::get_prog_argv(), vec!["demo", "input.txt"]);
//! assert!(Rts::try_current().is_some());
//!
//! rts.shutdown();
//! assert!(Rts::try_current().is_none());
//! assert!(sloth_runtime::get_prog_argv().is_empty());
//! ```

use crate::api::argv::{clear_prog_argv, set_prog_argv};
use crate::closure::{Closure, Thunk};
use crate::heap::{BoxedValue, GcStats, Heap, HeapStats};
use crate::image::ProgramImage;
use crate::prelude::UNIT_TAG;
use crate::scheduler::Scheduler;
use crate::stable::{StablePtr, StablePtrTable};
use crate::status::EXIT_FAILURE;
use sloth_config::{ConfigLoader, RtsConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// The running runtime, if any
static CURRENT: RwLock<Option<Rts>> = RwLock::new(None);

/// Shared state behind every [`Rts`] handle
pub(crate) struct RtsInner {
    pub(crate) heap: Heap,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) stable: StablePtrTable,
    pub(crate) statics: HashMap<String, BoxedValue>,
    pub(crate) config: RtsConfig,
    image_name: String,
    alive: AtomicBool,
}

impl RtsInner {
    fn halt(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.scheduler
            .halt(Duration::from_millis(self.config.shutdown_grace_ms));
        self.heap.clear();
        self.stable.clear();
    }
}

/// Handle to the running runtime
#[derive(Clone)]
pub struct Rts {
    inner: Arc<RtsInner>,
}

impl Rts {
    /// Start the runtime with options from the environment and `args`
    ///
    /// Options come from defaults, `sloth.toml` (or `$SLOTH_RTS_CONFIG`),
    /// `$SLOTH_RTS` and any `+RTS ... -RTS` section of `args`. The RTS
    /// section is removed; what remains becomes the program arguments.
    /// Invalid options are reported on stderr and the process exits with
    /// status 1.
    ///
    /// # Panics
    ///
    /// If a runtime is already running.
    pub fn startup<I, S>(args: I, image: &ProgramImage) -> Rts
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match ConfigLoader::new().load_with_args(args) {
            Ok((config, prog_args)) => Self::startup_with_config(prog_args, image, config),
            Err(err) => {
                tracing::error!(%err, "invalid runtime options");
                eprintln!("sloth: {err}");
                std::process::exit(EXIT_FAILURE);
            }
        }
    }

    /// Start the runtime with explicit options; `args` are taken verbatim
    ///
    /// # Panics
    ///
    /// If a runtime is already running or `config` is invalid.
    pub fn startup_with_config<I, S>(args: I, image: &ProgramImage, config: RtsConfig) -> Rts
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            drop(current);
            contract_violation!("runtime started twice without an intervening shutdown");
        }
        if let Err(err) = config.validate() {
            drop(current);
            contract_violation!("invalid runtime options: {err}");
        }

        let scheduler = match Scheduler::new(&config) {
            Ok(scheduler) => Arc::new(scheduler),
            Err(err) => {
                tracing::error!(%err, "cannot create worker pool");
                eprintln!("sloth: cannot create worker pool: {err}");
                std::process::exit(EXIT_FAILURE);
            }
        };
        let heap = Heap::new();
        let statics = image.load(&heap);

        set_prog_argv(args);

        let rts = Rts {
            inner: Arc::new(RtsInner {
                heap,
                scheduler,
                stable: StablePtrTable::new(),
                statics,
                config,
                image_name: image.name().to_string(),
                alive: AtomicBool::new(true),
            }),
        };
        *current = Some(rts.clone());

        tracing::info!(
            image = image.name(),
            statics = rts.inner.statics.len(),
            stack_size = rts.inner.config.stack_size,
            max_workers = rts.inner.config.max_workers,
            "runtime started"
        );
        rts
    }

    /// The running runtime
    ///
    /// # Panics
    ///
    /// If no runtime is running.
    pub fn current() -> Rts {
        Self::try_current()
            .unwrap_or_else(|| contract_violation!("runtime used before startup or after shutdown"))
    }

    pub fn try_current() -> Option<Rts> {
        CURRENT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the runtime and release everything it owns
    ///
    /// Managed threads still alive (forked threads blocked forever, say) are
    /// interrupted and given `shutdown_grace_ms` to unwind. Every boxed value
    /// and stable pointer issued by this runtime becomes invalid, and the
    /// program arguments are cleared.
    ///
    /// # Panics
    ///
    /// If this runtime is not the running one.
    pub fn shutdown(self) {
        let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
        let is_running = matches!(
            current.as_ref(),
            Some(running) if Arc::ptr_eq(&running.inner, &self.inner)
        );
        if !is_running {
            drop(current);
            contract_violation!("shutdown of a runtime that is not running");
        }
        *current = None;
        drop(current);

        let stats = self.inner.heap.stats();
        let stable_ptrs = self.inner.stable.len();
        self.inner.halt();
        clear_prog_argv();
        tracing::info!(
            image = %self.inner.image_name,
            allocated = stats.allocated,
            peak_live = stats.peak_live,
            stable_ptrs,
            "runtime shut down"
        );
    }

    /// Shut down, then exit the process with `code`
    pub fn shutdown_and_exit(self, code: i32) -> ! {
        self.shutdown();
        std::process::exit(code)
    }

    pub(crate) fn from_inner(inner: Arc<RtsInner>) -> Self {
        Rts { inner }
    }

    /// Shared state, checked to still be running
    pub(crate) fn live(&self) -> &Arc<RtsInner> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            contract_violation!("runtime used after shutdown");
        }
        &self.inner
    }

    /// Options the runtime was started with
    pub fn config(&self) -> &RtsConfig {
        &self.live().config
    }

    /// Name of the loaded program image
    pub fn image_name(&self) -> &str {
        &self.live().image_name
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Top-level closure named `name`
    pub fn lookup(&self, name: &str) -> Option<BoxedValue> {
        self.live().statics.get(name).copied()
    }

    /// Build the application of `fun` to `arg` without evaluating anything
    pub fn apply(&self, fun: BoxedValue, arg: BoxedValue) -> BoxedValue {
        let heap = &self.live().heap;
        heap.check(fun);
        heap.check(arg);
        heap.alloc(Closure::Thunk(Thunk::Ap { fun, arg }))
    }

    /// Curried application of `fun` to each of `args`
    pub fn apply_n(&self, fun: BoxedValue, args: &[BoxedValue]) -> BoxedValue {
        args.iter().fold(fun, |f, &a| self.apply(f, a))
    }

    /// The unit value `()`
    pub fn unit(&self) -> BoxedValue {
        self.live().heap.alloc(Closure::Con {
            tag: UNIT_TAG,
            fields: Vec::new(),
        })
    }

    /// Whether `obj` has already been evaluated
    pub fn is_evaluated(&self, obj: BoxedValue) -> bool {
        self.live().heap.evaluated(obj).is_some()
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Interrupt every managed thread alive now
    ///
    /// Their evaluations finish with `Interrupted`. Evaluations submitted
    /// afterwards are unaffected.
    pub fn interrupt(&self) {
        self.live().scheduler.interrupt();
    }

    // ========================================================================
    // Stable pointers and collection
    // ========================================================================

    /// Keep `obj` alive until the returned pointer is freed
    pub fn new_stable_ptr(&self, obj: BoxedValue) -> StablePtr {
        let inner = self.live();
        inner.heap.check(obj);
        inner.stable.insert(obj)
    }

    /// # Panics
    ///
    /// If `ptr` has been freed or was issued by another runtime.
    pub fn deref_stable_ptr(&self, ptr: StablePtr) -> BoxedValue {
        self.live()
            .stable
            .get(ptr)
            .unwrap_or_else(|| contract_violation!("stable pointer {} is not live", ptr.as_raw()))
    }

    /// # Panics
    ///
    /// If `ptr` has already been freed.
    pub fn free_stable_ptr(&self, ptr: StablePtr) {
        if self.live().stable.remove(ptr).is_none() {
            contract_violation!("stable pointer {} freed twice", ptr.as_raw());
        }
    }

    /// Free every heap object not reachable from a stable pointer or a
    /// top-level closure
    ///
    /// Runs only while no managed thread is alive; returns `None` without
    /// collecting otherwise. Boxed values the host holds without a stable
    /// pointer are invalid after a collection.
    pub fn perform_gc(&self) -> Option<GcStats> {
        let inner = self.live();
        let stats = inner.scheduler.while_idle(|| {
            let mut roots = inner.stable.roots();
            roots.extend(inner.statics.values().copied());
            inner.heap.collect(roots)
        });
        match stats {
            Some(stats) => {
                tracing::debug!(live = stats.live, freed = stats.freed, "collection finished");
            }
            None => tracing::debug!("collection skipped: managed threads are running"),
        }
        stats
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.live().heap.stats()
    }
}

impl fmt::Debug for Rts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rts")
            .field("image", &self.inner.image_name)
            .field("alive", &self.inner.alive.load(Ordering::SeqCst))
            .finish()
    }
}

/// Start the runtime; see [`Rts::startup`]
pub fn startup<I, S>(args: I, image: &ProgramImage) -> Rts
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rts::startup(args, image)
}

/// Start the runtime with explicit options; see [`Rts::startup_with_config`]
pub fn startup_with_config<I, S>(args: I, image: &ProgramImage, config: RtsConfig) -> Rts
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rts::startup_with_config(args, image, config)
}

/// Shut down the running runtime
///
/// # Panics
///
/// If no runtime is running.
pub fn shutdown() {
    Rts::current().shutdown();
}

/// Shut down the running runtime and exit the process with `code`
pub fn shutdown_and_exit(code: i32) -> ! {
    Rts::current().shutdown_and_exit(code)
}
