//! Managed thread scheduler
//!
//! Managed threads (one per evaluation request, plus one per `forkIO`) run on
//! the blocking pool of a private tokio runtime. The pool supplies large-stack
//! OS threads on demand and reclaims idle ones, so evaluations that recurse
//! deeply through native code get the stack they need.
//!
//! Every managed thread gets its own pool thread, but only `max_workers` of
//! them run at once. Running requires a capability. A thread gives its
//! capability up while it is blocked, and while native code waits for a
//! re-entrant evaluation ([`Scheduler::suspend`]), then queues to take one
//! back.
//!
//! All blocking inside managed code (MVars, waiting on another thread's black
//! hole) goes through one monitor: a mutex over the thread counts plus a
//! condition variable. A thread about to sleep gives up its capability; if
//! that leaves no thread running or queued to run, no wakeup can ever come,
//! so the scheduler declares deadlock and every blocked thread gives up.
//!
//! Lock order: the scheduler state lock is taken before any MVar slot lock.

use crate::exception::{EvalResult, Unwind};
use sloth_config::RtsConfig;
use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};

thread_local! {
    /// Set while this OS thread runs a managed thread that holds a capability
    static HOLDS_CAPABILITY: Cell<bool> = const { Cell::new(false) };
}

/// Identity of a managed thread
pub(crate) type TsoId = u64;

/// Thread state object for one managed thread
#[derive(Debug)]
pub(crate) struct Tso {
    pub(crate) id: TsoId,
    /// Interrupt generation at creation; later interrupts apply to this thread
    interrupt_gen: u64,
}

#[derive(Debug, Default)]
struct SchedState {
    /// Threads holding a capability
    running: usize,
    /// Threads queued for a capability, including ones not yet started
    waiting: usize,
    /// Threads asleep in [`Scheduler::wait_until`] that no change has
    /// woken since they went to sleep
    blocked: usize,
    /// Threads whose native code waits on a re-entrant evaluation
    suspended: usize,
    /// Bumped each time blocked threads are woken to re-check
    wake_gen: u64,
    /// Bumped each time a deadlock is declared
    deadlock_gen: u64,
}

impl SchedState {
    fn alive(&self) -> usize {
        self.running + self.waiting + self.blocked + self.suspended
    }

    /// Nothing can run now or later, yet some thread is asleep
    fn stuck(&self) -> bool {
        self.running == 0 && self.waiting == 0 && self.blocked > 0
    }
}

pub(crate) struct Scheduler {
    pool: Mutex<Option<Runtime>>,
    state: Mutex<SchedState>,
    wakeup: Condvar,
    capabilities: usize,
    next_tso: AtomicU64,
    interrupt_gen: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new(config: &RtsConfig) -> io::Result<Self> {
        // Blocked threads keep their pool thread, so the pool must never
        // make a runnable thread wait for one.
        let pool = Builder::new_current_thread()
            .max_blocking_threads(usize::MAX)
            .thread_stack_size(config.worker_stack_bytes)
            .thread_name("sloth-worker")
            .build()?;

        Ok(Self {
            pool: Mutex::new(Some(pool)),
            state: Mutex::new(SchedState::default()),
            wakeup: Condvar::new(),
            capabilities: config.max_workers.max(1),
            next_tso: AtomicU64::new(1),
            interrupt_gen: AtomicU64::new(0),
        })
    }

    pub(crate) fn new_tso(&self) -> Tso {
        Tso {
            id: self.next_tso.fetch_add(1, Ordering::Relaxed),
            interrupt_gen: self.interrupt_gen.load(Ordering::SeqCst),
        }
    }

    /// Start a managed thread running `job`
    ///
    /// Returns false if the scheduler has already been halted.
    pub(crate) fn spawn<F>(self: &Arc<Self>, tso: Tso, job: F) -> bool
    where
        F: FnOnce(Tso) + Send + 'static,
    {
        self.spawn_then(tso, job, |()| {})
    }

    /// Start a managed thread running `job`, then hand its outcome to
    /// `report` once the thread no longer counts as alive
    pub(crate) fn spawn_then<T, F, R>(self: &Arc<Self>, tso: Tso, job: F, report: R) -> bool
    where
        T: 'static,
        F: FnOnce(Tso) -> T + Send + 'static,
        R: FnOnce(T) + Send + 'static,
    {
        self.lock_state().waiting += 1;

        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pool) = pool.as_ref() else {
            let mut state = self.lock_state();
            state.waiting -= 1;
            self.wakeup.notify_all();
            return false;
        };

        let sched = Arc::clone(self);
        pool.spawn_blocking(move || {
            drop(sched.take_capability(sched.lock_state()));
            let exit = ThreadExit(sched);
            let outcome = job(tso);
            drop(exit);
            report(outcome);
        });
        true
    }

    /// Block the calling managed thread until `poll` yields a value
    ///
    /// `poll` runs with the scheduler lock held, so a state change made by
    /// another thread followed by [`Scheduler::notify`] is never missed.
    pub(crate) fn wait_until<T>(
        &self,
        tso: &Tso,
        mut poll: impl FnMut() -> Option<T>,
    ) -> EvalResult<T> {
        let mut state = self.lock_state();
        let seen_gen = state.deadlock_gen;

        loop {
            if let Some(value) = poll() {
                self.wake_blocked(&mut state);
                return Ok(value);
            }
            if self.is_interrupted(tso) {
                return Err(Unwind::Interrupted);
            }
            if state.deadlock_gen != seen_gen {
                return Err(Unwind::Deadlock);
            }

            state.running -= 1;
            state.blocked += 1;
            if state.stuck() {
                state.blocked -= 1;
                state.running += 1;
                tracing::warn!(
                    tso = tso.id,
                    blocked = state.blocked,
                    "every managed thread is blocked; declaring deadlock"
                );
                self.declare_deadlock(&mut state);
                return Err(Unwind::Deadlock);
            }

            // Our capability is free for a queued thread
            self.wakeup.notify_all();
            let slept_at = state.wake_gen;
            while state.wake_gen == slept_at {
                state = self
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state = self.take_capability(state);
        }
    }

    /// Run `f` with the calling managed thread's capability released
    ///
    /// Used when native code blocks on a re-entrant evaluation. On a host
    /// thread this just runs `f`.
    pub(crate) fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        if !HOLDS_CAPABILITY.with(Cell::get) {
            return f();
        }

        {
            let mut state = self.lock_state();
            state.running -= 1;
            state.suspended += 1;
            if state.stuck() {
                self.declare_deadlock(&mut state);
            }
            self.wakeup.notify_all();
        }
        HOLDS_CAPABILITY.with(|held| held.set(false));

        let outcome = f();

        let mut state = self.lock_state();
        state.suspended -= 1;
        state.waiting += 1;
        drop(self.take_capability(state));
        outcome
    }

    /// Wake every blocked thread to re-check its condition
    pub(crate) fn notify(&self) {
        let mut state = self.lock_state();
        self.wake_blocked(&mut state);
    }

    /// Interrupt every managed thread alive now
    pub(crate) fn interrupt(&self) {
        let generation = self.interrupt_gen.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "interrupt requested");
        self.notify();
    }

    pub(crate) fn is_interrupted(&self, tso: &Tso) -> bool {
        self.interrupt_gen.load(Ordering::SeqCst) > tso.interrupt_gen
    }

    /// Run `f` only if no managed thread is alive, keeping new ones from
    /// starting until it returns
    pub(crate) fn while_idle<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let state = self.lock_state();
        if state.alive() > 0 {
            return None;
        }
        let result = f();
        drop(state);
        Some(result)
    }

    /// Interrupt everything, wait up to `grace` for threads to unwind, then
    /// release the worker pool
    pub(crate) fn halt(&self, grace: Duration) {
        self.interrupt();

        let deadline = Instant::now() + grace;
        let mut state = self.lock_state();
        while state.alive() > 0 {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    running = state.running,
                    waiting = state.waiting,
                    blocked = state.blocked,
                    "managed threads still alive after shutdown grace period"
                );
                break;
            }
            state = self
                .wakeup
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(state);

        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.shutdown_background();
        }
    }

    /// Move the calling thread from `waiting` to `running` once a
    /// capability is free
    fn take_capability<'a>(
        &'a self,
        mut state: MutexGuard<'a, SchedState>,
    ) -> MutexGuard<'a, SchedState> {
        while state.running >= self.capabilities {
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
        state.running += 1;
        HOLDS_CAPABILITY.with(|held| held.set(true));
        state
    }

    /// Move every blocked thread to the capability queue so it re-checks
    /// its condition
    ///
    /// Woken threads stop counting as blocked here rather than when they
    /// get to run, so a thread that blocks in between never mistakes them
    /// for stuck ones.
    fn wake_blocked(&self, state: &mut SchedState) {
        state.waiting += state.blocked;
        state.blocked = 0;
        state.wake_gen += 1;
        self.wakeup.notify_all();
    }

    fn declare_deadlock(&self, state: &mut SchedState) {
        state.deadlock_gen += 1;
        self.wake_blocked(state);
    }

    fn thread_exited(&self) {
        HOLDS_CAPABILITY.with(|held| held.set(false));
        let mut state = self.lock_state();
        state.running -= 1;
        if state.stuck() {
            tracing::warn!(
                blocked = state.blocked,
                "last running thread finished with others blocked; declaring deadlock"
            );
            self.declare_deadlock(&mut state);
        }
        self.wakeup.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accounts for a managed thread leaving, including by panic
struct ThreadExit(Arc<Scheduler>);

impl Drop for ThreadExit {
    fn drop(&mut self) {
        self.0.thread_exited();
    }
}
