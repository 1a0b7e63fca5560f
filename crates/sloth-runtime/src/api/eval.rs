//! Evaluation entry points
//!
//! Each entry point submits one request to the scheduler as a new managed
//! thread and blocks the calling host thread until that thread reaches a
//! terminal state. The outcome is a [`SchedulerStatus`] plus, on success
//! only, the resulting boxed value.
//!
//! | entry point      | budget              | does                                   |
//! |------------------|---------------------|----------------------------------------|
//! | `eval`           | `stack_size`        | evaluate to normal form                |
//! | `eval_with_stack`| explicit, clamped   | evaluate to normal form                |
//! | `eval_io`        | `stack_size`        | run IO action, result to normal form   |
//! | `eval_lazy_io`   | explicit, clamped   | run IO action, result left unevaluated |
//!
//! The calling thread must not be a tokio async worker; from async code,
//! wrap the call in `spawn_blocking`. Native code running inside a managed
//! thread may call these re-entrantly; the calling thread does not count
//! against `max_workers` while it waits.

use crate::api::Rts;
use crate::exception::Unwind;
use crate::heap::BoxedValue;
use crate::machine::{EvalMode, Machine};
use crate::status::SchedulerStatus;
use std::sync::Arc;
use tokio::sync::oneshot;

impl Rts {
    /// Evaluate `obj` to normal form with the default stack budget
    pub fn eval(&self, obj: BoxedValue) -> (SchedulerStatus, Option<BoxedValue>) {
        let budget = self.live().config.stack_size;
        self.dispatch(EvalMode::Normal, obj, budget)
    }

    /// Evaluate `obj` to normal form with an explicit stack budget
    ///
    /// The budget is clamped to the configured `max_stack_size`.
    pub fn eval_with_stack(
        &self,
        obj: BoxedValue,
        stack_size: usize,
    ) -> (SchedulerStatus, Option<BoxedValue>) {
        let budget = self.live().config.clamp_stack_size(stack_size);
        self.dispatch(EvalMode::Normal, obj, budget)
    }

    /// Run the IO action `obj`, then evaluate its result to normal form
    pub fn eval_io(&self, obj: BoxedValue) -> (SchedulerStatus, Option<BoxedValue>) {
        let budget = self.live().config.stack_size;
        self.dispatch(EvalMode::Io, obj, budget)
    }

    /// Run the IO action `obj` without forcing its result
    pub fn eval_lazy_io(
        &self,
        obj: BoxedValue,
        stack_size: usize,
    ) -> (SchedulerStatus, Option<BoxedValue>) {
        let budget = self.live().config.clamp_stack_size(stack_size);
        self.dispatch(EvalMode::LazyIo, obj, budget)
    }

    pub(crate) fn dispatch(
        &self,
        mode: EvalMode,
        obj: BoxedValue,
        budget: usize,
    ) -> (SchedulerStatus, Option<BoxedValue>) {
        let inner = self.live();
        inner.heap.check(obj);

        let (tx, rx) = oneshot::channel();
        let tso = inner.scheduler.new_tso();
        let tso_id = tso.id;
        let rts = Arc::clone(inner);

        let started = inner.scheduler.spawn_then(
            tso,
            move |tso| Machine::new(rts, tso, budget).run(mode, obj),
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );
        if !started {
            contract_violation!("evaluation submitted while the runtime is shutting down");
        }

        // A re-entrant call frees its thread's capability for the request
        let (status, result) = match inner.scheduler.suspend(|| rx.blocking_recv()) {
            Ok(Ok(value)) => (SchedulerStatus::Success, Some(value)),
            Ok(Err(Unwind::Raise(exception))) => {
                tracing::debug!(tso = tso_id, %exception, "uncaught exception");
                (SchedulerStatus::Killed, None)
            }
            Ok(Err(Unwind::Interrupted)) => (SchedulerStatus::Interrupted, None),
            Ok(Err(Unwind::Deadlock)) => (SchedulerStatus::Deadlock, None),
            Err(_) => {
                tracing::error!(tso = tso_id, "managed thread ended without reporting");
                (SchedulerStatus::Killed, None)
            }
        };

        tracing::debug!(tso = tso_id, ?mode, %status, budget, "evaluation finished");
        (status, result)
    }
}
