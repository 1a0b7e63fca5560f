//! Evaluator
//!
//! A [`Machine`] is the evaluation context of one managed thread. Native code
//! behind functions, CAFs and IO effects receives `&mut Machine` and uses it
//! to force arguments, build new closures and run IO.
//!
//! Evaluation is lazy and shared. Forcing a thunk black-holes it, reduces it
//! to a value and overwrites it with an indirection, so every other reference
//! sees the value without recomputing it. A thunk whose code returns another
//! unevaluated closure is a tail call: the machine keeps reducing in the same
//! frame and updates the whole chain with the final value.
//!
//! Nested forcing (native code calling [`Machine::get`] on an argument, say)
//! opens a new frame. The number of open frames is bounded by the thread's
//! stack budget; exceeding it raises a stack overflow. The native stack grows
//! onto heap segments as frames open, so any accepted budget fits.

use crate::api::runtime::RtsInner;
use crate::api::{get_prog_argv, Boxable, Rts};
use crate::closure::{Closure, Code, Function, IoAction, MVarSlot, Thunk};
use crate::exception::{EvalResult, Exception, Unwind};
use crate::heap::{BoxedValue, Entered};
use crate::prelude::{CONS_TAG, NIL_TAG, UNIT_TAG};
use crate::scheduler::Tso;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Native stack left when a new frame moves to a fresh segment
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each extra native stack segment
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// What a managed thread does with the closure it was given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalMode {
    /// Evaluate to weak head normal form
    Whnf,
    /// Evaluate to normal form
    Normal,
    /// Run an IO action, then evaluate its result to normal form
    Io,
    /// Run an IO action, leaving its result unevaluated
    LazyIo,
}

/// Next reduction in a spine
enum Step {
    Apply(BoxedValue, Vec<BoxedValue>),
    Call(Arc<Function>, Vec<BoxedValue>),
}

/// Pending continuation while running an IO action
enum Cont {
    Bind(BoxedValue),
    Then(BoxedValue),
}

/// Evaluation context of one managed thread
pub struct Machine {
    rts: Arc<RtsInner>,
    tso: Tso,
    depth: usize,
    budget: usize,
}

impl Machine {
    pub(crate) fn new(rts: Arc<RtsInner>, tso: Tso, budget: usize) -> Self {
        Self {
            rts,
            tso,
            depth: 0,
            budget,
        }
    }

    pub(crate) fn run(&mut self, mode: EvalMode, obj: BoxedValue) -> EvalResult<BoxedValue> {
        match mode {
            EvalMode::Whnf => self.whnf(obj),
            EvalMode::Normal => self.normal_form(obj),
            EvalMode::Io => {
                let result = self.run_io(obj)?;
                self.normal_form(result)
            }
            EvalMode::LazyIo => self.run_io(obj),
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate to weak head normal form
    ///
    /// Returns the evaluated object, which may differ from `obj` when `obj`
    /// was a thunk.
    pub fn whnf(&mut self, obj: BoxedValue) -> EvalResult<BoxedValue> {
        let mut current = obj;
        loop {
            self.safe_point()?;
            match self.rts.heap.enter(current, self.tso.id) {
                Entered::Value(value) => return Ok(value),
                Entered::Thunk { id, thunk } => {
                    return self.in_frame(|m| m.reduce(id, thunk));
                }
                Entered::BlackHole { owner, .. } if owner == self.tso.id => {
                    return Err(Exception::NonTermination.into());
                }
                Entered::BlackHole { id, .. } => {
                    self.await_update(id)?;
                    current = id;
                }
            }
        }
    }

    /// Evaluate to normal form: constructor fields are forced recursively
    pub fn normal_form(&mut self, obj: BoxedValue) -> EvalResult<BoxedValue> {
        let root = self.whnf(obj)?;
        let mut seen = HashSet::new();
        let mut pending = vec![root];

        while let Some(next) = pending.pop() {
            let value = self.whnf(next)?;
            if !seen.insert(value) {
                continue;
            }
            self.rts.heap.with(value, |c| {
                if let Closure::Con { fields, .. } = c {
                    pending.extend(fields.iter().rev().copied());
                }
            });
        }
        Ok(root)
    }

    /// Run an IO action to completion, returning its (unevaluated) result
    pub fn run_io(&mut self, action: BoxedValue) -> EvalResult<BoxedValue> {
        let mut conts: Vec<Cont> = Vec::new();
        let mut current = action;

        loop {
            let act = self.whnf(current)?;
            let io = self.rts.heap.with(act, |c| match c {
                Closure::Io(io) => Ok(io.clone()),
                other => Err(Exception::NotAnAction(other.describe())),
            })?;

            let result = match io {
                IoAction::Return(x) => x,
                IoAction::Bind(first, k) => {
                    conts.push(Cont::Bind(k));
                    current = first;
                    continue;
                }
                IoAction::Then(first, second) => {
                    conts.push(Cont::Then(second));
                    current = first;
                    continue;
                }
                IoAction::Effect { fun, args } => self.in_frame(|m| m.invoke(&fun, &args))?,
                IoAction::Catch(body, handler) => self.catch(body, handler)?,
                IoAction::Fork(child) => {
                    self.fork(child);
                    self.unit()
                }
                IoAction::NewMVar(initial) => self
                    .rts
                    .heap
                    .alloc(Closure::MVar(Arc::new(Mutex::new(initial)))),
                IoAction::TakeMVar(mvar) => self.take_mvar(mvar)?,
                IoAction::PutMVar(mvar, value) => {
                    self.put_mvar(mvar, value)?;
                    self.unit()
                }
                IoAction::ReadMVar(mvar) => self.read_mvar(mvar)?,
            };

            match conts.pop() {
                None => return Ok(result),
                Some(Cont::Bind(k)) => current = self.apply(k, result),
                Some(Cont::Then(next)) => current = next,
            }
        }
    }

    /// Check for a pending interrupt
    ///
    /// Long-running native code should call this periodically so the thread
    /// can be interrupted.
    pub fn safe_point(&self) -> EvalResult<()> {
        if self.rts.scheduler.is_interrupted(&self.tso) {
            Err(Unwind::Interrupted)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Force `obj` and extract its primitive payload
    pub fn get<T: Boxable>(&mut self, obj: BoxedValue) -> EvalResult<T> {
        let value = self.whnf(obj)?;
        let extracted = self.rts.heap.with(value, |c| match c {
            Closure::Prim(p) => T::from_prim(p).ok_or(p.kind().name()),
            other => Err(other.describe()),
        });
        extracted.map_err(|found| {
            Exception::TypeMismatch {
                expected: T::KIND.name(),
                found,
            }
            .into()
        })
    }

    /// Force `obj` and return its constructor tag and fields
    pub fn fields(&mut self, obj: BoxedValue) -> EvalResult<(u32, Vec<BoxedValue>)> {
        let value = self.whnf(obj)?;
        let con = self.rts.heap.with(value, |c| match c {
            Closure::Con { tag, fields } => Ok((*tag, fields.clone())),
            other => Err(other.describe()),
        });
        con.map_err(|found| {
            Exception::TypeMismatch {
                expected: "constructor",
                found,
            }
            .into()
        })
    }

    /// Force the spine of a list and return its elements (unevaluated)
    pub fn list_items(&mut self, list: BoxedValue) -> EvalResult<Vec<BoxedValue>> {
        let mut items = Vec::new();
        let mut cell = list;
        loop {
            self.safe_point()?;
            match self.fields(cell)? {
                (NIL_TAG, fields) if fields.is_empty() => return Ok(items),
                (CONS_TAG, fields) if fields.len() == 2 => {
                    items.push(fields[0]);
                    cell = fields[1];
                }
                _ => {
                    return Err(Exception::TypeMismatch {
                        expected: "list",
                        found: "constructor",
                    }
                    .into())
                }
            }
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Box a primitive
    pub fn mk<T: Boxable>(&self, value: T) -> BoxedValue {
        self.rts.heap.alloc(Closure::Prim(value.into_prim()))
    }

    pub fn unit(&self) -> BoxedValue {
        self.con(UNIT_TAG, &[])
    }

    /// Build an evaluated constructor
    pub fn con(&self, tag: u32, fields: &[BoxedValue]) -> BoxedValue {
        self.rts.heap.alloc(Closure::Con {
            tag,
            fields: fields.to_vec(),
        })
    }

    /// Build a list from its elements
    pub fn list(&self, items: &[BoxedValue]) -> BoxedValue {
        items
            .iter()
            .rev()
            .fold(self.con(NIL_TAG, &[]), |tail, &head| {
                self.con(CONS_TAG, &[head, tail])
            })
    }

    /// Suspended application of `fun` to `arg`
    pub fn apply(&self, fun: BoxedValue, arg: BoxedValue) -> BoxedValue {
        self.rts.heap.alloc(Closure::Thunk(Thunk::Ap { fun, arg }))
    }

    /// Suspended curried application of `fun` to each of `args`
    pub fn apply_n(&self, fun: BoxedValue, args: &[BoxedValue]) -> BoxedValue {
        args.iter().fold(fun, |f, &a| self.apply(f, a))
    }

    /// Top-level closure named `name`
    pub fn lookup(&self, name: &str) -> EvalResult<BoxedValue> {
        self.rts
            .statics
            .get(name)
            .copied()
            .ok_or_else(|| Exception::UnknownClosure(name.to_string()).into())
    }

    /// Suspended call of the top-level closure `name`
    ///
    /// Returning the result from native code is a tail call.
    pub fn call(&self, name: &str, args: &[BoxedValue]) -> EvalResult<BoxedValue> {
        let fun = self.lookup(name)?;
        let known = self.rts.heap.with(fun, |c| match c {
            Closure::Fun(f) if f.arity() == args.len() => Some(Arc::clone(f)),
            _ => None,
        });
        Ok(match known {
            Some(f) => self.rts.heap.alloc(Closure::Thunk(Thunk::Call {
                fun: f,
                args: args.to_vec(),
            })),
            None => self.apply_n(fun, args),
        })
    }

    /// Raise `exception` in the current thread
    pub fn raise<T>(&self, exception: Exception) -> EvalResult<T> {
        Err(exception.into())
    }

    /// Raise a user error
    pub fn throw<T>(&self, msg: impl Into<String>) -> EvalResult<T> {
        self.raise(Exception::error(msg))
    }

    // ========================================================================
    // IO actions
    // ========================================================================

    pub fn io_return(&self, value: BoxedValue) -> BoxedValue {
        self.io(IoAction::Return(value))
    }

    /// Run `first`, then apply `k` to its result and run that
    pub fn io_bind(&self, first: BoxedValue, k: BoxedValue) -> BoxedValue {
        self.io(IoAction::Bind(first, k))
    }

    pub fn io_then(&self, first: BoxedValue, second: BoxedValue) -> BoxedValue {
        self.io(IoAction::Then(first, second))
    }

    /// Action running native `effect` on `args` each time it is run
    pub fn io_effect<F>(&self, name: &str, args: &[BoxedValue], effect: F) -> BoxedValue
    where
        F: Fn(&mut Machine, &[BoxedValue]) -> EvalResult<BoxedValue> + Send + Sync + 'static,
    {
        let code: Code = Arc::new(effect);
        self.io(IoAction::Effect {
            fun: Arc::new(Function::new(name, args.len(), code)),
            args: args.to_vec(),
        })
    }

    /// Run `body`; if it raises, apply `handler` to the message and run that
    pub fn io_catch(&self, body: BoxedValue, handler: BoxedValue) -> BoxedValue {
        self.io(IoAction::Catch(body, handler))
    }

    /// Start `action` on a new managed thread
    pub fn io_fork(&self, action: BoxedValue) -> BoxedValue {
        self.io(IoAction::Fork(action))
    }

    pub fn io_new_mvar(&self, initial: Option<BoxedValue>) -> BoxedValue {
        self.io(IoAction::NewMVar(initial))
    }

    /// Empty the MVar, blocking while it is empty
    pub fn io_take_mvar(&self, mvar: BoxedValue) -> BoxedValue {
        self.io(IoAction::TakeMVar(mvar))
    }

    /// Fill the MVar, blocking while it is full
    pub fn io_put_mvar(&self, mvar: BoxedValue, value: BoxedValue) -> BoxedValue {
        self.io(IoAction::PutMVar(mvar, value))
    }

    pub fn io_read_mvar(&self, mvar: BoxedValue) -> BoxedValue {
        self.io(IoAction::ReadMVar(mvar))
    }

    // ========================================================================
    // Environment
    // ========================================================================

    /// Current process argument snapshot
    pub fn prog_argv(&self) -> Vec<String> {
        get_prog_argv()
    }

    /// Boundary handle for re-entrant calls from native code
    pub fn rts(&self) -> Rts {
        Rts::from_inner(Arc::clone(&self.rts))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn io(&self, action: IoAction) -> BoxedValue {
        self.rts.heap.alloc(Closure::Io(action))
    }

    fn in_frame<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        if self.depth >= self.budget {
            tracing::debug!(tso = self.tso.id, budget = self.budget, "stack overflow");
            return Err(Exception::StackOverflow.into());
        }
        self.depth += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || f(self));
        self.depth -= 1;
        result
    }

    /// Run native code, turning a panic into an exception
    fn invoke(&mut self, fun: &Function, args: &[BoxedValue]) -> EvalResult<BoxedValue> {
        match panic::catch_unwind(AssertUnwindSafe(|| fun.invoke(self, args))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!(function = fun.name(), panic = %msg, "native code panicked");
                Err(Exception::Panicked.into())
            }
        }
    }

    /// Reduce a black-holed thunk and update it with the outcome
    fn reduce(&mut self, id: BoxedValue, thunk: Thunk) -> EvalResult<BoxedValue> {
        let mut updates = vec![(id, thunk.clone())];
        let step = match thunk {
            Thunk::Ap { fun, arg } => Step::Apply(fun, vec![arg]),
            Thunk::Call { fun, args } => Step::Call(fun, args),
        };
        let result = self.reduce_spine(&mut updates, step);

        let heap = &self.rts.heap;
        let mut woke = false;
        match &result {
            Ok(value) => {
                for (thunk_id, _) in &updates {
                    woke |= heap.update(*thunk_id, Closure::Ind(*value));
                }
            }
            Err(_) => {
                for (thunk_id, saved) in updates {
                    woke |= heap.update(thunk_id, Closure::Thunk(saved));
                }
            }
        }
        if woke {
            self.rts.scheduler.notify();
        }
        result
    }

    fn reduce_spine(
        &mut self,
        updates: &mut Vec<(BoxedValue, Thunk)>,
        mut step: Step,
    ) -> EvalResult<BoxedValue> {
        loop {
            self.safe_point()?;
            let (fun, mut args) = match step {
                Step::Call(fun, args) => (fun, args),
                Step::Apply(f, args) => {
                    let f = self.whnf(f)?;
                    let head = self.rts.heap.with(f, |c| match c {
                        Closure::Fun(fun) => Ok((Arc::clone(fun), Vec::new())),
                        Closure::Pap { fun, args } => Ok((Arc::clone(fun), args.clone())),
                        other => Err(Exception::NotAFunction(other.describe())),
                    })?;
                    let (fun, mut held) = head;
                    held.extend(args);
                    (fun, held)
                }
            };

            if args.len() < fun.arity() {
                return Ok(self.rts.heap.alloc(Closure::Pap { fun, args }));
            }
            let rest = args.split_off(fun.arity());
            let result = self.invoke(&fun, &args)?;
            if !rest.is_empty() {
                step = Step::Apply(result, rest);
                continue;
            }

            match self.rts.heap.enter(result, self.tso.id) {
                Entered::Value(value) => return Ok(value),
                Entered::Thunk { id, thunk } => {
                    updates.push((id, thunk.clone()));
                    step = match thunk {
                        Thunk::Ap { fun, arg } => Step::Apply(fun, vec![arg]),
                        Thunk::Call { fun, args } => Step::Call(fun, args),
                    };
                }
                Entered::BlackHole { .. } => return self.whnf(result),
            }
        }
    }

    /// Sleep until another thread updates the black hole `id`
    fn await_update(&self, id: BoxedValue) -> EvalResult<()> {
        let heap = &self.rts.heap;
        self.rts
            .scheduler
            .wait_until(&self.tso, || (!heap.await_blackhole(id)).then_some(()))
    }

    fn catch(&mut self, body: BoxedValue, handler: BoxedValue) -> EvalResult<BoxedValue> {
        match self.in_frame(|m| m.run_io(body)) {
            Err(Unwind::Raise(exception)) => {
                tracing::debug!(tso = self.tso.id, %exception, "exception caught");
                let msg = self.mk(exception.to_string());
                let recovery = self.apply(handler, msg);
                self.in_frame(|m| m.run_io(recovery))
            }
            other => other,
        }
    }

    fn fork(&self, action: BoxedValue) {
        let rts = Arc::clone(&self.rts);
        let scheduler = Arc::clone(&rts.scheduler);
        let budget = rts.config.stack_size;
        let tso = scheduler.new_tso();
        let (parent, child) = (self.tso.id, tso.id);

        let started = scheduler.spawn(tso, move |tso| {
            let mut machine = Machine::new(rts, tso, budget);
            match machine.run_io(action) {
                Ok(_) => tracing::trace!(tso = child, "forked thread finished"),
                Err(Unwind::Raise(exception)) => {
                    tracing::warn!(tso = child, %exception, "uncaught exception in forked thread");
                }
                Err(unwind) => tracing::debug!(tso = child, %unwind, "forked thread stopped"),
            }
        });
        if started {
            tracing::trace!(parent, child, "forked managed thread");
        } else {
            tracing::debug!(parent, "fork refused: scheduler halted");
        }
    }

    fn mvar_slot(&mut self, mvar: BoxedValue) -> EvalResult<MVarSlot> {
        let value = self.whnf(mvar)?;
        let slot = self.rts.heap.with(value, |c| match c {
            Closure::MVar(slot) => Ok(Arc::clone(slot)),
            other => Err(Exception::TypeMismatch {
                expected: "MVar",
                found: other.describe(),
            }),
        })?;
        Ok(slot)
    }

    fn take_mvar(&mut self, mvar: BoxedValue) -> EvalResult<BoxedValue> {
        let slot = self.mvar_slot(mvar)?;
        self.rts.scheduler.wait_until(&self.tso, || {
            slot.lock().unwrap_or_else(PoisonError::into_inner).take()
        })
    }

    fn put_mvar(&mut self, mvar: BoxedValue, value: BoxedValue) -> EvalResult<()> {
        let slot = self.mvar_slot(mvar)?;
        self.rts.scheduler.wait_until(&self.tso, || {
            let mut contents = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if contents.is_some() {
                return None;
            }
            *contents = Some(value);
            Some(())
        })
    }

    fn read_mvar(&mut self, mvar: BoxedValue) -> EvalResult<BoxedValue> {
        let slot = self.mvar_slot(mvar)?;
        self.rts.scheduler.wait_until(&self.tso, || {
            *slot.lock().unwrap_or_else(PoisonError::into_inner)
        })
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("tso", &self.tso.id)
            .field("depth", &self.depth)
            .field("budget", &self.budget)
            .finish()
    }
}
