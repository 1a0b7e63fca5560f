//! Program images
//!
//! A [`ProgramImage`] is the compiled program handed to startup: a named set
//! of top-level closures written as native Rust code. Startup loads the base
//! library first and then the image's own definitions, so an image may
//! shadow any base-library name.
//!
//! Three kinds of top-level definition exist:
//! - **functions** of fixed arity, applied with `apply`
//! - **CAFs** (constant applicative forms): shared top-level thunks, evaluated
//!   at most once per runtime
//! - **actions**: IO actions whose effect runs each time the action is run
//!
//! # Examples
//!
//! ```rust
//! use sloth_runtime::ProgramImage;
//!
//! let image = ProgramImage::builder("hello")
//!     .function("double", 1, |m, args| {
//!         let n: isize = m.get(args[0])?;
//!         Ok(m.mk(n * 2))
//!     })
//!     .caf("answer", |m| m.call("double", &[m.mk(21isize)]))
//!     .action("main", |m| {
//!         println!("hello");
//!         Ok(m.unit())
//!     })
//!     .build();
//!
//! assert!(image.defines("double"));
//! assert!(image.defines("plusInt"));
//! ```

use crate::closure::{Closure, Code, Function, IoAction, Thunk};
use crate::exception::EvalResult;
use crate::heap::{BoxedValue, Heap};
use crate::machine::Machine;
use crate::prelude;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) enum Definition {
    Function(Arc<Function>),
    Caf(Arc<Function>),
    Action(Arc<Function>),
}

impl Definition {
    pub(crate) fn name(&self) -> &str {
        match self {
            Definition::Function(f) | Definition::Caf(f) | Definition::Action(f) => f.name(),
        }
    }

    fn closure(&self) -> Closure {
        match self {
            Definition::Function(f) => Closure::Fun(Arc::clone(f)),
            Definition::Caf(f) => Closure::Thunk(Thunk::Call {
                fun: Arc::clone(f),
                args: Vec::new(),
            }),
            Definition::Action(f) => Closure::Io(IoAction::Effect {
                fun: Arc::clone(f),
                args: Vec::new(),
            }),
        }
    }
}

/// Compiled program loaded by startup
#[derive(Clone)]
pub struct ProgramImage {
    name: String,
    definitions: Vec<Definition>,
}

impl ProgramImage {
    /// Start building an image called `name`
    pub fn builder(name: impl Into<String>) -> ImageBuilder {
        ImageBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `name` is defined, by the image or the base library
    pub fn defines(&self, name: &str) -> bool {
        self.definitions.iter().any(|d| d.name() == name)
    }

    /// Allocate every top-level closure, returning the static name table
    pub(crate) fn load(&self, heap: &Heap) -> HashMap<String, BoxedValue> {
        let mut statics = HashMap::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            let obj = heap.alloc(definition.closure());
            statics.insert(definition.name().to_string(), obj);
        }
        statics
    }
}

impl std::fmt::Debug for ProgramImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramImage")
            .field("name", &self.name)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

/// Builder for [`ProgramImage`]
pub struct ImageBuilder {
    name: String,
    definitions: Vec<Definition>,
}

impl ImageBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definitions: Vec::new(),
        }
    }

    /// Define a function taking `arity` arguments
    ///
    /// Arguments arrive unevaluated; the code forces what it needs with
    /// [`Machine::get`] or [`Machine::whnf`]. Returning an unevaluated closure
    /// is a tail call.
    ///
    /// # Panics
    ///
    /// If `arity` is zero. Use [`ImageBuilder::caf`] for constants.
    pub fn function<F>(mut self, name: impl Into<String>, arity: usize, code: F) -> Self
    where
        F: Fn(&mut Machine, &[BoxedValue]) -> EvalResult<BoxedValue> + Send + Sync + 'static,
    {
        let name = name.into();
        if arity == 0 {
            contract_violation!("function '{name}' has arity 0; define it as a CAF");
        }
        let code: Code = Arc::new(code);
        self.definitions
            .push(Definition::Function(Arc::new(Function::new(name, arity, code))));
        self
    }

    /// Define a shared top-level constant, computed on first demand
    pub fn caf<F>(mut self, name: impl Into<String>, code: F) -> Self
    where
        F: Fn(&mut Machine) -> EvalResult<BoxedValue> + Send + Sync + 'static,
    {
        let code: Code = Arc::new(move |m: &mut Machine, _: &[BoxedValue]| code(m));
        self.definitions
            .push(Definition::Caf(Arc::new(Function::new(name, 0, code))));
        self
    }

    /// Define an IO action whose effect runs every time the action is run
    pub fn action<F>(mut self, name: impl Into<String>, effect: F) -> Self
    where
        F: Fn(&mut Machine) -> EvalResult<BoxedValue> + Send + Sync + 'static,
    {
        let code: Code = Arc::new(move |m: &mut Machine, _: &[BoxedValue]| effect(m));
        self.definitions
            .push(Definition::Action(Arc::new(Function::new(name, 0, code))));
        self
    }

    /// Finish the image, base library first
    pub fn build(self) -> ProgramImage {
        let mut definitions = prelude::definitions();
        definitions.extend(self.definitions);
        ProgramImage {
            name: self.name,
            definitions,
        }
    }

    /// Definitions without the base library
    pub(crate) fn into_definitions(self) -> Vec<Definition> {
        self.definitions
    }
}
