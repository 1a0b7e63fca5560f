//! Heap object layout
//!
//! Every boxed value names one [`Closure`] in the heap. Evaluated closures
//! (primitives, constructors, functions, partial applications, IO actions,
//! MVars) are values. A thunk is a suspended application; while one thread
//! evaluates it the thunk is replaced by a black hole, and when evaluation
//! finishes it becomes an indirection to its value.

use crate::exception::EvalResult;
use crate::heap::BoxedValue;
use crate::machine::Machine;
use crate::scheduler::TsoId;
use crate::stable::StablePtr;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Native code behind a function, CAF or IO effect
pub(crate) type Code =
    Arc<dyn Fn(&mut Machine, &[BoxedValue]) -> EvalResult<BoxedValue> + Send + Sync>;

/// A named piece of native code with a fixed arity
pub(crate) struct Function {
    name: String,
    arity: usize,
    code: Code,
}

impl Function {
    pub(crate) fn new(name: impl Into<String>, arity: usize, code: Code) -> Self {
        Self {
            name: name.into(),
            arity,
            code,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn arity(&self) -> usize {
        self.arity
    }

    /// Run the code on exactly `arity` arguments
    pub(crate) fn invoke(
        &self,
        machine: &mut Machine,
        args: &[BoxedValue],
    ) -> EvalResult<BoxedValue> {
        debug_assert_eq!(args.len(), self.arity, "{}: wrong argument count", self.name);
        (self.code)(machine, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}/{}>", self.name, self.arity)
    }
}

/// Kind of an unboxed primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimKind {
    Char,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Word,
    Word8,
    Word16,
    Word32,
    Word64,
    Float,
    Double,
    Bool,
    Addr,
    StablePtr,
    String,
}

impl PrimKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimKind::Char => "Char",
            PrimKind::Int => "Int",
            PrimKind::Int8 => "Int8",
            PrimKind::Int16 => "Int16",
            PrimKind::Int32 => "Int32",
            PrimKind::Int64 => "Int64",
            PrimKind::Word => "Word",
            PrimKind::Word8 => "Word8",
            PrimKind::Word16 => "Word16",
            PrimKind::Word32 => "Word32",
            PrimKind::Word64 => "Word64",
            PrimKind::Float => "Float",
            PrimKind::Double => "Double",
            PrimKind::Bool => "Bool",
            PrimKind::Addr => "Addr",
            PrimKind::StablePtr => "StablePtr",
            PrimKind::String => "String",
        }
    }
}

impl fmt::Display for PrimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unboxed primitive payload of a boxed value
#[derive(Debug, Clone, PartialEq)]
pub enum Prim {
    Char(char),
    Int(isize),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Word(usize),
    Word8(u8),
    Word16(u16),
    Word32(u32),
    Word64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Addr(usize),
    StablePtr(StablePtr),
    String(Arc<str>),
}

impl Prim {
    pub fn kind(&self) -> PrimKind {
        match self {
            Prim::Char(_) => PrimKind::Char,
            Prim::Int(_) => PrimKind::Int,
            Prim::Int8(_) => PrimKind::Int8,
            Prim::Int16(_) => PrimKind::Int16,
            Prim::Int32(_) => PrimKind::Int32,
            Prim::Int64(_) => PrimKind::Int64,
            Prim::Word(_) => PrimKind::Word,
            Prim::Word8(_) => PrimKind::Word8,
            Prim::Word16(_) => PrimKind::Word16,
            Prim::Word32(_) => PrimKind::Word32,
            Prim::Word64(_) => PrimKind::Word64,
            Prim::Float(_) => PrimKind::Float,
            Prim::Double(_) => PrimKind::Double,
            Prim::Bool(_) => PrimKind::Bool,
            Prim::Addr(_) => PrimKind::Addr,
            Prim::StablePtr(_) => PrimKind::StablePtr,
            Prim::String(_) => PrimKind::String,
        }
    }
}

/// Suspended computation
#[derive(Debug, Clone)]
pub(crate) enum Thunk {
    /// Application of an unevaluated function to one argument
    Ap { fun: BoxedValue, arg: BoxedValue },
    /// Saturated call of known code (CAF bodies have no arguments)
    Call {
        fun: Arc<Function>,
        args: Vec<BoxedValue>,
    },
}

/// IO action description; running one is separate from evaluating it
#[derive(Debug, Clone)]
pub(crate) enum IoAction {
    Return(BoxedValue),
    Bind(BoxedValue, BoxedValue),
    Then(BoxedValue, BoxedValue),
    Effect {
        fun: Arc<Function>,
        args: Vec<BoxedValue>,
    },
    Catch(BoxedValue, BoxedValue),
    Fork(BoxedValue),
    NewMVar(Option<BoxedValue>),
    TakeMVar(BoxedValue),
    PutMVar(BoxedValue, BoxedValue),
    ReadMVar(BoxedValue),
}

pub(crate) type MVarSlot = Arc<Mutex<Option<BoxedValue>>>;

#[derive(Debug, Clone)]
pub(crate) enum Closure {
    Prim(Prim),
    Con { tag: u32, fields: Vec<BoxedValue> },
    Fun(Arc<Function>),
    Pap {
        fun: Arc<Function>,
        args: Vec<BoxedValue>,
    },
    Thunk(Thunk),
    Ind(BoxedValue),
    BlackHole { owner: TsoId, waited: bool },
    Io(IoAction),
    MVar(MVarSlot),
}

impl Closure {
    /// Short description for error messages
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Closure::Prim(p) => p.kind().name(),
            Closure::Con { .. } => "constructor",
            Closure::Fun(_) | Closure::Pap { .. } => "function",
            Closure::Thunk(_) => "thunk",
            Closure::Ind(_) => "indirection",
            Closure::BlackHole { .. } => "black hole",
            Closure::Io(_) => "IO action",
            Closure::MVar(_) => "MVar",
        }
    }

    /// Whether this closure is in weak head normal form
    pub(crate) fn is_value(&self) -> bool {
        !matches!(
            self,
            Closure::Thunk(_) | Closure::Ind(_) | Closure::BlackHole { .. }
        )
    }

    /// Visit every heap reference held by this closure
    pub(crate) fn for_each_ref(&self, mut f: impl FnMut(BoxedValue)) {
        match self {
            Closure::Prim(_) | Closure::Fun(_) | Closure::BlackHole { .. } => {}
            Closure::Con { fields: refs, .. }
            | Closure::Pap { args: refs, .. }
            | Closure::Thunk(Thunk::Call { args: refs, .. }) => refs.iter().copied().for_each(f),
            Closure::Thunk(Thunk::Ap { fun, arg }) => {
                f(*fun);
                f(*arg);
            }
            Closure::Ind(target) => f(*target),
            Closure::Io(io) => match io {
                IoAction::Return(a)
                | IoAction::Fork(a)
                | IoAction::TakeMVar(a)
                | IoAction::ReadMVar(a)
                | IoAction::NewMVar(Some(a)) => f(*a),
                IoAction::NewMVar(None) => {}
                IoAction::Bind(a, b)
                | IoAction::Then(a, b)
                | IoAction::Catch(a, b)
                | IoAction::PutMVar(a, b) => {
                    f(*a);
                    f(*b);
                }
                IoAction::Effect { args, .. } => args.iter().copied().for_each(f),
            },
            Closure::MVar(slot) => {
                if let Some(v) = *slot.lock().unwrap_or_else(PoisonError::into_inner) {
                    f(v);
                }
            }
        }
    }
}
