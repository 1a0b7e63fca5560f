//! Value marshaling between native primitives and boxed heap objects
//!
//! Each primitive kind has exactly one boxed representation, built by one
//! operation and recovered by one extraction:
//! - [`Boxable`] - the closed set of native types that can be boxed
//! - `Rts::mk` / `Rts::get` - generic build and extract
//! - `Rts::mk_int`, `Rts::get_int`, ... - the same per kind, by name
//!
//! Building never evaluates anything. Extracting from an unevaluated object
//! evaluates it first, blocking the caller.
//!
//! # Examples
//!
//! ```
//! use sloth_runtime::{startup_with_config, ProgramImage, RtsConfig};
//!
//! let rts = startup_with_config(["demo"], &ProgramImage::builder("demo").build(), RtsConfig::default());
//!
//! let boxed = rts.mk_int32(-7);
//! assert_eq!(rts.get_int32(boxed), -7);
//!
//! let text = rts.mk_string("hello");
//! assert_eq!(rts.get::<String>(text), "hello");
//!
//! // Mismatches are reported by the checked form
//! assert!(rts.try_get::<bool>(text).is_err());
//! rts.shutdown();
//! ```

use crate::api::Rts;
use crate::closure::{Closure, Prim, PrimKind};
use crate::heap::BoxedValue;
use crate::machine::EvalMode;
use crate::stable::StablePtr;
use crate::status::SchedulerStatus;
use std::ffi::c_void;
use std::sync::Arc;
use thiserror::Error;

/// Error type for checked extraction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The object holds a different kind of value
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Evaluating the object for extraction did not succeed
    #[error("Evaluation for extraction ended with status {0}")]
    EvaluationFailed(SchedulerStatus),
}

/// Native primitive with a canonical boxed representation
///
/// Implemented for exactly the primitive kinds the runtime knows about; it is
/// not meant to be implemented outside this crate.
pub trait Boxable: Sized {
    /// Kind of the boxed representation
    const KIND: PrimKind;

    /// Convert into the boxed payload
    fn into_prim(self) -> Prim;

    /// Recover from a boxed payload, if it has this kind
    fn from_prim(prim: &Prim) -> Option<Self>;
}

macro_rules! boxable {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Boxable for $ty {
                const KIND: PrimKind = PrimKind::$kind;

                fn into_prim(self) -> Prim {
                    Prim::$kind(self)
                }

                fn from_prim(prim: &Prim) -> Option<Self> {
                    match prim {
                        Prim::$kind(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

boxable! {
    char => Char,
    isize => Int,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    usize => Word,
    u8 => Word8,
    u16 => Word16,
    u32 => Word32,
    u64 => Word64,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    StablePtr => StablePtr,
}

impl Boxable for String {
    const KIND: PrimKind = PrimKind::String;

    fn into_prim(self) -> Prim {
        Prim::String(Arc::from(self))
    }

    fn from_prim(prim: &Prim) -> Option<Self> {
        match prim {
            Prim::String(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

impl Boxable for *mut c_void {
    const KIND: PrimKind = PrimKind::Addr;

    fn into_prim(self) -> Prim {
        Prim::Addr(self as usize)
    }

    fn from_prim(prim: &Prim) -> Option<Self> {
        match prim {
            Prim::Addr(addr) => Some(*addr as *mut c_void),
            _ => None,
        }
    }
}

impl Rts {
    /// Box a native primitive. Never evaluates or blocks.
    pub fn mk<T: Boxable>(&self, value: T) -> BoxedValue {
        self.live().heap.alloc(Closure::Prim(value.into_prim()))
    }

    /// Extract a native primitive, evaluating `obj` first if needed
    ///
    /// # Panics
    ///
    /// On a kind mismatch, or if evaluating `obj` does not succeed. Use
    /// [`Rts::try_get`] to handle those cases.
    pub fn get<T: Boxable>(&self, obj: BoxedValue) -> T {
        self.try_get(obj)
            .unwrap_or_else(|err| contract_violation!("cannot extract {} from {obj}: {err}", T::KIND))
    }

    /// Checked extraction
    pub fn try_get<T: Boxable>(&self, obj: BoxedValue) -> Result<T, ConversionError> {
        let inner = self.live();
        let value = match inner.heap.evaluated(obj) {
            Some(value) => value,
            None => match self.dispatch(EvalMode::Whnf, obj, inner.config.stack_size) {
                (SchedulerStatus::Success, Some(value)) => value,
                (status, _) => return Err(ConversionError::EvaluationFailed(status)),
            },
        };

        inner.heap.with(value, |c| {
            let found = match c {
                Closure::Prim(p) => match T::from_prim(p) {
                    Some(v) => return Ok(v),
                    None => p.kind().name(),
                },
                other => other.describe(),
            };
            Err(ConversionError::TypeMismatch {
                expected: T::KIND.name(),
                found,
            })
        })
    }

    /// Box a string
    pub fn mk_string(&self, value: &str) -> BoxedValue {
        self.live()
            .heap
            .alloc(Closure::Prim(Prim::String(Arc::from(value))))
    }

    pub fn get_string(&self, obj: BoxedValue) -> String {
        self.get(obj)
    }
}

macro_rules! named_pairs {
    ($($mk:ident / $get:ident : $ty:ty),* $(,)?) => {
        impl Rts {
            $(
                pub fn $mk(&self, value: $ty) -> BoxedValue {
                    self.mk(value)
                }

                pub fn $get(&self, obj: BoxedValue) -> $ty {
                    self.get(obj)
                }
            )*
        }
    };
}

named_pairs! {
    mk_char / get_char: char,
    mk_int / get_int: isize,
    mk_int8 / get_int8: i8,
    mk_int16 / get_int16: i16,
    mk_int32 / get_int32: i32,
    mk_int64 / get_int64: i64,
    mk_word / get_word: usize,
    mk_word8 / get_word8: u8,
    mk_word16 / get_word16: u16,
    mk_word32 / get_word32: u32,
    mk_word64 / get_word64: u64,
    mk_float / get_float: f32,
    mk_double / get_double: f64,
    mk_bool / get_bool: bool,
    mk_addr / get_addr: *mut c_void,
    mk_stable_ptr / get_stable_ptr: StablePtr,
}
