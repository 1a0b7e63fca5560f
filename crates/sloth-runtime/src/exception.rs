//! Managed exceptions and evaluation unwinding
//!
//! An [`Exception`] is raised by managed code and may be caught by `catchIO`.
//! [`Unwind`] is everything that can abort an evaluation: a raised exception,
//! an interrupt, or the scheduler detecting that every thread is blocked.
//! Only the `Raise` case is catchable.

use thiserror::Error;

/// Exception raised inside managed code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Exception {
    /// Raised by `error`, `throwIO` or native code
    #[error("{0}")]
    ErrorCall(String),

    /// Evaluation nested deeper than its budget allows
    #[error("stack overflow")]
    StackOverflow,

    /// A thunk demanded its own value
    #[error("<<loop>>")]
    NonTermination,

    #[error("divide by zero")]
    DivideByZero,

    /// A closure had the wrong shape for the operation forcing it
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Something other than a function was applied
    #[error("cannot apply {0} to an argument")]
    NotAFunction(&'static str),

    /// Something other than an IO action was run
    #[error("cannot run {0} as an IO action")]
    NotAnAction(&'static str),

    /// `call` named a closure the program image does not define
    #[error("unknown closure '{0}'")]
    UnknownClosure(String),

    /// Native code panicked on a managed thread
    #[error("native code panicked")]
    Panicked,
}

impl Exception {
    /// Shorthand for a user error
    pub fn error(msg: impl Into<String>) -> Self {
        Exception::ErrorCall(msg.into())
    }
}

/// Reason an evaluation stopped before producing a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unwind {
    #[error("uncaught exception: {0}")]
    Raise(#[from] Exception),

    #[error("interrupted")]
    Interrupted,

    #[error("deadlocked")]
    Deadlock,
}

/// Result of managed evaluation
pub type EvalResult<T> = Result<T, Unwind>;
