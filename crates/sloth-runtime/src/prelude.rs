//! Base library loaded into every program image

use crate::exception::{EvalResult, Exception};
use crate::heap::BoxedValue;
use crate::image::{Definition, ProgramImage};
use crate::machine::Machine;
use std::io::Write;

/// Constructor tag of `()`
pub(crate) const UNIT_TAG: u32 = 0;
/// Constructor tag of the empty list
pub(crate) const NIL_TAG: u32 = 0;
/// Constructor tag of a list cell `x : xs`
pub(crate) const CONS_TAG: u32 = 1;

fn int_binop(
    m: &mut Machine,
    args: &[BoxedValue],
    op: impl FnOnce(isize, isize) -> EvalResult<isize>,
) -> EvalResult<BoxedValue> {
    let a: isize = m.get(args[0])?;
    let b: isize = m.get(args[1])?;
    Ok(m.mk(op(a, b)?))
}

fn int_cmp(
    m: &mut Machine,
    args: &[BoxedValue],
    op: impl FnOnce(isize, isize) -> bool,
) -> EvalResult<BoxedValue> {
    let a: isize = m.get(args[0])?;
    let b: isize = m.get(args[1])?;
    Ok(m.mk(op(a, b)))
}

fn double_binop(
    m: &mut Machine,
    args: &[BoxedValue],
    op: impl FnOnce(f64, f64) -> f64,
) -> EvalResult<BoxedValue> {
    let a: f64 = m.get(args[0])?;
    let b: f64 = m.get(args[1])?;
    Ok(m.mk(op(a, b)))
}

fn nonzero(divisor: isize) -> EvalResult<isize> {
    if divisor == 0 {
        Err(Exception::DivideByZero.into())
    } else {
        Ok(divisor)
    }
}

pub(crate) fn definitions() -> Vec<Definition> {
    ProgramImage::builder("base")
        // Int
        .function("plusInt", 2, |m, a| int_binop(m, a, |x, y| Ok(x.wrapping_add(y))))
        .function("minusInt", 2, |m, a| int_binop(m, a, |x, y| Ok(x.wrapping_sub(y))))
        .function("timesInt", 2, |m, a| int_binop(m, a, |x, y| Ok(x.wrapping_mul(y))))
        .function("quotInt", 2, |m, a| {
            int_binop(m, a, |x, y| Ok(x.wrapping_div(nonzero(y)?)))
        })
        .function("remInt", 2, |m, a| {
            int_binop(m, a, |x, y| Ok(x.wrapping_rem(nonzero(y)?)))
        })
        .function("negateInt", 1, |m, a| {
            let x: isize = m.get(a[0])?;
            Ok(m.mk(x.wrapping_neg()))
        })
        .function("eqInt", 2, |m, a| int_cmp(m, a, |x, y| x == y))
        .function("ltInt", 2, |m, a| int_cmp(m, a, |x, y| x < y))
        .function("leInt", 2, |m, a| int_cmp(m, a, |x, y| x <= y))
        .function("showInt", 1, |m, a| {
            let x: isize = m.get(a[0])?;
            Ok(m.mk(x.to_string()))
        })
        // Double
        .function("plusDouble", 2, |m, a| double_binop(m, a, |x, y| x + y))
        .function("minusDouble", 2, |m, a| double_binop(m, a, |x, y| x - y))
        .function("timesDouble", 2, |m, a| double_binop(m, a, |x, y| x * y))
        .function("divideDouble", 2, |m, a| double_binop(m, a, |x, y| x / y))
        .function("intToDouble", 1, |m, a| {
            let x: isize = m.get(a[0])?;
            Ok(m.mk(x as f64))
        })
        // Control
        .function("ifThenElse", 3, |m, a| {
            let cond: bool = m.get(a[0])?;
            Ok(if cond { a[1] } else { a[2] })
        })
        .function("not", 1, |m, a| {
            let b: bool = m.get(a[0])?;
            Ok(m.mk(!b))
        })
        .function("seq", 2, |m, a| {
            m.whnf(a[0])?;
            Ok(a[1])
        })
        .function("id", 1, |_, a| Ok(a[0]))
        .function("const", 2, |_, a| Ok(a[0]))
        .function("compose", 3, |m, a| {
            let inner = m.apply(a[1], a[2]);
            Ok(m.apply(a[0], inner))
        })
        .function("error", 1, |m, a| {
            let msg: String = m.get(a[0])?;
            m.throw(msg)
        })
        .caf("undefined", |m| m.throw("Prelude.undefined"))
        // Strings and lists
        .function("appendString", 2, |m, a| {
            let mut s: String = m.get(a[0])?;
            let t: String = m.get(a[1])?;
            s.push_str(&t);
            Ok(m.mk(s))
        })
        .caf("nil", |m| Ok(m.con(NIL_TAG, &[])))
        .function("cons", 2, |m, a| Ok(m.con(CONS_TAG, &[a[0], a[1]])))
        .function("length", 1, |m, a| {
            let n = m.list_items(a[0])?.len();
            Ok(m.mk(n as isize))
        })
        // IO
        .function("returnIO", 1, |m, a| Ok(m.io_return(a[0])))
        .function("bindIO", 2, |m, a| Ok(m.io_bind(a[0], a[1])))
        .function("thenIO", 2, |m, a| Ok(m.io_then(a[0], a[1])))
        .function("throwIO", 1, |m, a| {
            Ok(m.io_effect("throwIO", &[a[0]], |m, a| {
                let msg: String = m.get(a[0])?;
                m.throw(msg)
            }))
        })
        .function("catchIO", 2, |m, a| Ok(m.io_catch(a[0], a[1])))
        .function("forkIO", 1, |m, a| Ok(m.io_fork(a[0])))
        .caf("newEmptyMVar", |m| Ok(m.io_new_mvar(None)))
        .function("newMVar", 1, |m, a| Ok(m.io_new_mvar(Some(a[0]))))
        .function("takeMVar", 1, |m, a| Ok(m.io_take_mvar(a[0])))
        .function("putMVar", 2, |m, a| Ok(m.io_put_mvar(a[0], a[1])))
        .function("readMVar", 1, |m, a| Ok(m.io_read_mvar(a[0])))
        .function("putStrLn", 1, |m, a| {
            Ok(m.io_effect("putStrLn", &[a[0]], |m, a| {
                let line: String = m.get(a[0])?;
                let mut out = std::io::stdout().lock();
                writeln!(out, "{line}")
                    .and_then(|()| out.flush())
                    .or_else(|e| m.throw(format!("putStrLn: {e}")))?;
                Ok(m.unit())
            }))
        })
        .action("getArgs", |m| {
            let args: Vec<BoxedValue> = m
                .prog_argv()
                .into_iter()
                .skip(1)
                .map(|arg| m.mk(arg))
                .collect();
            Ok(m.list(&args))
        })
        .action("getProgName", |m| {
            let name = m.prog_argv().into_iter().next().unwrap_or_default();
            Ok(m.mk(name))
        })
        .into_definitions()
}
