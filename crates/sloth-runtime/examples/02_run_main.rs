//! A complete sloth program
//!
//! Forks a worker that sums its arguments and hands the total back through
//! an MVar. Try `cargo run --example 02_run_main -- 1 2 3 +RTS -k1k -RTS`.

use sloth_runtime::{run_main, ProgramImage};

fn main() {
    let image = ProgramImage::builder("run-main")
        .action("sumArgs", |m| {
            let mut total = 0i64;
            for arg in m.prog_argv().iter().skip(1) {
                match arg.parse::<i64>() {
                    Ok(n) => total += n,
                    Err(_) => return m.throw(format!("not a number: {arg}")),
                }
            }
            Ok(m.mk(total))
        })
        .function("report", 1, |m, args| {
            let total: i64 = m.get(args[0])?;
            let line = m.mk(format!("total: {total}"));
            m.call("putStrLn", &[line])
        })
        .function("worker", 1, |m, args| {
            let sum = m.lookup("sumArgs")?;
            let put = m.lookup("putMVar")?;
            let put = m.apply(put, args[0]);
            Ok(m.io_bind(sum, put))
        })
        .function("withBox", 1, |m, args| {
            let worker = m.call("worker", &[args[0]])?;
            let fork = m.io_fork(worker);
            let take = m.io_take_mvar(args[0]);
            let report = m.lookup("report")?;
            let wait = m.io_bind(take, report);
            Ok(m.io_then(fork, wait))
        })
        .caf("main", |m| {
            let new = m.lookup("newEmptyMVar")?;
            let rest = m.lookup("withBox")?;
            Ok(m.io_bind(new, rest))
        })
        .build();

    run_main(&image)
}
