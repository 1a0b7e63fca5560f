//! Embed the runtime in a host program
//!
//! Builds a small program image, starts the runtime, evaluates a few
//! expressions and keeps one result alive across a collection with a
//! stable pointer.
//!
//! Run with `SLOTH_LOG=debug` to see dispatch logging.

use sloth_runtime::rts_main::init_logging;
use sloth_runtime::{ProgramImage, Rts, SchedulerStatus};

fn main() {
    init_logging();

    let image = ProgramImage::builder("embed")
        .function("fib", 1, |m, args| {
            let n: i64 = m.get(args[0])?;
            if n < 2 {
                return Ok(m.mk(n));
            }
            let (a, b) = (m.mk(n - 1), m.mk(n - 2));
            let (a, b) = (m.call("fib", &[a])?, m.call("fib", &[b])?);
            let (a, b): (i64, i64) = (m.get(a)?, m.get(b)?);
            Ok(m.mk(a + b))
        })
        .function("greet", 1, |m, args| {
            let hello = m.mk("hello, ".to_string());
            m.call("appendString", &[hello, args[0]])
        })
        .build();

    let args: Vec<String> = std::env::args().collect();
    let rts = Rts::startup(args, &image);

    let fib = rts.lookup("fib").expect("image defines fib");
    let (status, result) = rts.eval(rts.apply(fib, rts.mk_int64(20)));
    sloth_runtime::check_sched_status("fib", status);
    let value = result.map(|v| rts.get_int64(v)).unwrap_or_default();
    println!("fib 20 = {value}");

    let greet = rts.lookup("greet").expect("image defines greet");
    let greeting = rts.apply(greet, rts.mk_string("embedder"));
    let (status, greeting) = rts.eval(greeting);
    if status == SchedulerStatus::Success {
        if let Some(greeting) = greeting {
            let keep = rts.new_stable_ptr(greeting);
            if let Some(stats) = rts.perform_gc() {
                println!("collected {} objects, {} live", stats.freed, stats.live);
            }
            println!("{}", rts.get_string(rts.deref_stable_ptr(keep)));
            rts.free_stable_ptr(keep);
        }
    }

    rts.shutdown();
}
