//! Process entry point (spec §6.2 `thread_main`) and `Context`
//! construction from process arguments (spec §6.3, §9.5).
//!
//! The single-mutator-per-context rule (spec §9 "Thread-local context") is
//! honored by building `Context` on the stack here and threading
//! `&mut Context` through every call explicitly, rather than stashing a
//! raw pointer to it behind a `thread_local!` the way the original's
//! `__thread OME_Context *OME_context` does.

use crate::alloc::{allocate_array, allocate_string};
use crate::config::Config;
use crate::context::Context;
use crate::contract::{traceback_entry, MainFn, ToplevelFn};
use crate::error::{print_traceback, HeapInitError};
use crate::heap::Heap;
use crate::value::{Tag, Value};
use std::mem::size_of;

impl Context {
    /// Build a fresh context sized per `config`, with `argv` populated as
    /// an ordinary heap `Array` of `String`s (spec §6.3, the original's
    /// `OME_initialize`/`OME_argv`). `argv` is reachable as a root from
    /// here on, not a process-wide global.
    pub fn new_with_args(config: &Config, args: &[String]) -> Result<Context, HeapInitError> {
        let heap = Heap::new(
            config.reserved_size,
            config.initial_committed_size,
            config.max_heap_size,
            config.latency_ms,
        )?;
        let mut ctx = Context::new(config.stack_size, heap);

        // The array must be rooted before filling it in: allocating each
        // element string can itself trigger a collection that moves the
        // array, so its address is re-derived from the root after every
        // allocation rather than cached across the loop.
        let frame = ctx
            .enter(1)
            .unwrap_or_else(|_| panic!("stack too small to hold argv root"));
        let array = allocate_array(&mut ctx, args.len() as u32)
            .expect("allocating argv failed on a freshly initialized heap");
        frame.save(&mut ctx, 0, Value::tag_pointer(Tag::ARRAY, array));
        for (i, arg) in args.iter().enumerate() {
            let s = allocate_string(&mut ctx, arg.as_bytes())
                .expect("allocating an argv string failed on a freshly initialized heap");
            let array = frame.load(&ctx, 0).untag_pointer();
            let elems = unsafe { array.add(size_of::<u64>()) as *mut Value };
            unsafe { elems.add(i).write(s) };
        }
        ctx.argv = frame.load(&ctx, 0);
        frame.leave(&mut ctx, Value::boolean(true));
        Ok(ctx)
    }
}

/// Run the toplevel program to completion (spec §6.2, the original's
/// `OME_thread_main`): build a `Context` from `args`, build the toplevel
/// receiver, send it `main`, and print a traceback to stderr on an
/// uncaught error. Returns the process exit code.
pub fn thread_main(config: &Config, args: &[String], toplevel: ToplevelFn, main: MainFn) -> i32 {
    let mut ctx = match Context::new_with_args(config, args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("failed to initialize heap: {e}");
            return 1;
        }
    };

    let receiver = unsafe { toplevel(Value::FALSE) };
    let result = unsafe { main(receiver) };

    if result.is_error() {
        let entries: Vec<_> = ctx
            .traceback_entries()
            .filter_map(traceback_entry)
            .copied()
            .collect();
        let mut out = String::new();
        let _ = print_traceback(&mut out, &entries, None, result);
        eprint!("{out}");
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_with_args_builds_argv_array() {
        let config = Config {
            initial_committed_size: 1 << 16,
            ..Config::default()
        };
        let args = vec!["a".to_string(), "bb".to_string()];
        let ctx = Context::new_with_args(&config, &args).unwrap();
        assert_eq!(ctx.argv.get_tag(), Tag::ARRAY);
        let body = ctx.argv.untag_pointer();
        let len = unsafe { *(body as *const u32) };
        assert_eq!(len, 2);
    }

    unsafe extern "C" fn identity_toplevel(v: Value) -> Value {
        v
    }

    unsafe extern "C" fn ok_main(_receiver: Value) -> Value {
        Value::boolean(true)
    }

    #[test]
    fn thread_main_returns_zero_on_success() {
        let config = Config {
            initial_committed_size: 1 << 16,
            ..Config::default()
        };
        let code = thread_main(&config, &[], identity_toplevel, ok_main);
        assert_eq!(code, 0);
    }
}
