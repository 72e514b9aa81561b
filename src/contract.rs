//! External symbol contracts (spec §6.1): the ABI shapes generated code
//! (the compiler's output, out of scope for this crate) is expected to
//! provide or consume. Nothing here has a body of its own except
//! [`sort_values`], which demonstrates the callback-anchor mechanism
//! end-to-end the way the original's `Array sorted` does (spec §9.5).

use crate::context::Context;
use crate::error::{ErrorKind, TracebackEntry};
use crate::value::{Tag, Value};
use std::sync::OnceLock;

/// `OME_message_<selector>__0`: a unary message send with no arguments
/// beyond the receiver.
pub type MessageFn0 = unsafe extern "C" fn(Value) -> Value;
/// `OME_message_<selector>__1`.
pub type MessageFn1 = unsafe extern "C" fn(Value, Value) -> Value;
/// `OME_message_<selector>__2`.
pub type MessageFn2 = unsafe extern "C" fn(Value, Value, Value) -> Value;

/// `OME_lookup_<selector>__<arity>`: resolves a receiver's class to the
/// concrete method body generated code should call for that selector, the
/// dynamic-dispatch half of an inline cache miss.
pub type LookupFn0 = unsafe extern "C" fn(Value) -> MessageFn0;
pub type LookupFn1 = unsafe extern "C" fn(Value) -> MessageFn1;
pub type LookupFn2 = unsafe extern "C" fn(Value) -> MessageFn2;

/// `OME_toplevel`: builds the toplevel receiver object generated code
/// sends `main` to.
pub type ToplevelFn = unsafe extern "C" fn(Value) -> Value;

/// `OME_message_main__0`, the program's entry-point message send.
pub type MainFn = MessageFn0;

static TRACEBACK_TABLE: OnceLock<&'static [TracebackEntry]> = OnceLock::new();

/// Register the flat, generated-code-owned table `append_traceback`'s
/// entry indices are resolved against (`OME_traceback_table`). Called
/// once at process startup; a second call is a no-op, matching the
/// original's single process-wide static table.
pub fn register_traceback_table(table: &'static [TracebackEntry]) {
    let _ = TRACEBACK_TABLE.set(table);
}

/// Look up one traceback entry by the index [`Context::append_traceback`]
/// recorded. `None` if no table has been registered, or the index is out
/// of range.
pub fn traceback_entry(index: u32) -> Option<&'static TracebackEntry> {
    TRACEBACK_TABLE.get()?.get(index as usize)
}

unsafe fn compare_small_integers(ctx: *mut Context, a: Value, b: Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if a.get_tag() != Tag::SMALL_INTEGER || b.get_tag() != Tag::SMALL_INTEGER {
        (*ctx).set_callback_local(0, ErrorKind::TypeError.value());
        return Ordering::Equal;
    }
    a.untag_signed().cmp(&b.untag_signed())
}

#[cfg(all(unix, target_os = "linux"))]
mod qsort_r_backend {
    use super::*;
    use libc::{c_int, c_void, size_t};

    unsafe extern "C" fn trampoline(a: *const c_void, b: *const c_void, userdata: *mut c_void) -> c_int {
        let ctx = userdata as *mut Context;
        let va = *(a as *const Value);
        let vb = *(b as *const Value);
        match compare_small_integers(ctx, va, vb) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }
    }

    /// Sort `scratch` in place via `libc::qsort_r`, whose comparator
    /// trampoline carries no closure environment of its own — exactly the
    /// case `Context::with_callback_anchor` exists for (spec §4.6, §9.5).
    pub fn sort_in_place(ctx: &mut Context, scratch: &mut [Value]) {
        unsafe {
            libc::qsort_r(
                scratch.as_mut_ptr() as *mut c_void,
                scratch.len() as size_t,
                std::mem::size_of::<Value>(),
                trampoline,
                ctx as *mut Context as *mut c_void,
            );
        }
    }
}

#[cfg(not(all(unix, target_os = "linux")))]
mod qsort_r_backend {
    use super::*;

    /// `qsort_r` is a glibc extension; other targets get an equivalent
    /// insertion sort that still routes every comparison through the
    /// anchored callback frame rather than a captured Rust closure, so the
    /// anchor mechanism itself is still exercised identically.
    pub fn sort_in_place(ctx: &mut Context, scratch: &mut [Value]) {
        for i in 1..scratch.len() {
            let mut j = i;
            while j > 0 {
                let ctx_ptr = ctx as *mut Context;
                let ord = unsafe { compare_small_integers(ctx_ptr, scratch[j - 1], scratch[j]) };
                if ord == std::cmp::Ordering::Greater {
                    scratch.swap(j - 1, j);
                    j -= 1;
                } else {
                    break;
                }
            }
        }
    }
}

/// Sort a slice of `Small-Integer` values, demonstrating the
/// callback-anchor mechanism end-to-end (spec §4.6, §9.5, §8 scenario 7).
/// On success, returns the sorted copy. If any comparison sees a
/// non-`Small-Integer`, the comparator writes `Type-Error` through the
/// anchored frame; this function notices that afterward and returns the
/// error with `values` left untouched.
pub fn sort_values(ctx: &mut Context, values: &[Value]) -> Result<Vec<Value>, Value> {
    let frame = ctx.enter(1)?;
    frame.save(ctx, 0, Value::boolean(false));

    let mut scratch = values.to_vec();
    ctx.with_callback_anchor(&frame, |ctx| {
        qsort_r_backend::sort_in_place(ctx, &mut scratch);
    });

    let outcome = frame.load(ctx, 0);
    frame.leave(ctx, Value::boolean(false));
    if outcome.is_error() {
        Err(outcome)
    } else {
        Ok(scratch)
    }
}
