//! String concatenation & printing (spec §4.7), grounded on `runtime.c`'s
//! `OME_concat`/`OME_print_value`.
//!
//! Coercing a non-`String` argument via a `string` message send is a
//! builtin method body and out of this crate's scope (spec.md
//! Non-goals); callers that want that coercion perform it themselves
//! before calling [`concat`]. What this crate does own is the part the
//! original's own `// TODO check overflow` comment flags as missing: the
//! summed byte length is checked for overflow before allocating, raising
//! `Size-Error` instead of silently wrapping (spec §4.7, §9.5).

use crate::alloc::allocate_string;
use crate::context::Context;
use crate::error::{print_value, ErrorKind};
use crate::value::{Tag, Value};
use std::fmt;

/// Read a `String` object's bytes back out as a `&[u8]`, borrowed from
/// `ctx` so the slice can't outlive a collection that might move it.
/// Caller must hold a value with tag [`Tag::STRING`]; panics otherwise,
/// since every caller in this crate already checked the tag first.
pub fn string_bytes(ctx: &Context, v: Value) -> &[u8] {
    debug_assert_eq!(v.get_tag(), Tag::STRING);
    let _ = ctx;
    let body = v.untag_pointer();
    unsafe {
        let len = *(body as *const u32) as usize;
        std::slice::from_raw_parts(body.add(std::mem::size_of::<u32>()), len)
    }
}

/// Concatenate `parts` (each already `String`-tagged) into one freshly
/// allocated `String` (`OME_concat`). Returns `Type-Error` if any part
/// isn't a string, `Size-Error` if the combined length would overflow.
pub fn concat(ctx: &mut Context, parts: &[Value]) -> Value {
    let mut total: usize = 0;
    for &part in parts {
        if part.get_tag() != Tag::STRING {
            return ErrorKind::TypeError.value();
        }
        let len = string_bytes(ctx, part).len();
        total = match total.checked_add(len) {
            Some(t) => t,
            None => return ErrorKind::SizeError.value(),
        };
    }

    let mut buf = Vec::with_capacity(total);
    for &part in parts {
        buf.extend_from_slice(string_bytes(ctx, part));
    }

    match allocate_string(ctx, &buf) {
        Ok(v) => v,
        Err(_) => ErrorKind::SizeError.value(),
    }
}

/// Render `value` for display the way `OME_print_value` does: a `String`
/// prints its raw bytes, anything else prints as `#<tag:data>`. Coercing a
/// non-`String` value via a `string` send is, again, out of scope here —
/// callers that want that coercion do it first and pass the result.
pub fn print(out: &mut dyn fmt::Write, ctx: &Context, value: Value) -> fmt::Result {
    if value.get_tag() == Tag::STRING {
        let bytes = string_bytes(ctx, value);
        let text = std::str::from_utf8(bytes).unwrap_or("<invalid utf-8>");
        print_value(out, Some(text), value)
    } else {
        print_value(out, None, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn test_context() -> Context {
        let heap = Heap::new(1 << 20, 1 << 16, 1 << 20, 50).unwrap();
        Context::new(32, heap)
    }

    #[test]
    fn concat_joins_strings_in_order() {
        let mut ctx = test_context();
        let a = allocate_string(&mut ctx, b"foo").unwrap();
        let b = allocate_string(&mut ctx, b"bar").unwrap();
        let result = concat(&mut ctx, &[a, b]);
        assert_eq!(string_bytes(&ctx, result), b"foobar");
    }

    #[test]
    fn concat_of_empty_slice_is_empty_string() {
        let mut ctx = test_context();
        let result = concat(&mut ctx, &[]);
        assert_eq!(result.get_tag(), Tag::STRING);
        assert_eq!(string_bytes(&ctx, result), b"");
    }

    #[test]
    fn concat_rejects_non_string_part() {
        let mut ctx = test_context();
        let a = allocate_string(&mut ctx, b"foo").unwrap();
        let n = Value::small_integer(5);
        let result = concat(&mut ctx, &[a, n]);
        assert!(result.is_error());
    }

    #[test]
    fn print_writes_raw_bytes_for_strings() {
        let mut ctx = test_context();
        let s = allocate_string(&mut ctx, b"hi").unwrap();
        let mut out = String::new();
        print(&mut out, &ctx, s).unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn print_formats_non_string_as_tag_data() {
        let ctx = test_context();
        let mut out = String::new();
        print(&mut out, &ctx, Value::small_integer(3)).unwrap();
        assert_eq!(out, format!("#<{}:3>", Tag::SMALL_INTEGER.0));
    }
}
