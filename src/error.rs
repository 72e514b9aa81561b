//! Value-level error kinds, traceback entries, and host-level error types
//! (spec §4.8, §7, §9.5).
//!
//! Two separate error universes live here, matching how the retrieved
//! corpus's own VM runtimes split them (e.g. `maemre-neptune::gc::GcInitError`
//! vs. a GC's own internal abort-on-OOM policy):
//!
//! - mutator/value errors: an [`OME_Value`](crate::value::Value) with its
//!   error bit set, tagged `Constant` with one of [`ErrorKind`]'s ordinals.
//!   These never become a Rust `Result` — they propagate through ordinary
//!   return values, exactly as the language's `catch`/`try` expects.
//! - host errors: [`HeapInitError`]/[`GrowError`], hand-rolled
//!   `std::error::Error` impls for failures that have no `OME_Value`
//!   representation at all (address space exhaustion, OOM after a full
//!   collection at the heap ceiling).

use crate::value::{Constant, Value};
use std::fmt;
use std::io;

/// The enumerated value-level error kinds (spec §7). Each corresponds to
/// one of the `Constant` ordinals reserved in [`crate::value::Constant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StackOverflow,
    NotUnderstood,
    TypeError,
    IndexError,
    SizeError,
    Overflow,
    DivideByZero,
}

impl ErrorKind {
    #[inline]
    pub fn constant(self) -> Constant {
        match self {
            ErrorKind::StackOverflow => Constant::StackOverflow,
            ErrorKind::NotUnderstood => Constant::NotUnderstood,
            ErrorKind::TypeError => Constant::TypeError,
            ErrorKind::IndexError => Constant::IndexError,
            ErrorKind::SizeError => Constant::SizeError,
            ErrorKind::Overflow => Constant::Overflow,
            ErrorKind::DivideByZero => Constant::DivideByZero,
        }
    }

    /// Build the `OME_Value` this error kind denotes, with the error bit
    /// set (spec §4.8's `OME_ERROR` macro).
    #[inline]
    pub fn value(self) -> Value {
        Value::tag_unsigned(crate::value::Tag::CONSTANT, self.constant() as usize).error()
    }
}

/// One frame of a traceback, mirroring `OME_Traceback_Entry`. Generated
/// code provides a static table of these; the crate only ever indexes
/// into it (spec §6.1 `OME_traceback_table`).
#[derive(Debug, Clone, Copy)]
pub struct TracebackEntry {
    pub method_name: &'static str,
    pub stream_name: &'static str,
    pub source_line: &'static str,
    pub line_number: u32,
    pub column: u32,
    pub underline: u32,
}

/// Render a value for display: strings print their bytes, anything else
/// prints as `#<tag:data>` (spec §4.7, the original's `OME_print_value`).
/// Non-string values are not coerced via a `string` message send here —
/// that coercion is a builtin method body and out of this crate's scope;
/// callers that want coercion perform it before calling this.
pub fn print_value(out: &mut dyn fmt::Write, text: Option<&str>, raw: Value) -> fmt::Result {
    match text {
        Some(s) => out.write_str(s),
        None => write!(out, "#<{}:{}>", raw.get_tag().0, raw.untag_unsigned()),
    }
}

/// Reproduce the original runtime's full traceback format: a header line,
/// one block per entry with its source excerpt and caret underline, then
/// the final `Error: ` line (spec §9.5; spec.md §7 only specifies the
/// final line's content, this is the full original format).
pub fn print_traceback(
    out: &mut dyn fmt::Write,
    entries: &[TracebackEntry],
    error_text: Option<&str>,
    error_value: Value,
) -> fmt::Result {
    if !entries.is_empty() {
        out.write_str("Traceback (most recent call last):\n")?;
    }
    for tb in entries {
        writeln!(
            out,
            "  File \"{}\", line {}, in |{}|",
            tb.stream_name, tb.line_number, tb.method_name
        )?;
        writeln!(out, "    {}", tb.source_line)?;
        out.write_str("    ")?;
        for _ in 0..tb.column {
            out.write_char(' ')?;
        }
        for _ in 0..tb.underline {
            out.write_char('^')?;
        }
        out.write_char('\n')?;
    }
    out.write_str("Error: ")?;
    print_value(out, error_text, error_value.strip_error())?;
    out.write_char('\n')
}

/// A host-level failure reserving or initializing the heap arena (spec
/// §7, §9.2). Has no `OME_Value` representation — the mutator never sees
/// this, it aborts process startup.
#[derive(Debug)]
pub enum HeapInitError {
    Reserve(io::Error),
    ReservationTooSmall { requested: usize, min: usize },
}

impl fmt::Display for HeapInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapInitError::Reserve(e) => write!(f, "failed to reserve heap address space: {e}"),
            HeapInitError::ReservationTooSmall { requested, min } => write!(
                f,
                "heap reservation of {requested} bytes is below the minimum of {min} bytes"
            ),
        }
    }
}

impl std::error::Error for HeapInitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeapInitError::Reserve(e) => Some(e),
            HeapInitError::ReservationTooSmall { .. } => None,
        }
    }
}

/// A host-level failure growing the heap arena (spec §7's "process-fatal"
/// out-of-memory path: a full collection followed by a failed grow at
/// `max_heap_size`).
#[derive(Debug)]
pub enum GrowError {
    Os(io::Error),
    AtCeiling { max_heap_size: usize },
}

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowError::Os(e) => write!(f, "failed to grow heap: {e}"),
            GrowError::AtCeiling { max_heap_size } => write!(
                f,
                "heap exhausted after full collection at its {max_heap_size}-byte ceiling"
            ),
        }
    }
}

impl std::error::Error for GrowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GrowError::Os(e) => Some(e),
            GrowError::AtCeiling { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_values_carry_error_bit() {
        for kind in [
            ErrorKind::StackOverflow,
            ErrorKind::NotUnderstood,
            ErrorKind::TypeError,
            ErrorKind::IndexError,
            ErrorKind::SizeError,
            ErrorKind::Overflow,
            ErrorKind::DivideByZero,
        ] {
            let v = kind.value();
            assert!(v.is_error());
            assert!(!v.strip_error().is_error());
        }
    }

    #[test]
    fn traceback_format_matches_original_shape() {
        let entries = [TracebackEntry {
            method_name: "foo",
            stream_name: "test.ome",
            source_line: "1 + bar",
            line_number: 3,
            column: 4,
            underline: 3,
        }];
        let mut s = String::new();
        print_traceback(&mut s, &entries, Some("boom"), ErrorKind::TypeError.value()).unwrap();
        assert!(s.starts_with("Traceback (most recent call last):\n"));
        assert!(s.contains("File \"test.ome\", line 3, in |foo|\n"));
        assert!(s.contains("    1 + bar\n"));
        assert!(s.ends_with("Error: boom\n"));
    }

    #[test]
    fn no_entries_skips_header() {
        let mut s = String::new();
        print_traceback(&mut s, &[], Some("oops"), ErrorKind::DivideByZero.value()).unwrap();
        assert_eq!(s, "Error: oops\n");
    }
}
