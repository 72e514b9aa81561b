//! Per-thread execution context: value stack, traceback strip, and
//! callback anchor (spec §3.5, §4.6).
//!
//! The value stack is the collector's sole precise root set — every
//! `Value` between `stack[0]` and the current stack pointer is scanned on
//! every collection (spec §4.5 `mark`, seeded from `[stack_base,
//! stack_pointer)`). The traceback strip shares the same backing array,
//! growing down from the top exactly as the value stack grows up from
//! the bottom, so a deep traceback and a deep value stack compete for the
//! same finite capacity (spec §4.6, §8 scenario 8). One traceback entry
//! occupies exactly one stack slot here — the original C runtime packs
//! two `uint32_t` indices per `OME_Value`-sized slot by reinterpreting
//! the region; this crate keeps the region uniformly typed as `Value`
//! instead (see DESIGN.md), which halves traceback capacity per byte but
//! preserves the coupling invariant spec §8 scenario 8 actually tests.

use crate::error::ErrorKind;
use crate::heap::Heap;
use crate::value::Value;

/// A reserved window of the value stack for one call's locals, returned
/// by [`Context::enter`]. Mirrors the original's `OME_LOCALS`/
/// `OME_SAVE_LOCAL`/`OME_LOAD_LOCAL`/`OME_RETURN` macro protocol.
pub struct StackFrame {
    base: usize,
}

impl StackFrame {
    #[inline]
    pub fn save(&self, ctx: &mut Context, slot: usize, value: Value) {
        ctx.stack[self.base + slot] = value;
    }

    #[inline]
    pub fn load(&self, ctx: &Context, slot: usize) -> Value {
        ctx.stack[self.base + slot]
    }

    #[inline]
    pub fn forget(&self, ctx: &mut Context, slot: usize) {
        ctx.stack[self.base + slot] = Value::boolean(false);
    }

    /// Equivalent to `OME_RETURN`: pop this frame and hand back `value`.
    #[inline]
    pub fn leave(&self, ctx: &mut Context, value: Value) -> Value {
        ctx.stack_pointer = self.base;
        value
    }
}

pub struct Context {
    stack: Vec<Value>,
    /// Next free value-stack slot; everything below is a live root.
    stack_pointer: usize,
    /// Index of the oldest traceback entry still present; the strip
    /// occupies `[traceback_pointer, stack.len())`.
    traceback_pointer: usize,
    /// Saved value-stack base for an in-flight foreign callback (spec
    /// §4.6 "Callback anchor"); `None` when no callback is active.
    callback_stack: Option<usize>,
    pub heap: Heap,
    /// `Array` of `String`s built from the process's `argv` (spec §6.3,
    /// §9.5), constructed once by `runtime::Context::new_with_args` and
    /// reachable here as an ordinary root, not a process-wide global.
    pub argv: Value,
}

impl Context {
    pub fn new(stack_size: usize, heap: Heap) -> Context {
        Context {
            stack: vec![Value::boolean(false); stack_size],
            stack_pointer: 0,
            traceback_pointer: stack_size,
            callback_stack: None,
            heap,
            argv: Value::EMPTY,
        }
    }

    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// The live root set: every slot from the base up to the current
    /// stack pointer (spec §4.5 mark seed).
    #[inline]
    pub fn roots(&self) -> &[Value] {
        &self.stack[..self.stack_pointer]
    }

    #[inline]
    pub fn roots_mut(&mut self) -> &mut [Value] {
        &mut self.stack[..self.stack_pointer]
    }

    /// Reserve `stack_size + 1` slots for a call's locals (spec §4.6
    /// `OME_LOCALS`/`OME_ENTER_OR_RETURN`). The `+1` guarantees a callee
    /// always has at least one slot of headroom to detect overflow
    /// itself before touching memory. Fails with `Stack-Overflow` if the
    /// reservation would reach into the traceback strip.
    pub fn enter(&mut self, stack_size: usize) -> Result<StackFrame, Value> {
        let base = self.stack_pointer;
        let next = base + stack_size + 1;
        if next >= self.traceback_pointer {
            return Err(ErrorKind::StackOverflow.value());
        }
        self.stack_pointer = next;
        Ok(StackFrame { base })
    }

    /// Append one traceback entry (spec §4.8, the original's
    /// `OME_append_traceback`). Silently dropped if the strip has already
    /// been squeezed down to the current stack pointer — a full
    /// traceback strip is not itself an error, it just stops recording
    /// older frames.
    pub fn append_traceback(&mut self, entry_index: u32) {
        if self.traceback_pointer > self.stack_pointer {
            self.traceback_pointer -= 1;
            self.stack[self.traceback_pointer] = Value::small_integer(entry_index as isize);
        }
    }

    /// Clear every recorded traceback entry (the original's
    /// `OME_reset_traceback`), used by `catch`/`try` recovery.
    pub fn reset_traceback(&mut self) {
        for slot in &mut self.stack[self.traceback_pointer..] {
            *slot = Value::boolean(false);
        }
        self.traceback_pointer = self.stack.len();
    }

    /// Current traceback entries, oldest call first (index order matches
    /// the original's top-to-bottom `cur < end` walk: entries are stored
    /// nearest to the stack's tail, and the most recently appended one
    /// sits first in encounter order).
    pub fn traceback_entries(&self) -> impl Iterator<Item = u32> + '_ {
        self.stack[self.traceback_pointer..]
            .iter()
            .map(|v| v.untag_signed() as u32)
    }

    /// Run `body` with the callback anchor pointed at the current stack
    /// frame, then restore the previous anchor (spec §4.6 "Callback
    /// anchor", the original's `OME_PUSH_CALLBACK_LOCALS`/
    /// `OME_POP_CALLBACK_LOCALS`). This is how a foreign callback with no
    /// closure environment of its own (e.g. a qsort comparator) finds its
    /// way back to live `Value` locals.
    pub fn with_callback_anchor<R>(&mut self, frame: &StackFrame, body: impl FnOnce(&mut Context) -> R) -> R {
        let prev = self.callback_stack.replace(frame.base);
        let result = body(self);
        self.callback_stack = prev;
        result
    }

    /// Read a local from the currently anchored callback frame (the
    /// original's `OME_CALLBACK_LOCALS`). Panics if no callback is
    /// anchored — callers only use this from inside a
    /// `with_callback_anchor` body.
    pub fn callback_local(&self, slot: usize) -> Value {
        let base = self
            .callback_stack
            .expect("callback_local called with no anchored callback");
        self.stack[base + slot]
    }

    pub fn set_callback_local(&mut self, slot: usize, value: Value) {
        let base = self
            .callback_stack
            .expect("set_callback_local called with no anchored callback");
        self.stack[base + slot] = value;
    }

    /// `catch`'s recovery path (spec §4.8, §7): if `result` carries the
    /// error bit, strip it and reset the traceback so the handler doesn't
    /// inherit trace entries from the call it just caught. A non-error
    /// `result` passes through untouched.
    pub fn catch(&mut self, result: Value) -> Value {
        if result.is_error() {
            self.reset_traceback();
            result.strip_error()
        } else {
            result
        }
    }

    /// `try`'s propagation path (spec §4.8, §7): an error is re-raised to
    /// the caller unchanged, carrying its traceback along with it. Named
    /// opposite [`Context::catch`] so call sites read as the recovery
    /// decision they are, rather than as a bare pass-through.
    pub fn try_propagate(&mut self, result: Value) -> Value {
        result
    }
}
