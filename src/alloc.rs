//! The allocator (spec §4.4): bump-pointer allocation into the arena, with
//! collect-then-grow under pressure and an overflow path to the big-object
//! space for anything wider than a header's bitfields can describe.
//!
//! Grounded on `runtime.c`'s `OME_reserve_allocation`/`OME_allocate`/
//! `OME_allocate_slots`/`OME_allocate_array`/`OME_allocate_data`.

use crate::collect::collect;
use crate::compact::rebase;
use crate::context::Context;
use crate::error::GrowError;
use crate::header::{ObjectHeader, MAX_INLINE_SIZE};
use crate::value::{Tag, Value, HEAP_ALIGNMENT};
use std::mem::size_of;
use tracing::debug;

const HEADER_BYTES: usize = size_of::<ObjectHeader>();
const WORD_BYTES: usize = size_of::<usize>();

#[inline]
fn is_header_aligned(offset: usize) -> bool {
    (offset + HEADER_BYTES) % HEAP_ALIGNMENT == 0
}

#[inline]
fn round_up_to_word(size: usize) -> usize {
    (size + WORD_BYTES - 1) & !(WORD_BYTES - 1)
}

/// Make room for `object_size` (already word-rounded) bytes of body,
/// collecting and growing the heap as needed (`OME_reserve_allocation`).
/// Returns the byte offset, relative to the (possibly new) base, at which
/// the object's header should be written.
fn reserve(ctx: &mut Context, object_size: usize) -> Result<usize, GrowError> {
    let alloc_size = object_size + HEADER_BYTES;
    let padded_size = alloc_size + HEADER_BYTES;

    if ctx.heap.pointer_offset() + padded_size >= ctx.heap.size() {
        collect(ctx);
        let used = ctx.heap.used();
        let total = ctx.heap.size();
        if ctx.heap.pointer_offset() + padded_size >= ctx.heap.size() || used > total / 2 {
            let new_size = (ctx.heap.size() * 2).min(ctx.heap.max_heap_size());
            let old_base = ctx.heap.base();
            let old_size = ctx.heap.size();
            if new_size <= old_size {
                return Err(GrowError::AtCeiling {
                    max_heap_size: ctx.heap.max_heap_size(),
                });
            }
            if let Some(diff) = ctx.heap.grow(new_size)? {
                rebase(ctx, old_base, old_size, diff);
            }
            debug!(new_size, "grew heap");
        }
    }

    let mut offset = ctx.heap.pointer_offset();
    if !is_header_aligned(offset) {
        unsafe {
            (ctx.heap.base().add(offset) as *mut ObjectHeader).write(ObjectHeader::padding());
        }
        offset += HEADER_BYTES;
    }
    ctx.heap.set_pointer_offset(offset + alloc_size);
    Ok(offset)
}

/// Allocate one object of `object_size` bytes, with a scan window of
/// `scan_size` [`Value`] slots starting `scan_offset` slots into the body
/// (`OME_allocate`). Objects whose word count would overflow the header's
/// bitfields are routed to [`crate::bigobject::BigObjectSpace`] instead.
pub fn allocate(
    ctx: &mut Context,
    object_size: usize,
    scan_offset: u32,
    scan_size: u32,
) -> Result<*mut u8, GrowError> {
    let object_size = round_up_to_word(object_size);
    let size_words = (object_size / HEADER_BYTES) as u32;

    if size_words > MAX_INLINE_SIZE || scan_offset > MAX_INLINE_SIZE || scan_size > MAX_INLINE_SIZE {
        return Ok(ctx
            .heap
            .big_objects
            .allocate(object_size, scan_offset as usize, scan_size as usize));
    }

    let offset = reserve(ctx, object_size)?;
    let base = ctx.heap.base();
    unsafe {
        let header = base.add(offset) as *mut ObjectHeader;
        header.write(ObjectHeader::new(size_words, scan_offset, scan_size));
        Ok(base.add(offset + HEADER_BYTES))
    }
}

/// Allocate `num_slots` contiguous, fully-scanned [`Value`] slots
/// (`OME_allocate_slots`) — the body of a `Slots` object.
pub fn allocate_slots(ctx: &mut Context, num_slots: u32) -> Result<*mut Value, GrowError> {
    let size = num_slots as usize * size_of::<Value>();
    allocate(ctx, size, 0, num_slots).map(|p| p as *mut Value)
}

/// Layout mirrored by [`allocate_array`]: a `u32` size, `u32` padding, then
/// `num_elems` [`Value`] slots (`OME_Array` in `ome.h`).
pub const ARRAY_HEADER_WORDS: u32 = 1;

/// Allocate an `Array` body of `num_elems` elements (`OME_allocate_array`).
/// The returned pointer's first word holds the element count; elements
/// start immediately after.
pub fn allocate_array(ctx: &mut Context, num_elems: u32) -> Result<*mut u8, GrowError> {
    let size = size_of::<u64>() + num_elems as usize * size_of::<Value>();
    let body = allocate(ctx, size, ARRAY_HEADER_WORDS, num_elems)?;
    unsafe { (body as *mut u32).write(num_elems) };
    Ok(body)
}

/// Allocate `size` bytes of opaque, unscanned data (`OME_allocate_data`) —
/// the body of a `String` or `ByteArray`.
pub fn allocate_data(ctx: &mut Context, size: usize) -> Result<*mut u8, GrowError> {
    allocate(ctx, size, 0, 0)
}

/// Layout mirrored here: a `u32` byte length followed by the raw bytes
/// plus a trailing NUL (`OME_String` in `ome.h`).
const STRING_HEADER_BYTES: usize = size_of::<u32>();

/// Copy `bytes` into a freshly allocated `String` object and return it as
/// a tagged [`Value`] (spec §4.7, `OME_concat`'s output allocation).
pub fn allocate_string(ctx: &mut Context, bytes: &[u8]) -> Result<Value, GrowError> {
    let body = allocate_data(ctx, STRING_HEADER_BYTES + bytes.len() + 1)?;
    unsafe {
        (body as *mut u32).write(bytes.len() as u32);
        let data = body.add(STRING_HEADER_BYTES);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
        data.add(bytes.len()).write(0);
    }
    Ok(Value::tag_pointer(Tag::STRING, body))
}
