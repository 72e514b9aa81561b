//! Sliding compaction (spec §4.5 "Compact phase").
//!
//! Marked objects slide down to fill the gaps left by unmarked ones,
//! exactly as the original `OME_compact` does: each retained run is
//! `memmove`d as a block and a single `Relocation` entry records how far
//! it moved. The relocation buffer is bounded (spec §4.3); when it fills
//! up mid-compaction, every pointer recorded so far is fixed up
//! immediately (`fixup`) and the buffer is reused from the start, which
//! is what makes the buffer's fixed size safe regardless of how
//! fragmented the heap is (spec §8 "Compaction round-trip with 10,000
//! strings").

use crate::context::Context;
use crate::header::ObjectHeader;
use crate::heap::{Heap, Relocation};
use crate::value::{HEAP_ALIGNMENT, Tag, Value};
use std::mem::size_of;
use std::time::Instant;

const HEADER_BYTES: usize = size_of::<ObjectHeader>();

#[inline]
fn is_header_aligned(offset: usize) -> bool {
    (offset + HEADER_BYTES) % HEAP_ALIGNMENT == 0
}

#[inline]
fn unit_index(byte_offset: usize) -> u32 {
    (byte_offset / HEAP_ALIGNMENT) as u32
}

#[inline]
fn header_at(base: *mut u8, offset: usize) -> *mut ObjectHeader {
    unsafe { base.add(offset) as *mut ObjectHeader }
}

fn find_relocation(relocs: &[Relocation], index: u32) -> usize {
    let mut diff = 0u32;
    for r in relocs {
        if r.src > index {
            break;
        }
        diff = r.diff;
    }
    diff as usize * HEAP_ALIGNMENT
}

fn relocate_slots(slots: &mut [Value], heap: &Heap, relocs: &[Relocation]) {
    let base = heap.base() as usize;
    let limit = base + heap.size();
    for slot in slots.iter_mut() {
        let tag = slot.get_tag();
        if tag.is_pointer_class() {
            let body = slot.untag_pointer() as usize;
            if body >= base && body < limit {
                let diff = find_relocation(relocs, unit_index(body - base));
                if diff > 0 {
                    *slot = Value::tag_pointer(tag, (body - diff) as *const u8);
                }
            }
        }
    }
}

fn relocate_stack(ctx: &mut Context, relocs: &[Relocation]) {
    let heap_base = ctx.heap.base();
    let heap_size = ctx.heap.size();
    let base = heap_base as usize;
    let limit = base + heap_size;
    for slot in ctx.roots_mut().iter_mut() {
        let tag = slot.get_tag();
        if tag.is_pointer_class() {
            let body = slot.untag_pointer() as usize;
            if body >= base && body < limit {
                let diff = find_relocation(relocs, unit_index(body - base));
                if diff > 0 {
                    *slot = Value::tag_pointer(tag, (body - diff) as *const u8);
                }
            }
        }
    }
}

fn relocate_object(base: *mut u8, offset: usize, heap: &Heap, relocs: &[Relocation]) {
    let header = unsafe { &*header_at(base, offset) };
    if header.scan_size() == 0 {
        return;
    }
    let body = unsafe { base.add(offset + HEADER_BYTES) };
    let slots = unsafe {
        std::slice::from_raw_parts_mut(
            (body as *mut Value).add(header.scan_offset() as usize),
            header.scan_size() as usize,
        )
    };
    relocate_slots(slots, heap, relocs);
}

/// Walk every *compacted* object (no unmarked gaps remain in
/// `[start, end)`) and fix up its pointer slots.
fn relocate_compacted(base: *mut u8, start: usize, end: usize, heap: &Heap, relocs: &[Relocation]) {
    let mut offset = start;
    while offset < end {
        let size = unsafe { (*header_at(base, offset)).size() } as usize;
        relocate_object(base, offset, heap, relocs);
        offset += (size + 1) * HEADER_BYTES;
    }
}

/// Walk a still-*uncompacted* region, fixing up only the marked objects
/// (everything else will be discarded before this region is reached
/// again). Safe to call mid-compaction because the mark bitmap is only
/// read here, never mutated by compaction itself.
fn relocate_uncompacted(base: *mut u8, start: usize, end: usize, heap: &Heap, relocs: &[Relocation]) {
    let mut offset = start;
    while offset < end {
        let size = unsafe { (*header_at(base, offset)).size() } as usize;
        if heap.bitmap.test(offset + HEADER_BYTES) {
            relocate_object(base, offset, heap, relocs);
        }
        offset += (size + 1) * HEADER_BYTES;
    }
}

/// Compact the arena in place, sliding every marked object down to close
/// gaps left by unmarked ones. Must be called immediately after
/// [`crate::mark::mark`], while the mark bitmap still reflects the
/// objects just traced. Returns `false` if `deadline` cut the walk short
/// (spec §4.5 "Collect driver" step 3); `collect_full` passes `None` to
/// always finish. A short walk is still safe: the still-uncompacted
/// suffix is carried forward verbatim rather than left half-sorted, and a
/// later, uninterrupted collection reclaims whatever garbage it contains.
pub fn compact(ctx: &mut Context, deadline: Option<Instant>) -> bool {
    let base = ctx.heap.base();
    let end_offset = ctx.heap.pointer_offset();
    let relocs_cap = ctx.heap.relocs.capacity().max(2);

    ctx.heap.relocs.clear();
    let mut cur = 0usize;
    let mut dest = 0usize;
    let mut complete = true;

    while cur < end_offset {
        while cur < end_offset && !ctx.heap.bitmap.test(cur + HEADER_BYTES) {
            let size = unsafe { (*header_at(base, cur)).size() } as usize;
            cur += (size + 1) * HEADER_BYTES;
        }
        if !is_header_aligned(dest) {
            unsafe { header_at(base, dest).write(ObjectHeader::padding()) };
            dest += HEADER_BYTES;
        }
        let src = cur;
        let mut dest_next = dest;
        while cur < end_offset
            && (ctx.heap.bitmap.test(cur + HEADER_BYTES) || {
                let size = unsafe { (*header_at(base, cur)).size() };
                size == 0
                    && cur + HEADER_BYTES < end_offset
                    && ctx.heap.bitmap.test(cur + HEADER_BYTES + HEADER_BYTES)
            })
        {
            let size = unsafe { (*header_at(base, cur)).size() } as usize;
            dest_next += (size + 1) * HEADER_BYTES;
            cur += (size + 1) * HEADER_BYTES;
        }
        let run_size = cur - src;
        if dest != src && run_size > 0 {
            unsafe {
                std::ptr::copy(base.add(src), base.add(dest), run_size);
            }
            ctx.heap.relocs.push(Relocation {
                src: unit_index(src + HEADER_BYTES),
                diff: unit_index(src - dest),
            });
            if ctx.heap.relocs.len() + 1 >= relocs_cap {
                // Relocation buffer full: apply every fixup recorded so
                // far right now, against both the stack and the arena
                // (compacted prefix `[0, cur)` plus the still-uncompacted
                // suffix `[cur, end)`), then start the buffer over (spec
                // §4.3's bounded relocation buffer).
                ctx.heap.relocs.push(Relocation {
                    src: unit_index(cur + HEADER_BYTES),
                    diff: 0,
                });
                let relocs = std::mem::take(&mut ctx.heap.relocs);
                relocate_stack(ctx, &relocs);
                relocate_compacted(base, 0, cur, &ctx.heap, &relocs);
                relocate_uncompacted(base, cur, end_offset, &ctx.heap, &relocs);
                ctx.heap.relocs = relocs;
                ctx.heap.relocs.clear();
            }
        }
        dest = dest_next;

        if let Some(deadline) = deadline {
            if cur < end_offset && Instant::now() >= deadline {
                complete = false;
                break;
            }
        }
    }

    if !complete {
        // The deadline fired before `[cur, end_offset)` could be sorted.
        // Move it down to `dest` unchanged rather than leaving a gap or
        // losing track of it — `relocate_compacted` below walks every
        // object in `[0, dest)` regardless of mark state, so the
        // now-adjacent garbage is harmless until the next full mark finds
        // it unreachable again.
        if !is_header_aligned(dest) {
            unsafe { header_at(base, dest).write(ObjectHeader::padding()) };
            dest += HEADER_BYTES;
        }
        let tail_size = end_offset - cur;
        if dest != cur {
            unsafe {
                std::ptr::copy(base.add(cur), base.add(dest), tail_size);
            }
            ctx.heap.relocs.push(Relocation {
                src: unit_index(cur + HEADER_BYTES),
                diff: unit_index(cur - dest),
            });
        }
        dest += tail_size;
    }

    ctx.heap.set_pointer_offset(dest);
    ctx.heap.zero_tail();

    ctx.heap.relocs.push(Relocation {
        src: unit_index(end_offset),
        diff: 0,
    });
    let relocs = std::mem::take(&mut ctx.heap.relocs);
    relocate_stack(ctx, &relocs);
    relocate_compacted(base, 0, dest, &ctx.heap, &relocs);
    ctx.heap.relocs = relocs;
    ctx.heap.relocs.clear();

    complete
}

/// Adjust every pointer-bearing stack slot and live object after the
/// heap's base address moved during grow (spec §4.3 "Heap move under
/// grow", the original's `OME_move_heap`). Called only right after
/// [`crate::collect::collect`], so `[0, pointer_offset)` holds nothing but
/// live, already-compacted objects — unlike `OME_move_heap`, which
/// consults each header's `marked` bit, this crate's mark state is a
/// separate bitmap that compaction never clears, so every object in range
/// is unconditionally adjusted rather than re-checked against mark state
/// (see DESIGN.md).
///
/// `old_base`/`old_size` describe the arena's extent *before* the move;
/// only pointers that fell inside it are arena pointers and need `diff`
/// added. A big object's body lives outside the arena entirely and is
/// never touched here, since it never moves.
pub fn rebase(ctx: &mut Context, old_base: *mut u8, old_size: usize, diff: isize) {
    let old_base = old_base as usize;
    let old_limit = old_base + old_size;
    adjust_stack(ctx, old_base, old_limit, diff);

    let base = ctx.heap.base();
    let end_offset = ctx.heap.pointer_offset();
    let mut offset = 0usize;
    while offset < end_offset {
        let header = unsafe { &*header_at(base, offset) };
        let size = header.size() as usize;
        if header.scan_size() > 0 {
            let body = unsafe { base.add(offset + HEADER_BYTES) };
            let slots = unsafe {
                std::slice::from_raw_parts_mut(
                    (body as *mut Value).add(header.scan_offset() as usize),
                    header.scan_size() as usize,
                )
            };
            adjust_slots(slots, old_base, old_limit, diff);
        }
        offset += (size + 1) * HEADER_BYTES;
    }
}

fn adjust_slots(slots: &mut [Value], old_base: usize, old_limit: usize, diff: isize) {
    for slot in slots.iter_mut() {
        let tag = slot.get_tag();
        if tag.is_pointer_class() {
            let body = slot.untag_pointer() as usize;
            if body >= old_base && body < old_limit {
                *slot = Value::tag_pointer(tag, (body as isize + diff) as *const u8);
            }
        }
    }
}

fn adjust_stack(ctx: &mut Context, old_base: usize, old_limit: usize, diff: isize) {
    for slot in ctx.roots_mut().iter_mut() {
        let tag = slot.get_tag();
        if tag.is_pointer_class() {
            let body = slot.untag_pointer() as usize;
            if body >= old_base && body < old_limit {
                *slot = Value::tag_pointer(tag, (body as isize + diff) as *const u8);
            }
        }
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
    fn compacting_empty_heap_is_a_no_op() {
        let mut ctx = test_context();
        assert!(compact(&mut ctx, None));
        assert_eq!(ctx.heap.pointer_offset(), 0);
    }

    #[test]
    fn marked_object_survives_compaction_and_stack_is_fixed_up() {
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = HEADER_BYTES;
        unsafe {
            // padding, then a dead 16-byte object, then a live one.
            header_at(base, 0).write(ObjectHeader::padding());
            header_at(base, PAD).write(ObjectHeader::new(1, 0, 0));
            header_at(base, PAD * 3).write(ObjectHeader::new(1, 0, 0));
        }
        let end_offset = PAD * 5;
        ctx.heap.set_pointer_offset(end_offset);

        let live_body = unsafe { base.add(PAD * 4) };
        let v = Value::tag_pointer(Tag::STRING, live_body);
        let frame = ctx.enter(1).unwrap();
        frame.save(&mut ctx, 0, v);

        crate::mark::mark(&mut ctx, None);
        assert!(compact(&mut ctx, None));

        let relocated = frame.load(&ctx, 0);
        assert!(relocated.is_pointer());
        let new_body = relocated.untag_pointer();
        assert!((new_body as usize) < (live_body as usize));
        assert_eq!(ctx.heap.pointer_offset(), PAD * 2);
    }

    #[test]
    fn expired_deadline_carries_the_uncompacted_suffix_forward_intact() {
        // Two separate live runs, each preceded by a dead run, so the
        // deadline can fire between them: the first run compacts
        // normally, the second is carried forward unsorted but intact.
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = HEADER_BYTES;
        unsafe {
            header_at(base, 0).write(ObjectHeader::padding());
            header_at(base, PAD).write(ObjectHeader::new(1, 0, 0)); // dead
            header_at(base, PAD * 3).write(ObjectHeader::new(1, 0, 0)); // live 1
            header_at(base, PAD * 5).write(ObjectHeader::new(1, 0, 0)); // dead
            header_at(base, PAD * 7).write(ObjectHeader::new(1, 0, 0)); // live 2
            header_at(base, PAD * 9).write(ObjectHeader::new(1, 0, 0)); // dead
        }
        let end_offset = PAD * 11;
        ctx.heap.set_pointer_offset(end_offset);

        let live1_body = unsafe { base.add(PAD * 4) };
        let live2_body = unsafe { base.add(PAD * 8) };
        let frame = ctx.enter(2).unwrap();
        frame.save(&mut ctx, 0, Value::tag_pointer(Tag::STRING, live1_body));
        frame.save(&mut ctx, 1, Value::tag_pointer(Tag::STRING, live2_body));

        crate::mark::mark(&mut ctx, None);
        let already_passed = Instant::now() - std::time::Duration::from_secs(1);
        let complete = compact(&mut ctx, Some(already_passed));
        assert!(!complete);

        // The first run was reclaimed down to its minimum; the second run
        // and the dead object ahead of it were shifted by the same
        // amount but not reclaimed, since the deadline fired first.
        let relocated1 = frame.load(&ctx, 0).untag_pointer();
        let relocated2 = frame.load(&ctx, 1).untag_pointer();
        assert!((relocated1 as usize) < (live1_body as usize));
        let shift = live1_body as usize - relocated1 as usize;
        assert_eq!(live2_body as usize - relocated2 as usize, shift);
    }
}
