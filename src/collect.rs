//! Collect driver (spec §4.5 "Collect driver"): one mark+compact cycle.
//!
//! Growing the heap and rebasing roots after a base move are not part of
//! a collection itself in the original runtime — `OME_collect` only marks
//! and compacts — so that logic lives in [`crate::alloc::reserve`], which
//! calls [`collect`] and then decides whether the result still leaves the
//! heap too full.
//!
//! Sweeping the big-object space happens here rather than inside [`mark`]
//! or [`compact`]: marking only sets each reachable descriptor's `mark`
//! bit, and the arena compactor has nothing to do with bodies that live
//! outside the arena, so dropping the unmarked descriptors is this
//! function's own responsibility once both phases have run.

use crate::compact::compact;
use crate::context::Context;
use crate::mark::mark;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Run one cooperative mark+compact cycle bounded by the heap's own
/// latency budget (spec §4.5 "Collect driver" steps 1-4). Returns the
/// number of live bytes found during marking (used by the allocator's
/// half-full heuristic).
#[tracing::instrument(skip_all, fields(collection = ctx.heap.num_collections))]
pub fn collect(ctx: &mut Context) -> usize {
    let deadline = Instant::now() + Duration::from_millis(ctx.heap.latency_ms.max(1));
    collect_with_deadline(ctx, Some(deadline))
}

/// Run a mark+compact cycle to completion, ignoring the latency budget.
/// Grounded on `OME_collect_full`'s unconditional full-trace entry point.
#[tracing::instrument(skip_all, fields(collection = ctx.heap.num_collections))]
pub fn collect_full(ctx: &mut Context) -> usize {
    collect_with_deadline(ctx, None)
}

fn collect_with_deadline(ctx: &mut Context, deadline: Option<Instant>) -> usize {
    let start = Instant::now();

    // Step 2: an incomplete mark leaves the bitmap and big-object mark
    // bits only partially correct, so neither compaction nor the sweep
    // below can trust them this cycle.
    let outcome = mark(ctx, deadline);
    if !outcome.complete {
        warn!(
            live_bytes = outcome.live_bytes,
            "mark phase exceeded its latency budget; skipping compaction this cycle"
        );
        return outcome.live_bytes;
    }

    // Step 3/4: only compact if the heap is still worth sliding down and
    // there's budget left to do it; otherwise the arena just keeps the
    // bytes it already has, and the next cycle gets another chance.
    let committed = ctx.heap.size();
    let deadline_ok = deadline.map_or(true, |d| Instant::now() < d);
    if outcome.live_bytes < committed / 2 && deadline_ok {
        if !compact(ctx, deadline) {
            warn!("compact phase exceeded its latency budget; arena partially compacted");
        }
    } else {
        debug!(
            live_bytes = outcome.live_bytes,
            committed, "skipping compaction this cycle"
        );
    }
    ctx.heap.big_objects.sweep();
    ctx.heap.num_collections += 1;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(live_bytes = outcome.live_bytes, used = ctx.heap.used(), elapsed_ms, "collection finished");
    if elapsed_ms > ctx.heap.latency_ms {
        warn!(
            elapsed_ms,
            budget_ms = ctx.heap.latency_ms,
            "collection exceeded its latency budget"
        );
    }
    outcome.live_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjectHeader;
    use crate::heap::Heap;
    use crate::value::{Tag, Value};
    use std::mem::size_of;

    fn test_context() -> Context {
        let heap = Heap::new(1 << 20, 1 << 16, 1 << 20, 50).unwrap();
        Context::new(32, heap)
    }

    #[test]
    fn collect_reclaims_unrooted_objects() {
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = size_of::<ObjectHeader>();
        unsafe {
            (base as *mut ObjectHeader).write(ObjectHeader::padding());
            (base.add(PAD) as *mut ObjectHeader).write(ObjectHeader::new(1, 0, 0));
        }
        ctx.heap.set_pointer_offset(PAD * 3);
        let count_before = ctx.heap.num_collections;

        collect(&mut ctx);

        assert_eq!(ctx.heap.pointer_offset(), 0);
        assert_eq!(ctx.heap.num_collections, count_before + 1);
    }

    #[test]
    fn collect_keeps_rooted_objects_reachable() {
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = size_of::<ObjectHeader>();
        unsafe {
            (base as *mut ObjectHeader).write(ObjectHeader::padding());
            (base.add(PAD) as *mut ObjectHeader).write(ObjectHeader::new(1, 0, 0));
        }
        let body = unsafe { base.add(PAD * 2) };
        ctx.heap.set_pointer_offset(PAD * 4);

        let v = Value::tag_pointer(Tag::STRING, body);
        let frame = ctx.enter(1).unwrap();
        frame.save(&mut ctx, 0, v);

        collect(&mut ctx);

        let relocated = frame.load(&ctx, 0);
        assert!(relocated.is_pointer());
        assert!(ctx.heap.used() > 0);
    }

    #[test]
    fn collect_sweeps_unrooted_big_objects() {
        let mut ctx = test_context();
        let body = ctx.heap.big_objects.allocate(4096, 0, 0);
        assert!(ctx.heap.big_objects.find(body).is_some());

        collect(&mut ctx);

        assert!(ctx.heap.big_objects.is_empty());
    }

    #[test]
    fn collect_keeps_rooted_big_objects() {
        let mut ctx = test_context();
        let body = ctx.heap.big_objects.allocate(4096, 0, 0);
        let v = Value::tag_pointer(Tag::ARRAY, body);
        let frame = ctx.enter(1).unwrap();
        frame.save(&mut ctx, 0, v);

        collect(&mut ctx);

        assert!(ctx.heap.big_objects.find(body).is_some());
        frame.leave(&mut ctx, Value::boolean(true));
    }

    #[test]
    fn collect_full_reclaims_unrooted_objects_regardless_of_latency_budget() {
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = size_of::<ObjectHeader>();
        unsafe {
            (base as *mut ObjectHeader).write(ObjectHeader::padding());
            (base.add(PAD) as *mut ObjectHeader).write(ObjectHeader::new(1, 0, 0));
        }
        ctx.heap.set_pointer_offset(PAD * 3);
        ctx.heap.latency_ms = 0;

        collect_full(&mut ctx);

        assert_eq!(ctx.heap.pointer_offset(), 0);
        assert_eq!(ctx.heap.num_collections, 1);
    }

    #[test]
    fn collect_with_an_already_expired_deadline_skips_compaction_but_still_reports_live_bytes() {
        let mut ctx = test_context();
        let base = ctx.heap.base();
        const PAD: usize = size_of::<ObjectHeader>();
        unsafe {
            (base as *mut ObjectHeader).write(ObjectHeader::padding());
            (base.add(PAD) as *mut ObjectHeader).write(ObjectHeader::new(1, 0, 0));
        }
        let body = unsafe { base.add(PAD * 2) };
        ctx.heap.set_pointer_offset(PAD * 4);

        let v = Value::tag_pointer(Tag::STRING, body);
        let frame = ctx.enter(1).unwrap();
        frame.save(&mut ctx, 0, v);

        let already_passed = Instant::now() - std::time::Duration::from_secs(1);
        let live_bytes = collect_with_deadline(&mut ctx, Some(already_passed));

        assert!(live_bytes > 0);
        assert_eq!(ctx.heap.num_collections, 0, "an incomplete mark must not count as a finished collection");
        frame.leave(&mut ctx, Value::boolean(true));
    }
}
