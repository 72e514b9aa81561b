//! Per-object sideband header (spec §3.2, §4.2).
//!
//! Mirrors `OME_Header` from the original runtime: a `mark_next` worklist
//! link (spec §4.5) followed by three bitfields packed into a second word
//! (`size`, `scan_offset`, `scan_size`), built with `modular_bitfield` the
//! way the teacher packs `HeapObjectHeader`'s size/mark bits. Whether an
//! object is marked lives in the heap's separate mark bitmap (spec §4.3),
//! not in the header itself — the header only carries the worklist link
//! and the object's shape.

use modular_bitfield::prelude::*;

/// Bits available to `size`/`scan_offset`/`scan_size`. Objects whose body
/// would not fit are routed through [`crate::bigobject`] instead, which
/// carries full-width `usize` fields.
pub const HEAP_SIZE_BITS: u8 = 10;
pub const MAX_INLINE_SIZE: u32 = (1u32 << HEAP_SIZE_BITS) - 1;

/// Sentinel `mark_next` value meaning "not currently on the worklist"
/// (spec §4.5, the original's `OME_MARK_LIST_NULL`).
pub const MARK_LIST_NULL: u32 = u32::MAX;

#[bitfield(bits = 32)]
#[derive(Clone, Copy)]
pub struct PackedFields {
    pub size: B10,
    pub scan_offset: B10,
    pub scan_size: B10,
    #[skip]
    __: B2,
}

/// One header word immediately preceding an object's body in the arena.
///
/// `size` is the body size in words, not counting the header itself.
/// `scan_offset`/`scan_size` describe the pointer-bearing window scanned
/// by the marker and fixed up by the compactor (spec §4.2); objects with
/// no pointer slots have `scan_size == 0`. A padding header used to fill
/// alignment gaps has `size == 0` and is never marked or scanned.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ObjectHeader {
    pub mark_next: u32,
    packed: PackedFields,
}

impl ObjectHeader {
    pub const WORDS: usize = std::mem::size_of::<ObjectHeader>() / std::mem::size_of::<usize>();

    #[inline]
    pub fn new(size: u32, scan_offset: u32, scan_size: u32) -> ObjectHeader {
        debug_assert!(size <= MAX_INLINE_SIZE);
        debug_assert!(scan_offset <= MAX_INLINE_SIZE);
        debug_assert!(scan_size <= MAX_INLINE_SIZE);
        ObjectHeader {
            mark_next: MARK_LIST_NULL,
            packed: PackedFields::new()
                .with_size(size)
                .with_scan_offset(scan_offset)
                .with_scan_size(scan_size),
        }
    }

    /// A zero-size padding header used to fill alignment gaps during
    /// compaction (spec §4.2 "Padding header").
    #[inline]
    pub fn padding() -> ObjectHeader {
        ObjectHeader {
            mark_next: MARK_LIST_NULL,
            packed: PackedFields::new(),
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.packed.size()
    }

    #[inline]
    pub fn set_size(&mut self, size: u32) {
        debug_assert!(size <= MAX_INLINE_SIZE);
        self.packed.set_size(size);
    }

    #[inline]
    pub fn scan_offset(&self) -> u32 {
        self.packed.scan_offset()
    }

    #[inline]
    pub fn scan_size(&self) -> u32 {
        self.packed.scan_size()
    }

    #[inline]
    pub fn set_scan_size(&mut self, scan_size: u32) {
        debug_assert!(scan_size <= MAX_INLINE_SIZE);
        self.packed.set_scan_size(scan_size);
    }

    /// Padding headers are skipped by both the marker and the compactor
    /// (spec §4.2).
    #[inline]
    pub fn is_padding(&self) -> bool {
        self.size() == 0
    }

    /// True while this header is linked into the mark worklist (spec
    /// §4.5); once drained, `mark_next` is reset to [`MARK_LIST_NULL`] but
    /// the heap's mark bitmap bit remains set for the rest of the cycle.
    #[inline]
    pub fn on_worklist(&self) -> bool {
        self.mark_next != MARK_LIST_NULL
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        ObjectHeader::padding()
    }
}
