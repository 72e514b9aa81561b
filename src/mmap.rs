//! OS-level address space reservation backing the heap arena (spec §4.3).
//!
//! A [`Mapping`] reserves `reserved_size` bytes of address space up front
//! and tracks how much of it is currently committed/usable as `size`
//! grows. On Unix this is a single `mmap` grown in place with
//! `mremap(MREMAP_MAYMOVE)`, which may relocate the base address — this is
//! exactly the case spec §4.3's "Heap move under grow" scenario and
//! `OME_move_heap` exist to handle. On Windows the full `reserved_size` is
//! reserved once and pages are committed incrementally, so the base never
//! moves (the cfg split here mirrors the teacher's `mmap.rs`).

use std::io;

#[cfg(unix)]
mod imp {
    use std::io;
    use std::ptr::null_mut;

    pub unsafe fn map(size: usize) -> io::Result<*mut u8> {
        let map = libc::mmap(
            null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );
        if map == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(map as *mut u8)
    }

    /// Grow (or shrink) an existing mapping in place where possible;
    /// returns the (possibly new) base pointer. `mremap` is free to
    /// relocate the mapping under `MREMAP_MAYMOVE`.
    pub unsafe fn regrow(base: *mut u8, old_size: usize, new_size: usize) -> io::Result<*mut u8> {
        let new_base = libc::mremap(base as *mut _, old_size, new_size, libc::MREMAP_MAYMOVE);
        if new_base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(new_base as *mut u8)
    }

    pub unsafe fn release(base: *mut u8, size: usize) {
        libc::munmap(base as *mut _, size);
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::ptr::null_mut;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

    /// `size` here is the *reserved* size: the whole address range is
    /// reserved, but only `initial_commit` bytes of it are committed.
    pub unsafe fn map(size: usize, initial_commit: usize) -> io::Result<*mut u8> {
        let mem = VirtualAlloc(null_mut(), size, MEM_RESERVE, PAGE_READWRITE);
        if mem.is_null() {
            return Err(io::Error::last_os_error());
        }
        if initial_commit > 0 && VirtualAlloc(mem, initial_commit, MEM_COMMIT, PAGE_READWRITE).is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(mem as *mut u8)
    }

    /// Growth never moves the base on Windows: it just commits more of
    /// the already-reserved range.
    pub unsafe fn regrow(base: *mut u8, _old_size: usize, new_size: usize) -> io::Result<*mut u8> {
        if VirtualAlloc(base.cast(), new_size, MEM_COMMIT, PAGE_READWRITE).is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(base)
    }

    pub unsafe fn release(base: *mut u8, _size: usize) {
        VirtualFree(base.cast(), 0, MEM_RELEASE);
    }
}

/// A reserved, growable region of address space.
pub struct Mapping {
    base: *mut u8,
    /// Currently committed/usable size.
    size: usize,
    /// Total address space set aside for this mapping; `grow` may never
    /// request more than this.
    reserved_size: usize,
}

impl Mapping {
    /// Reserve `reserved_size` bytes of address space and commit the
    /// first `initial_size` bytes of it.
    #[cfg(unix)]
    pub fn reserve(reserved_size: usize, initial_size: usize) -> io::Result<Mapping> {
        let _ = reserved_size;
        let base = unsafe { imp::map(initial_size) }?;
        Ok(Mapping {
            base,
            size: initial_size,
            reserved_size,
        })
    }

    #[cfg(windows)]
    pub fn reserve(reserved_size: usize, initial_size: usize) -> io::Result<Mapping> {
        let base = unsafe { imp::map(reserved_size, initial_size) }?;
        Ok(Mapping {
            base,
            size: initial_size,
            reserved_size,
        })
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    /// Grow the mapping to `new_size` (must not exceed `reserved_size`).
    /// Returns `true` if the base address moved, in which case every
    /// stored pointer into the old arena must be rebased by the returned
    /// delta before being dereferenced again (spec §4.3 "Heap move under
    /// grow").
    pub fn grow(&mut self, new_size: usize) -> io::Result<bool> {
        assert!(
            new_size <= self.reserved_size,
            "grow beyond reserved address space"
        );
        let old_base = self.base;
        let new_base = unsafe { imp::regrow(self.base, self.size, new_size) }?;
        self.base = new_base;
        self.size = new_size;
        Ok(new_base as usize != old_base as usize)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { imp::release(self.base, self.size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_grow() {
        let mut m = Mapping::reserve(1 << 24, 1 << 16).expect("reserve");
        assert!(!m.base().is_null());
        let moved = m.grow(1 << 17).expect("grow");
        let _ = moved;
        assert_eq!(m.size(), 1 << 17);
    }
}
