//! Ambient runtime configuration (spec §9.3).
//!
//! Grounded on the teacher's own `AllocationConfig`/heap-sizing fields and
//! on `maemre-neptune::gc::Gc::new`'s environment-variable-driven setup:
//! parse an override if present, fall back to a sane default otherwise,
//! panic only when a variable is present but malformed.

use std::env;

/// Default reservation: generous enough that `grow` rarely needs to move
/// the base, small enough to not surprise a test harness.
pub const DEFAULT_RESERVED_SIZE: usize = 256 * 1024 * 1024;
pub const DEFAULT_MIN_HEAP_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_HEAP_SIZE: usize = 256 * 1024 * 1024;
pub const DEFAULT_STACK_SIZE: usize = 256;
pub const DEFAULT_LATENCY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    /// Total address space reserved for the heap arena up front.
    pub reserved_size: usize,
    /// Heap size committed at startup.
    pub initial_committed_size: usize,
    /// Floor below which the heap is never shrunk.
    pub min_heap_size: usize,
    /// Ceiling past which a failed allocation after a full collection is
    /// a fatal out-of-memory condition (spec §7).
    pub max_heap_size: usize,
    /// Byte alignment of heap object bodies (spec §4.1 `HEAP_ALIGNMENT`).
    pub heap_alignment: usize,
    /// Number of `Value` slots in the execution context's value stack
    /// (spec §4.6).
    pub stack_size: usize,
    /// Soft deadline budget for a single cooperative collection step, in
    /// milliseconds (spec §4.5 "Collect driver").
    pub latency_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            reserved_size: DEFAULT_RESERVED_SIZE,
            initial_committed_size: DEFAULT_MIN_HEAP_SIZE,
            min_heap_size: DEFAULT_MIN_HEAP_SIZE,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            heap_alignment: crate::value::HEAP_ALIGNMENT,
            stack_size: DEFAULT_STACK_SIZE,
            latency_ms: DEFAULT_LATENCY_MS,
        }
    }
}

impl Config {
    /// Apply `OME_HEAP_SIZE`/`OME_LATENCY_MS` overrides from the
    /// environment, if present. A present-but-unparseable value panics;
    /// an absent one is silently skipped, same policy as
    /// `maemre-neptune::gc::Gc::new`'s `NEPTUNE_THREADS` handling.
    pub fn from_env() -> Config {
        let mut config = Config::default();
        if let Ok(raw) = env::var("OME_HEAP_SIZE") {
            let size: usize = raw
                .parse()
                .unwrap_or_else(|e| panic!("invalid OME_HEAP_SIZE {raw:?}: {e}"));
            config.max_heap_size = size;
            config.reserved_size = config.reserved_size.max(size);
            config.initial_committed_size = config.initial_committed_size.min(size);
        }
        if let Ok(raw) = env::var("OME_LATENCY_MS") {
            let ms: u64 = raw
                .parse()
                .unwrap_or_else(|e| panic!("invalid OME_LATENCY_MS {raw:?}: {e}"));
            config.latency_ms = ms;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let c = Config::default();
        assert!(c.initial_committed_size <= c.max_heap_size);
        assert!(c.min_heap_size <= c.max_heap_size);
        assert!(c.max_heap_size <= c.reserved_size);
    }

    #[test]
    fn heap_size_override_raises_reserved_size_to_match() {
        // SAFETY: tests in this module don't run concurrently with other
        // env-mutating tests in this crate.
        unsafe { env::set_var("OME_HEAP_SIZE", "536870912") }; // 512 MiB
        let c = Config::from_env();
        unsafe { env::remove_var("OME_HEAP_SIZE") };
        assert_eq!(c.max_heap_size, 512 * 1024 * 1024);
        assert!(c.reserved_size >= c.max_heap_size);
    }
}
