// Integration test utilities
//
// Shared workload shapes and logging setup for the end-to-end suites.

#![allow(dead_code)]

use racelens::access::{address_of, AccessKind, MemoryAccess, ThreadId};
use std::sync::atomic::AtomicU64;

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One counter per cache line
#[repr(align(64))]
#[derive(Default)]
pub struct PaddedSlot {
    pub value: AtomicU64,
}

/// Four counters sharing one cache line
#[repr(align(64))]
#[derive(Default)]
pub struct PackedCounters {
    pub values: [AtomicU64; 4],
}

pub fn slot_address(slot: &PaddedSlot) -> usize {
    address_of(&slot.value)
}

pub fn access(address: usize, thread: u32, kind: AccessKind, t: u64) -> MemoryAccess {
    MemoryAccess::new(address, ThreadId(thread), kind, t)
}
