//! Memory access recording and region tracking
//!
//! The recorder is the hot path of the engine: instrumented workload threads
//! call [`AccessRecorder::record`] for every access they want analyzed. The
//! recording path is:
//!
//! ```text
//! record() → enabled? ── no ──▶ return (single relaxed load)
//!               │
//!              yes
//!               ▼
//!        clock.now_nanos()      (timestamp taken before the lock)
//!               ▼
//!        log.lock().push(..)    (coarse lock held only for the append)
//! ```
//!
//! The log has no upper bound. The instrumenting caller decides what to
//! record; the engine never drops or samples accesses.
//!
//! # Example
//!
//! ```
//! use racelens::access::{AccessKind, AccessRecorder, ThreadId, TrackedRegion};
//!
//! let recorder = AccessRecorder::new();
//! recorder.track_region(TrackedRegion::new("counters", 0x1000, 64));
//!
//! recorder.record(0x1000, ThreadId(0), AccessKind::Write, Some("worker.rs:10"));
//! recorder.record(0x1008, ThreadId(1), AccessKind::Read, None);
//! recorder.finalize();
//!
//! assert_eq!(recorder.len(), 2);
//! assert_eq!(recorder.describe(0x1008), "counters+0x8");
//! ```

use crate::clock::SessionClock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Small integer key identifying a workload thread
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(id: u32) -> Self {
        ThreadId(id)
    }
}

/// Direction of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Write)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => f.write_str("read"),
            AccessKind::Write => f.write_str("write"),
        }
    }
}

/// A single recorded memory access
///
/// Records are immutable once appended. The order of the log is append
/// order; timestamps from different threads are not a total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAccess {
    pub address: usize,
    pub thread: ThreadId,
    pub kind: AccessKind,
    /// Nanoseconds since the session clock origin
    pub timestamp_nanos: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

impl MemoryAccess {
    pub fn new(address: usize, thread: ThreadId, kind: AccessKind, timestamp_nanos: u64) -> Self {
        Self {
            address,
            thread,
            kind,
            timestamp_nanos,
            source_tag: None,
        }
    }

    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = Some(tag.into());
        self
    }
}

/// Address of a value, for use as a [`MemoryAccess`] address
#[inline]
pub fn address_of<T: ?Sized>(value: &T) -> usize {
    value as *const T as *const () as usize
}

/// A named logical buffer in the workload's address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRegion {
    pub name: String,
    pub base_address: usize,
    pub size_bytes: usize,
}

impl TrackedRegion {
    pub fn new(name: impl Into<String>, base_address: usize, size_bytes: usize) -> Self {
        Self {
            name: name.into(),
            base_address,
            size_bytes,
        }
    }

    /// Region covering the memory of a slice
    pub fn of_slice<T>(name: impl Into<String>, slice: &[T]) -> Self {
        Self::new(name, slice.as_ptr() as usize, std::mem::size_of_val(slice))
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base_address && address - self.base_address < self.size_bytes
    }

    /// Byte offset of `address` from the region base, if inside the region
    pub fn offset_of(&self, address: usize) -> Option<usize> {
        self.contains(address)
            .then(|| address - self.base_address)
    }
}

/// Address → region mapping
///
/// Registration is an O(1) append. Regions are assumed not to overlap; when
/// they do, lookups resolve to the most recently registered region.
#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    regions: Vec<TrackedRegion>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, region: TrackedRegion) {
        self.regions.push(region);
    }

    /// Region containing `address` (last registration wins)
    pub fn find(&self, address: usize) -> Option<&TrackedRegion> {
        self.regions.iter().rev().find(|r| r.contains(address))
    }

    /// Region registered under `name` (last registration wins)
    pub fn get(&self, name: &str) -> Option<&TrackedRegion> {
        self.regions.iter().rev().find(|r| r.name == name)
    }

    /// Human-readable location: `name+0xOFFSET` inside a region, hex address otherwise
    pub fn describe(&self, address: usize) -> String {
        match self.find(address) {
            Some(region) => format!("{}+{:#x}", region.name, address - region.base_address),
            None => format!("{:#x}", address),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedRegion> {
        self.regions.iter()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

const RECORDING: u8 = 0;
const PAUSED: u8 = 1;
const FINALIZED: u8 = 2;

/// No access recorded yet
const NO_ACTIVITY: u64 = u64::MAX;

/// Thread-safe append-only log of memory accesses
///
/// Many producer threads record concurrently; a single consumer reads the
/// log after [`finalize`](Self::finalize). Reading while producers are still
/// recording is unsupported and yields an arbitrary prefix of the log.
#[derive(Debug)]
pub struct AccessRecorder {
    /// `RECORDING`, `PAUSED` or `FINALIZED`; finalized is terminal until reset
    state: AtomicU8,
    first_activity: AtomicU64,
    clock: SessionClock,
    log: Mutex<Vec<MemoryAccess>>,
    regions: Mutex<RegionRegistry>,
}

impl AccessRecorder {
    /// Create an enabled recorder with its own clock
    pub fn new() -> Self {
        Self::with_clock(SessionClock::start())
    }

    /// Create an enabled recorder stamping accesses from `clock`
    pub fn with_clock(clock: SessionClock) -> Self {
        Self {
            state: AtomicU8::new(RECORDING),
            first_activity: AtomicU64::new(NO_ACTIVITY),
            clock,
            log: Mutex::new(Vec::new()),
            regions: Mutex::new(RegionRegistry::new()),
        }
    }

    /// Register a named region
    pub fn track_region(&self, region: TrackedRegion) {
        tracing::trace!(
            name = %region.name,
            base = region.base_address,
            size = region.size_bytes,
            "tracking region"
        );
        self.regions.lock().register(region);
    }

    /// Record one access
    ///
    /// A no-op when the recorder is disabled or finalized. The timestamp is
    /// taken before the log lock so lock contention does not skew it.
    #[inline]
    pub fn record(
        &self,
        address: usize,
        thread: ThreadId,
        kind: AccessKind,
        source_tag: Option<&str>,
    ) {
        if self.state.load(Ordering::Relaxed) != RECORDING {
            return;
        }

        let timestamp_nanos = self.clock.now_nanos();
        if timestamp_nanos < self.first_activity.load(Ordering::Relaxed) {
            self.first_activity
                .fetch_min(timestamp_nanos, Ordering::Relaxed);
        }

        let access = MemoryAccess {
            address,
            thread,
            kind,
            timestamp_nanos,
            source_tag: source_tag.map(str::to_owned),
        };

        self.log.lock().push(access);
    }

    #[inline]
    pub fn record_read(&self, address: usize, thread: ThreadId) {
        self.record(address, thread, AccessKind::Read, None);
    }

    #[inline]
    pub fn record_write(&self, address: usize, thread: ThreadId) {
        self.record(address, thread, AccessKind::Write, None);
    }

    /// Toggle recording; has no effect once finalized
    pub fn set_enabled(&self, enabled: bool) {
        let target = if enabled { RECORDING } else { PAUSED };
        // Finalized is terminal; never overwrite it.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != FINALIZED).then_some(target)
            });
    }

    pub fn is_enabled(&self) -> bool {
        self.state.load(Ordering::Relaxed) == RECORDING
    }

    /// End the capture session; later `record` calls are ignored
    pub fn finalize(&self) {
        self.state.store(FINALIZED, Ordering::Release);
        tracing::debug!(accesses = self.len(), "access recorder finalized");
    }

    pub fn is_finalized(&self) -> bool {
        self.state.load(Ordering::Acquire) == FINALIZED
    }

    /// Timestamp of the earliest recorded access, `None` before the first one
    pub fn first_activity_nanos(&self) -> Option<u64> {
        match self.first_activity.load(Ordering::Relaxed) {
            NO_ACTIVITY => None,
            nanos => Some(nanos),
        }
    }

    /// Clear the log and regions and start a new session
    pub fn reset(&mut self) {
        self.reset_with_clock(SessionClock::start());
    }

    pub(crate) fn reset_with_clock(&mut self, clock: SessionClock) {
        self.log.get_mut().clear();
        self.regions.get_mut().clear();
        self.clock = clock;
        *self.state.get_mut() = RECORDING;
        *self.first_activity.get_mut() = NO_ACTIVITY;
        tracing::debug!("access recorder reset");
    }

    /// Copy of the access log in append order
    pub fn snapshot(&self) -> Vec<MemoryAccess> {
        self.log.lock().clone()
    }

    /// Copy of the region registry
    pub fn regions(&self) -> RegionRegistry {
        self.regions.lock().clone()
    }

    pub fn region_for(&self, address: usize) -> Option<TrackedRegion> {
        self.regions.lock().find(address).cloned()
    }

    pub fn region(&self, name: &str) -> Option<TrackedRegion> {
        self.regions.lock().get(name).cloned()
    }

    pub fn describe(&self, address: usize) -> String {
        self.regions.lock().describe(address)
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }
}

impl Default for AccessRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Record an access to a place, tagging it with the call site
///
/// ```
/// use racelens::access::{AccessKind, AccessRecorder, ThreadId};
/// use racelens::record_access;
///
/// let recorder = AccessRecorder::new();
/// let counter = 0u64;
/// record_access!(recorder, &counter, ThreadId(0), AccessKind::Read);
///
/// let log = recorder.snapshot();
/// assert!(log[0].source_tag.as_deref().unwrap().contains(".rs:"));
/// ```
#[macro_export]
macro_rules! record_access {
    ($recorder:expr, $place:expr, $thread:expr, $kind:expr) => {
        $recorder.record(
            $crate::access::address_of($place),
            $thread,
            $kind,
            Some(concat!(file!(), ":", line!())),
        )
    };
}
