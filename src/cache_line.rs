//! Cache-line bucketing and false-sharing detection
//!
//! Every access is assigned to the cache line `address / line_size`. A line
//! is flagged as false sharing when at least two threads touch it and at
//! least one of those accesses is a write:
//!
//! ```text
//! line 0x40 │ T0:W  T1:W  T2:R │ threads=3 writes=2 → flagged
//! line 0x41 │ T0:R  T1:R       │ threads=2 writes=0 → read-only sharing, not flagged
//! line 0x42 │ T3:W  T3:W       │ threads=1 writes=2 → private, not flagged
//! ```
//!
//! Read-only sharing is never flagged: without a writer the line stays in
//! the shared coherence state and costs nothing.
//!
//! The pass does not distinguish true sharing (threads touching the same
//! address) from false sharing (different addresses on one line). Races on
//! a single address are reported separately by the race detector.

use crate::access::{MemoryAccess, ThreadId};
use crate::error::{ConfigurationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Common cache line size on x86-64 and most aarch64 parts
pub const DEFAULT_CACHE_LINE_SIZE: u64 = 64;

/// Access summary for one cache line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLineInfo {
    pub line_index: u64,
    pub access_count: u64,
    pub write_count: u64,
    pub threads: BTreeSet<ThreadId>,
}

impl CacheLineInfo {
    fn new(line_index: u64) -> Self {
        Self {
            line_index,
            access_count: 0,
            write_count: 0,
            threads: BTreeSet::new(),
        }
    }

    /// Two or more threads and at least one write
    pub fn is_false_sharing(&self) -> bool {
        self.threads.len() >= 2 && self.write_count >= 1
    }

    /// First byte address covered by this line
    pub fn base_address(&self, line_size: u64) -> u64 {
        self.line_index * line_size
    }
}

/// Buckets an access log by cache line
#[derive(Debug, Clone, Copy)]
pub struct CacheLineAnalyzer {
    line_size: u64,
}

impl CacheLineAnalyzer {
    /// Create an analyzer for `line_size`-byte cache lines
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidConfig`] when `line_size` is zero.
    pub fn new(line_size: u64) -> Result<Self> {
        if line_size == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "cache line size must be > 0".to_string(),
            ));
        }
        Ok(Self { line_size })
    }

    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    pub fn line_index(&self, address: usize) -> u64 {
        address as u64 / self.line_size
    }

    /// Bucket every access into exactly one line
    pub fn analyze(&self, log: &[MemoryAccess]) -> BTreeMap<u64, CacheLineInfo> {
        let mut lines: BTreeMap<u64, CacheLineInfo> = BTreeMap::new();

        for access in log {
            let index = self.line_index(access.address);
            let line = lines
                .entry(index)
                .or_insert_with(|| CacheLineInfo::new(index));
            line.access_count += 1;
            if access.kind.is_write() {
                line.write_count += 1;
            }
            line.threads.insert(access.thread);
        }

        tracing::debug!(
            accesses = log.len(),
            lines = lines.len(),
            line_size = self.line_size,
            "cache line analysis complete"
        );

        lines
    }

    /// Only the flagged lines, most-written first
    pub fn false_sharing_lines(&self, log: &[MemoryAccess]) -> Vec<CacheLineInfo> {
        let mut flagged: Vec<CacheLineInfo> = self
            .analyze(log)
            .into_values()
            .filter(CacheLineInfo::is_false_sharing)
            .collect();

        flagged.sort_by(|a, b| {
            b.write_count
                .cmp(&a.write_count)
                .then(a.line_index.cmp(&b.line_index))
        });
        flagged
    }
}

impl Default for CacheLineAnalyzer {
    fn default() -> Self {
        Self {
            line_size: DEFAULT_CACHE_LINE_SIZE,
        }
    }
}
