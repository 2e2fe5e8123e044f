//! Temporal race detection over an access log
//!
//! Two accesses are reported as a potential race when they touch the same
//! address from different threads, at least one is a write, and they were
//! recorded less than `window` apart. True simultaneity cannot be observed
//! without hardware watchpoints; the window approximates "close enough in
//! time to be suspicious" and must be tuned per workload.
//!
//! # Algorithm
//!
//! ```text
//! group accesses by address
//! for each group:
//!     stable sort by timestamp
//!     for i in group:
//!         for j > i while t[j] - t[i] < window:
//!             if thread differs and not both reads:
//!                 emit (i, j)
//!                 FirstMatch: stop scanning partners for i
//! ```
//!
//! # Pairing policies
//!
//! [`PairingPolicy::FirstMatch`] reports at most one partner per access. It
//! keeps hot addresses from producing a quadratic number of findings, but
//! undercounts when three or more threads touch an address inside
//! overlapping windows: `T0:W, T1:W, T2:W` within one window yields the
//! pairs `(T0,T1)` and `(T1,T2)` and never `(T0,T2)`.
//!
//! [`PairingPolicy::AllPartners`] reports every conflicting partner inside
//! the window.

use crate::access::{AccessKind, MemoryAccess, RegionRegistry, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How many partners are reported per access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Stop after the first conflicting partner
    #[default]
    FirstMatch,
    /// Report every conflicting partner inside the window
    AllPartners,
}

/// A pair of temporally close conflicting accesses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceFinding {
    pub address: usize,
    pub thread_a: ThreadId,
    pub thread_b: ThreadId,
    pub kind_a: AccessKind,
    pub kind_b: AccessKind,
    /// `t[b] - t[a]` in nanoseconds
    pub gap_nanos: u64,
    pub location_a: String,
    pub location_b: String,
}

impl RaceFinding {
    /// One-line description, e.g. `write/write on counters+0x8 by T0 and T1 (120ns apart)`
    pub fn description(&self) -> String {
        let location = if self.location_a == self.location_b {
            self.location_a.clone()
        } else {
            format!("{:#x} ({} / {})", self.address, self.location_a, self.location_b)
        };
        format!(
            "{}/{} on {} by {} and {} ({}ns apart)",
            self.kind_a, self.kind_b, location, self.thread_a, self.thread_b, self.gap_nanos
        )
    }
}

/// Finds conflicting accesses recorded within a time window
#[derive(Debug, Clone)]
pub struct RaceDetector<'r> {
    window_nanos: u64,
    policy: PairingPolicy,
    regions: Option<&'r RegionRegistry>,
}

impl<'r> RaceDetector<'r> {
    /// Create a detector with the given window and first-match pairing
    pub fn new(window: Duration) -> Self {
        Self {
            window_nanos: u64::try_from(window.as_nanos()).unwrap_or(u64::MAX),
            policy: PairingPolicy::FirstMatch,
            regions: None,
        }
    }

    pub fn with_policy(mut self, policy: PairingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve untagged locations against tracked regions
    pub fn with_regions(mut self, regions: &'r RegionRegistry) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos)
    }

    pub fn policy(&self) -> PairingPolicy {
        self.policy
    }

    /// Scan the log for races
    ///
    /// Findings are ordered by address, then by the timestamp of the earlier
    /// access. The same log always produces the same findings.
    pub fn detect(&self, log: &[MemoryAccess]) -> Vec<RaceFinding> {
        let mut by_address: BTreeMap<usize, Vec<&MemoryAccess>> = BTreeMap::new();
        for access in log {
            by_address.entry(access.address).or_default().push(access);
        }

        let mut findings = Vec::new();
        for group in by_address.values_mut() {
            // Stable: equal timestamps keep append order.
            group.sort_by_key(|a| a.timestamp_nanos);
            self.scan_group(group, &mut findings);
        }

        tracing::debug!(
            accesses = log.len(),
            addresses = by_address.len(),
            findings = findings.len(),
            window_nanos = self.window_nanos,
            policy = ?self.policy,
            "race detection complete"
        );

        findings
    }

    fn scan_group(&self, group: &[&MemoryAccess], findings: &mut Vec<RaceFinding>) {
        for (i, first) in group.iter().enumerate() {
            for second in &group[i + 1..] {
                let gap = second.timestamp_nanos - first.timestamp_nanos;
                if gap >= self.window_nanos {
                    // Sorted: every later partner is further away.
                    break;
                }
                if !conflicts(first, second) {
                    continue;
                }

                findings.push(self.finding(first, second, gap));
                if self.policy == PairingPolicy::FirstMatch {
                    break;
                }
            }
        }
    }

    fn finding(&self, a: &MemoryAccess, b: &MemoryAccess, gap_nanos: u64) -> RaceFinding {
        RaceFinding {
            address: a.address,
            thread_a: a.thread,
            thread_b: b.thread,
            kind_a: a.kind,
            kind_b: b.kind,
            gap_nanos,
            location_a: self.location(a),
            location_b: self.location(b),
        }
    }

    fn location(&self, access: &MemoryAccess) -> String {
        if let Some(tag) = &access.source_tag {
            return tag.clone();
        }
        match self.regions {
            Some(regions) => regions.describe(access.address),
            None => format!("{:#x}", access.address),
        }
    }
}

/// Different threads and not both reads
fn conflicts(a: &MemoryAccess, b: &MemoryAccess) -> bool {
    a.thread != b.thread && (a.kind == AccessKind::Write || b.kind == AccessKind::Write)
}
