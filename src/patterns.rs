//! Heuristic classification of parallel-region behavior
//!
//! Takes per-thread busy times and a synchronization-event count and names
//! the most likely performance problem. Rules are tried in priority order
//! and the first one that fires wins.
//!
//! ## 1. Load Imbalance
//! Busy time is unevenly spread across threads.
//! - **Detection:** `max_busy / min_busy > 1.5` with two or more threads
//! - **Confidence:** `clamp((ratio - 1) / 2, 0, 1)`
//! - **Fix:** dynamic or guided scheduling, smaller chunks, work stealing
//!
//! ## 2. Excessive Synchronization
//! Threads spend their time meeting at barriers, locks and atomics.
//! - **Detection:** sync events per millisecond of wall time `> 0.1`
//! - **Confidence:** `clamp(rate * 5, 0, 1)`
//! - **Fix:** remove redundant barriers, use reductions or thread-local
//!   accumulators, batch critical sections
//!
//! ## 3. Unknown
//! Nothing fired; confidence 0.
//!
//! The thresholds are uncalibrated and exposed through
//! [`ClassifierThresholds`]. A classification is reproducible for identical
//! input but is a hint, not proof of the underlying defect.
//!
//! # Example
//!
//! ```
//! use racelens::access::ThreadId;
//! use racelens::patterns::{PatternClassifier, PatternKind};
//! use racelens::timeline::ThreadStats;
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! let mut stats = BTreeMap::new();
//! stats.insert(ThreadId(0), ThreadStats::with_busy_time(Duration::from_millis(100)));
//! stats.insert(ThreadId(1), ThreadStats::with_busy_time(Duration::from_millis(250)));
//!
//! let pattern = PatternClassifier::default().classify(&stats, 0, Duration::from_millis(250));
//! assert_eq!(pattern.kind, PatternKind::LoadImbalance);
//! assert!((pattern.confidence - 0.75).abs() < 1e-9);
//! ```

use crate::access::ThreadId;
use crate::error::{ConfigurationError, Result};
use crate::timeline::{EventTimeline, ThreadStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Severity level derived from confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Nothing detected
    Negligible,
    /// Low severity - minor optimization opportunity
    Low,
    /// Medium severity - noticeable performance impact
    Medium,
    /// High severity - significant bottleneck
    High,
}

/// Kind of recognized behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    LoadImbalance,
    ExcessiveSynchronization,
    Unknown,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::LoadImbalance => f.write_str("Load Imbalance"),
            PatternKind::ExcessiveSynchronization => f.write_str("Excessive Synchronization"),
            PatternKind::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedPattern {
    pub kind: PatternKind,
    /// In `[0, 1]`
    pub confidence: f64,
    pub recommendation: String,
    /// The ratio the winning rule measured (busy ratio or sync events/ms)
    pub measured: f64,
}

impl RecognizedPattern {
    fn unknown() -> Self {
        Self {
            kind: PatternKind::Unknown,
            confidence: 0.0,
            recommendation: "No dominant pattern detected. Profile individual regions \
                             for hotspots."
                .to_string(),
            measured: 0.0,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.kind {
            PatternKind::Unknown => Severity::Negligible,
            _ if self.confidence >= 0.75 => Severity::High,
            _ if self.confidence >= 0.4 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Human-readable description including the measured value
    pub fn description(&self) -> String {
        match self.kind {
            PatternKind::LoadImbalance => format!(
                "Busiest thread ran {:.2}x longer than the least busy thread \
                 (confidence {:.0}%).",
                self.measured,
                self.confidence * 100.0
            ),
            PatternKind::ExcessiveSynchronization => format!(
                "{:.3} synchronization events per millisecond of wall time \
                 (confidence {:.0}%).",
                self.measured,
                self.confidence * 100.0
            ),
            PatternKind::Unknown => "No load imbalance or excessive synchronization \
                                     detected."
                .to_string(),
        }
    }
}

/// Tunable classifier thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// `max_busy / min_busy` above which load imbalance is reported
    pub imbalance_ratio: f64,
    /// Sync events per millisecond above which synchronization is excessive
    pub sync_events_per_ms: f64,
    /// Substitute for a zero minimum busy time, in nanoseconds
    pub min_busy_epsilon_nanos: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            imbalance_ratio: 1.5,
            sync_events_per_ms: 0.1,
            min_busy_epsilon_nanos: 1.0,
        }
    }
}

/// Priority-ordered heuristic classifier
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    thresholds: ClassifierThresholds,
}

impl PatternClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    /// Classify per-thread statistics
    ///
    /// `total_wall_time` is the length of the observed parallel region; the
    /// synchronization rate is measured per millisecond of it.
    pub fn classify(
        &self,
        thread_stats: &BTreeMap<ThreadId, ThreadStats>,
        sync_event_count: u64,
        total_wall_time: Duration,
    ) -> RecognizedPattern {
        let pattern = self
            .detect_load_imbalance(thread_stats)
            .or_else(|| self.detect_excessive_sync(sync_event_count, total_wall_time))
            .unwrap_or_else(RecognizedPattern::unknown);

        tracing::debug!(
            kind = ?pattern.kind,
            confidence = pattern.confidence,
            threads = thread_stats.len(),
            sync_event_count,
            "pattern classified"
        );
        pattern
    }

    /// Classify a finalized timeline
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::TimelineNotFinalized`] when the timeline is
    /// still accepting events.
    pub fn classify_timeline(
        &self,
        timeline: &EventTimeline,
        sync_event_count: u64,
        total_wall_time: Duration,
    ) -> Result<RecognizedPattern> {
        if !timeline.is_finalized() {
            return Err(ConfigurationError::TimelineNotFinalized);
        }
        Ok(self.classify(&timeline.thread_stats(), sync_event_count, total_wall_time))
    }

    fn detect_load_imbalance(
        &self,
        thread_stats: &BTreeMap<ThreadId, ThreadStats>,
    ) -> Option<RecognizedPattern> {
        if thread_stats.len() < 2 {
            return None;
        }

        let busy = thread_stats
            .values()
            .map(|s| s.total_busy.as_nanos() as f64);
        let (min, max) = busy.fold((f64::INFINITY, 0.0_f64), |(min, max), b| {
            (min.min(b), max.max(b))
        });

        let min = if min > 0.0 {
            min
        } else {
            self.thresholds.min_busy_epsilon_nanos
        };
        let ratio = max / min;

        if ratio > self.thresholds.imbalance_ratio {
            Some(RecognizedPattern {
                kind: PatternKind::LoadImbalance,
                confidence: ((ratio - 1.0) / 2.0).clamp(0.0, 1.0),
                recommendation: "Use dynamic or guided scheduling with smaller chunks, \
                                 or split the heaviest iterations so work can be stolen."
                    .to_string(),
                measured: ratio,
            })
        } else {
            None
        }
    }

    fn detect_excessive_sync(
        &self,
        sync_event_count: u64,
        total_wall_time: Duration,
    ) -> Option<RecognizedPattern> {
        let wall_ms = total_wall_time.as_secs_f64() * 1_000.0;
        if wall_ms <= 0.0 {
            return None;
        }

        let rate = sync_event_count as f64 / wall_ms;
        if rate > self.thresholds.sync_events_per_ms {
            Some(RecognizedPattern {
                kind: PatternKind::ExcessiveSynchronization,
                confidence: (rate * 5.0).clamp(0.0, 1.0),
                recommendation: "Remove redundant barriers, replace shared updates with \
                                 reductions or thread-local accumulators, and batch work \
                                 inside critical sections."
                    .to_string(),
                measured: rate,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(busy_ms: &[u64]) -> BTreeMap<ThreadId, ThreadStats> {
        busy_ms
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                (
                    ThreadId(i as u32),
                    ThreadStats::with_busy_time(Duration::from_millis(ms)),
                )
            })
            .collect()
    }

    #[test]
    fn test_balanced_threads_unknown() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 100, 100]), 0, Duration::from_millis(100));
        assert_eq!(pattern.kind, PatternKind::Unknown);
        assert_eq!(pattern.confidence, 0.0);
        assert_eq!(pattern.severity(), Severity::Negligible);
    }

    #[test]
    fn test_load_imbalance_confidence() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 250]), 0, Duration::from_millis(250));
        assert_eq!(pattern.kind, PatternKind::LoadImbalance);
        assert!((pattern.confidence - 0.75).abs() < 1e-9);
        assert!((pattern.measured - 2.5).abs() < 1e-9);
        assert_eq!(pattern.severity(), Severity::High);
    }

    #[test]
    fn test_ratio_at_threshold_does_not_fire() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 150]), 0, Duration::from_millis(150));
        assert_eq!(pattern.kind, PatternKind::Unknown);
    }

    #[test]
    fn test_confidence_clamped_to_one() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[10, 1000]), 0, Duration::from_secs(1));
        assert_eq!(pattern.kind, PatternKind::LoadImbalance);
        assert_eq!(pattern.confidence, 1.0);
    }

    #[test]
    fn test_zero_min_busy_uses_epsilon() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[0, 5]), 0, Duration::from_millis(5));
        assert_eq!(pattern.kind, PatternKind::LoadImbalance);
        assert!(pattern.measured.is_finite());
        assert_eq!(pattern.confidence, 1.0);
    }

    #[test]
    fn test_single_thread_never_imbalanced() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[500]), 0, Duration::from_millis(500));
        assert_eq!(pattern.kind, PatternKind::Unknown);
    }

    #[test]
    fn test_excessive_synchronization() {
        // 50 events over 100ms = 0.5/ms
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 100]), 50, Duration::from_millis(100));
        assert_eq!(pattern.kind, PatternKind::ExcessiveSynchronization);
        assert!((pattern.measured - 0.5).abs() < 1e-9);
        assert_eq!(pattern.confidence, 1.0);
    }

    #[test]
    fn test_sync_confidence_scales() {
        // 12 events over 100ms = 0.12/ms → confidence 0.6
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 100]), 12, Duration::from_millis(100));
        assert_eq!(pattern.kind, PatternKind::ExcessiveSynchronization);
        assert!((pattern.confidence - 0.6).abs() < 1e-9);
        assert_eq!(pattern.severity(), Severity::Medium);
    }

    #[test]
    fn test_imbalance_takes_priority_over_sync() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 400]), 1_000, Duration::from_millis(400));
        assert_eq!(pattern.kind, PatternKind::LoadImbalance);
    }

    #[test]
    fn test_zero_wall_time_skips_sync_rule() {
        let pattern = PatternClassifier::default().classify(&stats(&[1, 1]), 10, Duration::ZERO);
        assert_eq!(pattern.kind, PatternKind::Unknown);
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = PatternClassifier::new(ClassifierThresholds {
            imbalance_ratio: 3.0,
            ..Default::default()
        });
        let pattern = classifier.classify(&stats(&[100, 250]), 0, Duration::from_millis(250));
        assert_eq!(pattern.kind, PatternKind::Unknown);
    }

    #[test]
    fn test_classify_timeline_requires_finalize() {
        let timeline = EventTimeline::new();
        timeline.start(ThreadId(0), "work").unwrap();
        timeline.end(ThreadId(0), "work").unwrap();

        let classifier = PatternClassifier::default();
        assert_eq!(
            classifier.classify_timeline(&timeline, 0, Duration::from_millis(1)),
            Err(ConfigurationError::TimelineNotFinalized)
        );

        timeline.finalize();
        let pattern = classifier
            .classify_timeline(&timeline, 0, Duration::from_millis(1))
            .unwrap();
        assert_eq!(pattern.kind, PatternKind::Unknown);
    }

    #[test]
    fn test_descriptions_mention_measurement() {
        let pattern =
            PatternClassifier::default().classify(&stats(&[100, 250]), 0, Duration::from_millis(250));
        assert!(pattern.description().contains("2.50x"));
        assert!(pattern.recommendation.contains("scheduling"));
        assert_eq!(pattern.kind.to_string(), "Load Imbalance");
    }
}
