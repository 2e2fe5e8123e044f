//! Diagnostic session: one capture, one report
//!
//! A session owns the access recorder, the event timeline and the
//! synchronization counter for a single capture. Sessions are constructed by
//! the caller and passed to the instrumented workload by reference; there is
//! no global profiler state, so two sessions never see each other's data.
//!
//! The capture itself spans from the first recorded access, event start or
//! sync event to [`DiagnosticSession::finalize`]. Setup between construction
//! and the first activity does not count toward wall time.
//!
//! # Example
//!
//! ```
//! use racelens::access::{AccessKind, ThreadId};
//! use racelens::config::DiagnosticsConfig;
//! use racelens::session::DiagnosticSession;
//! use std::time::Duration;
//!
//! # fn main() -> racelens::Result<()> {
//! let session = DiagnosticSession::new(DiagnosticsConfig::new(Duration::from_millis(1)))?;
//!
//! std::thread::scope(|s| {
//!     for t in 0..2u32 {
//!         let session = &session;
//!         s.spawn(move || {
//!             let thread = ThreadId(t);
//!             session.timeline().start(thread, "body").unwrap();
//!             session.recorder().record(0x1000 + t as usize * 8, thread, AccessKind::Write, None);
//!             session.timeline().end(thread, "body").unwrap();
//!         });
//!     }
//! });
//!
//! session.finalize();
//! let report = session.report()?;
//! assert_eq!(report.total_accesses, 2);
//! assert_eq!(report.false_sharing_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::access::AccessRecorder;
use crate::cache_line::CacheLineAnalyzer;
use crate::clock::SessionClock;
use crate::config::DiagnosticsConfig;
use crate::error::{ConfigurationError, Result};
use crate::patterns::PatternClassifier;
use crate::race_detector::RaceDetector;
use crate::report::DiagnosticReport;
use crate::timeline::EventTimeline;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const NO_ACTIVITY: u64 = u64::MAX;

/// Recorder, timeline and sync counter for one capture
#[derive(Debug)]
pub struct DiagnosticSession {
    config: DiagnosticsConfig,
    clock: SessionClock,
    recorder: AccessRecorder,
    timeline: EventTimeline,
    sync_events: AtomicU64,
    /// Earliest sync event, `NO_ACTIVITY` before the first one
    first_sync: AtomicU64,
    /// Wall time frozen at finalize
    wall_time: Mutex<Option<Duration>>,
}

impl DiagnosticSession {
    /// Start a session
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidConfig`] when the configuration does not
    /// validate.
    pub fn new(config: DiagnosticsConfig) -> Result<Self> {
        config.validate()?;
        let clock = SessionClock::start();
        Ok(Self {
            config,
            clock,
            recorder: AccessRecorder::with_clock(clock),
            timeline: EventTimeline::with_clock(clock),
            sync_events: AtomicU64::new(0),
            first_sync: AtomicU64::new(NO_ACTIVITY),
            wall_time: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn recorder(&self) -> &AccessRecorder {
        &self.recorder
    }

    pub fn timeline(&self) -> &EventTimeline {
        &self.timeline
    }

    /// Count one barrier, lock acquisition or other synchronization point
    ///
    /// Counted until [`finalize`](Self::finalize), including while access
    /// recording is paused with [`AccessRecorder::set_enabled`].
    #[inline]
    pub fn record_sync_event(&self) {
        if self.recorder.is_finalized() {
            return;
        }
        let now = self.clock.now_nanos();
        if now < self.first_sync.load(Ordering::Relaxed) {
            self.first_sync.fetch_min(now, Ordering::Relaxed);
        }
        self.sync_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sync_event_count(&self) -> u64 {
        self.sync_events.load(Ordering::Relaxed)
    }

    /// End the capture; recording calls after this are ignored or rejected
    pub fn finalize(&self) {
        let mut wall_time = self.wall_time.lock();
        if wall_time.is_some() {
            return;
        }
        let end_nanos = self.clock.now_nanos();
        self.recorder.finalize();
        self.timeline.finalize();
        *wall_time = Some(self.capture_span(end_nanos));
        tracing::debug!(
            accesses = self.recorder.len(),
            sync_events = self.sync_event_count(),
            "diagnostic session finalized"
        );
    }

    pub fn is_finalized(&self) -> bool {
        self.wall_time.lock().is_some()
    }

    /// Time from the first activity to finalize, or to now while still
    /// recording; zero when nothing was recorded
    pub fn wall_time(&self) -> Duration {
        let frozen = *self.wall_time.lock();
        frozen.unwrap_or_else(|| self.capture_span(self.clock.now_nanos()))
    }

    /// Earliest access, event start or sync event on the session clock
    pub fn first_activity_nanos(&self) -> Option<u64> {
        let first_sync = match self.first_sync.load(Ordering::Relaxed) {
            NO_ACTIVITY => None,
            nanos => Some(nanos),
        };
        [
            self.recorder.first_activity_nanos(),
            self.timeline.first_activity_nanos(),
            first_sync,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn capture_span(&self, end_nanos: u64) -> Duration {
        self.first_activity_nanos()
            .map_or(Duration::ZERO, |start| {
                Duration::from_nanos(end_nanos.saturating_sub(start))
            })
    }

    /// Discard everything and start a new capture with a fresh clock
    pub fn reset(&mut self) {
        let clock = SessionClock::start();
        self.clock = clock;
        self.recorder.reset_with_clock(clock);
        self.timeline.reset_with_clock(clock);
        *self.sync_events.get_mut() = 0;
        *self.first_sync.get_mut() = NO_ACTIVITY;
        *self.wall_time.get_mut() = None;
        tracing::debug!("diagnostic session reset");
    }

    /// Run every analysis pass over the finalized capture
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::SessionNotFinalized`] before [`finalize`](Self::finalize).
    pub fn report(&self) -> Result<DiagnosticReport> {
        let Some(wall_time) = *self.wall_time.lock() else {
            return Err(ConfigurationError::SessionNotFinalized);
        };

        let log = self.recorder.snapshot();
        let regions = self.recorder.regions();

        let cache_lines = CacheLineAnalyzer::new(self.config.cache_line_size)?.analyze(&log);

        let races = RaceDetector::new(self.config.race_window())
            .with_policy(self.config.pairing)
            .with_regions(&regions)
            .detect(&log);

        let sync_events = self.sync_event_count();
        let pattern = PatternClassifier::new(self.config.classifier.clone()).classify_timeline(
            &self.timeline,
            sync_events,
            wall_time,
        )?;

        Ok(DiagnosticReport {
            cache_line_size: self.config.cache_line_size,
            cache_lines,
            races,
            thread_stats: self.timeline.thread_stats(),
            patterns: vec![pattern],
            total_accesses: log.len(),
            sync_events,
            wall_time_nanos: u64::try_from(wall_time.as_nanos()).unwrap_or(u64::MAX),
        })
    }
}
