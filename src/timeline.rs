//! Per-thread event timeline
//!
//! Records named start/end intervals for each workload thread. Events nest:
//! each thread has a stack of open events and `end` always closes the
//! innermost one.
//!
//! ```text
//!   Idle ──start()──▶ Recording ──finalize()──▶ Finalized
//!    │                                             ▲
//!    └──────────────────finalize()─────────────────┘
//!   reset() returns any state to Idle
//! ```
//!
//! # Example
//!
//! ```
//! use racelens::access::ThreadId;
//! use racelens::timeline::EventTimeline;
//!
//! # fn main() -> racelens::Result<()> {
//! let timeline = EventTimeline::new();
//! timeline.start(ThreadId(1), "parallel_for")?;
//! timeline.end(ThreadId(1), "parallel_for")?;
//! timeline.finalize();
//!
//! let stats = timeline.thread_stats();
//! assert_eq!(stats[&ThreadId(1)].event_count, 1);
//! # Ok(())
//! # }
//! ```

use crate::access::ThreadId;
use crate::clock::SessionClock;
use crate::error::{ConfigurationError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Lifecycle state of a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineState {
    Idle,
    Recording,
    Finalized,
}

/// A named interval on one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub thread: ThreadId,
    pub start_nanos: u64,
    /// `None` while the event is open
    pub end_nanos: Option<u64>,
    /// Number of events open on the same thread when this one started
    pub depth: usize,
}

impl Event {
    pub fn is_closed(&self) -> bool {
        self.end_nanos.is_some()
    }

    /// Duration of a closed event
    pub fn duration(&self) -> Option<Duration> {
        self.end_nanos
            .map(|end| Duration::from_nanos(end.saturating_sub(self.start_nanos)))
    }
}

/// Aggregated timing for one thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadStats {
    /// Sum of outermost event durations
    pub total_busy: Duration,
    pub event_count: u64,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub avg_duration: Duration,
    /// Total duration per event name
    pub per_event: BTreeMap<String, Duration>,
}

impl ThreadStats {
    /// Stats carrying only a busy time
    pub fn with_busy_time(total_busy: Duration) -> Self {
        Self {
            total_busy,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct TimelineInner {
    state: TimelineState,
    open: HashMap<ThreadId, Vec<Event>>,
    closed: Vec<Event>,
    first_start_nanos: Option<u64>,
}

impl TimelineInner {
    fn new() -> Self {
        Self {
            state: TimelineState::Idle,
            open: HashMap::new(),
            closed: Vec::new(),
            first_start_nanos: None,
        }
    }
}

/// Thread-safe log of start/end events
#[derive(Debug)]
pub struct EventTimeline {
    clock: SessionClock,
    inner: Mutex<TimelineInner>,
}

impl EventTimeline {
    pub fn new() -> Self {
        Self::with_clock(SessionClock::start())
    }

    pub fn with_clock(clock: SessionClock) -> Self {
        Self {
            clock,
            inner: Mutex::new(TimelineInner::new()),
        }
    }

    /// Open an event on `thread`
    pub fn start(&self, thread: ThreadId, name: &str) -> Result<()> {
        let start_nanos = self.clock.now_nanos();
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            TimelineState::Finalized => {
                return Err(ConfigurationError::TimelineFinalized {
                    thread,
                    name: name.to_string(),
                    operation: "start",
                })
            }
            TimelineState::Idle => inner.state = TimelineState::Recording,
            TimelineState::Recording => {}
        }

        let first = inner.first_start_nanos.get_or_insert(start_nanos);
        *first = (*first).min(start_nanos);

        let stack = inner.open.entry(thread).or_default();
        let depth = stack.len();
        stack.push(Event {
            name: name.to_string(),
            thread,
            start_nanos,
            end_nanos: None,
            depth,
        });
        Ok(())
    }

    /// Close the innermost open event on `thread`, which must be named `name`
    ///
    /// On mismatch the open stack is left as it was.
    pub fn end(&self, thread: ThreadId, name: &str) -> Result<Duration> {
        let end_nanos = self.clock.now_nanos();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.state == TimelineState::Finalized {
            return Err(ConfigurationError::TimelineFinalized {
                thread,
                name: name.to_string(),
                operation: "end",
            });
        }

        let stack = inner.open.entry(thread).or_default();
        match stack.pop() {
            Some(mut event) if event.name == name => {
                event.end_nanos = Some(end_nanos.max(event.start_nanos));
                let duration = event.duration().unwrap_or_default();
                inner.closed.push(event);
                Ok(duration)
            }
            innermost => {
                let found = innermost.as_ref().map(|event| event.name.clone());
                if let Some(event) = innermost {
                    stack.push(event);
                }
                tracing::warn!(
                    %thread,
                    expected = name,
                    found = ?found,
                    "mismatched event end"
                );
                Err(ConfigurationError::MismatchedEnd {
                    thread,
                    expected: name.to_string(),
                    found,
                })
            }
        }
    }

    /// Run `f` inside a `name` event on `thread`
    pub fn measure<F, R>(&self, thread: ThreadId, name: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.start(thread, name)?;
        let result = f();
        self.end(thread, name)?;
        Ok(result)
    }

    /// Stop accepting events
    ///
    /// Events still open are reported and left out of the statistics.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock();
        let still_open: usize = inner.open.values().map(Vec::len).sum();
        if still_open > 0 {
            tracing::warn!(still_open, "finalizing timeline with open events");
        }
        inner.state = TimelineState::Finalized;
        tracing::debug!(closed = inner.closed.len(), "event timeline finalized");
    }

    /// Clear all events and return to `Idle`
    pub fn reset(&mut self) {
        self.reset_with_clock(SessionClock::start());
    }

    pub(crate) fn reset_with_clock(&mut self, clock: SessionClock) {
        self.clock = clock;
        *self.inner.get_mut() = TimelineInner::new();
        tracing::debug!("event timeline reset");
    }

    pub fn state(&self) -> TimelineState {
        self.inner.lock().state
    }

    pub fn is_finalized(&self) -> bool {
        self.state() == TimelineState::Finalized
    }

    /// Closed events in close order
    pub fn closed_events(&self) -> Vec<Event> {
        self.inner.lock().closed.clone()
    }

    /// Timestamp of the earliest `start`, `None` before the first one
    pub fn first_activity_nanos(&self) -> Option<u64> {
        self.inner.lock().first_start_nanos
    }

    pub fn open_event_count(&self) -> usize {
        self.inner.lock().open.values().map(Vec::len).sum()
    }

    /// Per-thread aggregation over closed events
    pub fn thread_stats(&self) -> BTreeMap<ThreadId, ThreadStats> {
        let inner = self.inner.lock();
        aggregate(&inner.closed)
    }
}

impl Default for EventTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate(closed: &[Event]) -> BTreeMap<ThreadId, ThreadStats> {
    let mut stats: BTreeMap<ThreadId, ThreadStats> = BTreeMap::new();
    let mut totals: BTreeMap<ThreadId, Duration> = BTreeMap::new();

    for event in closed {
        let Some(duration) = event.duration() else {
            continue;
        };
        let entry = stats.entry(event.thread).or_default();

        if entry.event_count == 0 {
            entry.min_duration = duration;
            entry.max_duration = duration;
        } else {
            entry.min_duration = entry.min_duration.min(duration);
            entry.max_duration = entry.max_duration.max(duration);
        }
        entry.event_count += 1;
        if event.depth == 0 {
            entry.total_busy += duration;
        }
        *entry.per_event.entry(event.name.clone()).or_default() += duration;
        *totals.entry(event.thread).or_default() += duration;
    }

    for (thread, entry) in stats.iter_mut() {
        let total = totals.get(thread).copied().unwrap_or_default();
        let count = u32::try_from(entry.event_count).unwrap_or(u32::MAX);
        entry.avg_duration = if count > 0 { total / count } else { Duration::ZERO };
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn closed(thread: u32, name: &str, start: u64, end: u64, depth: usize) -> Event {
        Event {
            name: name.to_string(),
            thread: ThreadId(thread),
            start_nanos: start,
            end_nanos: Some(end),
            depth,
        }
    }

    #[test]
    fn test_start_end_yields_closed_event() {
        let timeline = EventTimeline::new();
        assert_eq!(timeline.state(), TimelineState::Idle);

        timeline.start(ThreadId(1), "X").unwrap();
        assert_eq!(timeline.state(), TimelineState::Recording);
        let duration = timeline.end(ThreadId(1), "X").unwrap();

        let events = timeline.closed_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "X");
        assert_eq!(events[0].duration(), Some(duration));
        assert!(events[0].end_nanos.unwrap() >= events[0].start_nanos);
    }

    #[test]
    fn test_end_without_open_event_errors() {
        let timeline = EventTimeline::new();
        let err = timeline.end(ThreadId(1), "Y").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MismatchedEnd {
                thread: ThreadId(1),
                expected: "Y".to_string(),
                found: None,
            }
        );
    }

    #[test]
    fn test_mismatched_end_leaves_stack_untouched() {
        let timeline = EventTimeline::new();
        timeline.start(ThreadId(1), "outer").unwrap();
        timeline.start(ThreadId(1), "inner").unwrap();

        let err = timeline.end(ThreadId(1), "outer").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MismatchedEnd { ref found, .. } if found.as_deref() == Some("inner")
        ));
        assert_eq!(timeline.open_event_count(), 2);
        assert!(timeline.closed_events().is_empty());

        timeline.end(ThreadId(1), "inner").unwrap();
        timeline.end(ThreadId(1), "outer").unwrap();
        assert_eq!(timeline.open_event_count(), 0);
    }

    #[test]
    fn test_stacks_are_per_thread() {
        let timeline = EventTimeline::new();
        timeline.start(ThreadId(1), "X").unwrap();
        timeline.start(ThreadId(2), "Y").unwrap();

        timeline.end(ThreadId(1), "X").unwrap();
        assert!(timeline.end(ThreadId(1), "Y").is_err());
        timeline.end(ThreadId(2), "Y").unwrap();
    }

    #[test]
    fn test_finalized_timeline_rejects_events() {
        let timeline = EventTimeline::new();
        timeline.start(ThreadId(0), "open").unwrap();
        timeline.finalize();

        assert!(matches!(
            timeline.start(ThreadId(0), "X"),
            Err(ConfigurationError::TimelineFinalized { operation: "start", .. })
        ));
        assert!(matches!(
            timeline.end(ThreadId(0), "open"),
            Err(ConfigurationError::TimelineFinalized { operation: "end", .. })
        ));
        assert!(timeline.thread_stats().is_empty());
    }

    #[test]
    fn test_idle_timeline_can_finalize() {
        let timeline = EventTimeline::new();
        timeline.finalize();
        assert!(timeline.is_finalized());
    }

    #[test]
    fn test_first_activity_is_earliest_start() {
        let mut timeline = EventTimeline::new();
        assert_eq!(timeline.first_activity_nanos(), None);

        timeline.start(ThreadId(0), "outer").unwrap();
        timeline.start(ThreadId(0), "inner").unwrap();
        timeline.end(ThreadId(0), "inner").unwrap();
        timeline.end(ThreadId(0), "outer").unwrap();

        let outer = timeline
            .closed_events()
            .into_iter()
            .find(|e| e.name == "outer")
            .unwrap();
        assert_eq!(timeline.first_activity_nanos(), Some(outer.start_nanos));

        timeline.reset();
        assert_eq!(timeline.first_activity_nanos(), None);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut timeline = EventTimeline::new();
        timeline.start(ThreadId(0), "X").unwrap();
        timeline.end(ThreadId(0), "X").unwrap();
        timeline.finalize();

        timeline.reset();
        assert_eq!(timeline.state(), TimelineState::Idle);
        assert!(timeline.closed_events().is_empty());
        timeline.start(ThreadId(0), "X").unwrap();
    }

    #[test]
    fn test_measure_wraps_closure() {
        let timeline = EventTimeline::new();
        let value = timeline
            .measure(ThreadId(3), "work", || {
                thread::sleep(Duration::from_millis(2));
                42
            })
            .unwrap();

        assert_eq!(value, 42);
        let stats = timeline.thread_stats();
        assert!(stats[&ThreadId(3)].total_busy >= Duration::from_millis(2));
    }

    #[test]
    fn test_aggregate_statistics() {
        let events = vec![
            closed(1, "a", 0, 100, 0),
            closed(1, "b", 100, 400, 0),
            closed(1, "a", 400, 500, 0),
            closed(2, "a", 0, 50, 0),
        ];
        let stats = aggregate(&events);

        let t1 = &stats[&ThreadId(1)];
        assert_eq!(t1.event_count, 3);
        assert_eq!(t1.total_busy, Duration::from_nanos(500));
        assert_eq!(t1.min_duration, Duration::from_nanos(100));
        assert_eq!(t1.max_duration, Duration::from_nanos(300));
        assert_eq!(t1.per_event["a"], Duration::from_nanos(200));
        assert_eq!(t1.per_event["b"], Duration::from_nanos(300));

        let avg = t1.avg_duration.as_nanos();
        assert!((166..=167).contains(&avg));

        assert_eq!(stats[&ThreadId(2)].event_count, 1);
    }

    #[test]
    fn test_nested_events_do_not_double_count_busy_time() {
        let events = vec![closed(1, "inner", 10, 60, 1), closed(1, "outer", 0, 100, 0)];
        let stats = aggregate(&events);

        let t1 = &stats[&ThreadId(1)];
        assert_eq!(t1.total_busy, Duration::from_nanos(100));
        assert_eq!(t1.event_count, 2);
        assert_eq!(t1.per_event["inner"], Duration::from_nanos(50));
    }

    #[test]
    fn test_concurrent_start_end() {
        let timeline = EventTimeline::new();
        thread::scope(|s| {
            for t in 0..4u32 {
                let timeline = &timeline;
                s.spawn(move || {
                    for _ in 0..50 {
                        timeline.start(ThreadId(t), "iter").unwrap();
                        timeline.end(ThreadId(t), "iter").unwrap();
                    }
                });
            }
        });
        timeline.finalize();

        let stats = timeline.thread_stats();
        assert_eq!(stats.len(), 4);
        assert!(stats.values().all(|s| s.event_count == 50));
    }
}
