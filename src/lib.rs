//! Racelens - concurrency diagnostics for parallel workloads
//!
//! This library records per-thread memory accesses and timed events while a
//! parallel workload runs, then analyzes the capture offline for race
//! conditions, false sharing, load imbalance and excessive synchronization.
//!
//! Results are heuristic diagnostics, not proofs: true simultaneity cannot be
//! observed without hardware watchpoints.

pub mod access;
pub mod cache_line;
pub mod clock;
pub mod config;
pub mod error;
pub mod patterns;
pub mod race_detector;
pub mod report;
pub mod session;
pub mod timeline;

pub use access::{AccessKind, AccessRecorder, MemoryAccess, RegionRegistry, ThreadId, TrackedRegion};
pub use cache_line::{CacheLineAnalyzer, CacheLineInfo};
pub use config::DiagnosticsConfig;
pub use error::{ConfigurationError, Result};
pub use patterns::{PatternClassifier, PatternKind, RecognizedPattern};
pub use race_detector::{PairingPolicy, RaceDetector, RaceFinding};
pub use report::{DiagnosticReport, JsonReportSink, ReportSink};
pub use session::DiagnosticSession;
pub use timeline::{Event, EventTimeline, ThreadStats};
