//! Diagnostic report and sink interface
//!
//! [`DiagnosticReport`] is the stable hand-off to renderers. The crate ships
//! a JSON sink; HTML and CSV renderers live outside the engine and only need
//! the field set of the report.

use crate::access::ThreadId;
use crate::cache_line::CacheLineInfo;
use crate::patterns::{PatternKind, RecognizedPattern};
use crate::race_detector::RaceFinding;
use crate::timeline::ThreadStats;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Results of every analysis pass over one capture session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub cache_line_size: u64,
    pub cache_lines: BTreeMap<u64, CacheLineInfo>,
    pub races: Vec<RaceFinding>,
    pub thread_stats: BTreeMap<ThreadId, ThreadStats>,
    pub patterns: Vec<RecognizedPattern>,
    pub total_accesses: usize,
    pub sync_events: u64,
    pub wall_time_nanos: u64,
}

impl DiagnosticReport {
    /// Lines flagged as false sharing, in line order
    pub fn false_sharing_lines(&self) -> impl Iterator<Item = &CacheLineInfo> {
        self.cache_lines.values().filter(|l| l.is_false_sharing())
    }

    pub fn false_sharing_count(&self) -> usize {
        self.false_sharing_lines().count()
    }

    /// Any false sharing, race or non-`Unknown` pattern
    pub fn has_findings(&self) -> bool {
        self.false_sharing_count() > 0
            || !self.races.is_empty()
            || self.patterns.iter().any(|p| p.kind != PatternKind::Unknown)
    }

    /// Short multi-line summary
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} accesses on {} cache lines ({} false sharing), {} race findings, {} threads, {} sync events",
            self.total_accesses,
            self.cache_lines.len(),
            self.false_sharing_count(),
            self.races.len(),
            self.thread_stats.len(),
            self.sync_events
        );
        for pattern in &self.patterns {
            out.push_str(&format!(
                "\n{}: {} {}",
                pattern.kind,
                pattern.description(),
                pattern.recommendation
            ));
        }
        out
    }
}

/// Destination for finished reports
pub trait ReportSink {
    fn emit(&mut self, report: &DiagnosticReport) -> Result<()>;
}

/// Writes reports as pretty-printed JSON
pub struct JsonReportSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonReportSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReportSink<W> {
    fn emit(&mut self, report: &DiagnosticReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, report)
            .context("Failed to serialize diagnostic report")?;
        writeln!(self.writer).context("Failed to write diagnostic report")?;
        self.writer.flush().context("Failed to flush diagnostic report")?;
        Ok(())
    }
}
