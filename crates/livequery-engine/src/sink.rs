//! Fan-out reports and where they go.

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::FanoutFailure;
use crate::metrics::FANOUT_FAILURES_TOTAL;

/// What happened to one invalidation target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    /// Target query.
    pub target: String,
    /// Channels that received an update.
    pub published: Vec<String>,
    /// Failures absorbed for this target.
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<FanoutFailure>,
}

impl TargetReport {
    pub(crate) fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            published: Vec::new(),
            failures: Vec::new(),
        }
    }
}

fn serialize_failures<S: serde::Serializer>(
    failures: &[FanoutFailure],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(failures.iter().map(ToString::to_string))
}

/// Outcome of one mutation's fan-out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    /// Mutation that triggered the fan-out.
    pub mutation: String,
    /// One entry per invalidation target, in target name order.
    pub targets: Vec<TargetReport>,
}

impl FanoutReport {
    /// Whether every target published without failure.
    pub fn is_clean(&self) -> bool {
        self.targets.iter().all(|t| t.failures.is_empty())
    }

    /// All absorbed failures.
    pub fn failures(&self) -> impl Iterator<Item = &FanoutFailure> {
        self.targets.iter().flat_map(|t| t.failures.iter())
    }

    /// Every channel that received an update.
    pub fn published_channels(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .flat_map(|t| t.published.iter().map(String::as_str))
    }

    /// Report for one target.
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target == name)
    }

    /// Report for a fan-out that panicked: every target is marked failed.
    pub(crate) fn panicked<'a>(
        mutation: &str,
        targets: impl Iterator<Item = &'a str>,
        message: &str,
    ) -> Self {
        let targets = targets
            .map(|target| TargetReport {
                failures: vec![FanoutFailure::Panicked {
                    target: target.to_owned(),
                    message: message.to_owned(),
                }],
                ..TargetReport::new(target)
            })
            .collect();
        Self {
            mutation: mutation.to_owned(),
            targets,
        }
    }
}

/// Receives fan-out reports after the mutation has already returned.
pub trait FanoutSink: Send + Sync {
    /// Record one report.
    fn record(&self, report: &FanoutReport);
}

/// Logs reports and counts failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl FanoutSink for TracingSink {
    fn record(&self, report: &FanoutReport) {
        let published = report.published_channels().count();
        if report.is_clean() {
            debug!(
                mutation = %report.mutation,
                targets = report.targets.len(),
                published,
                "fan-out complete"
            );
            return;
        }
        for failure in report.failures() {
            counter!(FANOUT_FAILURES_TOTAL, "kind" => failure.kind()).increment(1);
            warn!(
                mutation = %report.mutation,
                target = failure.target(),
                kind = failure.kind(),
                error = %failure,
                "fan-out failure"
            );
        }
        debug!(mutation = %report.mutation, published, "fan-out finished with failures");
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<FanoutReport>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports recorded so far.
    pub fn reports(&self) -> Vec<FanoutReport> {
        self.reports.lock().clone()
    }

    /// Most recent report.
    pub fn last(&self) -> Option<FanoutReport> {
        self.reports.lock().last().cloned()
    }
}

impl FanoutSink for RecordingSink {
    fn record(&self, report: &FanoutReport) {
        self.reports.lock().push(report.clone());
    }
}
