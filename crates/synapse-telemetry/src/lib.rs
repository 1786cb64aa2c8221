// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry and job-lifecycle metrics for the Synapse exchange
//! (ambient; not named by any spec module, carried per §3's "a complete
//! repo's ambient stack still uses the teacher's crates for logging and
//! metrics").
//!
//! This crate is a thin, in-process sibling of `synapse-exchange`, not a
//! dependency of it: the daemon binary records a [`JobMetrics`] row each
//! time a job settles and periodically exports a [`MetricsSummary`], the
//! same separation the teacher keeps between its runtime and its telemetry
//! crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// ---------------------------------------------------------------------------
// JobMetrics
// ---------------------------------------------------------------------------

/// Metrics captured when a single job reaches a terminal state (§4.3, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    /// The job's id.
    pub job_id: String,
    /// The job's `kind` field (e.g. `"simple"`, `"coding"`).
    pub kind: String,
    /// Wall-clock milliseconds from `posted` to settlement.
    pub duration_ms: u64,
    /// Number of bids the job received before award.
    pub bids_count: u64,
    /// The job's budget.
    pub budget: u64,
    /// Total amount actually paid to the worker.
    pub paid: u64,
    /// Number of negotiation rounds exchanged before award, 0 if the job
    /// was awarded directly without negotiation.
    pub negotiation_rounds: u64,
    /// 1 if settlement failed (rejection or timeout), 0 on success.
    pub errors_count: u64,
}

// ---------------------------------------------------------------------------
// MetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across every job recorded so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of jobs recorded.
    pub count: usize,
    /// Mean settlement duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) settlement duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile settlement duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total budget across all recorded jobs.
    pub total_budget: u64,
    /// Total amount paid across all recorded jobs.
    pub total_paid: u64,
    /// Fraction of recorded jobs that failed settlement.
    pub failure_rate: f64,
    /// Per-kind job counts (deterministic ordering).
    pub kind_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            total_budget: 0,
            total_paid: 0,
            failure_rate: 0.0,
            kind_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe collector for settled-job metrics.
///
/// Wrap in an `Arc` to share across tasks (the inner storage is already
/// behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<JobMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a settled job's metrics.
    pub fn record(&self, metrics: JobMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Return all recorded job metrics.
    pub fn jobs(&self) -> Vec<JobMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of jobs recorded so far.
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.len()
    }

    /// Whether the collector has no recorded jobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded jobs.
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|m| m.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let total_budget: u64 = data.iter().map(|m| m.budget).sum();
        let total_paid: u64 = data.iter().map(|m| m.paid).sum();

        let failures: u64 = data.iter().map(|m| m.errors_count).sum();
        let failure_rate = failures as f64 / count as f64;

        let mut kind_counts: BTreeMap<String, usize> = BTreeMap::new();
        for m in data.iter() {
            *kind_counts.entry(m.kind.clone()).or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            total_budget,
            total_paid,
            failure_rate,
            kind_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.clear();
    }
}

// ---------------------------------------------------------------------------
// TelemetrySpan
// ---------------------------------------------------------------------------

/// A structured span for tracing integration, e.g. one per dispatched
/// client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(
            span_name = %self.name,
            attributes = ?self.attributes,
            "telemetry_span"
        );
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting a collected summary, e.g. to an operator endpoint.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON to a string.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn sample_metrics(kind: &str, duration: u64, errors: u64) -> JobMetrics {
        JobMetrics {
            job_id: "job_1".to_string(),
            kind: kind.to_string(),
            duration_ms: duration,
            bids_count: 3,
            budget: 100,
            paid: 90,
            negotiation_rounds: 1,
            errors_count: errors,
        }
    }

    #[test]
    fn collector_new_is_empty() {
        let c = MetricsCollector::new();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn collector_record_and_len() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("simple", 100, 0));
        assert_eq!(c.len(), 1);
        assert!(!c.is_empty());
    }

    #[test]
    fn collector_jobs_returns_all() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("a", 10, 0));
        c.record(sample_metrics("b", 20, 0));
        let jobs = c.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, "a");
        assert_eq!(jobs[1].kind, "b");
    }

    #[test]
    fn collector_clear() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("x", 50, 0));
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn empty_collector_summary() {
        let c = MetricsCollector::new();
        let s = c.summary();
        assert_eq!(s.count, 0);
        assert_eq!(s.mean_duration_ms, 0.0);
        assert_eq!(s.total_budget, 0);
        assert_eq!(s.failure_rate, 0.0);
        assert!(s.kind_counts.is_empty());
    }

    #[test]
    fn single_job_summary_matches() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("coding", 42, 0));
        let s = c.summary();
        assert_eq!(s.count, 1);
        assert_eq!(s.mean_duration_ms, 42.0);
        assert_eq!(s.p50_duration_ms, 42.0);
        assert_eq!(s.p99_duration_ms, 42.0);
        assert_eq!(s.total_budget, 100);
        assert_eq!(s.total_paid, 90);
        assert_eq!(s.failure_rate, 0.0);
        assert_eq!(s.kind_counts["coding"], 1);
    }

    #[test]
    fn summary_mean_duration() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("a", 100, 0));
        c.record(sample_metrics("a", 200, 0));
        c.record(sample_metrics("a", 300, 0));
        let s = c.summary();
        assert!((s.mean_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_p50_odd_count() {
        let c = MetricsCollector::new();
        for d in [10, 20, 30, 40, 50] {
            c.record(sample_metrics("a", d, 0));
        }
        let s = c.summary();
        assert!((s.p50_duration_ms - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_failure_rate() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("a", 10, 1));
        c.record(sample_metrics("a", 20, 0));
        c.record(sample_metrics("a", 30, 1));
        let s = c.summary();
        assert!((s.failure_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn summary_kind_counts() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("simple", 10, 0));
        c.record(sample_metrics("coding", 20, 0));
        c.record(sample_metrics("simple", 30, 0));
        let s = c.summary();
        assert_eq!(s.kind_counts["simple"], 2);
        assert_eq!(s.kind_counts["coding"], 1);
    }

    #[test]
    fn job_metrics_serde_roundtrip() {
        let m = sample_metrics("serde_test", 999, 1);
        let json = serde_json::to_string(&m).unwrap();
        let m2: JobMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn concurrent_recording() {
        let c = MetricsCollector::new();
        let mut handles = vec![];
        for i in 0..10 {
            let cc = c.clone();
            handles.push(thread::spawn(move || {
                cc.record(sample_metrics("thread", i * 10, 0));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 10);
    }

    #[test]
    fn telemetry_span_attributes() {
        let span = TelemetrySpan::new("op")
            .with_attribute("key", "val")
            .with_attribute("job_id", "job_1");
        assert_eq!(span.name, "op");
        assert_eq!(span.attributes.len(), 2);
        assert_eq!(span.attributes["key"], "val");
    }

    #[test]
    fn json_exporter_valid_output() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("simple", 100, 0));
        let s = c.summary();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["count"], 1);
    }

    #[test]
    fn json_exporter_kind_counts_deterministic() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("zebra", 10, 0));
        c.record(sample_metrics("alpha", 20, 0));
        let s = c.summary();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let keys_start = json.find("\"alpha\"").unwrap();
        let keys_end = json.find("\"zebra\"").unwrap();
        assert!(keys_start < keys_end);
    }

    #[test]
    fn percentile_empty() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn percentile_single() {
        assert_eq!(percentile(&[42], 99.0), 42.0);
    }
}
