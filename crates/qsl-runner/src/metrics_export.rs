//! In-memory metrics recorder.
//!
//! Collects every counter, gauge and histogram the connection emits so a run
//! can end with a JSON snapshot. Install it globally with
//! [`metrics::set_global_recorder`] or scope it to a closure with
//! [`metrics::with_local_recorder`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use parking_lot::Mutex;
use serde::Serialize;

// ============================================================================
// Cells
// ============================================================================

#[derive(Debug, Default)]
struct CounterCell(AtomicU64);

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

/// f64 stored as bits.
#[derive(Debug, Default)]
struct GaugeCell(AtomicU64);

impl GaugeCell {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(f(f64::from_bits(bits)).to_bits())
            });
    }
}

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        self.update(|v| v + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|v| v - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct HistogramCell(Mutex<Vec<f64>>);

impl HistogramFn for HistogramCell {
    fn record(&self, value: f64) {
        self.0.lock().push(value);
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Summary of one histogram series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    /// Number of samples.
    pub count: usize,
    /// Sum of samples.
    pub sum: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

impl HistogramSummary {
    fn from_samples(samples: &[f64]) -> Self {
        HistogramSummary {
            count: samples.len(),
            sum: samples.iter().sum(),
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Point-in-time copy of every recorded series, keyed by
/// `name{label=value,...}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Counter totals.
    pub counters: BTreeMap<String, u64>,
    /// Last gauge values.
    pub gauges: BTreeMap<String, f64>,
    /// Histogram summaries.
    pub histograms: BTreeMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    /// Sum a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|(key, _)| series_name(key) == name)
            .map(|(_, value)| *value)
            .sum()
    }

    /// Value of a counter for one exact label set.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        self.counters.get(&render_key(name, labels)).copied()
    }
}

fn series_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

fn render_key<'a>(name: &str, labels: impl IntoIterator<Item = &'a (&'a str, &'a str)>) -> String {
    let labels: Vec<String> = labels
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, labels.join(","))
    }
}

fn key_string(key: &Key) -> String {
    let labels: Vec<(&str, &str)> = key.labels().map(|l| (l.key(), l.value())).collect();
    render_key(key.name(), &labels)
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Default)]
struct Registry {
    counters: Mutex<BTreeMap<String, Arc<CounterCell>>>,
    gauges: Mutex<BTreeMap<String, Arc<GaugeCell>>>,
    histograms: Mutex<BTreeMap<String, Arc<HistogramCell>>>,
}

/// Recorder that keeps every series in memory. Clones share the same
/// series, so keep one to read snapshots after installing another.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecorder {
    registry: Arc<Registry>,
}

impl InMemoryRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .registry
                .counters
                .lock()
                .iter()
                .map(|(k, c)| (k.clone(), c.0.load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .registry
                .gauges
                .lock()
                .iter()
                .map(|(k, g)| (k.clone(), g.get()))
                .collect(),
            histograms: self
                .registry
                .histograms
                .lock()
                .iter()
                .map(|(k, h)| (k.clone(), HistogramSummary::from_samples(&h.0.lock())))
                .collect(),
        }
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let cell = self.registry.counters.lock().entry(key_string(key)).or_default().clone();
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let cell = self.registry.gauges.lock().entry(key_string(key)).or_default().clone();
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let cell = self.registry.histograms.lock().entry(key_string(key)).or_default().clone();
        Histogram::from_arc(cell)
    }
}
