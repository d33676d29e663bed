//! Metrics infrastructure for the QSL mote connection stack.
//!
//! This crate provides metric label helpers and describes all metrics emitted by the
//! connection core, the mote simulator and the runner. It re-exports the `metrics` crate
//! for convenience and defines all metrics as structured [`Metric`] constants to avoid
//! typos and provide rich metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use qsl_metrics::{MetricLabels, metric_defs, describe_metrics};
//!
//! // Initialize metrics descriptions at startup
//! describe_metrics();
//!
//! let labels = MetricLabels::new("mote_a");
//!
//! metrics::counter!(metric_defs::DATAGRAM_SENT.name, &labels.to_labels()).increment(1);
//! ```
//!
//! # Metric Type
//!
//! ```rust
//! use qsl_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const MY_COUNTER: Metric = Metric::counter("my.counter")
//!     .with_description("A counter metric")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["mote", "command"]);
//!
//! MY_COUNTER.describe();
//! metrics::counter!(MY_COUNTER.name).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Use the const constructors to create metrics at compile time.
///
/// ```rust
/// use qsl_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const DATAGRAMS: Metric = Metric::counter("qsl.datagram.sent")
///     .with_description("Datagrams accepted by the mote")
///     .with_unit(Unit::Count)
///     .with_labels(&["mote"]);
///
/// assert_eq!(DATAGRAMS.name, "qsl.datagram.sent");
/// assert_eq!(DATAGRAMS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "qsl.command.issued").
    pub name: &'static str,
    /// The kind of metric (counter, gauge, histogram).
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    ///
    /// This should be called once at startup for each metric.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the connection stack.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Standard Label Keys
    // ========================================================================

    /// Standard labels present on all mote-scoped metrics.
    pub const STANDARD_LABELS: &[&str] = &["mote"];

    // ========================================================================
    // Command Metrics
    // ========================================================================

    /// Commands handed to the channel adapter.
    ///
    /// Labels: mote, command
    pub const COMMAND_ISSUED: Metric = Metric::counter("qsl.command.issued")
        .with_description("Commands handed to the channel adapter")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "command"]);

    /// Commands whose reply did not arrive within the response timeout.
    ///
    /// Labels: mote, command
    pub const COMMAND_RESPONSE_TIMEOUTS: Metric = Metric::counter("qsl.command.response_timeouts")
        .with_description("Commands that timed out waiting for a reply")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "command"]);

    /// Replies that arrived with no matching command armed.
    ///
    /// Labels: mote, command
    pub const COMMAND_STALE_REPLIES: Metric = Metric::counter("qsl.command.stale_replies")
        .with_description("Replies ignored because no matching command was waiting")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "command"]);

    // ========================================================================
    // Connection Metrics
    // ========================================================================

    /// Connection state transitions.
    ///
    /// Labels: mote, from, to
    pub const CONNECTION_TRANSITIONS: Metric = Metric::counter("qsl.connection.transitions")
        .with_description("Connection state transitions")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "from", "to"]);

    /// Time spent in a blocking connect call.
    ///
    /// Labels: mote, outcome
    pub const CONNECTION_CONNECT_DURATION: Metric =
        Metric::histogram("qsl.connection.connect_duration_ms")
            .with_description("Duration of connect calls in milliseconds")
            .with_unit(Unit::Milliseconds)
            .with_labels(&["mote", "outcome"]);

    /// Service interval granted by the manager.
    ///
    /// Labels: mote
    pub const SERVICE_GRANTED: Metric = Metric::gauge("qsl.service.granted_ms")
        .with_description("Most recently granted service interval in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["mote"]);

    // ========================================================================
    // Datagram Metrics
    // ========================================================================

    /// Datagrams the mote accepted for transmission.
    ///
    /// Labels: mote
    pub const DATAGRAM_SENT: Metric = Metric::counter("qsl.datagram.sent")
        .with_description("Datagrams accepted by the mote")
        .with_unit(Unit::Count)
        .with_labels(&["mote"]);

    /// Size of datagrams accepted for transmission.
    ///
    /// Labels: mote
    pub const DATAGRAM_SENT_SIZE: Metric = Metric::histogram("qsl.datagram.sent_bytes")
        .with_description("Payload size of sent datagrams in bytes")
        .with_unit(Unit::Bytes)
        .with_labels(&["mote"]);

    /// Send attempts that failed.
    ///
    /// Labels: mote, reason
    pub const DATAGRAM_SEND_FAILURES: Metric = Metric::counter("qsl.datagram.send_failures")
        .with_description("Failed send attempts")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "reason"]);

    /// Datagrams received from the network.
    ///
    /// Labels: mote
    pub const DATAGRAM_RECEIVED: Metric = Metric::counter("qsl.datagram.received")
        .with_description("Datagrams received from the mote")
        .with_unit(Unit::Count)
        .with_labels(&["mote"]);

    // ========================================================================
    // Inbox Metrics
    // ========================================================================

    /// Datagrams dropped by the inbox.
    ///
    /// Labels: mote, reason
    pub const INBOX_OVERFLOWS: Metric = Metric::counter("qsl.inbox.overflows")
        .with_description("Inbound datagrams dropped because the inbox was full or they were too large")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "reason"]);

    /// Datagrams waiting to be read.
    ///
    /// Labels: mote
    pub const INBOX_DEPTH: Metric = Metric::gauge("qsl.inbox.depth")
        .with_description("Datagrams waiting in the inbox")
        .with_unit(Unit::Count)
        .with_labels(&["mote"]);

    // ========================================================================
    // Runner Metrics
    // ========================================================================

    /// Liveness stalls observed by the runner watchdog.
    ///
    /// Labels: mote
    pub const WATCHDOG_STALLS: Metric = Metric::counter("qsl.watchdog.stalls")
        .with_description("Times the connection stopped feeding its liveness hook")
        .with_unit(Unit::Count)
        .with_labels(&["mote"]);

    /// Frames carried by the device link.
    ///
    /// Labels: mote, direction
    pub const LINK_FRAMES: Metric = Metric::counter("qsl.link.frames")
        .with_description("Frames carried between host and device")
        .with_unit(Unit::Count)
        .with_labels(&["mote", "direction"]);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        // Command
        &COMMAND_ISSUED,
        &COMMAND_RESPONSE_TIMEOUTS,
        &COMMAND_STALE_REPLIES,
        // Connection
        &CONNECTION_TRANSITIONS,
        &CONNECTION_CONNECT_DURATION,
        &SERVICE_GRANTED,
        // Datagram
        &DATAGRAM_SENT,
        &DATAGRAM_SENT_SIZE,
        &DATAGRAM_SEND_FAILURES,
        &DATAGRAM_RECEIVED,
        // Inbox
        &INBOX_OVERFLOWS,
        &INBOX_DEPTH,
        // Runner
        &WATCHDOG_STALLS,
        &LINK_FRAMES,
    ];
}

/// Metric labels identifying which mote a metric belongs to.
///
/// ```rust
/// use qsl_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("mote_a");
/// assert_eq!(labels.to_labels(), vec![("mote", "mote_a".to_string())]);
/// ```
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Mote identifier (a port name or scenario label).
    pub mote: String,
}

impl MetricLabels {
    /// Creates labels for one mote.
    pub fn new(mote: impl Into<String>) -> Self {
        Self { mote: mote.into() }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("mote", self.mote.clone())]
    }

    /// Returns labels with additional key-value pairs.
    ///
    /// ```rust
    /// use qsl_metrics::MetricLabels;
    ///
    /// let labels = MetricLabels::new("mote_a");
    /// let extended = labels.with(&[("command", "join".to_string())]);
    ///
    /// assert!(extended.iter().any(|(k, v)| *k == "command" && v == "join"));
    /// ```
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

impl Default for MetricLabels {
    fn default() -> Self {
        Self::new("mote")
    }
}

/// Describes all metrics used by the stack.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
