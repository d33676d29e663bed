//! Run reports.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use qsl_core::ConnectionState;
use serde::Serialize;

use crate::error::RunnerError;
use crate::metrics_export::MetricsSnapshot;

/// How the connect phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    /// Whether the connection came up.
    pub connected: bool,
    /// Error text when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent connecting.
    pub elapsed_ms: u64,
    /// Interval granted by the manager, if service was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_service_ms: Option<u32>,
}

/// Publish phase totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendSummary {
    /// Datagrams offered to `send`.
    pub attempted: u32,
    /// Datagrams the mote accepted.
    pub succeeded: u32,
    /// Error text of each failure, in order.
    pub failures: Vec<String>,
}

/// A datagram read from the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedDatagram {
    /// Payload as hex.
    pub hex: String,
    /// Payload as text, when it is valid UTF-8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ReceivedDatagram {
    /// Describe a payload.
    pub fn new(payload: &[u8]) -> Self {
        ReceivedDatagram {
            hex: hex::encode(payload),
            text: std::str::from_utf8(payload).ok().map(str::to_string),
        }
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Scenario name.
    pub scenario: String,
    /// Seed the simulated mote ran with.
    pub seed: u64,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub finished_at: DateTime<Utc>,
    /// Connect phase.
    pub connect: ConnectOutcome,
    /// Publish phase.
    pub sends: SendSummary,
    /// Inbox contents read during the run.
    pub received: Vec<ReceivedDatagram>,
    /// Connection state at the end of the run.
    pub final_state: ConnectionState,
    /// Commands the mote received, by name, in order.
    pub commands: Vec<String>,
    /// Stalls the watchdog reported.
    pub watchdog_stalls: u64,
    /// Whether the run was cut short by Ctrl-C.
    pub interrupted: bool,
    /// Metrics recorded during the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

impl RunReport {
    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String, RunnerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write as JSON to `path`, or to stdout when `path` is `-`.
    pub fn write(&self, path: &Path) -> Result<(), RunnerError> {
        let json = self.to_json()?;
        let io_err = |source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if path == Path::new("-") {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json).map_err(io_err)
        } else {
            std::fs::write(path, json + "\n").map_err(io_err)
        }
    }

    /// Whether the run connected and every send succeeded.
    pub fn is_success(&self) -> bool {
        self.connect.connected && self.sends.failures.is_empty() && !self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_datagram_text() {
        let text = ReceivedDatagram::new(b"hi");
        assert_eq!(text.hex, "6869");
        assert_eq!(text.text.as_deref(), Some("hi"));
        assert_eq!(ReceivedDatagram::new(&[0xFF]).text, None);
    }

    #[test]
    fn test_report_json_shape() {
        let now = Utc::now();
        let report = RunReport {
            scenario: "unit".to_string(),
            seed: 1,
            started_at: now,
            finished_at: now,
            connect: ConnectOutcome {
                connected: true,
                error: None,
                elapsed_ms: 12,
                granted_service_ms: None,
            },
            sends: SendSummary::default(),
            received: Vec::new(),
            final_state: ConnectionState::Connected,
            commands: vec!["join".to_string()],
            watchdog_stalls: 0,
            interrupted: false,
            metrics: None,
        };
        assert!(report.is_success());
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["final_state"], "connected");
        assert_eq!(json["connect"]["connected"], true);
        assert!(json["connect"].get("error").is_none());
        assert!(json.get("metrics").is_none());
    }
}
