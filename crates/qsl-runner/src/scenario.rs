//! Scenario files.
//!
//! A scenario names one mote, says how the simulated mote behaves, which
//! network to join and what to publish once connected.
//!
//! ```yaml
//! name: basic
//! config:
//!   connect_timeout_ms: 10000
//! network:
//!   network_id: 4660
//!   service_ms: 5000
//! mote:
//!   join_duration_ms: 300
//!   loopback: true
//! publish:
//!   payload: "hello"
//!   count: 3
//!   interval_ms: 100
//! ```

use std::path::Path;
use std::time::Duration;

use qsl_core::{NetworkConfig, QslConfig};
use qsl_mote_sim::MoteBehavior;
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

/// What to send once connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishPlan {
    /// Text payload. `{n}` is replaced with the message number.
    pub payload: String,
    /// Payload given as hex instead of text. Takes precedence.
    pub payload_hex: Option<String>,
    /// Number of datagrams.
    pub count: u32,
    /// Pause between datagrams.
    pub interval_ms: u64,
    /// Destination port. 0 selects the configured default.
    pub dest_port: u16,
}

impl Default for PublishPlan {
    fn default() -> Self {
        PublishPlan {
            payload: "hello {n}".to_string(),
            payload_hex: None,
            count: 0,
            interval_ms: 1_000,
            dest_port: 0,
        }
    }
}

impl PublishPlan {
    /// Payload of message `n`.
    pub fn payload_for(&self, n: u32) -> Result<Vec<u8>, RunnerError> {
        match &self.payload_hex {
            Some(text) => hex::decode(text.trim())
                .map_err(|e| RunnerError::Plan(format!("payload_hex: {}", e))),
            None => Ok(self.payload.replace("{n}", &n.to_string()).into_bytes()),
        }
    }

    /// Pause between datagrams.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A datagram delivered to the mote from the network during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundDatagram {
    /// Text payload.
    pub payload: String,
    /// Sender port.
    #[serde(default = "default_src_port")]
    pub src_port: u16,
}

fn default_src_port() -> u16 {
    qsl_protocol::WELL_KNOWN_PORT_1
}

/// One run of the connection against a simulated mote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Label for logs, metrics and the report.
    pub name: String,
    /// Connection timing and addressing.
    #[serde(default)]
    pub config: QslConfig,
    /// Credentials and bandwidth request.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Simulated mote behavior.
    #[serde(default)]
    pub mote: MoteBehavior,
    /// Datagrams to send after connecting.
    #[serde(default)]
    pub publish: PublishPlan,
    /// Datagrams the network delivers after connecting.
    #[serde(default)]
    pub inbound: Vec<InboundDatagram>,
    /// How long to keep reading after the last send.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
    /// Report a stall if the host loop makes no progress for this long.
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_timeout_ms: u64,
}

fn default_drain_ms() -> u64 {
    200
}

fn default_watchdog_ms() -> u64 {
    5_000
}

impl Scenario {
    /// Parse a scenario from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, RunnerError> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario file.
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Check the parts serde cannot.
    pub fn validate(&self) -> Result<(), RunnerError> {
        self.config.validate()?;
        if !self.network.is_valid() {
            return Err(RunnerError::Connection(qsl_core::QslError::InvalidNetworkId(
                self.network.network_id,
            )));
        }
        if !(0.0..=1.0).contains(&self.mote.reply_loss) {
            return Err(RunnerError::Plan(format!(
                "reply_loss {} is not a probability",
                self.mote.reply_loss
            )));
        }
        if self.publish.count > 0 {
            self.publish.payload_for(0)?;
        }
        Ok(())
    }

    /// Watchdog timeout.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}
