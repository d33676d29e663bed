//! Connection core for SmartMesh IP motes.
//!
//! This crate drives a mote from power-up to an operational session and then
//! carries datagrams over it:
//!
//! - [`Connection`]: the state machine, with blocking `connect`/`send`/`read`
//!   and a schedulerless [`Connection::step`]
//! - [`TimeoutSupervisor`]: the single-slot deadline scheduler behind command
//!   spacing and response timeouts
//! - [`Inbox`]: bounded FIFO of received datagrams
//! - [`payload_limit`]: outbound size ceilings per destination
//! - [`notify`]: ordered dispatch rules for unsolicited notifications
//!
//! The mote itself is reached through a [`qsl_protocol::ChannelAdapter`].
//!
//! # Example
//!
//! ```rust,ignore
//! use qsl_core::{Connection, NetworkConfig, QslConfig};
//! use qsl_protocol::{NoopLiveness, SystemClock};
//!
//! let mut conn = Connection::new(adapter, SystemClock::new(), NoopLiveness, QslConfig::default());
//! conn.init()?;
//! conn.connect(&NetworkConfig::new(0x1234))?;
//! conn.send(b"hello", 0)?;
//! ```

mod config;
mod connection;
mod error;
mod inbox;
pub mod notify;
mod payload;
mod state;
mod timeout;

pub use config::{NetworkConfig, QslConfig, ResetMode};
pub use connection::{Connection, OutboundPayload};
pub use error::{ConfigError, InboxError, QslError};
pub use inbox::{Inbox, INBOX_CAPACITY, INBOX_SLOT_LEN};
pub use payload::{is_well_known_port, payload_limit};
pub use state::{ConnectionState, Operation, Scheduled, StepOutcome};
pub use timeout::TimeoutSupervisor;
