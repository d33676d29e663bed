//! Simulated SmartMesh IP mote.
//!
//! [`SimMote`] implements [`qsl_protocol::ChannelAdapter`] on top of a
//! deterministic model of a mote's command handling. Replies and
//! notifications are encoded to wire frames and decoded again on delivery,
//! so the connection under test sees exactly what a serial link would give
//! it. Timing follows whatever [`qsl_protocol::Clock`] the mote is built
//! with; share a [`qsl_protocol::ManualClock`] with the connection for
//! reproducible runs.
//!
//! Faults are scripted through [`MoteBehavior`]: forced result codes,
//! dropped or truncated replies, seeded random reply loss, rejected join
//! credentials and an under-granting manager.
//!
//! # Example
//!
//! ```
//! use qsl_mote_sim::{MoteBehavior, SimMote};
//! use qsl_protocol::{ChannelAdapter, Command, ManualClock};
//!
//! let clock = ManualClock::new();
//! let mut mote = SimMote::new(clock.clone(), MoteBehavior::default());
//! mote.init().unwrap();
//! mote.issue(Command::GetMoteStatus).unwrap();
//! clock.advance(10);
//! assert!(mote.poll_event().is_some());
//! ```

mod behavior;
mod mote;

pub use behavior::{MoteBehavior, ReplyFault, ReplyOverride};
pub use mote::{SentDatagram, SimMote};
