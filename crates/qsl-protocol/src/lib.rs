//! SmartMesh IP Mote Serial API
//!
//! This crate provides the vocabulary a host uses to drive a SmartMesh IP
//! mote: command and notification identifiers, result codes, typed payload
//! codecs, and the collaborator traits the connection core is written
//! against.
//!
//! # Protocol Overview
//!
//! The mote exposes a request/response API over a serial link. Messages are:
//!
//! - **Commands** (host → mote): start with a `CMDID_*` byte
//! - **Replies** (mote → host): the command id followed by a result code
//! - **Notifications** (mote → host, unsolicited): events, inbound datagrams,
//!   time indications and the like
//!
//! Byte-level framing and checksums live beneath the [`ChannelAdapter`]; the
//! codecs here operate on already-delimited payloads.
//!
//! # Example
//!
//! ```rust
//! use qsl_protocol::{Command, Message, Reply, ResultCode};
//!
//! let frame = Command::SetNetworkId { network_id: 0x1234 }.encode()?;
//! assert_eq!(frame[0], qsl_protocol::CMDID_SET_PARAMETER);
//!
//! let reply = Reply::Join { rc: ResultCode::Ok }.encode();
//! assert!(matches!(Message::decode(&reply)?, Message::Reply(_)));
//! # Ok::<(), qsl_protocol::ProtocolError>(())
//! ```

mod adapter;
mod commands;
mod constants;
mod error;
mod platform;
mod replies;
mod types;

pub use adapter::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use platform::*;
pub use replies::*;
pub use types::*;
