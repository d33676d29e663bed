//! Error types for the connection core.

use thiserror::Error;

use qsl_protocol::AdapterError;

use crate::state::ConnectionState;

/// Errors returned by [`crate::Connection`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QslError {
    /// `init` has not been called.
    #[error("connection not initialized")]
    NotInitialized,

    /// The channel adapter refused to initialize.
    #[error("channel adapter failed: {0}")]
    Adapter(#[from] AdapterError),

    /// Network id 0xFFFF is reserved.
    #[error("invalid network id 0x{0:04X}")]
    InvalidNetworkId(u16),

    /// `connect` was called while the connection was mid-handshake.
    #[error("cannot connect from state {0}")]
    UnexpectedState(ConnectionState),

    /// The handshake ended in `Disconnected`.
    #[error("connect failed")]
    ConnectFailed,

    /// The overall connect deadline elapsed.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// `send` requires a connected mote.
    #[error("not connected")]
    NotConnected,

    /// Payload exceeds the ceiling for its destination.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Offered payload size.
        size: usize,
        /// Ceiling for this destination.
        limit: usize,
    },

    /// The mote rejected the datagram or did not answer.
    #[error("send failed")]
    SendFailed,

    /// The send deadline elapsed.
    #[error("send timed out after {0} ms")]
    SendTimeout(u64),
}

/// Errors from [`crate::Inbox::push`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxError {
    /// Every slot holds an unread datagram.
    #[error("inbox full ({capacity} datagrams)")]
    Full {
        /// Inbox capacity.
        capacity: usize,
    },

    /// Datagram larger than a slot.
    #[error("datagram of {size} bytes exceeds the {max} byte slot")]
    Oversized {
        /// Datagram size.
        size: usize,
        /// Slot size.
        max: usize,
    },
}

/// Errors from [`crate::QslConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A timeout or period was configured as zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The response timeout cannot outlast the connect deadline.
    #[error("response timeout ({response_ms} ms) exceeds connect timeout ({connect_ms} ms)")]
    ResponseTimeoutTooLong {
        /// Configured response timeout.
        response_ms: u64,
        /// Configured connect timeout.
        connect_ms: u64,
    },
}
