//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding mote API payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Frame is too long.
    #[error("frame too long: maximum {max} bytes, got {actual}")]
    FrameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Unknown command id.
    #[error("unknown command id: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Unknown parameter id in a get/setParameter frame.
    #[error("unknown parameter id: 0x{0:02X}")]
    UnknownParameter(u8),

    /// Unknown notification id.
    #[error("unknown notification id: 0x{0:02X}")]
    UnknownNotification(u8),
}

/// Errors reported by a [`crate::ChannelAdapter`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The adapter was used before `init`.
    #[error("channel adapter not initialized")]
    NotInitialized,

    /// A command is already waiting for its reply.
    #[error("a command is already in flight")]
    Busy,

    /// The link to the device is gone.
    #[error("device link closed")]
    Closed,

    /// The command could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] ProtocolError),
}
