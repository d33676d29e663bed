//! The channel adapter seam between the connection core and the mote.
//!
//! An adapter issues one command at a time and hands back replies and
//! notifications through [`ChannelAdapter::poll_event`]. Events are pulled by
//! the connection's step function, so however the adapter receives bytes
//! (a serial thread, a simulator), no event is ever handled concurrently with
//! connection logic.

use crate::commands::Command;
use crate::error::{AdapterError, ProtocolError};
use crate::replies::{Message, Notification, Reply};

/// An event delivered by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A decoded reply.
    Reply(Reply),
    /// A reply frame that failed to decode.
    MalformedReply {
        /// Command id from the frame header.
        command_id: u8,
        /// Why decoding failed.
        error: ProtocolError,
    },
    /// An unsolicited notification.
    Notification(Notification),
}

impl AdapterEvent {
    /// Turn a received frame into an event.
    ///
    /// Undecodable notifications are dropped (the mote may emit types this
    /// crate does not model); undecodable replies become
    /// [`AdapterEvent::MalformedReply`] so the waiting command can fail.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let id = *frame.first()?;
        match Message::decode(frame) {
            Ok(Message::Reply(reply)) => Some(AdapterEvent::Reply(reply)),
            Ok(Message::Notification(notification)) => {
                Some(AdapterEvent::Notification(notification))
            }
            Err(error) if Message::is_notification_id(id) => {
                log::debug!("dropping undecodable notification 0x{:02X}: {}", id, error);
                None
            }
            Err(error) => Some(AdapterEvent::MalformedReply {
                command_id: id,
                error,
            }),
        }
    }
}

/// Issues commands to a mote and delivers its replies and notifications.
pub trait ChannelAdapter {
    /// Prepare the adapter for use. Called once by the connection's `init`.
    fn init(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Submit a command. The reply arrives later through `poll_event`.
    fn issue(&mut self, command: Command) -> Result<(), AdapterError>;

    /// Abandon the command in flight, if any. A reply may still arrive.
    fn cancel_in_flight(&mut self);

    /// Take the next pending event, oldest first.
    fn poll_event(&mut self) -> Option<AdapterEvent>;
}

impl<T: ChannelAdapter + ?Sized> ChannelAdapter for Box<T> {
    fn init(&mut self) -> Result<(), AdapterError> {
        (**self).init()
    }

    fn issue(&mut self, command: Command) -> Result<(), AdapterError> {
        (**self).issue(command)
    }

    fn cancel_in_flight(&mut self) {
        (**self).cancel_in_flight()
    }

    fn poll_event(&mut self) -> Option<AdapterEvent> {
        (**self).poll_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::types::ResultCode;

    #[test]
    fn test_from_frame_reply() {
        let frame = Reply::Join { rc: ResultCode::Ok }.encode();
        assert_eq!(
            AdapterEvent::from_frame(&frame),
            Some(AdapterEvent::Reply(Reply::Join { rc: ResultCode::Ok }))
        );
    }

    #[test]
    fn test_from_frame_malformed_reply() {
        let event = AdapterEvent::from_frame(&[CMDID_OPEN_SOCKET, RC_OK]);
        assert!(matches!(
            event,
            Some(AdapterEvent::MalformedReply {
                command_id: CMDID_OPEN_SOCKET,
                ..
            })
        ));
    }

    #[test]
    fn test_from_frame_drops_bad_notification() {
        assert_eq!(AdapterEvent::from_frame(&[CMDID_EVENTS, 0x00]), None);
        assert_eq!(AdapterEvent::from_frame(&[]), None);
    }
}
