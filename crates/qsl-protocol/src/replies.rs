//! Replies and notifications from the mote.
//!
//! Reply frames are `command id + result code [+ parameter id] + fields`.
//! Fields are only present when the result code is OK; an error reply is
//! just the header. Notification frames are `notification id + fields`.

use bytes::{Buf, BufMut};

use crate::commands::need;
use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::*;

/// Fields of the `moteStatus` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoteStatus {
    /// Current mote state.
    pub state: MoteState,
    /// Number of parents in the mesh.
    pub num_parents: u8,
    /// Active alarms bitmask.
    pub alarms: u32,
}

/// State of a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Request fulfilled; `value_ms` is what was granted.
    Completed,
    /// Request still being negotiated.
    Pending,
    /// Any other reported value.
    Other(u8),
}

impl From<u8> for ServiceState {
    fn from(value: u8) -> Self {
        match value {
            SERVICE_STATE_COMPLETED => ServiceState::Completed,
            SERVICE_STATE_PENDING => ServiceState::Pending,
            _ => ServiceState::Other(value),
        }
    }
}

impl From<ServiceState> for u8 {
    fn from(value: ServiceState) -> Self {
        match value {
            ServiceState::Completed => SERVICE_STATE_COMPLETED,
            ServiceState::Pending => SERVICE_STATE_PENDING,
            ServiceState::Other(v) => v,
        }
    }
}

/// Fields of a `getServiceInfo` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service destination.
    pub dest_addr: u16,
    /// Service type.
    pub service_type: u8,
    /// Negotiation state.
    pub state: ServiceState,
    /// Granted interval in milliseconds.
    pub value_ms: u32,
}

/// Replies received from the mote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Reply to `getParameter<moteStatus>`.
    MoteStatus {
        /// Result code.
        rc: ResultCode,
        /// Status, present when `rc` is OK.
        status: Option<MoteStatus>,
    },
    /// Reply to `setParameter<joinKey>`.
    SetJoinKey {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `setParameter<networkId>`.
    SetNetworkId {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `join`.
    Join {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `disconnect`.
    Disconnect {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `reset`.
    Reset {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `requestService`.
    RequestService {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `getServiceInfo`.
    ServiceInfo {
        /// Result code.
        rc: ResultCode,
        /// Service fields, present when `rc` is OK.
        info: Option<ServiceInfo>,
    },
    /// Reply to `openSocket`.
    OpenSocket {
        /// Result code.
        rc: ResultCode,
        /// New socket, present when `rc` is OK.
        socket_id: Option<u8>,
    },
    /// Reply to `bindSocket`.
    BindSocket {
        /// Result code.
        rc: ResultCode,
    },
    /// Reply to `sendTo`.
    SendTo {
        /// Result code.
        rc: ResultCode,
    },
}

impl Reply {
    /// Build a reply that carries only the header, the shape of every error reply.
    pub fn header_only(kind: CommandKind, rc: ResultCode) -> Self {
        match kind {
            CommandKind::GetMoteStatus => Reply::MoteStatus { rc, status: None },
            CommandKind::SetJoinKey => Reply::SetJoinKey { rc },
            CommandKind::SetNetworkId => Reply::SetNetworkId { rc },
            CommandKind::Join => Reply::Join { rc },
            CommandKind::Disconnect => Reply::Disconnect { rc },
            CommandKind::Reset => Reply::Reset { rc },
            CommandKind::RequestService => Reply::RequestService { rc },
            CommandKind::GetServiceInfo => Reply::ServiceInfo { rc, info: None },
            CommandKind::OpenSocket => Reply::OpenSocket { rc, socket_id: None },
            CommandKind::BindSocket => Reply::BindSocket { rc },
            CommandKind::SendTo => Reply::SendTo { rc },
        }
    }

    /// The command this reply answers.
    pub fn kind(&self) -> CommandKind {
        match self {
            Reply::MoteStatus { .. } => CommandKind::GetMoteStatus,
            Reply::SetJoinKey { .. } => CommandKind::SetJoinKey,
            Reply::SetNetworkId { .. } => CommandKind::SetNetworkId,
            Reply::Join { .. } => CommandKind::Join,
            Reply::Disconnect { .. } => CommandKind::Disconnect,
            Reply::Reset { .. } => CommandKind::Reset,
            Reply::RequestService { .. } => CommandKind::RequestService,
            Reply::ServiceInfo { .. } => CommandKind::GetServiceInfo,
            Reply::OpenSocket { .. } => CommandKind::OpenSocket,
            Reply::BindSocket { .. } => CommandKind::BindSocket,
            Reply::SendTo { .. } => CommandKind::SendTo,
        }
    }

    /// The result code.
    pub fn rc(&self) -> ResultCode {
        match self {
            Reply::MoteStatus { rc, .. }
            | Reply::SetJoinKey { rc }
            | Reply::SetNetworkId { rc }
            | Reply::Join { rc }
            | Reply::Disconnect { rc }
            | Reply::Reset { rc }
            | Reply::RequestService { rc }
            | Reply::ServiceInfo { rc, .. }
            | Reply::OpenSocket { rc, .. }
            | Reply::BindSocket { rc }
            | Reply::SendTo { rc } => *rc,
        }
    }

    /// Encode the reply as a frame.
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut buf = Vec::with_capacity(16);
        buf.put_u8(kind.command_id());
        buf.put_u8(self.rc().into());
        if let Some(param_id) = kind.param_id() {
            buf.put_u8(param_id);
        }

        match self {
            Reply::MoteStatus {
                status: Some(status),
                ..
            } => {
                buf.put_u8(status.state.into());
                buf.put_u8(status.num_parents);
                buf.put_u32(status.alarms);
            }
            Reply::ServiceInfo {
                info: Some(info), ..
            } => {
                buf.put_u16(info.dest_addr);
                buf.put_u8(info.service_type);
                buf.put_u8(info.state.into());
                buf.put_u32(info.value_ms);
            }
            Reply::OpenSocket {
                socket_id: Some(socket_id),
                ..
            } => buf.put_u8(*socket_id),
            _ => {}
        }
        buf
    }

    /// Decode a reply frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        need(frame, 2)?;
        let command_id = frame[0];
        let rc = ResultCode::from(frame[1]);

        let mut header = 2;
        let param_id = match command_id {
            CMDID_GET_PARAMETER | CMDID_SET_PARAMETER => {
                need(frame, 3)?;
                header = 3;
                Some(frame[2])
            }
            _ => None,
        };
        let kind = CommandKind::from_ids(command_id, param_id).ok_or(match param_id {
            Some(param) => ProtocolError::UnknownParameter(param),
            None => ProtocolError::UnknownCommand(command_id),
        })?;

        if !rc.is_ok() {
            return Ok(Reply::header_only(kind, rc));
        }

        let mut body = &frame[header..];
        let reply = match kind {
            CommandKind::GetMoteStatus => {
                need(frame, header + 6)?;
                Reply::MoteStatus {
                    rc,
                    status: Some(MoteStatus {
                        state: MoteState::from(body.get_u8()),
                        num_parents: body.get_u8(),
                        alarms: body.get_u32(),
                    }),
                }
            }
            CommandKind::GetServiceInfo => {
                need(frame, header + 8)?;
                Reply::ServiceInfo {
                    rc,
                    info: Some(ServiceInfo {
                        dest_addr: body.get_u16(),
                        service_type: body.get_u8(),
                        state: ServiceState::from(body.get_u8()),
                        value_ms: body.get_u32(),
                    }),
                }
            }
            CommandKind::OpenSocket => {
                need(frame, header + 1)?;
                Reply::OpenSocket {
                    rc,
                    socket_id: Some(body.get_u8()),
                }
            }
            other => Reply::header_only(other, rc),
        };
        Ok(reply)
    }
}

/// Unsolicited notifications from the mote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Events and current mote state.
    Events {
        /// Events that occurred since the last notification.
        events: EventMask,
        /// Mote state after the events.
        state: MoteState,
        /// Active alarms.
        alarms: u32,
    },

    /// Inbound datagram.
    Receive {
        /// Socket the datagram arrived on.
        socket_id: u8,
        /// Sender address.
        src_addr: [u8; IPV6_ADDR_LEN],
        /// Sender port.
        src_port: u16,
        /// Datagram payload.
        payload: Vec<u8>,
    },

    /// Network time snapshot.
    TimeIndication {
        /// Seconds since boot.
        uptime: u32,
        /// UTC seconds.
        utc_secs: u64,
        /// UTC microseconds.
        utc_usecs: u32,
    },

    /// A tagged packet left the mote.
    TxDone {
        /// Packet id given to `sendTo`.
        packet_id: u16,
        /// Zero on success.
        status: u8,
    },

    /// Advertisement heard while searching.
    AdvReceived {
        /// Advertised network.
        net_id: u16,
        /// Advertising mote.
        mote_id: u16,
        /// Received signal strength.
        rssi: i8,
        /// Join priority.
        join_pri: u8,
    },
}

impl Notification {
    /// Notification id on the wire.
    pub fn notification_id(&self) -> u8 {
        match self {
            Notification::Events { .. } => CMDID_EVENTS,
            Notification::Receive { .. } => CMDID_RECEIVE,
            Notification::TimeIndication { .. } => CMDID_TIME_INDICATION,
            Notification::TxDone { .. } => CMDID_TX_DONE,
            Notification::AdvReceived { .. } => CMDID_ADV_RECEIVED,
        }
    }

    /// Encode the notification as a frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_FRAME_LENGTH);
        buf.put_u8(self.notification_id());
        match self {
            Notification::Events {
                events,
                state,
                alarms,
            } => {
                buf.put_u32(events.0);
                buf.put_u8((*state).into());
                buf.put_u32(*alarms);
            }
            Notification::Receive {
                socket_id,
                src_addr,
                src_port,
                payload,
            } => {
                buf.put_u8(*socket_id);
                buf.put_slice(src_addr);
                buf.put_u16(*src_port);
                buf.put_slice(payload);
            }
            Notification::TimeIndication {
                uptime,
                utc_secs,
                utc_usecs,
            } => {
                buf.put_u32(*uptime);
                buf.put_u64(*utc_secs);
                buf.put_u32(*utc_usecs);
            }
            Notification::TxDone { packet_id, status } => {
                buf.put_u16(*packet_id);
                buf.put_u8(*status);
            }
            Notification::AdvReceived {
                net_id,
                mote_id,
                rssi,
                join_pri,
            } => {
                buf.put_u16(*net_id);
                buf.put_u16(*mote_id);
                buf.put_i8(*rssi);
                buf.put_u8(*join_pri);
            }
        }
        buf
    }

    /// Decode a notification frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        need(frame, 1)?;
        let mut body = &frame[1..];
        let notification = match frame[0] {
            CMDID_EVENTS => {
                need(frame, 10)?;
                Notification::Events {
                    events: EventMask(body.get_u32()),
                    state: MoteState::from(body.get_u8()),
                    alarms: body.get_u32(),
                }
            }
            CMDID_RECEIVE => {
                need(frame, 1 + 1 + IPV6_ADDR_LEN + 2)?;
                let socket_id = body.get_u8();
                let mut src_addr = [0u8; IPV6_ADDR_LEN];
                body.copy_to_slice(&mut src_addr);
                Notification::Receive {
                    socket_id,
                    src_addr,
                    src_port: body.get_u16(),
                    payload: body.to_vec(),
                }
            }
            CMDID_TIME_INDICATION => {
                need(frame, 17)?;
                Notification::TimeIndication {
                    uptime: body.get_u32(),
                    utc_secs: body.get_u64(),
                    utc_usecs: body.get_u32(),
                }
            }
            CMDID_TX_DONE => {
                need(frame, 4)?;
                Notification::TxDone {
                    packet_id: body.get_u16(),
                    status: body.get_u8(),
                }
            }
            CMDID_ADV_RECEIVED => {
                need(frame, 7)?;
                Notification::AdvReceived {
                    net_id: body.get_u16(),
                    mote_id: body.get_u16(),
                    rssi: body.get_i8(),
                    join_pri: body.get_u8(),
                }
            }
            other => {
                log::trace!("unknown notification id 0x{:02X} ({} bytes)", other, frame.len());
                return Err(ProtocolError::UnknownNotification(other));
            }
        };
        Ok(notification)
    }
}

/// Any frame received from the mote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A reply to a command.
    Reply(Reply),
    /// An unsolicited notification.
    Notification(Notification),
}

impl Message {
    /// Whether a frame id belongs to a notification.
    pub fn is_notification_id(id: u8) -> bool {
        matches!(
            id,
            CMDID_EVENTS | CMDID_RECEIVE | CMDID_TIME_INDICATION | CMDID_TX_DONE | CMDID_ADV_RECEIVED
        )
    }

    /// Decode a message from a frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        need(frame, 1)?;
        if Self::is_notification_id(frame[0]) {
            Ok(Message::Notification(Notification::decode(frame)?))
        } else {
            Ok(Message::Reply(Reply::decode(frame)?))
        }
    }
}
