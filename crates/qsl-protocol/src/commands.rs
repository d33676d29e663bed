//! Commands that can be sent to the mote.

use bytes::{Buf, BufMut};

use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::*;

/// Commands issued by the connection flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read the mote status parameter.
    GetMoteStatus,

    /// Write the join key.
    SetJoinKey {
        /// Key to store.
        key: JoinKey,
    },

    /// Write the network id.
    SetNetworkId {
        /// Network to join.
        network_id: u16,
    },

    /// Start joining.
    Join,

    /// Leave the network; the mote resets afterwards.
    Disconnect,

    /// Soft-reset the mote.
    Reset,

    /// Ask the manager for bandwidth.
    RequestService {
        /// Service destination (normally the manager).
        dest_addr: u16,
        /// Service type.
        service_type: u8,
        /// Requested packet interval in milliseconds.
        value_ms: u32,
    },

    /// Query a previously requested service.
    GetServiceInfo {
        /// Service destination.
        dest_addr: u16,
        /// Service type.
        service_type: u8,
    },

    /// Open a socket.
    OpenSocket {
        /// Transport protocol.
        protocol: u8,
    },

    /// Bind a socket to a local port.
    BindSocket {
        /// Socket returned by `OpenSocket`.
        socket_id: u8,
        /// Local port.
        port: u16,
    },

    /// Send a datagram.
    SendTo {
        /// Socket to send through.
        socket_id: u8,
        /// Destination IPv6 address.
        dest_addr: [u8; IPV6_ADDR_LEN],
        /// Destination port.
        dest_port: u16,
        /// Service type to use.
        service_type: u8,
        /// Packet priority.
        priority: u8,
        /// Packet id (0xFFFF for no txDone notification).
        packet_id: u16,
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

impl Command {
    /// The command's kind, used to pair it with its reply.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetMoteStatus => CommandKind::GetMoteStatus,
            Command::SetJoinKey { .. } => CommandKind::SetJoinKey,
            Command::SetNetworkId { .. } => CommandKind::SetNetworkId,
            Command::Join => CommandKind::Join,
            Command::Disconnect => CommandKind::Disconnect,
            Command::Reset => CommandKind::Reset,
            Command::RequestService { .. } => CommandKind::RequestService,
            Command::GetServiceInfo { .. } => CommandKind::GetServiceInfo,
            Command::OpenSocket { .. } => CommandKind::OpenSocket,
            Command::BindSocket { .. } => CommandKind::BindSocket,
            Command::SendTo { .. } => CommandKind::SendTo,
        }
    }

    /// Encode the command as `command id + payload`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(MAX_FRAME_LENGTH);
        let kind = self.kind();
        buf.put_u8(kind.command_id());
        if let Some(param_id) = kind.param_id() {
            buf.put_u8(param_id);
        }

        match self {
            Command::GetMoteStatus | Command::Join | Command::Disconnect | Command::Reset => {}

            Command::SetJoinKey { key } => buf.put_slice(key.as_bytes()),

            Command::SetNetworkId { network_id } => buf.put_u16(*network_id),

            Command::RequestService {
                dest_addr,
                service_type,
                value_ms,
            } => {
                buf.put_u16(*dest_addr);
                buf.put_u8(*service_type);
                buf.put_u32(*value_ms);
            }

            Command::GetServiceInfo {
                dest_addr,
                service_type,
            } => {
                buf.put_u16(*dest_addr);
                buf.put_u8(*service_type);
            }

            Command::OpenSocket { protocol } => buf.put_u8(*protocol),

            Command::BindSocket { socket_id, port } => {
                buf.put_u8(*socket_id);
                buf.put_u16(*port);
            }

            Command::SendTo {
                socket_id,
                dest_addr,
                dest_port,
                service_type,
                priority,
                packet_id,
                payload,
            } => {
                buf.put_u8(*socket_id);
                buf.put_slice(dest_addr);
                buf.put_u16(*dest_port);
                buf.put_u8(*service_type);
                buf.put_u8(*priority);
                buf.put_u16(*packet_id);
                buf.put_slice(payload);
            }
        }

        if buf.len() > MAX_FRAME_LENGTH {
            return Err(ProtocolError::FrameTooLong {
                max: MAX_FRAME_LENGTH,
                actual: buf.len(),
            });
        }
        Ok(buf)
    }

    /// Decode a frame produced by [`Command::encode`].
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        }

        let command_id = frame[0];
        let mut body = &frame[1..];
        let param_id = match command_id {
            CMDID_GET_PARAMETER | CMDID_SET_PARAMETER => {
                need(frame, 2)?;
                body = &frame[2..];
                Some(frame[1])
            }
            _ => None,
        };
        let kind = match CommandKind::from_ids(command_id, param_id) {
            Some(kind) => kind,
            None => {
                return Err(match param_id {
                    Some(param) => ProtocolError::UnknownParameter(param),
                    None => ProtocolError::UnknownCommand(command_id),
                })
            }
        };

        let consumed = frame.len() - body.len();
        let command = match kind {
            CommandKind::GetMoteStatus => Command::GetMoteStatus,
            CommandKind::Join => Command::Join,
            CommandKind::Disconnect => Command::Disconnect,
            CommandKind::Reset => Command::Reset,

            CommandKind::SetJoinKey => {
                need(frame, consumed + JOIN_KEY_LEN)?;
                let key = JoinKey::from_slice(&body[..JOIN_KEY_LEN]).ok_or(
                    ProtocolError::FrameTooShort {
                        expected: consumed + JOIN_KEY_LEN,
                        actual: frame.len(),
                    },
                )?;
                Command::SetJoinKey { key }
            }

            CommandKind::SetNetworkId => {
                need(frame, consumed + 2)?;
                Command::SetNetworkId {
                    network_id: body.get_u16(),
                }
            }

            CommandKind::RequestService => {
                need(frame, consumed + 7)?;
                Command::RequestService {
                    dest_addr: body.get_u16(),
                    service_type: body.get_u8(),
                    value_ms: body.get_u32(),
                }
            }

            CommandKind::GetServiceInfo => {
                need(frame, consumed + 3)?;
                Command::GetServiceInfo {
                    dest_addr: body.get_u16(),
                    service_type: body.get_u8(),
                }
            }

            CommandKind::OpenSocket => {
                need(frame, consumed + 1)?;
                Command::OpenSocket {
                    protocol: body.get_u8(),
                }
            }

            CommandKind::BindSocket => {
                need(frame, consumed + 3)?;
                Command::BindSocket {
                    socket_id: body.get_u8(),
                    port: body.get_u16(),
                }
            }

            CommandKind::SendTo => {
                need(frame, consumed + 1 + IPV6_ADDR_LEN + 6)?;
                let socket_id = body.get_u8();
                let mut dest_addr = [0u8; IPV6_ADDR_LEN];
                body.copy_to_slice(&mut dest_addr);
                Command::SendTo {
                    socket_id,
                    dest_addr,
                    dest_port: body.get_u16(),
                    service_type: body.get_u8(),
                    priority: body.get_u8(),
                    packet_id: body.get_u16(),
                    payload: body.to_vec(),
                }
            }
        };
        Ok(command)
    }
}

pub(crate) fn need(frame: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if frame.len() < expected {
        return Err(ProtocolError::FrameTooShort {
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_network_id() {
        let frame = Command::SetNetworkId { network_id: 0x1234 }.encode().unwrap();
        assert_eq!(frame, vec![CMDID_SET_PARAMETER, PARAMID_NETWORK_ID, 0x12, 0x34]);
    }

    #[test]
    fn test_encode_bind_socket() {
        let frame = Command::BindSocket {
            socket_id: 22,
            port: INBOX_PORT,
        }
        .encode()
        .unwrap();
        assert_eq!(frame, vec![CMDID_BIND_SOCKET, 22, 0xF0, 0xB8]);
    }

    #[test]
    fn test_send_to_survives_the_wire() {
        let command = Command::SendTo {
            socket_id: 1,
            dest_addr: DEFAULT_DEST_IP,
            dest_port: DEFAULT_DEST_PORT,
            service_type: SERVICE_TYPE_BW,
            priority: PACKET_PRIORITY_MEDIUM,
            packet_id: PACKET_ID_NO_NOTIF,
            payload: b"temperature=21".to_vec(),
        };
        let frame = command.encode().unwrap();
        assert_eq!(Command::decode(&frame).unwrap(), command);
    }

    #[test]
    fn test_oversized_send_is_rejected() {
        let command = Command::SendTo {
            socket_id: 1,
            dest_addr: DEFAULT_DEST_IP,
            dest_port: DEFAULT_DEST_PORT,
            service_type: SERVICE_TYPE_BW,
            priority: PACKET_PRIORITY_MEDIUM,
            packet_id: PACKET_ID_NO_NOTIF,
            payload: vec![0u8; MAX_FRAME_LENGTH],
        };
        assert!(matches!(
            command.encode(),
            Err(ProtocolError::FrameTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_and_unknown() {
        assert_eq!(
            Command::decode(&[CMDID_SET_PARAMETER, PARAMID_NETWORK_ID, 0x12]),
            Err(ProtocolError::FrameTooShort {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            Command::decode(&[0x7F]),
            Err(ProtocolError::UnknownCommand(0x7F))
        );
        assert_eq!(
            Command::decode(&[CMDID_GET_PARAMETER, 0x55]),
            Err(ProtocolError::UnknownParameter(0x55))
        );
    }
}
