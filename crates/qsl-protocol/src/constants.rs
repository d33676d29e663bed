//! Protocol constants
//!
//! Command identifiers, notification identifiers, parameter identifiers,
//! result codes and the fixed values the QuickStart connection flow relies on.

// ============================================================================
// Command Identifiers (host → mote)
// ============================================================================

/// Write a mote parameter.
pub const CMDID_SET_PARAMETER: u8 = 0x01;
/// Read a mote parameter.
pub const CMDID_GET_PARAMETER: u8 = 0x02;
/// Start searching for and joining a network.
pub const CMDID_JOIN: u8 = 0x06;
/// Leave the network gracefully; the mote resets afterwards.
pub const CMDID_DISCONNECT: u8 = 0x07;
/// Soft-reset the mote.
pub const CMDID_RESET: u8 = 0x08;
/// Request bandwidth from the network manager.
pub const CMDID_REQUEST_SERVICE: u8 = 0x11;
/// Query the state of a service request.
pub const CMDID_GET_SERVICE_INFO: u8 = 0x12;
/// Open a datagram socket.
pub const CMDID_OPEN_SOCKET: u8 = 0x15;
/// Bind a socket to a local port.
pub const CMDID_BIND_SOCKET: u8 = 0x17;
/// Send a datagram through an open socket.
pub const CMDID_SEND_TO: u8 = 0x18;

// ============================================================================
// Notification Identifiers (mote → host, unsolicited)
// ============================================================================

/// Time indication (network time snapshot).
pub const CMDID_TIME_INDICATION: u8 = 0x0D;
/// Mote events and state.
pub const CMDID_EVENTS: u8 = 0x0F;
/// Inbound datagram.
pub const CMDID_RECEIVE: u8 = 0x19;
/// Transmission of a tagged packet completed.
pub const CMDID_TX_DONE: u8 = 0x25;
/// Advertisement heard while searching.
pub const CMDID_ADV_RECEIVED: u8 = 0x26;

// ============================================================================
// Parameter Identifiers
// ============================================================================

/// Join key parameter (write only).
pub const PARAMID_JOIN_KEY: u8 = 0x02;
/// Network identifier parameter.
pub const PARAMID_NETWORK_ID: u8 = 0x03;
/// Mote status parameter (read only).
pub const PARAMID_MOTE_STATUS: u8 = 0x0E;

// ============================================================================
// Result Codes
// ============================================================================

/// Command completed successfully.
pub const RC_OK: u8 = 0x00;
/// Generic error.
pub const RC_ERROR: u8 = 0x01;
/// The resource is busy (e.g. port already bound).
pub const RC_BUSY: u8 = 0x03;
/// Invalid command length.
pub const RC_INVALID_LEN: u8 = 0x04;
/// The mote is in a state where the command cannot run.
pub const RC_INVALID_STATE: u8 = 0x05;
/// The command is not supported.
pub const RC_UNSUPPORTED: u8 = 0x06;
/// Unknown parameter id.
pub const RC_UNKNOWN_PARAM: u8 = 0x07;
/// Unknown command id.
pub const RC_UNKNOWN_CMD: u8 = 0x08;
/// Persistent storage write failed.
pub const RC_WRITE_FAIL: u8 = 0x09;
/// Persistent storage read failed.
pub const RC_READ_FAIL: u8 = 0x0A;
/// Supply voltage too low.
pub const RC_LOW_VOLTAGE: u8 = 0x0B;
/// Out of sockets, queue space or similar.
pub const RC_NO_RESOURCES: u8 = 0x0C;
/// Join key, network id or other join configuration missing.
pub const RC_INCOMPLETE_JOIN_INFO: u8 = 0x0D;
/// Referenced item (socket, service) does not exist.
pub const RC_NOT_FOUND: u8 = 0x0E;
/// Value out of range.
pub const RC_INVALID_VALUE: u8 = 0x0F;
/// Access denied.
pub const RC_ACCESS_DENIED: u8 = 0x10;

// ============================================================================
// Mote States
// ============================================================================

/// Booted, not searching.
pub const MOTE_STATE_IDLE: u8 = 0x01;
/// Listening for advertisements.
pub const MOTE_STATE_SEARCHING: u8 = 0x02;
/// Negotiating the join with the manager.
pub const MOTE_STATE_NEGOTIATING: u8 = 0x03;
/// Joined, links not yet configured.
pub const MOTE_STATE_CONNECTED: u8 = 0x04;
/// Fully joined and able to send data.
pub const MOTE_STATE_OPERATIONAL: u8 = 0x05;

// ============================================================================
// Event Mask Bits
// ============================================================================

/// Mote booted.
pub const MOTE_EVENT_MASK_BOOT: u32 = 0x0001;
/// Alarm state changed.
pub const MOTE_EVENT_MASK_ALARM_CHANGE: u32 = 0x0002;
/// Network time changed.
pub const MOTE_EVENT_MASK_TIME_CHANGE: u32 = 0x0004;
/// Join attempt failed.
pub const MOTE_EVENT_MASK_JOIN_FAIL: u32 = 0x0008;
/// Mote lost the network.
pub const MOTE_EVENT_MASK_DISCONNECTED: u32 = 0x0010;
/// Mote became operational.
pub const MOTE_EVENT_MASK_OPERATIONAL: u32 = 0x0020;
/// Granted service changed.
pub const MOTE_EVENT_MASK_SVC_CHANGE: u32 = 0x0080;
/// Join attempt started.
pub const MOTE_EVENT_MASK_JOIN_STARTED: u32 = 0x0100;

// ============================================================================
// Services, Sockets and Packets
// ============================================================================

/// Service destination: the network manager.
pub const SERVICE_ADDRESS: u16 = 0xFFFE;
/// Bandwidth service type.
pub const SERVICE_TYPE_BW: u8 = 0x00;
/// The service request has been fulfilled.
pub const SERVICE_STATE_COMPLETED: u8 = 0x00;
/// The service request is still being processed.
pub const SERVICE_STATE_PENDING: u8 = 0x01;
/// UDP socket protocol.
pub const PROTOCOL_TYPE_UDP: u8 = 0x00;
/// Medium packet priority.
pub const PACKET_PRIORITY_MEDIUM: u8 = 0x01;
/// Packet id meaning "no txDone notification wanted".
pub const PACKET_ID_NO_NOTIF: u16 = 0xFFFF;

// ============================================================================
// Sizes and Defaults
// ============================================================================

/// Length of the join key in bytes.
pub const JOIN_KEY_LEN: usize = 16;
/// Length of an IPv6 address in bytes.
pub const IPV6_ADDR_LEN: usize = 16;
/// Largest command/reply payload carried over the serial API.
pub const MAX_FRAME_LENGTH: usize = 128;
/// Network id reserved as invalid.
pub const INVALID_NET_ID: u16 = 0xFFFF;
/// Network id used when the caller passes 0.
pub const DEFAULT_NET_ID: u16 = 1229;
/// Join key used when the caller gives none ("DUSTNETWORKSROCK").
pub const DEFAULT_JOIN_KEY: [u8; JOIN_KEY_LEN] = *b"DUSTNETWORKSROCK";

/// First port of the compressible well-known band.
pub const WELL_KNOWN_PORT_1: u16 = 0xF0B8;
/// Last port of the compressible well-known band.
pub const WELL_KNOWN_PORT_8: u16 = 0xF0BF;
/// Local port inbound datagrams are bound to.
pub const INBOX_PORT: u16 = WELL_KNOWN_PORT_1;
/// Destination port used when the caller passes 0.
pub const DEFAULT_DEST_PORT: u16 = WELL_KNOWN_PORT_1;
/// Manager address (ff02::2).
pub const DEFAULT_DEST_IP: [u8; IPV6_ADDR_LEN] = [
    0xFF, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x02,
];

// ============================================================================
// Payload Size Ceilings
// ============================================================================

/// Manager destination, both ports well-known.
pub const PAYLOAD_SIZE_LIMIT_MNG_HIGH: usize = 90;
/// Manager destination, one port well-known.
pub const PAYLOAD_SIZE_LIMIT_MNG_MED: usize = 87;
/// Manager destination, no port well-known.
pub const PAYLOAD_SIZE_LIMIT_MNG_LOW: usize = 80;
/// Other destination, both ports well-known.
pub const PAYLOAD_SIZE_LIMIT_IP_HIGH: usize = 74;
/// Other destination, one port well-known.
pub const PAYLOAD_SIZE_LIMIT_IP_MED: usize = 71;
/// Other destination, no port well-known.
pub const PAYLOAD_SIZE_LIMIT_IP_LOW: usize = 66;
/// Largest payload any destination accepts.
pub const DEFAULT_PAYLOAD_SIZE_LIMIT: usize = PAYLOAD_SIZE_LIMIT_MNG_HIGH;
