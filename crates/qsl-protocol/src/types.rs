//! Common types used in the protocol.

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Result code carried in the first byte of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// Command succeeded.
    Ok,
    /// Generic error.
    Error,
    /// Resource busy.
    Busy,
    /// Bad command length.
    InvalidLen,
    /// Mote in the wrong state for this command.
    InvalidState,
    /// Command not supported.
    Unsupported,
    /// Unknown parameter.
    UnknownParam,
    /// Unknown command.
    UnknownCmd,
    /// Storage write failed.
    WriteFail,
    /// Storage read failed.
    ReadFail,
    /// Supply voltage too low.
    LowVoltage,
    /// Out of sockets or queue space.
    NoResources,
    /// Join configuration incomplete.
    IncompleteJoinInfo,
    /// Referenced item not found.
    NotFound,
    /// Value out of range.
    InvalidValue,
    /// Access denied.
    AccessDenied,
    /// Code outside the known vocabulary.
    Other(u8),
}

impl ResultCode {
    /// Whether this is [`ResultCode::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

impl From<u8> for ResultCode {
    fn from(code: u8) -> Self {
        match code {
            RC_OK => ResultCode::Ok,
            RC_ERROR => ResultCode::Error,
            RC_BUSY => ResultCode::Busy,
            RC_INVALID_LEN => ResultCode::InvalidLen,
            RC_INVALID_STATE => ResultCode::InvalidState,
            RC_UNSUPPORTED => ResultCode::Unsupported,
            RC_UNKNOWN_PARAM => ResultCode::UnknownParam,
            RC_UNKNOWN_CMD => ResultCode::UnknownCmd,
            RC_WRITE_FAIL => ResultCode::WriteFail,
            RC_READ_FAIL => ResultCode::ReadFail,
            RC_LOW_VOLTAGE => ResultCode::LowVoltage,
            RC_NO_RESOURCES => ResultCode::NoResources,
            RC_INCOMPLETE_JOIN_INFO => ResultCode::IncompleteJoinInfo,
            RC_NOT_FOUND => ResultCode::NotFound,
            RC_INVALID_VALUE => ResultCode::InvalidValue,
            RC_ACCESS_DENIED => ResultCode::AccessDenied,
            _ => ResultCode::Other(code),
        }
    }
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> Self {
        match code {
            ResultCode::Ok => RC_OK,
            ResultCode::Error => RC_ERROR,
            ResultCode::Busy => RC_BUSY,
            ResultCode::InvalidLen => RC_INVALID_LEN,
            ResultCode::InvalidState => RC_INVALID_STATE,
            ResultCode::Unsupported => RC_UNSUPPORTED,
            ResultCode::UnknownParam => RC_UNKNOWN_PARAM,
            ResultCode::UnknownCmd => RC_UNKNOWN_CMD,
            ResultCode::WriteFail => RC_WRITE_FAIL,
            ResultCode::ReadFail => RC_READ_FAIL,
            ResultCode::LowVoltage => RC_LOW_VOLTAGE,
            ResultCode::NoResources => RC_NO_RESOURCES,
            ResultCode::IncompleteJoinInfo => RC_INCOMPLETE_JOIN_INFO,
            ResultCode::NotFound => RC_NOT_FOUND,
            ResultCode::InvalidValue => RC_INVALID_VALUE,
            ResultCode::AccessDenied => RC_ACCESS_DENIED,
            ResultCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Other(code) => write!(f, "unexpected (0x{:02X})", code),
            other => write!(f, "{:?} (0x{:02X})", other, u8::from(*other)),
        }
    }
}

/// Mote state as reported by the status parameter and events notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoteState {
    /// Booted, waiting for a join command.
    Idle,
    /// Listening for advertisements.
    Searching,
    /// Negotiating with the manager.
    Negotiating,
    /// Joined, links pending.
    Connected,
    /// Joined and able to carry data.
    Operational,
    /// Any other reported value.
    Other(u8),
}

impl From<u8> for MoteState {
    fn from(value: u8) -> Self {
        match value {
            MOTE_STATE_IDLE => MoteState::Idle,
            MOTE_STATE_SEARCHING => MoteState::Searching,
            MOTE_STATE_NEGOTIATING => MoteState::Negotiating,
            MOTE_STATE_CONNECTED => MoteState::Connected,
            MOTE_STATE_OPERATIONAL => MoteState::Operational,
            _ => MoteState::Other(value),
        }
    }
}

impl From<MoteState> for u8 {
    fn from(value: MoteState) -> Self {
        match value {
            MoteState::Idle => MOTE_STATE_IDLE,
            MoteState::Searching => MOTE_STATE_SEARCHING,
            MoteState::Negotiating => MOTE_STATE_NEGOTIATING,
            MoteState::Connected => MOTE_STATE_CONNECTED,
            MoteState::Operational => MOTE_STATE_OPERATIONAL,
            MoteState::Other(v) => v,
        }
    }
}

/// Bitmask of events carried by the events notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct EventMask(pub u32);

impl EventMask {
    /// No events.
    pub const NONE: EventMask = EventMask(0);
    /// Mote booted.
    pub const BOOT: EventMask = EventMask(MOTE_EVENT_MASK_BOOT);
    /// Mote lost the network.
    pub const DISCONNECTED: EventMask = EventMask(MOTE_EVENT_MASK_DISCONNECTED);
    /// Mote became operational.
    pub const OPERATIONAL: EventMask = EventMask(MOTE_EVENT_MASK_OPERATIONAL);
    /// Granted service changed.
    pub const SVC_CHANGE: EventMask = EventMask(MOTE_EVENT_MASK_SVC_CHANGE);
    /// Join attempt started.
    pub const JOIN_STARTED: EventMask = EventMask(MOTE_EVENT_MASK_JOIN_STARTED);
    /// Join attempt failed.
    pub const JOIN_FAIL: EventMask = EventMask(MOTE_EVENT_MASK_JOIN_FAIL);

    /// True when every bit of `other` is set.
    pub fn contains(&self, other: EventMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// A 16-byte join key. Opaque to this crate.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct JoinKey(pub [u8; JOIN_KEY_LEN]);

impl JoinKey {
    /// Create from a slice. Returns None if slice is wrong length.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == JOIN_KEY_LEN {
            let mut bytes = [0u8; JOIN_KEY_LEN];
            bytes.copy_from_slice(slice);
            Some(JoinKey(bytes))
        } else {
            None
        }
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; JOIN_KEY_LEN] {
        &self.0
    }
}

impl Default for JoinKey {
    fn default() -> Self {
        JoinKey(DEFAULT_JOIN_KEY)
    }
}

// Keys never show up in logs.
impl std::fmt::Debug for JoinKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JoinKey(..)")
    }
}

/// The commands the connection flow issues, without their arguments.
///
/// Used to match replies to the command that is waiting for them and to
/// address per-command behavior in the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// `getParameter<moteStatus>`.
    GetMoteStatus,
    /// `setParameter<joinKey>`.
    SetJoinKey,
    /// `setParameter<networkId>`.
    SetNetworkId,
    /// `join`.
    Join,
    /// `disconnect`.
    Disconnect,
    /// `reset`.
    Reset,
    /// `requestService`.
    RequestService,
    /// `getServiceInfo`.
    GetServiceInfo,
    /// `openSocket`.
    OpenSocket,
    /// `bindSocket`.
    BindSocket,
    /// `sendTo`.
    SendTo,
}

impl CommandKind {
    /// Serial API command id.
    pub fn command_id(&self) -> u8 {
        match self {
            CommandKind::GetMoteStatus => CMDID_GET_PARAMETER,
            CommandKind::SetJoinKey | CommandKind::SetNetworkId => CMDID_SET_PARAMETER,
            CommandKind::Join => CMDID_JOIN,
            CommandKind::Disconnect => CMDID_DISCONNECT,
            CommandKind::Reset => CMDID_RESET,
            CommandKind::RequestService => CMDID_REQUEST_SERVICE,
            CommandKind::GetServiceInfo => CMDID_GET_SERVICE_INFO,
            CommandKind::OpenSocket => CMDID_OPEN_SOCKET,
            CommandKind::BindSocket => CMDID_BIND_SOCKET,
            CommandKind::SendTo => CMDID_SEND_TO,
        }
    }

    /// Parameter id for the get/setParameter commands.
    pub fn param_id(&self) -> Option<u8> {
        match self {
            CommandKind::GetMoteStatus => Some(PARAMID_MOTE_STATUS),
            CommandKind::SetJoinKey => Some(PARAMID_JOIN_KEY),
            CommandKind::SetNetworkId => Some(PARAMID_NETWORK_ID),
            _ => None,
        }
    }

    /// Resolve a command id (plus parameter id for parameter commands).
    pub fn from_ids(command_id: u8, param_id: Option<u8>) -> Option<Self> {
        match (command_id, param_id) {
            (CMDID_GET_PARAMETER, Some(PARAMID_MOTE_STATUS)) => Some(CommandKind::GetMoteStatus),
            (CMDID_SET_PARAMETER, Some(PARAMID_JOIN_KEY)) => Some(CommandKind::SetJoinKey),
            (CMDID_SET_PARAMETER, Some(PARAMID_NETWORK_ID)) => Some(CommandKind::SetNetworkId),
            (CMDID_JOIN, _) => Some(CommandKind::Join),
            (CMDID_DISCONNECT, _) => Some(CommandKind::Disconnect),
            (CMDID_RESET, _) => Some(CommandKind::Reset),
            (CMDID_REQUEST_SERVICE, _) => Some(CommandKind::RequestService),
            (CMDID_GET_SERVICE_INFO, _) => Some(CommandKind::GetServiceInfo),
            (CMDID_OPEN_SOCKET, _) => Some(CommandKind::OpenSocket),
            (CMDID_BIND_SOCKET, _) => Some(CommandKind::BindSocket),
            (CMDID_SEND_TO, _) => Some(CommandKind::SendTo),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::GetMoteStatus => "getParameter<moteStatus>",
            CommandKind::SetJoinKey => "setParameter<joinKey>",
            CommandKind::SetNetworkId => "setParameter<networkId>",
            CommandKind::Join => "join",
            CommandKind::Disconnect => "disconnect",
            CommandKind::Reset => "reset",
            CommandKind::RequestService => "requestService",
            CommandKind::GetServiceInfo => "getServiceInfo",
            CommandKind::OpenSocket => "openSocket",
            CommandKind::BindSocket => "bindSocket",
            CommandKind::SendTo => "sendTo",
        };
        f.write_str(name)
    }
}
