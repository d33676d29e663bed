//! Connection states and the operations the state machine can schedule.

use std::fmt;

use serde::{Deserialize, Serialize};

use qsl_protocol::CommandKind;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `init` has not run.
    NotInitialized,
    /// Idle, no session.
    Disconnected,
    /// Querying the mote and provisioning socket and credentials.
    PreJoin,
    /// Join issued, waiting for the operational event.
    Joining,
    /// Negotiating bandwidth with the manager.
    RequestingService,
    /// Bringing the mote back to idle.
    Resetting,
    /// Session established.
    Connected,
    /// A datagram is in flight.
    Sending,
    /// The last send failed. Transient.
    SendFailed,
}

impl ConnectionState {
    /// Short lowercase name, used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::NotInitialized => "not_initialized",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::PreJoin => "pre_join",
            ConnectionState::Joining => "joining",
            ConnectionState::RequestingService => "requesting_service",
            ConnectionState::Resetting => "resetting",
            ConnectionState::Connected => "connected",
            ConnectionState::Sending => "sending",
            ConnectionState::SendFailed => "send_failed",
        }
    }

    /// States a blocking `connect` keeps driving through.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::PreJoin
                | ConnectionState::Joining
                | ConnectionState::RequestingService
                | ConnectionState::Resetting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mote API operation the state machine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Read the mote status.
    QueryStatus,
    /// Open the UDP socket.
    OpenSocket,
    /// Bind the socket to the inbox port.
    BindSocket,
    /// Write the join key.
    SetJoinKey,
    /// Write the network id.
    SetNetworkId,
    /// Start joining.
    Join,
    /// Request bandwidth.
    RequestService,
    /// Poll the granted bandwidth.
    GetServiceInfo,
    /// Soft-reset the mote.
    Reset,
    /// Leave the network.
    Disconnect,
    /// Transmit the outbound payload.
    SendTo,
}

impl Operation {
    /// The command whose reply completes this operation.
    pub fn command_kind(&self) -> CommandKind {
        match self {
            Operation::QueryStatus => CommandKind::GetMoteStatus,
            Operation::OpenSocket => CommandKind::OpenSocket,
            Operation::BindSocket => CommandKind::BindSocket,
            Operation::SetJoinKey => CommandKind::SetJoinKey,
            Operation::SetNetworkId => CommandKind::SetNetworkId,
            Operation::Join => CommandKind::Join,
            Operation::RequestService => CommandKind::RequestService,
            Operation::GetServiceInfo => CommandKind::GetServiceInfo,
            Operation::Reset => CommandKind::Reset,
            Operation::Disconnect => CommandKind::Disconnect,
            Operation::SendTo => CommandKind::SendTo,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_kind())
    }
}

/// What the timeout supervisor slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Issue an operation once the delay elapses.
    Issue(Operation),
    /// The reply to an operation is overdue.
    ResponseTimeout(Operation),
}

/// What a single [`crate::Connection::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOutcome {
    /// Adapter events handled.
    pub events: usize,
    /// Scheduled item that fired, if any.
    pub fired: Option<Scheduled>,
}

impl StepOutcome {
    /// Nothing happened; the caller may idle-wait.
    pub fn is_idle(&self) -> bool {
        self.events == 0 && self.fired.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connecting_states() {
        assert!(ConnectionState::PreJoin.is_connecting());
        assert!(ConnectionState::Resetting.is_connecting());
        assert!(!ConnectionState::Connected.is_connecting());
        assert!(!ConnectionState::Sending.is_connecting());
    }

    #[test]
    fn test_operation_pairs_with_command() {
        assert_eq!(
            Operation::QueryStatus.command_kind(),
            CommandKind::GetMoteStatus
        );
        assert_eq!(Operation::SendTo.command_kind(), CommandKind::SendTo);
        assert!(StepOutcome::default().is_idle());
    }
}
