//! Notification dispatch.
//!
//! Each unsolicited notification is matched against [`RULES`] in order and
//! the first rule whose guard holds decides what the connection does.

use qsl_protocol::{EventMask, MoteState, Notification};

use crate::state::{ConnectionState, Operation};

/// What the connection should do about a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    /// Transition to a state.
    Enter(ConnectionState),
    /// Schedule an operation after the command period.
    Schedule(Operation),
    /// Push the received datagram into the inbox.
    Deliver,
    /// Nothing beyond a log line.
    Log,
}

/// Inputs a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct NotifyContext<'a> {
    /// Current connection state.
    pub state: ConnectionState,
    /// Whether a bandwidth request is configured.
    pub service_requested: bool,
    /// The notification being dispatched.
    pub notification: &'a Notification,
}

impl NotifyContext<'_> {
    fn events(&self) -> Option<(EventMask, MoteState)> {
        match self.notification {
            Notification::Events { events, state, .. } => Some((*events, *state)),
            _ => None,
        }
    }

    fn has_event(&self, mask: EventMask) -> bool {
        self.events().is_some_and(|(events, _)| events.contains(mask))
    }

    fn mote_state_is(&self, state: MoteState) -> bool {
        self.events().is_some_and(|(_, mote)| mote == state)
    }
}

/// A guarded dispatch rule.
pub struct Rule {
    /// Name used in trace output.
    pub name: &'static str,
    guard: fn(&NotifyContext<'_>) -> bool,
    action: fn(&NotifyContext<'_>) -> NotifyAction,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

/// Dispatch rules, first match wins.
pub const RULES: &[Rule] = &[
    Rule {
        name: "joined",
        guard: |ctx| ctx.state == ConnectionState::Joining && ctx.has_event(EventMask::OPERATIONAL),
        action: |ctx| {
            if ctx.service_requested {
                NotifyAction::Enter(ConnectionState::RequestingService)
            } else {
                NotifyAction::Enter(ConnectionState::Connected)
            }
        },
    },
    Rule {
        name: "service_changed",
        guard: |ctx| {
            ctx.state == ConnectionState::RequestingService && ctx.has_event(EventMask::SVC_CHANGE)
        },
        action: |_| NotifyAction::Schedule(Operation::GetServiceInfo),
    },
    Rule {
        name: "restart_from_idle",
        guard: |ctx| ctx.state.is_connecting() && ctx.mote_state_is(MoteState::Idle),
        action: |_| NotifyAction::Enter(ConnectionState::PreJoin),
    },
    Rule {
        name: "lost_sync",
        guard: |ctx| {
            matches!(
                ctx.state,
                ConnectionState::Connected | ConnectionState::Sending
            ) && (ctx.mote_state_is(MoteState::Idle) || ctx.has_event(EventMask::DISCONNECTED))
        },
        action: |_| NotifyAction::Enter(ConnectionState::Disconnected),
    },
    Rule {
        name: "stale_operational",
        guard: |ctx| {
            ctx.state == ConnectionState::PreJoin && ctx.mote_state_is(MoteState::Operational)
        },
        action: |_| NotifyAction::Enter(ConnectionState::Resetting),
    },
    Rule {
        name: "receive",
        guard: |ctx| matches!(ctx.notification, Notification::Receive { .. }),
        action: |_| NotifyAction::Deliver,
    },
];

/// Run the rules against a notification.
///
/// Returns the matching rule's name with its action, or `None` and
/// [`NotifyAction::Log`] when nothing matched.
pub fn dispatch(ctx: &NotifyContext<'_>) -> (Option<&'static str>, NotifyAction) {
    RULES
        .iter()
        .find(|rule| (rule.guard)(ctx))
        .map(|rule| (Some(rule.name), (rule.action)(ctx)))
        .unwrap_or((None, NotifyAction::Log))
}
