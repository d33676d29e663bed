//! The simulated mote.
//!
//! `SimMote` accepts commands through [`ChannelAdapter::issue`], executes
//! them against a small model of the mote (state, sockets, join
//! credentials, service negotiation) and queues the encoded reply frames and
//! notifications with a due time on the shared clock. `poll_event` releases
//! whatever is due, decoding each frame the way a serial adapter would.

use std::collections::BTreeMap;

use qsl_protocol::{
    AdapterError, AdapterEvent, ChannelAdapter, Clock, Command, CommandKind, EventMask, JoinKey,
    MoteState, MoteStatus, Notification, Reply, ResultCode, ServiceInfo, ServiceState,
    DEFAULT_DEST_IP, IPV6_ADDR_LEN, PROTOCOL_TYPE_UDP,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::behavior::{take_matching, MoteBehavior};

/// A datagram the mote was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Destination address.
    pub dest_addr: [u8; IPV6_ADDR_LEN],
    /// Destination port.
    pub dest_port: u16,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Outgoing {
    /// An encoded reply or notification.
    Frame(Vec<u8>),
    /// A state change and the events notification announcing it. Ignored if
    /// the mote rebooted since it was queued.
    Transition {
        epoch: u32,
        state: MoteState,
        events: EventMask,
    },
    /// Finish a reset: clear volatile state and announce the boot.
    Reboot { epoch: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Socket {
    id: u8,
    port: Option<u16>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ServiceRequest {
    requested_ms: u32,
    polls_left: u32,
}

/// A scriptable stand-in for a SmartMesh IP mote.
pub struct SimMote<C> {
    name: String,
    clock: C,
    behavior: MoteBehavior,
    rng: ChaCha8Rng,
    initialized: bool,

    queue: BTreeMap<(u64, u64), Outgoing>,
    seq: u64,
    epoch: u32,
    in_flight: Option<CommandKind>,

    state: MoteState,
    sockets: Vec<Socket>,
    next_socket_id: u8,
    join_key: Option<JoinKey>,
    network_id: Option<u16>,
    service: Option<ServiceRequest>,

    issued: Vec<CommandKind>,
    sent: Vec<SentDatagram>,
    cancels: usize,
}

impl<C: Clock> SimMote<C> {
    /// Create a mote in `behavior.initial_state`.
    pub fn new(clock: C, behavior: MoteBehavior) -> Self {
        SimMote {
            name: "mote".to_string(),
            clock,
            rng: ChaCha8Rng::seed_from_u64(behavior.seed),
            initialized: false,
            queue: BTreeMap::new(),
            seq: 0,
            epoch: 0,
            in_flight: None,
            state: behavior.initial_state,
            sockets: Vec::new(),
            next_socket_id: 22,
            join_key: None,
            network_id: None,
            service: None,
            issued: Vec::new(),
            sent: Vec::new(),
            cancels: 0,
            behavior,
        }
    }

    /// Name used in log lines.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // ========================================================================
    // Inspection and Hooks
    // ========================================================================

    /// Current mote state.
    pub fn state(&self) -> MoteState {
        self.state
    }

    /// Every command received, in order.
    pub fn issued(&self) -> &[CommandKind] {
        &self.issued
    }

    /// How many times `kind` was received.
    pub fn issued_count(&self, kind: CommandKind) -> usize {
        self.issued.iter().filter(|k| **k == kind).count()
    }

    /// Datagrams accepted by `sendTo`.
    pub fn sent_datagrams(&self) -> &[SentDatagram] {
        &self.sent
    }

    /// How many times the host abandoned a command.
    pub fn cancels(&self) -> usize {
        self.cancels
    }

    /// The behavior in force, including remaining fault counts.
    pub fn behavior(&self) -> &MoteBehavior {
        &self.behavior
    }

    /// Deliver a datagram from the network to the bound socket.
    pub fn inject_datagram(&mut self, payload: &[u8], src_port: u16) {
        let socket_id = self
            .sockets
            .iter()
            .find(|s| s.port.is_some())
            .map(|s| s.id)
            .unwrap_or_default();
        let frame = Notification::Receive {
            socket_id,
            src_addr: DEFAULT_DEST_IP,
            src_port,
            payload: payload.to_vec(),
        }
        .encode();
        let now = self.clock.now_ms();
        self.enqueue(now, Outgoing::Frame(frame));
    }

    /// Reboot now, as after a watchdog reset or power glitch.
    pub fn reboot(&mut self) {
        let now = self.clock.now_ms();
        debug!("SimMote[{}]: unsolicited reboot", self.name);
        self.enqueue(now, Outgoing::Reboot { epoch: self.epoch });
    }

    /// Drop off the network without rebooting.
    pub fn lose_network(&mut self) {
        let now = self.clock.now_ms();
        debug!("SimMote[{}]: lost the network", self.name);
        self.enqueue(
            now,
            Outgoing::Transition {
                epoch: self.epoch,
                state: MoteState::Searching,
                events: EventMask::DISCONNECTED,
            },
        );
    }

    // ========================================================================
    // Queue
    // ========================================================================

    fn enqueue(&mut self, due: u64, item: Outgoing) {
        self.seq += 1;
        self.queue.insert((due, self.seq), item);
    }

    fn pop_due(&mut self) -> Option<Outgoing> {
        let now = self.clock.now_ms();
        let key = *self.queue.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.queue.remove(&key)
    }

    fn events_frame(&self, events: EventMask) -> Vec<u8> {
        Notification::Events {
            events,
            state: self.state,
            alarms: 0,
        }
        .encode()
    }

    fn apply(&mut self, item: Outgoing) -> Option<Vec<u8>> {
        match item {
            Outgoing::Frame(frame) => Some(frame),
            Outgoing::Transition {
                epoch,
                state,
                events,
            } => {
                if epoch != self.epoch {
                    trace!("SimMote[{}]: dropping transition from before reboot", self.name);
                    return None;
                }
                debug!("SimMote[{}]: {:?} -> {:?}", self.name, self.state, state);
                self.state = state;
                Some(self.events_frame(events))
            }
            Outgoing::Reboot { epoch } => {
                if epoch != self.epoch {
                    return None;
                }
                self.epoch += 1;
                self.state = MoteState::Idle;
                self.sockets.clear();
                self.service = None;
                self.in_flight = None;
                debug!("SimMote[{}]: booted", self.name);
                Some(self.events_frame(EventMask::BOOT))
            }
        }
    }

    // ========================================================================
    // Command Execution
    // ========================================================================

    fn execute(&mut self, command: Command) -> Reply {
        let now = self.clock.now_ms();
        let kind = command.kind();
        match command {
            Command::GetMoteStatus => Reply::MoteStatus {
                rc: ResultCode::Ok,
                status: Some(MoteStatus {
                    state: self.state,
                    num_parents: u8::from(self.state == MoteState::Operational),
                    alarms: 0,
                }),
            },

            Command::SetJoinKey { key } => self.configure(kind, |mote| mote.join_key = Some(key)),
            Command::SetNetworkId { network_id } => {
                self.configure(kind, |mote| mote.network_id = Some(network_id))
            }

            Command::Join => {
                if self.state != MoteState::Idle {
                    return Reply::header_only(kind, ResultCode::InvalidState);
                }
                if self.network_id.is_none() {
                    return Reply::header_only(kind, ResultCode::IncompleteJoinInfo);
                }
                let epoch = self.epoch;
                self.enqueue(
                    now + self.behavior.reply_latency_ms + 1,
                    Outgoing::Transition {
                        epoch,
                        state: MoteState::Searching,
                        events: EventMask::JOIN_STARTED,
                    },
                );
                let (state, events) = if self.credentials_accepted() {
                    (MoteState::Operational, EventMask::OPERATIONAL)
                } else {
                    debug!("SimMote[{}]: join credentials rejected", self.name);
                    (MoteState::Searching, EventMask::JOIN_FAIL)
                };
                self.enqueue(
                    now + self.behavior.join_duration_ms,
                    Outgoing::Transition {
                        epoch,
                        state,
                        events,
                    },
                );
                Reply::Join { rc: ResultCode::Ok }
            }

            Command::Reset => {
                let epoch = self.epoch;
                self.enqueue(now + self.behavior.boot_delay_ms, Outgoing::Reboot { epoch });
                Reply::Reset { rc: ResultCode::Ok }
            }

            Command::Disconnect => {
                if matches!(self.state, MoteState::Idle) {
                    return Reply::Disconnect {
                        rc: ResultCode::InvalidState,
                    };
                }
                let epoch = self.epoch;
                self.enqueue(now + self.behavior.boot_delay_ms, Outgoing::Reboot { epoch });
                Reply::Disconnect { rc: ResultCode::Ok }
            }

            Command::RequestService { value_ms, .. } => {
                if self.state != MoteState::Operational {
                    return Reply::header_only(kind, ResultCode::InvalidState);
                }
                self.service = Some(ServiceRequest {
                    requested_ms: value_ms,
                    polls_left: self.behavior.service_pending_polls,
                });
                let epoch = self.epoch;
                self.enqueue(
                    now + self.behavior.service_delay_ms,
                    Outgoing::Transition {
                        epoch,
                        state: MoteState::Operational,
                        events: EventMask::SVC_CHANGE,
                    },
                );
                Reply::RequestService { rc: ResultCode::Ok }
            }

            Command::GetServiceInfo {
                dest_addr,
                service_type,
            } => {
                let granted = self.behavior.granted_service_ms;
                let Some(service) = self.service.as_mut() else {
                    return Reply::header_only(kind, ResultCode::NotFound);
                };
                let (state, value_ms) = if service.polls_left > 0 {
                    service.polls_left -= 1;
                    (ServiceState::Pending, 0)
                } else {
                    (
                        ServiceState::Completed,
                        granted.unwrap_or(service.requested_ms),
                    )
                };
                Reply::ServiceInfo {
                    rc: ResultCode::Ok,
                    info: Some(ServiceInfo {
                        dest_addr,
                        service_type,
                        state,
                        value_ms,
                    }),
                }
            }

            Command::OpenSocket { protocol } => {
                if protocol != PROTOCOL_TYPE_UDP {
                    return Reply::header_only(kind, ResultCode::InvalidValue);
                }
                if self.sockets.len() >= usize::from(self.behavior.max_sockets) {
                    return Reply::OpenSocket {
                        rc: ResultCode::NoResources,
                        socket_id: None,
                    };
                }
                let id = self.next_socket_id;
                self.next_socket_id = self.next_socket_id.wrapping_add(1);
                self.sockets.push(Socket { id, port: None });
                Reply::OpenSocket {
                    rc: ResultCode::Ok,
                    socket_id: Some(id),
                }
            }

            Command::BindSocket { socket_id, port } => {
                if self.sockets.iter().any(|s| s.port == Some(port)) {
                    return Reply::BindSocket {
                        rc: ResultCode::Busy,
                    };
                }
                match self.sockets.iter_mut().find(|s| s.id == socket_id) {
                    Some(socket) => {
                        socket.port = Some(port);
                        Reply::BindSocket { rc: ResultCode::Ok }
                    }
                    None => Reply::BindSocket {
                        rc: ResultCode::NotFound,
                    },
                }
            }

            Command::SendTo {
                socket_id,
                dest_addr,
                dest_port,
                payload,
                ..
            } => {
                if self.state != MoteState::Operational {
                    return Reply::SendTo {
                        rc: ResultCode::InvalidState,
                    };
                }
                if !self.sockets.iter().any(|s| s.id == socket_id) {
                    return Reply::SendTo {
                        rc: ResultCode::NotFound,
                    };
                }
                if self.behavior.loopback {
                    let echo = Notification::Receive {
                        socket_id,
                        src_addr: dest_addr,
                        src_port: dest_port,
                        payload: payload.clone(),
                    }
                    .encode();
                    // After the reply, which is queued at the same latency.
                    self.enqueue(now + self.behavior.reply_latency_ms + 1, Outgoing::Frame(echo));
                }
                self.sent.push(SentDatagram {
                    dest_addr,
                    dest_port,
                    payload,
                });
                Reply::SendTo { rc: ResultCode::Ok }
            }
        }
    }

    fn configure(&mut self, kind: CommandKind, set: impl FnOnce(&mut Self)) -> Reply {
        if self.state != MoteState::Idle {
            return Reply::header_only(kind, ResultCode::InvalidState);
        }
        set(self);
        Reply::header_only(kind, ResultCode::Ok)
    }

    fn credentials_accepted(&self) -> bool {
        let network_ok = self
            .behavior
            .accepted_network_id
            .map_or(true, |id| self.network_id == Some(id));
        let key = self.join_key.unwrap_or_default();
        let key_ok = self
            .behavior
            .accepted_join_key
            .map_or(true, |accepted| accepted == key);
        network_ok && key_ok
    }

    /// Encode the reply, or nothing if a fault swallows it.
    fn reply_frame(&mut self, kind: CommandKind, reply: Reply) -> Option<Vec<u8>> {
        if take_matching(&mut self.behavior.dropped_replies, kind).is_some() {
            debug!("SimMote[{}]: dropping {} reply", self.name, kind);
            return None;
        }
        if self.behavior.reply_loss > 0.0 && self.rng.gen_bool(self.behavior.reply_loss.min(1.0)) {
            debug!("SimMote[{}]: lost {} reply", self.name, kind);
            return None;
        }
        if take_matching(&mut self.behavior.malformed_replies, kind).is_some() {
            debug!("SimMote[{}]: corrupting {} reply", self.name, kind);
            return Some(vec![kind.command_id()]);
        }
        Some(reply.encode())
    }
}

impl<C: Clock> ChannelAdapter for SimMote<C> {
    fn init(&mut self) -> Result<(), AdapterError> {
        self.initialized = true;
        Ok(())
    }

    fn issue(&mut self, command: Command) -> Result<(), AdapterError> {
        if !self.initialized {
            return Err(AdapterError::NotInitialized);
        }
        if let Some(waiting) = self.in_flight {
            warn!(
                "SimMote[{}]: {} issued while {} is in flight",
                self.name,
                command.kind(),
                waiting
            );
            return Err(AdapterError::Busy);
        }

        // Round-trip through the wire format like a real serial link.
        let frame = command.encode()?;
        let command = Command::decode(&frame)?;
        let kind = command.kind();
        self.issued.push(kind);
        trace!("SimMote[{}]: received {}", self.name, kind);

        let reply = match take_matching(&mut self.behavior.overrides, kind) {
            Some(forced) => {
                debug!("SimMote[{}]: forcing {} -> {}", self.name, kind, forced.rc);
                Reply::header_only(kind, forced.rc)
            }
            None => self.execute(command),
        };

        self.in_flight = Some(kind);
        if let Some(frame) = self.reply_frame(kind, reply) {
            let due = self.clock.now_ms() + self.behavior.reply_latency_ms;
            self.enqueue(due, Outgoing::Frame(frame));
        }
        Ok(())
    }

    fn cancel_in_flight(&mut self) {
        if self.in_flight.take().is_some() {
            self.cancels += 1;
        }
    }

    fn poll_event(&mut self) -> Option<AdapterEvent> {
        while let Some(item) = self.pop_due() {
            let Some(frame) = self.apply(item) else {
                continue;
            };
            let Some(event) = AdapterEvent::from_frame(&frame) else {
                continue;
            };
            if matches!(
                event,
                AdapterEvent::Reply(_) | AdapterEvent::MalformedReply { .. }
            ) {
                self.in_flight = None;
            }
            return Some(event);
        }
        None
    }
}

impl<C> std::fmt::Debug for SimMote<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMote")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("sockets", &self.sockets.len())
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
