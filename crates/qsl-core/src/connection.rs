//! The connection state machine.
//!
//! A [`Connection`] owns one session with one mote. All of its work happens
//! inside [`Connection::step`]: adapter events are drained and handled one at
//! a time, then the timeout supervisor is polled. The blocking
//! [`connect`](Connection::connect) and [`send`](Connection::send) calls are
//! thin loops over `step` that feed liveness and idle-wait between steps.

use tracing::{debug, error, info, trace, warn};

use qsl_metrics::{metric_defs, metrics, MetricLabels};
use qsl_protocol::{
    AdapterEvent, ChannelAdapter, Clock, Command, JoinKey, Liveness, MoteState, Notification,
    ProtocolError, Reply, ResultCode, ServiceInfo, ServiceState, DEFAULT_NET_ID,
    DEFAULT_PAYLOAD_SIZE_LIMIT, IPV6_ADDR_LEN, PACKET_ID_NO_NOTIF, PACKET_PRIORITY_MEDIUM,
    PROTOCOL_TYPE_UDP, SERVICE_ADDRESS, SERVICE_TYPE_BW,
};

use crate::config::{NetworkConfig, QslConfig, ResetMode};
use crate::error::{InboxError, QslError};
use crate::inbox::Inbox;
use crate::notify::{self, NotifyAction, NotifyContext};
use crate::payload::payload_limit;
use crate::state::{ConnectionState, Operation, Scheduled, StepOutcome};
use crate::timeout::TimeoutSupervisor;

// ============================================================================
// Stored Settings
// ============================================================================

/// Network settings after default substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetworkSettings {
    network_id: u16,
    join_key: JoinKey,
    service_ms: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            network_id: DEFAULT_NET_ID,
            join_key: JoinKey::default(),
            service_ms: 0,
        }
    }
}

/// The datagram being sent. Only meaningful while `Sending`.
#[derive(Debug, Clone)]
pub struct OutboundPayload {
    buf: [u8; DEFAULT_PAYLOAD_SIZE_LIMIT],
    len: usize,
    dest_addr: [u8; IPV6_ADDR_LEN],
    dest_port: u16,
}

impl Default for OutboundPayload {
    fn default() -> Self {
        OutboundPayload {
            buf: [0; DEFAULT_PAYLOAD_SIZE_LIMIT],
            len: 0,
            dest_addr: [0; IPV6_ADDR_LEN],
            dest_port: 0,
        }
    }
}

impl OutboundPayload {
    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Destination address.
    pub fn dest_addr(&self) -> &[u8; IPV6_ADDR_LEN] {
        &self.dest_addr
    }

    /// Destination port.
    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    // Callers check the payload against the limit first, which never
    // exceeds the buffer.
    fn load(&mut self, payload: &[u8], dest_addr: [u8; IPV6_ADDR_LEN], dest_port: u16) {
        let len = payload.len().min(self.buf.len());
        self.buf[..len].copy_from_slice(&payload[..len]);
        self.len = len;
        self.dest_addr = dest_addr;
        self.dest_port = dest_port;
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A session with one mote.
pub struct Connection<A, C, L> {
    adapter: A,
    clock: C,
    liveness: L,
    config: QslConfig,
    labels: MetricLabels,

    state: ConnectionState,
    adapter_ready: bool,
    last_transition_ms: u64,
    supervisor: TimeoutSupervisor<Scheduled>,
    reply_handler: Option<Operation>,

    network: NetworkSettings,
    socket_id: Option<u8>,
    granted_service_ms: Option<u32>,
    outbound: OutboundPayload,
    inbox: Inbox,
}

impl<A: ChannelAdapter, C: Clock, L: Liveness> Connection<A, C, L> {
    /// Create a connection. Call [`init`](Self::init) before connecting.
    pub fn new(adapter: A, clock: C, liveness: L, config: QslConfig) -> Self {
        let now = clock.now_ms();
        Connection {
            adapter,
            clock,
            liveness,
            config,
            labels: MetricLabels::default(),
            state: ConnectionState::NotInitialized,
            adapter_ready: false,
            last_transition_ms: now,
            supervisor: TimeoutSupervisor::new(),
            reply_handler: None,
            network: NetworkSettings::default(),
            socket_id: None,
            granted_service_ms: None,
            outbound: OutboundPayload::default(),
            inbox: Inbox::new(),
        }
    }

    /// Label metrics and log lines with a mote name.
    pub fn with_labels(mut self, labels: MetricLabels) -> Self {
        self.labels = labels;
        self
    }

    fn name(&self) -> &str {
        &self.labels.mote
    }

    // ========================================================================
    // Application API
    // ========================================================================

    /// Initialize the adapter and reset all connection variables.
    pub fn init(&mut self) -> Result<(), QslError> {
        debug!("Connection[{}]: init", self.name());
        self.adapter.init()?;
        self.adapter_ready = true;

        self.supervisor.cancel();
        self.reply_handler = None;
        self.network = NetworkSettings::default();
        self.socket_id = None;
        self.granted_service_ms = None;
        self.outbound = OutboundPayload::default();
        self.inbox.clear();

        self.enter(ConnectionState::Disconnected);
        Ok(())
    }

    /// Join a network, blocking until connected, failed or timed out.
    ///
    /// When already connected, new credentials force a full reconnect and a
    /// new bandwidth request renegotiates service; otherwise this is a no-op.
    pub fn connect(&mut self, network: &NetworkConfig) -> Result<(), QslError> {
        let started = self.clock.now_ms();
        self.begin_connect(network)?;

        let timeout = self.config.connect_timeout_ms;
        let result = loop {
            match self.state {
                ConnectionState::Connected => break Ok(()),
                ConnectionState::Disconnected => break Err(QslError::ConnectFailed),
                _ => {}
            }
            if self.clock.now_ms().saturating_sub(started) >= timeout {
                warn!(
                    "Connection[{}]: connect timed out in state {}",
                    self.name(),
                    self.state
                );
                self.adapter.cancel_in_flight();
                self.reply_handler = None;
                self.supervisor.cancel();
                self.enter(ConnectionState::Disconnected);
                break Err(QslError::ConnectTimeout(timeout));
            }
            self.drive_once();
        };

        let outcome = match &result {
            Ok(()) => "connected",
            Err(QslError::ConnectTimeout(_)) => "timeout",
            Err(_) => "failed",
        };
        let elapsed = self.clock.now_ms().saturating_sub(started);
        metrics::histogram!(
            metric_defs::CONNECTION_CONNECT_DURATION.name,
            &self.labels.with(&[("outcome", outcome.to_string())])
        )
        .record(elapsed as f64);
        result
    }

    /// Start connecting without blocking. Drive the handshake with
    /// [`step`](Self::step).
    pub fn begin_connect(&mut self, network: &NetworkConfig) -> Result<(), QslError> {
        debug!(
            "Connection[{}]: connect to network {} (service {} ms)",
            self.name(),
            network.network_id,
            network.service_ms
        );

        match self.state {
            ConnectionState::NotInitialized => {
                warn!("Connection[{}]: can't connect, not initialized", self.name());
                self.enter(ConnectionState::Disconnected);
                return Err(QslError::NotInitialized);
            }
            // Disconnected without a prior init: the adapter was never opened.
            ConnectionState::Disconnected if !self.adapter_ready => {
                warn!("Connection[{}]: can't connect, adapter not initialized", self.name());
                return Err(QslError::NotInitialized);
            }
            ConnectionState::Disconnected => {
                self.store_network(network)?;
                self.enter(ConnectionState::PreJoin);
            }
            ConnectionState::Connected => {
                let new_network = network.network_id != 0
                    && network.network_id != self.network.network_id;
                let new_key = network
                    .join_key
                    .is_some_and(|key| key != self.network.join_key);
                if new_network || new_key {
                    // Unset credentials keep the session's current ones.
                    self.store_network(&NetworkConfig {
                        network_id: if new_network {
                            network.network_id
                        } else {
                            self.network.network_id
                        },
                        join_key: Some(network.join_key.unwrap_or(self.network.join_key)),
                        service_ms: network.service_ms,
                    })?;
                    info!(
                        "Connection[{}]: new network id or join key, reconnecting",
                        self.name()
                    );
                    self.enter(ConnectionState::Resetting);
                } else if network.service_ms > 0 && network.service_ms != self.network.service_ms {
                    debug!(
                        "Connection[{}]: new service request of {} ms",
                        self.name(),
                        network.service_ms
                    );
                    self.network.service_ms = network.service_ms;
                    self.enter(ConnectionState::RequestingService);
                } else {
                    debug!("Connection[{}]: already connected", self.name());
                }
            }
            other => {
                error!(
                    "Connection[{}]: connect called in unexpected state {}",
                    self.name(),
                    other
                );
                self.enter(ConnectionState::Disconnected);
                return Err(QslError::UnexpectedState(other));
            }
        }
        Ok(())
    }

    /// Send a datagram, blocking until the mote accepts or refuses it.
    ///
    /// Port 0 selects the configured default destination port.
    pub fn send(&mut self, payload: &[u8], destination_port: u16) -> Result<(), QslError> {
        let started = self.clock.now_ms();
        self.begin_send(payload, destination_port)?;

        let timeout = self.config.send_timeout_ms;
        let mut timed_out = false;
        while self.state == ConnectionState::Sending {
            if self.clock.now_ms().saturating_sub(started) >= timeout {
                warn!("Connection[{}]: send timed out", self.name());
                self.adapter.cancel_in_flight();
                self.enter(ConnectionState::SendFailed);
                timed_out = true;
                break;
            }
            self.drive_once();
        }

        match self.state {
            ConnectionState::Connected => {
                metrics::counter!(metric_defs::DATAGRAM_SENT.name, &self.labels.to_labels())
                    .increment(1);
                metrics::histogram!(
                    metric_defs::DATAGRAM_SENT_SIZE.name,
                    &self.labels.to_labels()
                )
                .record(payload.len() as f64);
                Ok(())
            }
            ConnectionState::SendFailed => {
                self.enter(ConnectionState::Connected);
                if timed_out {
                    self.record_send_failure("timeout");
                    Err(QslError::SendTimeout(timeout))
                } else {
                    self.record_send_failure("rejected");
                    Err(QslError::SendFailed)
                }
            }
            _ => {
                self.record_send_failure("lost_sync");
                Err(QslError::SendFailed)
            }
        }
    }

    /// Validate and start sending without blocking.
    ///
    /// Stepping leaves the connection in `Connected` once the mote accepts
    /// the datagram or in `SendFailed` if it does not. Unlike
    /// [`send`](Self::send), nothing moves `SendFailed` back to `Connected`.
    pub fn begin_send(&mut self, payload: &[u8], destination_port: u16) -> Result<(), QslError> {
        if self.state != ConnectionState::Connected {
            warn!(
                "Connection[{}]: can't send in state {}",
                self.name(),
                self.state
            );
            return Err(QslError::NotConnected);
        }

        let dest_port = match destination_port {
            0 => self.config.default_dest_port,
            port => port,
        };
        let dest_addr = self.config.dest_addr_octets();
        let limit = payload_limit(dest_port, self.config.inbox_port, &dest_addr);
        if payload.len() > limit {
            warn!(
                "Connection[{}]: payload of {} bytes exceeds limit of {} for port {}",
                self.name(),
                payload.len(),
                limit,
                dest_port
            );
            self.record_send_failure("too_large");
            return Err(QslError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        self.outbound.load(payload, dest_addr, dest_port);
        self.enter(ConnectionState::Sending);
        Ok(())
    }

    /// Pop the oldest received datagram into `buf`. Returns 0 when empty.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.inbox.pop(buf) {
            Some(len) => {
                debug!("Connection[{}]: read {} bytes from inbox", self.name(), len);
                metrics::gauge!(metric_defs::INBOX_DEPTH.name, &self.labels.to_labels())
                    .set(self.inbox.len() as f64);
                len
            }
            None => {
                trace!("Connection[{}]: inbox empty", self.name());
                0
            }
        }
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The configuration in use.
    pub fn config(&self) -> &QslConfig {
        &self.config
    }

    /// The channel adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Mutable access to the channel adapter.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Tear down the connection and hand back the adapter.
    pub fn into_adapter(self) -> A {
        self.adapter
    }

    /// Socket opened during the handshake.
    pub fn socket_id(&self) -> Option<u8> {
        self.socket_id
    }

    /// Service interval the manager granted on the last negotiation.
    pub fn granted_service_ms(&self) -> Option<u32> {
        self.granted_service_ms
    }

    /// Network id in use after default substitution.
    pub fn network_id(&self) -> u16 {
        self.network.network_id
    }

    /// Unread datagrams.
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// The last datagram handed to `send`.
    pub fn outbound(&self) -> &OutboundPayload {
        &self.outbound
    }

    /// The operation whose reply is outstanding.
    pub fn awaiting_reply(&self) -> Option<Operation> {
        self.reply_handler
    }

    /// The armed scheduled item.
    pub fn pending(&self) -> Option<Scheduled> {
        self.supervisor.pending().copied()
    }

    // ========================================================================
    // Step Function
    // ========================================================================

    /// Handle every queued adapter event, then fire the scheduled item if due.
    pub fn step(&mut self) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        while let Some(event) = self.adapter.poll_event() {
            outcome.events += 1;
            self.handle_event(event);
        }

        if let Some(item) = self.supervisor.poll(self.clock.now_ms()) {
            outcome.fired = Some(item);
            self.fire(item);
        }

        outcome
    }

    fn drive_once(&mut self) {
        self.liveness.feed();
        if self.step().is_idle() {
            self.clock.sleep_ms(self.config.run_interval_ms);
        }
    }

    fn fire(&mut self, item: Scheduled) {
        match item {
            Scheduled::Issue(op) => self.issue(op),
            Scheduled::ResponseTimeout(op) => self.on_response_timeout(op),
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn enter(&mut self, next: ConnectionState) {
        let now = self.clock.now_ms();
        debug!(
            "Connection[{}]: {} -> {} ({} ms)",
            self.name(),
            self.state,
            next,
            now.saturating_sub(self.last_transition_ms)
        );
        metrics::counter!(
            metric_defs::CONNECTION_TRANSITIONS.name,
            &self.labels.with(&[
                ("from", self.state.as_str().to_string()),
                ("to", next.as_str().to_string()),
            ])
        )
        .increment(1);

        // A new state never inherits the previous state's pending work.
        if self.reply_handler.take().is_some() {
            self.adapter.cancel_in_flight();
        }
        self.supervisor.cancel();

        self.state = next;
        self.last_transition_ms = now;

        match next {
            ConnectionState::PreJoin => self.schedule(Operation::QueryStatus),
            ConnectionState::Joining => self.schedule(Operation::Join),
            ConnectionState::RequestingService => self.schedule(Operation::RequestService),
            ConnectionState::Resetting => match self.config.reset_mode {
                ResetMode::Reset => self.schedule(Operation::Reset),
                ResetMode::Graceful => self.schedule(Operation::Disconnect),
            },
            ConnectionState::Sending => self.issue(Operation::SendTo),
            ConnectionState::NotInitialized
            | ConnectionState::Disconnected
            | ConnectionState::Connected
            | ConnectionState::SendFailed => {}
        }
    }

    fn store_network(&mut self, network: &NetworkConfig) -> Result<(), QslError> {
        if !network.is_valid() {
            error!(
                "Connection[{}]: invalid network id 0x{:04X}",
                self.name(),
                network.network_id
            );
            return Err(QslError::InvalidNetworkId(network.network_id));
        }
        if network.network_id == 0 {
            debug!("Connection[{}]: no network id given, using default", self.name());
        }
        if network.join_key.is_none() {
            debug!("Connection[{}]: no join key given, using default", self.name());
        }
        self.network = NetworkSettings {
            network_id: network.effective_network_id(),
            join_key: network.effective_join_key(),
            service_ms: network.service_ms,
        };
        Ok(())
    }

    // ========================================================================
    // Command Issue
    // ========================================================================

    fn schedule(&mut self, op: Operation) {
        let now = self.clock.now_ms();
        self.supervisor
            .schedule(now, self.config.command_period_ms, Scheduled::Issue(op));
    }

    fn issue(&mut self, op: Operation) {
        let command = self.build_command(op);
        trace!("Connection[{}]: issuing {}", self.name(), op);
        metrics::counter!(
            metric_defs::COMMAND_ISSUED.name,
            &self.labels.with(&[("command", op.to_string())])
        )
        .increment(1);

        self.reply_handler = Some(op);
        if let Err(e) = self.adapter.issue(command) {
            // The response timeout below recovers from this.
            warn!("Connection[{}]: adapter refused {}: {}", self.name(), op, e);
        }
        let now = self.clock.now_ms();
        self.supervisor.schedule(
            now,
            self.config.response_timeout_ms,
            Scheduled::ResponseTimeout(op),
        );
    }

    fn build_command(&self, op: Operation) -> Command {
        match op {
            Operation::QueryStatus => Command::GetMoteStatus,
            Operation::OpenSocket => Command::OpenSocket {
                protocol: PROTOCOL_TYPE_UDP,
            },
            Operation::BindSocket => Command::BindSocket {
                socket_id: self.socket_id.unwrap_or_default(),
                port: self.config.inbox_port,
            },
            Operation::SetJoinKey => Command::SetJoinKey {
                key: self.network.join_key,
            },
            Operation::SetNetworkId => Command::SetNetworkId {
                network_id: self.network.network_id,
            },
            Operation::Join => Command::Join,
            Operation::RequestService => Command::RequestService {
                dest_addr: SERVICE_ADDRESS,
                service_type: SERVICE_TYPE_BW,
                value_ms: self.network.service_ms,
            },
            Operation::GetServiceInfo => Command::GetServiceInfo {
                dest_addr: SERVICE_ADDRESS,
                service_type: SERVICE_TYPE_BW,
            },
            Operation::Reset => Command::Reset,
            Operation::Disconnect => Command::Disconnect,
            Operation::SendTo => Command::SendTo {
                socket_id: self.socket_id.unwrap_or_default(),
                dest_addr: self.outbound.dest_addr,
                dest_port: self.outbound.dest_port,
                service_type: SERVICE_TYPE_BW,
                priority: PACKET_PRIORITY_MEDIUM,
                packet_id: PACKET_ID_NO_NOTIF,
                payload: self.outbound.payload().to_vec(),
            },
        }
    }

    fn on_response_timeout(&mut self, op: Operation) {
        warn!(
            "Connection[{}]: no reply to {} in state {}",
            self.name(),
            op,
            self.state
        );
        metrics::counter!(
            metric_defs::COMMAND_RESPONSE_TIMEOUTS.name,
            &self.labels.with(&[("command", op.to_string())])
        )
        .increment(1);

        self.adapter.cancel_in_flight();
        self.reply_handler = None;

        match self.state {
            ConnectionState::Sending => self.enter(ConnectionState::SendFailed),
            state if state.is_connecting() => self.enter(ConnectionState::PreJoin),
            state => error!(
                "Connection[{}]: response timeout in unexpected state {}",
                self.name(),
                state
            ),
        }
    }

    // ========================================================================
    // Event Handling
    // ========================================================================

    fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Reply(reply) => self.handle_reply(reply),
            AdapterEvent::MalformedReply { command_id, error } => {
                self.handle_malformed(command_id, error)
            }
            AdapterEvent::Notification(notification) => self.handle_notification(notification),
        }
    }

    /// Disarm the reply handler if it satisfies `matches`.
    fn take_handler(&mut self, matches: impl Fn(Operation) -> bool) -> Option<Operation> {
        match self.reply_handler {
            Some(op) if matches(op) => {
                self.reply_handler = None;
                self.supervisor
                    .cancel_if(|item| matches!(item, Scheduled::ResponseTimeout(_)));
                Some(op)
            }
            _ => None,
        }
    }

    fn handle_reply(&mut self, reply: Reply) {
        let kind = reply.kind();
        if self.take_handler(|op| op.command_kind() == kind).is_none() {
            debug!(
                "Connection[{}]: ignoring stale {} reply ({})",
                self.name(),
                kind,
                reply.rc()
            );
            metrics::counter!(
                metric_defs::COMMAND_STALE_REPLIES.name,
                &self.labels.with(&[("command", kind.to_string())])
            )
            .increment(1);
            return;
        }
        trace!("Connection[{}]: {} reply {}", self.name(), kind, reply.rc());
        self.on_reply(reply);
    }

    fn handle_malformed(&mut self, command_id: u8, error: ProtocolError) {
        let Some(op) = self.take_handler(|op| op.command_kind().command_id() == command_id) else {
            debug!(
                "Connection[{}]: ignoring malformed reply 0x{:02X}: {}",
                self.name(),
                command_id,
                error
            );
            return;
        };
        warn!("Connection[{}]: malformed {} reply: {}", self.name(), op, error);
        match op {
            Operation::SendTo => self.enter(ConnectionState::SendFailed),
            _ => self.enter(ConnectionState::Disconnected),
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        match reply {
            Reply::MoteStatus {
                rc: ResultCode::Ok,
                status: Some(status),
            } => match status.state {
                MoteState::Idle => self.schedule(Operation::OpenSocket),
                other => {
                    debug!(
                        "Connection[{}]: mote is {:?}, resetting first",
                        self.name(),
                        other
                    );
                    self.enter(ConnectionState::Resetting);
                }
            },

            Reply::OpenSocket {
                rc: ResultCode::Ok,
                socket_id: Some(socket_id),
            } => {
                debug!("Connection[{}]: opened socket {}", self.name(), socket_id);
                self.socket_id = Some(socket_id);
                self.schedule(Operation::BindSocket);
            }
            Reply::OpenSocket {
                rc: ResultCode::NoResources,
                ..
            } => {
                warn!("Connection[{}]: mote is out of sockets", self.name());
                self.enter(ConnectionState::Resetting);
            }

            Reply::BindSocket { rc: ResultCode::Ok } => self.schedule(Operation::SetJoinKey),
            Reply::BindSocket {
                rc: ResultCode::Busy,
            } => {
                warn!("Connection[{}]: inbox port already bound", self.name());
                self.enter(ConnectionState::Resetting);
            }

            Reply::SetJoinKey { rc: ResultCode::Ok } => self.schedule(Operation::SetNetworkId),
            Reply::SetNetworkId { rc: ResultCode::Ok } => self.enter(ConnectionState::Joining),

            Reply::Join { rc: ResultCode::Ok } => {
                debug!("Connection[{}]: join started", self.name())
            }
            Reply::RequestService { rc: ResultCode::Ok } => {
                debug!("Connection[{}]: service requested", self.name())
            }
            Reply::ServiceInfo {
                rc: ResultCode::Ok,
                info: Some(info),
            } => self.on_service_info(info),

            Reply::Reset { rc: ResultCode::Ok } => {
                debug!("Connection[{}]: reset accepted, waiting for boot", self.name())
            }
            Reply::Disconnect { rc: ResultCode::Ok } => {
                debug!("Connection[{}]: disconnect accepted, waiting for boot", self.name())
            }
            Reply::Disconnect { rc } => {
                warn!(
                    "Connection[{}]: disconnect refused ({}), resetting instead",
                    self.name(),
                    rc
                );
                self.schedule(Operation::Reset);
            }

            Reply::SendTo { rc: ResultCode::Ok } => self.enter(ConnectionState::Connected),
            Reply::SendTo { rc } => {
                warn!("Connection[{}]: send refused ({})", self.name(), rc);
                self.enter(ConnectionState::SendFailed);
            }

            other => {
                warn!(
                    "Connection[{}]: {} failed with {}",
                    self.name(),
                    other.kind(),
                    other.rc()
                );
                self.enter(ConnectionState::Disconnected);
            }
        }
    }

    fn on_service_info(&mut self, info: ServiceInfo) {
        if info.state != ServiceState::Completed {
            debug!("Connection[{}]: service request still pending", self.name());
            self.schedule(Operation::GetServiceInfo);
            return;
        }

        let requested = self.network.service_ms;
        if info.value_ms <= requested {
            info!(
                "Connection[{}]: granted service of {} ms (requested {} ms)",
                self.name(),
                info.value_ms,
                requested
            );
        } else {
            warn!(
                "Connection[{}]: only granted service of {} ms (requested {} ms)",
                self.name(),
                info.value_ms,
                requested
            );
        }
        self.granted_service_ms = Some(info.value_ms);
        metrics::gauge!(metric_defs::SERVICE_GRANTED.name, &self.labels.to_labels())
            .set(f64::from(info.value_ms));
        self.enter(ConnectionState::Connected);
    }

    fn handle_notification(&mut self, notification: Notification) {
        let ctx = NotifyContext {
            state: self.state,
            service_requested: self.network.service_ms > 0,
            notification: &notification,
        };
        let (rule, action) = notify::dispatch(&ctx);
        trace!(
            "Connection[{}]: notification {:?} matched {:?}",
            self.name(),
            notification,
            rule
        );

        match action {
            NotifyAction::Enter(next) => self.enter(next),
            NotifyAction::Schedule(op) => self.schedule(op),
            NotifyAction::Deliver => {
                if let Notification::Receive { payload, .. } = &notification {
                    self.deliver(payload);
                }
            }
            NotifyAction::Log => {
                debug!("Connection[{}]: {:?}", self.name(), notification)
            }
        }
    }

    fn deliver(&mut self, payload: &[u8]) {
        metrics::counter!(metric_defs::DATAGRAM_RECEIVED.name, &self.labels.to_labels())
            .increment(1);
        match self.inbox.push(payload) {
            Ok(()) => {
                debug!(
                    "Connection[{}]: queued {} bytes ({} unread)",
                    self.name(),
                    payload.len(),
                    self.inbox.len()
                );
                metrics::gauge!(metric_defs::INBOX_DEPTH.name, &self.labels.to_labels())
                    .set(self.inbox.len() as f64);
            }
            Err(e) => {
                warn!("Connection[{}]: dropping datagram: {}", self.name(), e);
                let reason = match e {
                    InboxError::Full { .. } => "full",
                    InboxError::Oversized { .. } => "oversized",
                };
                metrics::counter!(
                    metric_defs::INBOX_OVERFLOWS.name,
                    &self.labels.with(&[("reason", reason.to_string())])
                )
                .increment(1);
            }
        }
    }

    fn record_send_failure(&self, reason: &str) {
        metrics::counter!(
            metric_defs::DATAGRAM_SEND_FAILURES.name,
            &self.labels.with(&[("reason", reason.to_string())])
        )
        .increment(1);
    }
}

impl<A, C, L> std::fmt::Debug for Connection<A, C, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("mote", &self.labels.mote)
            .field("state", &self.state)
            .field("reply_handler", &self.reply_handler)
            .field("pending", &self.supervisor.pending())
            .field("socket_id", &self.socket_id)
            .field("inbox", &self.inbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use qsl_protocol::{
        AdapterError, CommandKind, EventMask, ManualClock, MoteStatus, NoopLiveness,
    };

    #[derive(Default)]
    struct ScriptedAdapter {
        issued: Vec<Command>,
        events: VecDeque<AdapterEvent>,
        cancels: usize,
        refuse: bool,
    }

    impl ChannelAdapter for ScriptedAdapter {
        fn issue(&mut self, command: Command) -> Result<(), AdapterError> {
            self.issued.push(command);
            if self.refuse {
                Err(AdapterError::Busy)
            } else {
                Ok(())
            }
        }

        fn cancel_in_flight(&mut self) {
            self.cancels += 1;
        }

        fn poll_event(&mut self) -> Option<AdapterEvent> {
            self.events.pop_front()
        }
    }

    type TestConnection = Connection<ScriptedAdapter, ManualClock, NoopLiveness>;

    fn connection_with(config: QslConfig) -> (TestConnection, ManualClock) {
        let clock = ManualClock::new();
        let mut conn = Connection::new(
            ScriptedAdapter::default(),
            clock.clone(),
            NoopLiveness,
            config,
        );
        conn.init().unwrap();
        (conn, clock)
    }

    fn connection() -> (TestConnection, ManualClock) {
        connection_with(QslConfig::default())
    }

    fn deliver(conn: &mut TestConnection, event: AdapterEvent) {
        conn.adapter_mut().events.push_back(event);
        conn.step();
    }

    fn reply(conn: &mut TestConnection, reply: Reply) {
        deliver(conn, AdapterEvent::Reply(reply));
    }

    fn events(conn: &mut TestConnection, mask: EventMask, state: MoteState) {
        deliver(
            conn,
            AdapterEvent::Notification(Notification::Events {
                events: mask,
                state,
                alarms: 0,
            }),
        );
    }

    fn status(state: MoteState) -> Reply {
        Reply::MoteStatus {
            rc: ResultCode::Ok,
            status: Some(MoteStatus {
                state,
                num_parents: 0,
                alarms: 0,
            }),
        }
    }

    fn success(kind: CommandKind) -> Reply {
        match kind {
            CommandKind::GetMoteStatus => status(MoteState::Idle),
            CommandKind::OpenSocket => Reply::OpenSocket {
                rc: ResultCode::Ok,
                socket_id: Some(7),
            },
            other => Reply::header_only(other, ResultCode::Ok),
        }
    }

    fn last_issued(conn: &TestConnection) -> Option<CommandKind> {
        conn.adapter().issued.last().map(Command::kind)
    }

    /// Let the command period elapse and step once.
    fn tick(conn: &mut TestConnection, clock: &ManualClock) {
        clock.advance(conn.config().command_period_ms);
        conn.step();
    }

    /// Answer every command successfully until `target` has been issued.
    fn handshake_until(conn: &mut TestConnection, clock: &ManualClock, target: CommandKind) {
        for _ in 0..20 {
            let before = conn.adapter().issued.len();
            tick(conn, clock);
            if conn.adapter().issued.len() == before {
                continue;
            }
            let kind = last_issued(conn).unwrap();
            if kind == target {
                return;
            }
            reply(conn, success(kind));
        }
        panic!("{} was never issued", target);
    }

    fn connected(service_ms: u32) -> (TestConnection, ManualClock) {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234).with_service_ms(service_ms))
            .unwrap();
        handshake_until(&mut conn, &clock, CommandKind::Join);
        reply(&mut conn, success(CommandKind::Join));
        events(&mut conn, EventMask::OPERATIONAL, MoteState::Operational);
        (conn, clock)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn test_init_enters_disconnected() {
        let clock = ManualClock::new();
        let mut conn = Connection::new(
            ScriptedAdapter::default(),
            clock,
            NoopLiveness,
            QslConfig::default(),
        );
        assert_eq!(conn.state(), ConnectionState::NotInitialized);
        assert_eq!(
            conn.connect(&NetworkConfig::new(0x1234)),
            Err(QslError::NotInitialized)
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Still refused until the adapter has been initialized.
        assert_eq!(
            conn.connect(&NetworkConfig::new(0x1234)),
            Err(QslError::NotInitialized)
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.adapter().issued.is_empty());

        conn.init().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_invalid_network_id_is_rejected_without_commands() {
        let (mut conn, _clock) = connection();
        assert_eq!(
            conn.connect(&NetworkConfig::new(0xFFFF)),
            Err(QslError::InvalidNetworkId(0xFFFF))
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.adapter().issued.is_empty());
    }

    #[test]
    fn test_connect_from_unexpected_state_forces_disconnected() {
        let (mut conn, _clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        assert_eq!(
            conn.begin_connect(&NetworkConfig::new(0x1234)),
            Err(QslError::UnexpectedState(ConnectionState::PreJoin))
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending(), None);
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    #[test]
    fn test_handshake_issues_commands_in_order() {
        let (conn, _clock) = connected(0);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.socket_id(), Some(7));

        let kinds: Vec<_> = conn.adapter().issued.iter().map(Command::kind).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::GetMoteStatus,
                CommandKind::OpenSocket,
                CommandKind::BindSocket,
                CommandKind::SetJoinKey,
                CommandKind::SetNetworkId,
                CommandKind::Join,
            ]
        );
        assert!(conn.adapter().issued.contains(&Command::BindSocket {
            socket_id: 7,
            port: 0xF0B8
        }));
        assert!(conn.adapter().issued.contains(&Command::SetNetworkId {
            network_id: 0x1234
        }));
        assert_eq!(conn.pending(), None);
        assert_eq!(conn.awaiting_reply(), None);
    }

    #[test]
    fn test_network_id_zero_uses_default() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0)).unwrap();
        handshake_until(&mut conn, &clock, CommandKind::SetNetworkId);
        assert_eq!(
            conn.adapter().issued.last(),
            Some(&Command::SetNetworkId {
                network_id: DEFAULT_NET_ID
            })
        );
        assert!(conn.adapter().issued.contains(&Command::SetJoinKey {
            key: JoinKey::default()
        }));
    }

    #[test]
    fn test_command_waits_for_command_period() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        clock.advance(9);
        assert!(conn.step().is_idle());
        assert!(conn.adapter().issued.is_empty());
        clock.advance(1);
        assert_eq!(
            conn.step().fired,
            Some(Scheduled::Issue(Operation::QueryStatus))
        );
        assert_eq!(last_issued(&conn), Some(CommandKind::GetMoteStatus));
        assert_eq!(
            conn.pending(),
            Some(Scheduled::ResponseTimeout(Operation::QueryStatus))
        );
    }

    #[test]
    fn test_stale_and_mismatched_replies_are_ignored() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();

        // Nothing armed yet.
        reply(&mut conn, success(CommandKind::GetMoteStatus));
        assert_eq!(conn.pending(), Some(Scheduled::Issue(Operation::QueryStatus)));

        tick(&mut conn, &clock);
        reply(&mut conn, Reply::Join { rc: ResultCode::Ok });
        assert_eq!(conn.state(), ConnectionState::PreJoin);
        assert_eq!(conn.awaiting_reply(), Some(Operation::QueryStatus));
        assert_eq!(
            conn.pending(),
            Some(Scheduled::ResponseTimeout(Operation::QueryStatus))
        );
    }

    #[test]
    fn test_response_timeout_while_joining_requeries_status() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        handshake_until(&mut conn, &clock, CommandKind::Join);
        assert_eq!(conn.state(), ConnectionState::Joining);

        clock.advance(conn.config().response_timeout_ms);
        conn.step();
        assert_eq!(conn.state(), ConnectionState::PreJoin);
        assert_eq!(conn.awaiting_reply(), None);
        assert!(conn.adapter().cancels >= 1);

        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::GetMoteStatus));
    }

    #[test]
    fn test_refused_command_recovers_through_timeout() {
        let (mut conn, clock) = connection();
        conn.adapter_mut().refuse = true;
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        tick(&mut conn, &clock);
        assert_eq!(
            conn.pending(),
            Some(Scheduled::ResponseTimeout(Operation::QueryStatus))
        );

        clock.advance(conn.config().response_timeout_ms);
        conn.step();
        assert_eq!(conn.state(), ConnectionState::PreJoin);
        assert_eq!(conn.pending(), Some(Scheduled::Issue(Operation::QueryStatus)));
    }

    #[test]
    fn test_failure_replies() {
        let cases = [
            (
                CommandKind::OpenSocket,
                Reply::OpenSocket {
                    rc: ResultCode::NoResources,
                    socket_id: None,
                },
                ConnectionState::Resetting,
            ),
            (
                CommandKind::BindSocket,
                Reply::BindSocket {
                    rc: ResultCode::Busy,
                },
                ConnectionState::Resetting,
            ),
            (
                CommandKind::BindSocket,
                Reply::BindSocket {
                    rc: ResultCode::NotFound,
                },
                ConnectionState::Disconnected,
            ),
            (
                CommandKind::SetJoinKey,
                Reply::SetJoinKey {
                    rc: ResultCode::WriteFail,
                },
                ConnectionState::Disconnected,
            ),
            (
                CommandKind::SetNetworkId,
                Reply::SetNetworkId {
                    rc: ResultCode::WriteFail,
                },
                ConnectionState::Disconnected,
            ),
            (
                CommandKind::Join,
                Reply::Join {
                    rc: ResultCode::InvalidState,
                },
                ConnectionState::Disconnected,
            ),
            (
                CommandKind::Join,
                Reply::Join {
                    rc: ResultCode::IncompleteJoinInfo,
                },
                ConnectionState::Disconnected,
            ),
            (
                CommandKind::GetMoteStatus,
                Reply::MoteStatus {
                    rc: ResultCode::Other(0x42),
                    status: None,
                },
                ConnectionState::Disconnected,
            ),
        ];

        for (target, failure, expected) in cases {
            let (mut conn, clock) = connection();
            conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
            handshake_until(&mut conn, &clock, target);
            reply(&mut conn, failure.clone());
            assert_eq!(conn.state(), expected, "{:?}", failure);
            if expected == ConnectionState::Resetting {
                assert_eq!(conn.pending(), Some(Scheduled::Issue(Operation::Reset)));
            } else {
                assert_eq!(conn.pending(), None);
            }
        }
    }

    #[test]
    fn test_malformed_reply_disconnects() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        handshake_until(&mut conn, &clock, CommandKind::OpenSocket);
        deliver(
            &mut conn,
            AdapterEvent::MalformedReply {
                command_id: CommandKind::OpenSocket.command_id(),
                error: ProtocolError::FrameTooShort {
                    expected: 3,
                    actual: 2,
                },
            },
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_operational_mote_is_reset_then_rejoined() {
        let (mut conn, clock) = connection();
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        tick(&mut conn, &clock);
        reply(&mut conn, status(MoteState::Operational));
        assert_eq!(conn.state(), ConnectionState::Resetting);

        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::Reset));
        reply(&mut conn, Reply::Reset { rc: ResultCode::Ok });
        assert_eq!(conn.state(), ConnectionState::Resetting);

        events(&mut conn, EventMask::BOOT, MoteState::Idle);
        assert_eq!(conn.state(), ConnectionState::PreJoin);
        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::GetMoteStatus));
    }

    #[test]
    fn test_graceful_reset_falls_back_to_reset() {
        let (mut conn, clock) = connection_with(QslConfig {
            reset_mode: ResetMode::Graceful,
            ..Default::default()
        });
        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        tick(&mut conn, &clock);
        reply(&mut conn, status(MoteState::Searching));

        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::Disconnect));
        reply(
            &mut conn,
            Reply::Disconnect {
                rc: ResultCode::InvalidState,
            },
        );
        assert_eq!(conn.pending(), Some(Scheduled::Issue(Operation::Reset)));
        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::Reset));
    }

    // ========================================================================
    // Service Negotiation
    // ========================================================================

    #[test]
    fn test_service_negotiation_polls_until_complete() {
        let (mut conn, clock) = connected(5_000);
        assert_eq!(conn.state(), ConnectionState::RequestingService);

        tick(&mut conn, &clock);
        assert_eq!(
            conn.adapter().issued.last(),
            Some(&Command::RequestService {
                dest_addr: SERVICE_ADDRESS,
                service_type: SERVICE_TYPE_BW,
                value_ms: 5_000
            })
        );
        reply(&mut conn, Reply::RequestService { rc: ResultCode::Ok });
        events(&mut conn, EventMask::SVC_CHANGE, MoteState::Operational);

        let info = |state, value_ms| Reply::ServiceInfo {
            rc: ResultCode::Ok,
            info: Some(ServiceInfo {
                dest_addr: SERVICE_ADDRESS,
                service_type: SERVICE_TYPE_BW,
                state,
                value_ms,
            }),
        };

        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::GetServiceInfo));
        reply(&mut conn, info(ServiceState::Pending, 0));
        assert_eq!(conn.state(), ConnectionState::RequestingService);

        tick(&mut conn, &clock);
        assert_eq!(last_issued(&conn), Some(CommandKind::GetServiceInfo));
        // Slower than requested is still accepted.
        reply(&mut conn, info(ServiceState::Completed, 8_000));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.granted_service_ms(), Some(8_000));
    }

    #[test]
    fn test_reconnect_rules_when_connected() {
        let (mut conn, _clock) = connected(0);
        let issued = conn.adapter().issued.len();

        conn.begin_connect(&NetworkConfig::new(0x1234)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.adapter().issued.len(), issued);

        conn.begin_connect(&NetworkConfig::new(0).with_service_ms(1_000))
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::RequestingService);

        let (mut conn, _clock) = connected(0);
        conn.begin_connect(&NetworkConfig::new(0x4321)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Resetting);
        assert_eq!(conn.network_id(), 0x4321);

        let (mut conn, _clock) = connected(0);
        conn.begin_connect(&NetworkConfig::new(0).with_join_key(JoinKey([0x5A; 16])))
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Resetting);
        assert_eq!(conn.network_id(), 0x1234);

        let (mut conn, _clock) = connected(0);
        assert_eq!(
            conn.begin_connect(&NetworkConfig::new(0xFFFF)),
            Err(QslError::InvalidNetworkId(0xFFFF))
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    // ========================================================================
    // Sending and Receiving
    // ========================================================================

    #[test]
    fn test_oversized_send_is_rejected_untouched() {
        let (mut conn, _clock) = connected(0);
        conn.begin_send(b"first", 0xF0B9).unwrap();
        reply(&mut conn, Reply::SendTo { rc: ResultCode::Ok });
        assert_eq!(conn.state(), ConnectionState::Connected);
        let issued = conn.adapter().issued.len();

        assert_eq!(
            conn.send(&[0xAB; 200], 1000),
            Err(QslError::PayloadTooLarge {
                size: 200,
                limit: 87
            })
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.adapter().issued.len(), issued);
        assert_eq!(conn.outbound().payload(), b"first");
        assert_eq!(conn.outbound().dest_port(), 0xF0B9);
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut conn, _clock) = connection();
        assert_eq!(conn.send(b"hi", 0), Err(QslError::NotConnected));
    }

    #[test]
    fn test_send_refused_reports_send_failed() {
        let (mut conn, _clock) = connected(0);
        conn.begin_send(b"reading=42", 0).unwrap();
        assert_eq!(conn.state(), ConnectionState::Sending);
        match conn.adapter().issued.last() {
            Some(Command::SendTo {
                dest_port, payload, ..
            }) => {
                assert_eq!(*dest_port, 0xF0B8);
                assert_eq!(payload.as_slice(), b"reading=42");
            }
            other => panic!("expected sendTo, got {:?}", other),
        }
        reply(
            &mut conn,
            Reply::SendTo {
                rc: ResultCode::NoResources,
            },
        );
        assert_eq!(conn.state(), ConnectionState::SendFailed);
    }

    #[test]
    fn test_lost_sync_while_connected() {
        let (mut conn, _clock) = connected(0);
        events(&mut conn, EventMask::DISCONNECTED, MoteState::Searching);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_received_datagrams_queue_in_order() {
        let (mut conn, _clock) = connection();
        for i in 0..12u8 {
            deliver(
                &mut conn,
                AdapterEvent::Notification(Notification::Receive {
                    socket_id: 7,
                    src_addr: [0; 16],
                    src_port: 0xF0B8,
                    payload: vec![i; usize::from(i) + 1],
                }),
            );
        }
        assert_eq!(conn.inbox_len(), 10);

        let mut buf = [0u8; 90];
        for i in 0..10u8 {
            let n = conn.read(&mut buf);
            assert_eq!(&buf[..n], vec![i; usize::from(i) + 1].as_slice());
        }
        assert_eq!(conn.read(&mut buf), 0);
    }

    #[test]
    fn test_connect_times_out_against_silent_mote() {
        let (mut conn, _clock) = connection_with(QslConfig {
            connect_timeout_ms: 2_000,
            ..Default::default()
        });
        assert_eq!(
            conn.connect(&NetworkConfig::new(0x1234)),
            Err(QslError::ConnectTimeout(2_000))
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending(), None);
        assert!(conn
            .adapter()
            .issued
            .iter()
            .all(|c| c.kind() == CommandKind::GetMoteStatus));
        assert!(conn.adapter().issued.len() >= 3);
    }
}
