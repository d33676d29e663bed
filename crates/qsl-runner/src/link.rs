//! Threaded link to a simulated mote.
//!
//! The mote runs on its own thread, the way a real one sits behind a serial
//! port. The host side only ever sees encoded frames: commands go down a
//! crossbeam channel, replies and notifications come back up another one and
//! are decoded by [`AdapterEvent::from_frame`] when the connection polls.
//!
//! ## Key Types
//!
//! - [`DeviceLink`]: host side, implements [`ChannelAdapter`]
//! - [`LinkCommand`]: messages to the device thread
//! - [`DeviceSummary`]: what the device saw, returned on shutdown

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use qsl_metrics::{metric_defs, metrics, MetricLabels};
use qsl_mote_sim::{MoteBehavior, SimMote};
use qsl_protocol::{
    AdapterError, AdapterEvent, ChannelAdapter, Command, CommandKind, SystemClock,
};
use tracing::{debug, trace, warn};

use crate::error::RunnerError;

/// How long the device thread blocks waiting for a command before checking
/// its queue again.
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Device Thread
// ============================================================================

/// Messages from the host to the device thread.
#[derive(Debug)]
pub enum LinkCommand {
    /// An encoded command frame.
    Frame(Vec<u8>),
    /// The host gave up on the command in flight.
    Cancel,
    /// Deliver a datagram from the network.
    Inject {
        /// Payload bytes.
        payload: Vec<u8>,
        /// Sender port.
        src_port: u16,
    },
    /// Stop the device thread.
    Shutdown,
}

/// What the device saw over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Commands received, in order.
    pub commands: Vec<CommandKind>,
    /// Datagrams accepted for sending.
    pub datagrams_sent: usize,
}

fn encode_event(event: AdapterEvent) -> Vec<u8> {
    match event {
        AdapterEvent::Reply(reply) => reply.encode(),
        AdapterEvent::Notification(notification) => notification.encode(),
        // Forward the corruption as-is.
        AdapterEvent::MalformedReply { command_id, .. } => vec![command_id],
    }
}

fn run_device(
    mut mote: SimMote<SystemClock>,
    commands: Receiver<LinkCommand>,
    frames: Sender<Vec<u8>>,
) -> DeviceSummary {
    if let Err(e) = mote.init() {
        warn!("Device: init failed: {}", e);
    }

    loop {
        match commands.recv_timeout(DEVICE_POLL_INTERVAL) {
            Ok(LinkCommand::Frame(frame)) => match Command::decode(&frame) {
                Ok(command) => {
                    if let Err(e) = mote.issue(command) {
                        warn!("Device: command rejected: {}", e);
                    }
                }
                Err(e) => warn!("Device: undecodable command frame: {}", e),
            },
            Ok(LinkCommand::Cancel) => mote.cancel_in_flight(),
            Ok(LinkCommand::Inject { payload, src_port }) => {
                mote.inject_datagram(&payload, src_port)
            }
            Ok(LinkCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        while let Some(event) = mote.poll_event() {
            if frames.send(encode_event(event)).is_err() {
                debug!("Device: host went away");
                break;
            }
        }
    }

    DeviceSummary {
        commands: mote.issued().to_vec(),
        datagrams_sent: mote.sent_datagrams().len(),
    }
}

// ============================================================================
// Host Side
// ============================================================================

/// Host end of the link.
pub struct DeviceLink {
    commands: Sender<LinkCommand>,
    frames: Receiver<Vec<u8>>,
    thread: Option<JoinHandle<DeviceSummary>>,
    labels: MetricLabels,
    in_flight: Option<CommandKind>,
    initialized: bool,
}

impl DeviceLink {
    /// Start a device thread running a mote with `behavior`.
    pub fn spawn(behavior: MoteBehavior, labels: MetricLabels) -> Result<Self, RunnerError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let mote = SimMote::new(SystemClock::new(), behavior).with_name(labels.mote.clone());

        let thread = thread::Builder::new()
            .name(format!("device-{}", labels.mote))
            .spawn(move || run_device(mote, cmd_rx, frame_tx))
            .map_err(RunnerError::Spawn)?;

        Ok(DeviceLink {
            commands: cmd_tx,
            frames: frame_rx,
            thread: Some(thread),
            labels,
            in_flight: None,
            initialized: false,
        })
    }

    fn post(&self, command: LinkCommand) -> Result<(), AdapterError> {
        self.commands.send(command).map_err(|_| AdapterError::Closed)
    }

    fn count_frame(&self, direction: &str) {
        metrics::counter!(
            metric_defs::LINK_FRAMES.name,
            &self.labels.with(&[("direction", direction.to_string())])
        )
        .increment(1);
    }

    /// Have the network deliver a datagram to the mote.
    pub fn inject(&self, payload: &[u8], src_port: u16) -> Result<(), AdapterError> {
        self.post(LinkCommand::Inject {
            payload: payload.to_vec(),
            src_port,
        })
    }

    /// Stop the device thread and collect its summary.
    pub fn shutdown(mut self) -> Option<DeviceSummary> {
        let _ = self.commands.send(LinkCommand::Shutdown);
        self.thread.take().and_then(|handle| handle.join().ok())
    }
}

impl ChannelAdapter for DeviceLink {
    fn init(&mut self) -> Result<(), AdapterError> {
        if self.thread.as_ref().map_or(true, |t| t.is_finished()) {
            return Err(AdapterError::Closed);
        }
        self.initialized = true;
        Ok(())
    }

    fn issue(&mut self, command: Command) -> Result<(), AdapterError> {
        if !self.initialized {
            return Err(AdapterError::NotInitialized);
        }
        if self.in_flight.is_some() {
            return Err(AdapterError::Busy);
        }
        let kind = command.kind();
        let frame = command.encode()?;
        trace!("DeviceLink[{}]: tx {} ({} bytes)", self.labels.mote, kind, frame.len());
        self.post(LinkCommand::Frame(frame))?;
        self.count_frame("tx");
        self.in_flight = Some(kind);
        Ok(())
    }

    fn cancel_in_flight(&mut self) {
        if self.in_flight.take().is_some() {
            let _ = self.post(LinkCommand::Cancel);
        }
    }

    fn poll_event(&mut self) -> Option<AdapterEvent> {
        loop {
            let frame = match self.frames.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    if self.initialized {
                        warn!("DeviceLink[{}]: device thread stopped", self.labels.mote);
                        self.initialized = false;
                    }
                    return None;
                }
            };
            self.count_frame("rx");
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
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        let _ = self.commands.send(LinkCommand::Shutdown);
    }
}
