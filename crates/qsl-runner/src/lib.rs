//! Scenario runner for the QSL connection stack.
//!
//! Runs a [`qsl_core::Connection`] against a simulated mote on its own
//! thread, in real time:
//!
//! 1. Spawn the device thread ([`link::DeviceLink`]) and a [`watchdog::Watchdog`]
//! 2. `init` and `connect` with the scenario's credentials
//! 3. Deliver scripted inbound datagrams, publish the outbound ones
//! 4. Keep reading the inbox for a drain period
//! 5. Produce a [`report::RunReport`]
//!
//! The `qsl` binary wraps [`run_scenario`] with logging, metrics collection
//! and Ctrl-C handling.

pub mod error;
pub mod link;
pub mod metrics_export;
pub mod report;
pub mod scenario;
pub mod watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use qsl_core::{Connection, INBOX_SLOT_LEN};
use qsl_metrics::MetricLabels;
use qsl_protocol::{ChannelAdapter, Clock, Liveness, SystemClock};
use tracing::{info, warn};

pub use error::RunnerError;
pub use link::{DeviceLink, DeviceSummary};
pub use metrics_export::{InMemoryRecorder, MetricsSnapshot};
pub use report::RunReport;
pub use scenario::Scenario;
pub use watchdog::Watchdog;

use report::{ConnectOutcome, ReceivedDatagram, SendSummary};
use watchdog::WatchdogState;

/// Options that override or accompany a scenario.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Seed for the simulated mote, replacing the scenario's.
    pub seed: Option<u64>,
    /// Set to stop the run early.
    pub interrupt: Arc<AtomicBool>,
}

impl RunOptions {
    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }
}

/// Step the connection for `duration`, collecting whatever arrives.
fn pump<A: ChannelAdapter, C: Clock, L: Liveness>(
    conn: &mut Connection<A, C, L>,
    watchdog: &WatchdogState,
    duration: Duration,
    options: &RunOptions,
    received: &mut Vec<ReceivedDatagram>,
) {
    let deadline = Instant::now() + duration;
    let idle = Duration::from_millis(conn.config().run_interval_ms);
    let mut buf = [0u8; INBOX_SLOT_LEN];
    loop {
        watchdog.feed();
        conn.step();
        while conn.inbox_len() > 0 {
            let len = conn.read(&mut buf);
            received.push(ReceivedDatagram::new(&buf[..len]));
        }
        if Instant::now() >= deadline || options.interrupted() {
            break;
        }
        thread::sleep(idle);
    }
}

/// Run one scenario to completion.
///
/// Connect and send failures are part of the report; only setup problems
/// are returned as errors.
pub fn run_scenario(scenario: &Scenario, options: &RunOptions) -> Result<RunReport, RunnerError> {
    scenario.validate()?;
    let started_at = Utc::now();
    let labels = MetricLabels::new(scenario.name.clone());

    let mut behavior = scenario.mote.clone();
    let seed = options.seed.unwrap_or(behavior.seed);
    behavior.seed = seed;

    let link = DeviceLink::spawn(behavior, labels.clone())?;
    let watchdog = Watchdog::new(scenario.watchdog_timeout(), labels.clone());
    let mut conn = Connection::new(
        link,
        SystemClock::new(),
        watchdog.feeder(),
        scenario.config.clone(),
    )
    .with_labels(labels);
    conn.init()?;

    info!("Runner[{}]: connecting (seed {})", scenario.name, seed);
    watchdog.state().set_activity("connecting");
    let connect_started = Instant::now();
    let connect_result = conn.connect(&scenario.network);
    let connect = ConnectOutcome {
        connected: connect_result.is_ok(),
        error: connect_result.as_ref().err().map(|e| e.to_string()),
        elapsed_ms: connect_started.elapsed().as_millis() as u64,
        granted_service_ms: conn.granted_service_ms(),
    };
    match &connect_result {
        Ok(()) => info!("Runner[{}]: connected in {} ms", scenario.name, connect.elapsed_ms),
        Err(e) => warn!("Runner[{}]: connect failed: {}", scenario.name, e),
    }

    let mut sends = SendSummary::default();
    let mut received = Vec::new();
    if connect_result.is_ok() {
        for datagram in &scenario.inbound {
            if let Err(e) = conn.adapter().inject(datagram.payload.as_bytes(), datagram.src_port) {
                warn!("Runner[{}]: inject failed: {}", scenario.name, e);
            }
        }

        let plan = &scenario.publish;
        for n in 0..plan.count {
            if options.interrupted() {
                break;
            }
            let payload = plan.payload_for(n)?;
            watchdog.state().set_activity(format!("sending datagram {}", n));
            sends.attempted += 1;
            match conn.send(&payload, plan.dest_port) {
                Ok(()) => sends.succeeded += 1,
                Err(e) => {
                    warn!("Runner[{}]: send {} failed: {}", scenario.name, n, e);
                    sends.failures.push(e.to_string());
                }
            }
            if n + 1 < plan.count {
                pump(&mut conn, watchdog.state(), plan.interval(), options, &mut received);
            }
        }

        watchdog.state().set_activity("draining inbox");
        pump(
            &mut conn,
            watchdog.state(),
            Duration::from_millis(scenario.drain_ms),
            options,
            &mut received,
        );
    }

    let final_state = conn.state();
    let summary = conn.into_adapter().shutdown().unwrap_or_default();
    let watchdog_stalls = watchdog.stop();

    info!(
        "Runner[{}]: done, {}/{} sent, {} received, final state {}",
        scenario.name,
        sends.succeeded,
        sends.attempted,
        received.len(),
        final_state
    );

    Ok(RunReport {
        scenario: scenario.name.clone(),
        seed,
        started_at,
        finished_at: Utc::now(),
        connect,
        sends,
        received,
        final_state,
        commands: summary.commands.iter().map(|kind| kind.to_string()).collect(),
        watchdog_stalls,
        interrupted: options.interrupted(),
        metrics: None,
    })
}
