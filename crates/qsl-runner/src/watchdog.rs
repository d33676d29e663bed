//! Watchdog thread for monitoring stalled connection loops.
//!
//! The connection feeds the watchdog on every iteration of a blocking wait.
//! A background thread checks how long ago the last feed happened; if it
//! exceeds the timeout it logs what the host was doing and counts a stall.
//! On a device this is where a hardware watchdog would reset the board.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use qsl_metrics::{metric_defs, metrics, MetricLabels};
use qsl_protocol::Liveness;
use tracing::warn;

/// Shared state between the host loop and the watchdog thread.
pub struct WatchdogState {
    origin: Instant,
    /// Milliseconds since `origin` at the last feed.
    last_feed_ms: AtomicU64,
    /// Incremented on every feed so each stall is reported once.
    feed_count: AtomicU64,
    /// What the host loop is currently doing.
    activity: Mutex<String>,
    stop_flag: AtomicBool,
    stall_count: AtomicU64,
}

impl WatchdogState {
    /// Create a new watchdog state, fed as of now.
    pub fn new() -> Self {
        WatchdogState {
            origin: Instant::now(),
            last_feed_ms: AtomicU64::new(0),
            feed_count: AtomicU64::new(0),
            activity: Mutex::new("idle".to_string()),
            stop_flag: AtomicBool::new(false),
            stall_count: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Record progress.
    pub fn feed(&self) {
        self.last_feed_ms.store(self.elapsed_ms(), Ordering::Relaxed);
        self.feed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Describe the current activity for stall reports. Also counts as a feed.
    pub fn set_activity(&self, activity: impl Into<String>) {
        *self.activity.lock() = activity.into();
        self.feed();
    }

    /// Current activity description.
    pub fn activity(&self) -> String {
        self.activity.lock().clone()
    }

    /// Time since the last feed.
    pub fn since_feed(&self) -> Duration {
        let last = self.last_feed_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Signal the watchdog to stop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Check if the watchdog should stop.
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Number of stalls reported so far.
    pub fn stall_count(&self) -> u64 {
        self.stall_count.load(Ordering::Relaxed)
    }

    fn increment_stall_count(&self) -> u64 {
        self.stall_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Liveness`] handle given to a connection.
#[derive(Clone)]
pub struct WatchdogFeeder {
    state: Arc<WatchdogState>,
}

impl Liveness for WatchdogFeeder {
    fn feed(&mut self) {
        self.state.feed();
    }
}

/// Watchdog thread handle.
pub struct Watchdog {
    state: Arc<WatchdogState>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Watchdog {
    /// Create and start a new watchdog thread.
    pub fn new(timeout: Duration, labels: MetricLabels) -> Self {
        let state = Arc::new(WatchdogState::new());
        let watchdog_state = Arc::clone(&state);
        let check_interval = (timeout / 4).clamp(Duration::from_millis(5), Duration::from_millis(500));

        let thread_handle = thread::spawn(move || {
            let mut last_alerted_feed: Option<u64> = None;

            while !watchdog_state.should_stop() {
                thread::sleep(check_interval);

                let stalled_for = watchdog_state.since_feed();
                let feed = watchdog_state.feed_count.load(Ordering::Relaxed);
                // Only alert once per stall.
                if stalled_for >= timeout && last_alerted_feed != Some(feed) {
                    last_alerted_feed = Some(feed);
                    let alert_num = watchdog_state.increment_stall_count();
                    warn!(
                        "Watchdog[{}]: stall #{}: no progress for {:.1}s while {}",
                        labels.mote,
                        alert_num,
                        stalled_for.as_secs_f64(),
                        watchdog_state.activity()
                    );
                    metrics::counter!(metric_defs::WATCHDOG_STALLS.name, &labels.to_labels())
                        .increment(1);
                }
            }
        });

        Watchdog {
            state,
            thread_handle: Some(thread_handle),
            timeout,
        }
    }

    /// Get a reference to the watchdog state for the host loop to update.
    pub fn state(&self) -> &Arc<WatchdogState> {
        &self.state
    }

    /// A feeder to hand to a connection.
    pub fn feeder(&self) -> WatchdogFeeder {
        WatchdogFeeder {
            state: Arc::clone(&self.state),
        }
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the watchdog thread and wait for it to finish.
    pub fn stop(mut self) -> u64 {
        self.state.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.state.stall_count()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.state.stop();
        // Don't wait for thread in drop - it will terminate on its own
    }
}
