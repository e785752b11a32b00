//! MotionGate - Polled motion sensor turned into a wait/notify trigger
//!
//! ## Responsibilities
//!
//! - Poll the motion source at a fixed interval in the background
//! - Latch every motion-positive poll and wake waiters
//! - Let the main loop consume the latch with `clear()`
//!
//! ## Design
//!
//! - `active` follows the last poll (`has_motion`)
//! - `latched` is set by a positive poll and only reset by `clear()`, so
//!   `wait_for_motion` returns true iff motion was seen since the last clear
//! - Errors and non-success responses count as "no motion"

mod http_source;

pub use http_source::{parse_motion, HttpMotionSource, DEFAULT_MOTION_FIELD};

use crate::link_status::LinkTracker;
use crate::task::{self, BackgroundTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

/// Default poll interval (1 second)
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Motion polling errors (always treated as "no motion")
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("Motion transport error: {0}")]
    Transport(String),

    #[error("Motion endpoint returned status {0}")]
    Status(u16),

    #[error("Malformed motion payload: {0}")]
    Payload(String),
}

/// Polled motion signal
#[async_trait]
pub trait MotionSource: Send + Sync + 'static {
    /// Query the current motion state
    async fn poll(&self) -> Result<bool, MotionError>;

    /// Human readable source name for logs
    fn describe(&self) -> String;
}

/// MotionGate configuration
#[derive(Debug, Clone)]
pub struct MotionGateConfig {
    pub poll_interval: Duration,
}

impl Default for MotionGateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Most recent motion sample
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionState {
    /// Result of the last poll
    pub active: bool,
    /// Motion seen since the last `clear()`
    pub latched: bool,
    /// Timestamp of the last positive poll
    pub last_motion_at: Option<DateTime<Utc>>,
}

/// MotionGate instance
pub struct MotionGate<M: MotionSource> {
    source: Arc<M>,
    config: MotionGateConfig,
    state: Arc<watch::Sender<MotionState>>,
    worker: Mutex<Option<BackgroundTask>>,
}

impl<M: MotionSource> MotionGate<M> {
    /// Create new MotionGate (not started)
    pub fn new(source: M, config: MotionGateConfig) -> Self {
        let (state, _) = watch::channel(MotionState::default());
        Self {
            source: Arc::new(source),
            config,
            state: Arc::new(state),
            worker: Mutex::new(None),
        }
    }

    /// Start polling. No-op if already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::info!(source = %self.source.describe(), "MotionGate is already running");
            return;
        }

        let source = self.source.clone();
        let state = self.state.clone();
        let config = self.config.clone();
        *worker = Some(BackgroundTask::spawn(move |shutdown| {
            poll_loop(source, state, config, shutdown)
        }));

        tracing::info!(
            source = %self.source.describe(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "MotionGate started"
        );
    }

    /// Stop polling. Safe to call repeatedly.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        match worker {
            Some(worker) => {
                worker.stop().await;
                tracing::info!("MotionGate stopped");
            }
            None => tracing::debug!("MotionGate stop requested but not running"),
        }
    }

    /// Whether the poll loop is running
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    /// Wait until motion has been latched or `timeout` elapses
    pub async fn wait_for_motion(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let latched = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| s.latched)).await,
            Ok(Ok(_))
        );
        latched
    }

    /// Consume the latched motion without touching polling
    pub fn clear(&self) {
        self.state.send_if_modified(|s| {
            s.latched = false;
            false
        });
    }

    /// Motion reported by the most recent poll
    pub fn has_motion(&self) -> bool {
        self.state.borrow().active
    }

    /// Snapshot of the motion state
    pub fn state(&self) -> MotionState {
        *self.state.borrow()
    }
}

async fn poll_loop<M: MotionSource>(
    source: Arc<M>,
    state: Arc<watch::Sender<MotionState>>,
    config: MotionGateConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut link = LinkTracker::new("motion");
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if task::is_shutdown(&shutdown) {
            break;
        }

        let polled = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            polled = source.poll() => polled,
        };

        let detected = match polled {
            Ok(detected) => {
                link.mark_online();
                detected
            }
            Err(e) => {
                link.mark_offline();
                tracing::debug!(error = %e, "Motion poll failed, treating as no motion");
                false
            }
        };

        apply_sample(&state, detected);
    }

    tracing::debug!(failures = link.failures(), "Motion poll loop exited");
}

/// Fold one poll result into the shared state
fn apply_sample(state: &watch::Sender<MotionState>, detected: bool) {
    if detected {
        state.send_modify(|s| {
            if !s.active {
                tracing::info!("Motion detected");
            }
            s.active = true;
            s.latched = true;
            s.last_motion_at = Some(Utc::now());
        });
    } else {
        // Level only; waiters are not woken and the latch stays
        state.send_if_modified(|s| {
            if s.active {
                tracing::debug!("Motion ended");
            }
            s.active = false;
            false
        });
    }
}
