//! StreamReader - Latest-frame access to a live video source
//!
//! ## Responsibilities
//!
//! - Background capture loop that owns the device handle
//! - Reconnect with a fixed backoff on open/read failure or hung reads
//! - Single-slot "latest frame" handoff to the main loop
//!
//! A read drains the slot: every frame is handed out at most once, and a
//! newer capture always replaces an unread older one.

mod ffmpeg;
mod types;

pub use ffmpeg::{FfmpegSource, JpegSplitter, DEFAULT_MAX_FRAME_BYTES};
pub use types::*;

use crate::link_status::LinkTracker;
use crate::task::{self, BackgroundTask};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{timeout, timeout_at, Instant};

/// Default reconnect delay (5 seconds)
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Default hung-read guard (10 seconds)
const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// StreamReader configuration
#[derive(Debug, Clone)]
pub struct StreamReaderConfig {
    /// Fixed wait between reconnect attempts
    pub reconnect_delay: Duration,
    /// Open/read calls taking longer than this count as failures
    pub read_timeout: Duration,
}

impl Default for StreamReaderConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

/// Single-slot frame handoff
struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    ready: Notify,
    captured: AtomicU64,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            ready: Notify::new(),
            captured: AtomicU64::new(0),
        }
    }

    async fn publish(&self, frame: Frame) {
        *self.latest.lock().await = Some(frame);
        self.captured.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_waiters();
    }
}

/// StreamReader instance
pub struct StreamReader<S: VideoSource> {
    source: Arc<S>,
    config: StreamReaderConfig,
    slot: Arc<FrameSlot>,
    worker: Mutex<Option<BackgroundTask>>,
}

impl<S: VideoSource> StreamReader<S> {
    /// Create new StreamReader (not started)
    pub fn new(source: S, config: StreamReaderConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            slot: Arc::new(FrameSlot::new()),
            worker: Mutex::new(None),
        }
    }

    /// Start the capture loop. No-op if already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::info!(source = %self.source.describe(), "Stream is already running");
            return;
        }

        let source = self.source.clone();
        let slot = self.slot.clone();
        let config = self.config.clone();
        *worker = Some(BackgroundTask::spawn(move |shutdown| {
            capture_loop(source, slot, config, shutdown)
        }));

        tracing::info!(
            source = %self.source.describe(),
            reconnect_delay_sec = self.config.reconnect_delay.as_secs(),
            "Stream started"
        );
    }

    /// Stop the capture loop and release the device. Safe to call repeatedly.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        match worker {
            Some(worker) => {
                worker.stop().await;
                tracing::info!(source = %self.source.describe(), "Stream stopped");
            }
            None => {
                tracing::debug!("Stream stop requested but not running");
            }
        }
    }

    /// Whether the capture loop is running
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    /// Take the most recent unread frame, waiting up to `timeout`.
    ///
    /// Returns `None` if nothing new was captured in time. Never waits longer
    /// than `timeout` and never blocks the capture loop.
    pub async fn read(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking the slot so a publish between
            // the check and the wait is not lost
            let notified = self.slot.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(frame) = self.slot.latest.lock().await.take() {
                return Some(frame);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Total frames captured since creation
    pub fn frames_captured(&self) -> u64 {
        self.slot.captured.load(Ordering::Relaxed)
    }
}

/// Capture loop: (re)open, read, publish until shutdown
async fn capture_loop<S: VideoSource>(
    source: Arc<S>,
    slot: Arc<FrameSlot>,
    config: StreamReaderConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut device: Option<S::Device> = None;
    let mut link = LinkTracker::new("camera");
    let mut seq: u64 = 0;

    loop {
        if task::is_shutdown(&shutdown) {
            break;
        }

        let step = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            step = capture_step(source.as_ref(), &mut device, &config, &mut link) => step,
        };

        match step {
            Ok(data) => {
                seq += 1;
                slot.publish(Frame::new(data, Utc::now(), seq)).await;
            }
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    retry_in_sec = config.reconnect_delay.as_secs(),
                    "Capture failed, retrying"
                );
                if !task::sleep_or_shutdown(&mut shutdown, config.reconnect_delay).await {
                    break;
                }
            }
        }
    }

    if let Some(mut active) = device.take() {
        active.release().await;
    }
    tracing::debug!(frames = seq, "Capture loop exited");
}

/// One capture attempt. On failure the device is released and dropped so
/// the next attempt reopens it.
async fn capture_step<S: VideoSource>(
    source: &S,
    device: &mut Option<S::Device>,
    config: &StreamReaderConfig,
    link: &mut LinkTracker,
) -> Result<Vec<u8>, CaptureError> {
    let usable = device.as_ref().map(|d| d.is_open()).unwrap_or(false);
    if !usable {
        if let Some(mut stale) = device.take() {
            stale.release().await;
        }
        let opened = match timeout(config.read_timeout, source.open()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(config.read_timeout)),
        };
        match opened {
            Ok(d) => {
                tracing::debug!(source = %source.describe(), "Camera opened");
                *device = Some(d);
            }
            Err(e) => {
                link.mark_offline();
                return Err(e);
            }
        }
    }

    let Some(active) = device.as_mut() else {
        return Err(CaptureError::Closed);
    };

    let read = match timeout(config.read_timeout, active.read_frame()).await {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(config.read_timeout)),
    };

    match read {
        Ok(data) => {
            link.mark_online();
            Ok(data)
        }
        Err(e) => {
            if let Some(mut failed) = device.take() {
                failed.release().await;
            }
            link.mark_offline();
            Err(e)
        }
    }
}
