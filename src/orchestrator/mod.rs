//! Orchestrator - Motion-gated recognition main loop
//!
//! ## Responsibilities
//!
//! - Start and stop the stream reader and motion gate
//! - Warm up the recognizer before the first frame
//! - Per motion event: sweep stale counts, take the newest frame, clear the
//!   motion latch, recognize (inline or on the bounded pool), fold the result
//!   into the access engine
//! - Escalate fatal recognition failures into an orderly shutdown

mod pool;

pub use pool::{RecognitionPool, MAX_RECOGNITION_WORKERS};

use crate::access_engine::AccessEngine;
use crate::error::{Error, Result};
use crate::motion_gate::{MotionGate, MotionSource};
use crate::recognition::{RecognitionError, Recognizer};
use crate::stream_reader::{Frame, StreamReader, VideoSource};
use crate::task;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// How long one motion wait lasts before the loop re-checks its channels
const MOTION_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait for a fresh frame after motion
    pub frame_read_timeout: Duration,
    /// 0 = recognize inline, N = bounded pool of N tasks
    pub recognition_workers: usize,
    /// Delay between startup and the first recognition
    pub warmup: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            frame_read_timeout: Duration::from_millis(1000),
            recognition_workers: 0,
            warmup: Duration::from_secs(5),
        }
    }
}

/// Orchestrator instance
pub struct Orchestrator<S: VideoSource, M: MotionSource, R: Recognizer> {
    reader: Arc<StreamReader<S>>,
    gate: Arc<MotionGate<M>>,
    recognizer: Arc<R>,
    engine: Arc<AccessEngine>,
    config: OrchestratorConfig,
}

impl<S: VideoSource, M: MotionSource, R: Recognizer> Orchestrator<S, M, R> {
    pub fn new(
        reader: Arc<StreamReader<S>>,
        gate: Arc<MotionGate<M>>,
        recognizer: Arc<R>,
        engine: Arc<AccessEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            reader,
            gate,
            recognizer,
            engine,
            config,
        }
    }

    /// Run until shutdown is signalled or a fatal error occurs.
    ///
    /// The reader and gate are stopped on every exit path.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.reader.start().await;
        self.gate.start().await;

        let result = self.serve(&mut shutdown).await;

        self.gate.stop().await;
        self.reader.stop().await;

        match &result {
            Ok(()) => tracing::info!("Orchestrator stopped"),
            Err(e) if e.is_fatal() => tracing::error!(error = %e, "Orchestrator stopped on fatal error"),
            Err(e) => tracing::warn!(error = %e, "Orchestrator stopped on error"),
        }
        result
    }

    /// A background loop that exited on its own (panic) is fatal
    async fn check_components(&self) -> Result<()> {
        if !self.reader.is_running().await {
            return Err(Error::Internal("stream reader loop exited unexpectedly".to_string()));
        }
        if !self.gate.is_running().await {
            return Err(Error::Internal("motion gate loop exited unexpectedly".to_string()));
        }
        Ok(())
    }

    async fn serve(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tracing::info!(warmup_sec = self.config.warmup.as_secs(), "Warming up recognizer");
        tokio::select! {
            biased;
            _ = task::wait_shutdown(shutdown) => return Ok(()),
            warmed = self.recognizer.warm_up() => warmed?,
        }
        if !task::sleep_or_shutdown(shutdown, self.config.warmup).await {
            return Ok(());
        }

        let pool = match self.config.recognition_workers {
            0 => None,
            n => Some(RecognitionPool::new(n)),
        };
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<RecognitionError>(1);

        tracing::info!(
            recognition_workers = self.config.recognition_workers,
            "Watching for motion"
        );

        let result = loop {
            let motion = tokio::select! {
                biased;
                _ = task::wait_shutdown(shutdown) => break Ok(()),
                Some(e) = fatal_rx.recv() => break Err(Error::from(e)),
                motion = self.gate.wait_for_motion(MOTION_WAIT_SLICE) => motion,
            };
            if !motion {
                if let Err(e) = self.check_components().await {
                    break Err(e);
                }
                continue;
            }

            self.engine.sweep(Utc::now()).await;
            let frame = self.reader.read(self.config.frame_read_timeout).await;
            self.gate.clear();

            let Some(frame) = frame else {
                tracing::debug!("Motion without a fresh frame");
                continue;
            };
            tracing::debug!(seq = frame.seq(), bytes = frame.len(), "Frame dispatched");

            match &pool {
                None => {
                    let recognized = tokio::select! {
                        biased;
                        _ = task::wait_shutdown(shutdown) => break Ok(()),
                        recognized = self.recognizer.recognize(&frame) => recognized,
                    };
                    if let Err(e) = self.engine.process(recognized, Utc::now()).await {
                        break Err(Error::from(e));
                    }
                }
                Some(pool) => {
                    let permit = tokio::select! {
                        biased;
                        _ = task::wait_shutdown(shutdown) => break Ok(()),
                        permit = pool.acquire() => permit,
                    };
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => break Err(e),
                    };

                    let recognizer = self.recognizer.clone();
                    let engine = self.engine.clone();
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        recognize_pooled(recognizer, engine, frame, fatal_tx).await;
                    });
                }
            }
        };

        if let Some(pool) = &pool {
            pool.drain().await;
        }

        // A pooled failure may land after the loop has already exited
        match (result, fatal_rx.try_recv()) {
            (Ok(()), Ok(e)) => Err(Error::from(e)),
            (result, _) => result,
        }
    }
}

async fn recognize_pooled<R: Recognizer>(
    recognizer: Arc<R>,
    engine: Arc<AccessEngine>,
    frame: Frame,
    fatal_tx: mpsc::Sender<RecognitionError>,
) {
    let recognized = recognizer.recognize(&frame).await;
    if let Err(e) = engine.process(recognized, Utc::now()).await {
        tracing::error!(seq = frame.seq(), error = %e, "Recognition failed");
        // Channel full means a fatal error is already pending
        let _ = fatal_tx.try_send(e);
    }
}
