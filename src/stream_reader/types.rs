//! Stream reader types: frames, capture errors and the video source boundary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Captured video frame
///
/// The image bytes sit behind an `Arc<[u8]>`, so clones are cheap and no
/// consumer can write back into the reader's storage.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    captured_at: DateTime<Utc>,
    seq: u64,
}

impl Frame {
    /// Create new frame
    pub fn new(data: Vec<u8>, captured_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            data: data.into(),
            captured_at,
            seq,
        }
    }

    /// Encoded image bytes (JPEG from the ffmpeg source)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Capture timestamp
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Capture sequence number, strictly increasing per reader
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Capture errors (always absorbed by the capture loop)
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Device could not be opened
    #[error("Can not access camera: {0}")]
    Open(String),

    /// Single frame read failed
    #[error("Failed to read image: {0}")]
    Read(String),

    /// Device did not answer in time (hung camera)
    #[error("Camera did not respond within {0:?}")]
    Timeout(Duration),

    /// Stream ended
    #[error("Stream closed by camera")]
    Closed,
}

/// Video source - opens device handles for one connection string
#[async_trait]
pub trait VideoSource: Send + Sync + 'static {
    type Device: VideoDevice;

    /// Open a new device handle
    async fn open(&self) -> Result<Self::Device, CaptureError>;

    /// Human readable source name for logs
    fn describe(&self) -> String;
}

/// Open device handle
#[async_trait]
pub trait VideoDevice: Send + 'static {
    /// Whether the handle is still usable
    fn is_open(&self) -> bool;

    /// Capture one encoded frame
    async fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// Release the underlying handle. Called exactly once per opened device.
    async fn release(&mut self);
}
