//! ffmpeg-backed RTSP video source
//!
//! Spawns one long-running ffmpeg process per connection that transcodes the
//! stream to MJPEG on stdout, and splits stdout into JPEG frames.

use super::types::{CaptureError, VideoDevice, VideoSource};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// Default upper bound for one encoded frame (8 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Read chunk size for ffmpeg stdout
const READ_CHUNK_BYTES: usize = 64 * 1024;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// RTSP source captured through ffmpeg
pub struct FfmpegSource {
    url: String,
    max_frame_bytes: usize,
}

impl FfmpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Connection string with credentials masked, for logs
    fn masked_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &self.url[..scheme_end], &self.url[at + 1..])
            }
            _ => self.url.clone(),
        }
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    type Device = FfmpegDevice;

    async fn open(&self) -> Result<FfmpegDevice, CaptureError> {
        // -rtsp_transport tcp: more reliable than UDP on lossy links
        // -f image2pipe -vcodec mjpeg: one JPEG per decoded frame on stdout
        // kill_on_drop: no orphaned ffmpeg if the device is dropped unreleased
        let child = Command::new("ffmpeg")
            .args([
                "-rtsp_transport", "tcp",
                "-i", self.url.as_str(),
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", "3",
                "-loglevel", "error",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Open(format!("ffmpeg spawn failed: {}", e)))?;

        FfmpegDevice::from_child(child, self.max_frame_bytes)
    }

    fn describe(&self) -> String {
        self.masked_url()
    }
}

/// Running ffmpeg process
pub struct FfmpegDevice {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: JpegSplitter,
    chunk: Vec<u8>,
}

impl FfmpegDevice {
    fn from_child(mut child: Child, max_frame_bytes: usize) -> Result<Self, CaptureError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Open("ffmpeg stdout not captured".to_string()))?;

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            splitter: JpegSplitter::new(max_frame_bytes),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        })
    }
}

#[async_trait]
impl VideoDevice for FfmpegDevice {
    fn is_open(&self) -> bool {
        self.child.is_some() && self.stdout.is_some()
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        loop {
            if let Some(frame) = self.splitter.next_frame()? {
                return Ok(frame);
            }

            let stdout = self.stdout.as_mut().ok_or(CaptureError::Closed)?;
            let n = stdout
                .read(&mut self.chunk)
                .await
                .map_err(|e| CaptureError::Read(format!("ffmpeg stdout: {}", e)))?;
            if n == 0 {
                return Err(CaptureError::Closed);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }

    async fn release(&mut self) {
        self.stdout = None;
        self.splitter.clear();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
        }
    }
}

/// Splits a byte stream of concatenated JPEG images into frames
#[derive(Debug)]
pub struct JpegSplitter {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl JpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Append raw bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Extract the next complete JPEG, if any.
    ///
    /// Bytes before a start-of-image marker are discarded. A partial frame
    /// growing beyond `max_frame_bytes` is an error and the buffer is reset.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let Some(start) = find_marker(&self.buf, JPEG_SOI, 0) else {
            // Keep a trailing 0xFF: it may be the first half of a marker
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let drop_len = self.buf.len() - keep;
            self.buf.drain(..drop_len);
            return Ok(None);
        };
        if start > 0 {
            self.buf.drain(..start);
        }

        match find_marker(&self.buf, JPEG_EOI, JPEG_SOI.len()) {
            Some(eoi) => {
                let end = eoi + JPEG_EOI.len();
                let frame: Vec<u8> = self.buf.drain(..end).collect();
                Ok(Some(frame))
            }
            None if self.buf.len() > self.max_frame_bytes => {
                let size = self.buf.len();
                self.buf.clear();
                Err(CaptureError::Read(format!(
                    "frame exceeds {} bytes without end marker ({} buffered)",
                    self.max_frame_bytes, size
                )))
            }
            None => Ok(None),
        }
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}
