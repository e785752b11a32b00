//! Recognition adapter boundary
//!
//! A recognizer takes one frame and returns the candidate identities for
//! every detected face, ranked by distance (rank 0 = closest).

mod face_api;

pub use face_api::{label_from_identity, FaceApiClient};

use crate::stream_reader::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One candidate identity for one detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityObservation {
    /// Enrolled identity label (enrollment directory name)
    pub identity_label: String,
    /// Distance to the enrolled reference, lower is closer
    pub distance: f64,
    /// Position among this face's candidates, 0 = closest
    pub rank: usize,
    /// Index of the detected face within the frame
    pub face: usize,
}

impl IdentityObservation {
    pub fn new(identity_label: impl Into<String>, distance: f64, rank: usize, face: usize) -> Self {
        Self {
            identity_label: identity_label.into(),
            distance,
            rank,
            face,
        }
    }
}

/// Recognition errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecognitionError {
    /// Expected and frequent: nothing face-like in the frame
    #[error("No face detected in frame")]
    NoFaceDetected,

    /// Anything else; escalated to the orchestrator
    #[error("Recognition failed: {0}")]
    Failure(String),
}

impl RecognitionError {
    pub fn is_no_face(&self) -> bool {
        matches!(self, RecognitionError::NoFaceDetected)
    }
}

/// Face recognition capability
#[async_trait]
pub trait Recognizer: Send + Sync + 'static {
    /// Identify the faces in `frame`
    async fn recognize(&self, frame: &Frame) -> Result<Vec<IdentityObservation>, RecognitionError>;

    /// Prepare the backend before the first frame (model load, health check)
    async fn warm_up(&self) -> Result<(), RecognitionError> {
        Ok(())
    }
}
