//! FaceApiClient - HTTP face recognition service adapter
//!
//! ## Responsibilities
//!
//! - Upload frames to the recognition service (`POST /find`)
//! - Map "no face" answers to `NoFaceDetected`
//! - Convert per-face candidate lists into ranked observations
//! - Keep the per-face grouping for calibration (`find`)
//! - Health check on startup (`GET /healthz`)

use super::{IdentityObservation, RecognitionError, Recognizer};
use crate::stream_reader::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Health check attempts before giving up
const WARM_UP_ATTEMPTS: u32 = 5;

/// Candidate row returned by the service
#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    /// Reference image path, e.g. `db/max/max.jpg`
    pub identity: String,
    pub distance: f64,
}

/// `/find` response: one candidate list per detected face
#[derive(Debug, Clone, Deserialize)]
pub struct FindResponse {
    #[serde(default)]
    pub results: Vec<Vec<Candidate>>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Recognition service client
pub struct FaceApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl FaceApiClient {
    /// Create new client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecognitionError::Failure(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Ranked observations grouped by detected face
    ///
    /// A face with no match keeps an empty list.
    pub async fn find(&self, frame: &Frame) -> Result<Vec<Vec<IdentityObservation>>, RecognitionError> {
        let url = format!("{}/find", self.base_url);

        let part = Part::bytes(frame.data().to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| RecognitionError::Failure(format!("Invalid mime type: {}", e)))?;
        let form = Form::new()
            .part("img", part)
            .text("captured_at", frame.captured_at().to_rfc3339());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RecognitionError::Failure(format!("Recognition request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: FindResponse = resp
            .json()
            .await
            .map_err(|e| RecognitionError::Failure(format!("Malformed recognition response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(if mentions_no_face(&error) {
                RecognitionError::NoFaceDetected
            } else {
                RecognitionError::Failure(error)
            });
        }

        Ok(observations_by_face(parsed.results))
    }

    /// Check service health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Recognizer for FaceApiClient {
    async fn recognize(&self, frame: &Frame) -> Result<Vec<IdentityObservation>, RecognitionError> {
        let faces = self.find(frame).await?;
        Ok(faces.into_iter().flatten().collect())
    }

    async fn warm_up(&self) -> Result<(), RecognitionError> {
        for attempt in 0..WARM_UP_ATTEMPTS {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }
            if self.health_check().await {
                tracing::info!(base_url = %self.base_url, attempt, "Recognition service ready");
                return Ok(());
            }
            tracing::debug!(base_url = %self.base_url, attempt, "Recognition service not ready yet");
        }

        Err(RecognitionError::Failure(format!(
            "Recognition service at {} not healthy after {} attempts",
            self.base_url, WARM_UP_ATTEMPTS
        )))
    }
}

/// Map a non-success response to an error
fn classify_failure(status: StatusCode, body: &str) -> RecognitionError {
    let no_face = status == StatusCode::UNPROCESSABLE_ENTITY
        || (status == StatusCode::BAD_REQUEST && mentions_no_face(body));

    if no_face {
        RecognitionError::NoFaceDetected
    } else {
        RecognitionError::Failure(format!("Recognition service returned {}: {}", status, body.trim()))
    }
}

fn mentions_no_face(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("face could not be detected") || lower.contains("no face")
}

/// Sort each face's candidates by distance and rank them
fn observations_by_face(results: Vec<Vec<Candidate>>) -> Vec<Vec<IdentityObservation>> {
    results
        .into_iter()
        .enumerate()
        .map(|(face, mut candidates)| {
            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            candidates
                .into_iter()
                .enumerate()
                .map(|(rank, c)| {
                    IdentityObservation::new(label_from_identity(&c.identity), c.distance, rank, face)
                })
                .collect()
        })
        .collect()
}

/// Identity label from a reference image path: the enrollment directory
/// name (`db/max/max.jpg` -> `max`), or the bare value when there is none.
pub fn label_from_identity(identity: &str) -> String {
    let path = Path::new(identity);
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());

    match parent {
        Some(dir) if path.extension().is_some() => dir.to_string(),
        _ => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(identity)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_identity() {
        assert_eq!(label_from_identity("db/max/max.jpg"), "max");
        assert_eq!(label_from_identity("/srv/faces/laura/2.png"), "laura");
        assert_eq!(label_from_identity("bastian"), "bastian");
        assert_eq!(label_from_identity("db/laura"), "laura");
    }

    #[test]
    fn test_observations_are_ranked_per_face() {
        let body = r#"{"results": [
            [{"identity": "db/max/max.jpg", "distance": 0.31},
             {"identity": "db/laura/laura.jpg", "distance": 0.12}],
            [{"identity": "db/bastian/b.jpg", "distance": 0.25}]
        ]}"#;
        let parsed: FindResponse = serde_json::from_str(body).unwrap();
        let faces = observations_by_face(parsed.results);
        assert_eq!(faces.len(), 2);

        let obs: Vec<_> = faces.into_iter().flatten().collect();
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0], IdentityObservation::new("laura", 0.12, 0, 0));
        assert_eq!(obs[1], IdentityObservation::new("max", 0.31, 1, 0));
        assert_eq!(obs[2], IdentityObservation::new("bastian", 0.25, 0, 1));
    }

    #[test]
    fn test_unmatched_face_keeps_its_slot() {
        let body = r#"{"results": [
            [],
            [{"identity": "db/max/max.jpg", "distance": 0.31}]
        ]}"#;
        let parsed: FindResponse = serde_json::from_str(body).unwrap();
        let faces = observations_by_face(parsed.results);

        assert_eq!(faces.len(), 2);
        assert!(faces[0].is_empty());
        assert_eq!(faces[1], vec![IdentityObservation::new("max", 0.31, 0, 1)]);
    }

    #[test]
    fn test_empty_results() {
        let parsed: FindResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(observations_by_face(parsed.results).is_empty());
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure(StatusCode::UNPROCESSABLE_ENTITY, "").is_no_face());
        assert!(classify_failure(
            StatusCode::BAD_REQUEST,
            "Face could not be detected. Please confirm that the picture is a face photo"
        )
        .is_no_face());
        assert!(!classify_failure(StatusCode::BAD_REQUEST, "missing img").is_no_face());
        assert!(!classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "oom").is_no_face());
    }
}
