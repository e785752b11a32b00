//! HTTP motion sensor source
//!
//! Polls an endpoint returning a JSON object such as `{"val": "ON"}`.

use super::{MotionError, MotionSource};
use async_trait::async_trait;
use std::time::Duration;

/// Default JSON field carrying the motion state
pub const DEFAULT_MOTION_FIELD: &str = "val";

/// Motion sensor exposed over HTTP
pub struct HttpMotionSource {
    client: reqwest::Client,
    url: String,
    field: String,
}

impl HttpMotionSource {
    /// Create new source
    ///
    /// # Arguments
    /// * `url` - Endpoint polled on every tick
    /// * `field` - JSON field holding the motion state
    /// * `request_timeout` - Per-request timeout
    pub fn new(url: String, field: String, request_timeout: Duration) -> Result<Self, MotionError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MotionError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url, field })
    }
}

#[async_trait]
impl MotionSource for HttpMotionSource {
    async fn poll(&self) -> Result<bool, MotionError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| MotionError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MotionError::Status(resp.status().as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MotionError::Payload(e.to_string()))?;

        parse_motion(&body, &self.field)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Extract the motion flag from a sensor payload
///
/// Accepts JSON booleans, numbers (non-zero = motion) and the strings
/// `ON`/`true`/`yes`/`y`/`t`/`1` in any case.
pub fn parse_motion(body: &serde_json::Value, field: &str) -> Result<bool, MotionError> {
    let value = body
        .get(field)
        .ok_or_else(|| MotionError::Payload(format!("missing field '{}'", field)))?;

    match value {
        serde_json::Value::Bool(b) => Ok(*b),
        serde_json::Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        serde_json::Value::String(s) => Ok(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "yes" | "y" | "t" | "1"
        )),
        other => Err(MotionError::Payload(format!(
            "unexpected value for '{}': {}",
            field, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_on_off_strings() {
        assert!(parse_motion(&json!({"val": "ON"}), "val").unwrap());
        assert!(!parse_motion(&json!({"val": "OFF"}), "val").unwrap());
        assert!(parse_motion(&json!({"val": "true"}), "val").unwrap());
    }

    #[test]
    fn test_bool_and_number() {
        assert!(parse_motion(&json!({"motion": true}), "motion").unwrap());
        assert!(!parse_motion(&json!({"motion": 0}), "motion").unwrap());
        assert!(parse_motion(&json!({"motion": 1}), "motion").unwrap());
    }

    #[test]
    fn test_missing_field_is_error() {
        let result = parse_motion(&json!({"state": "ON"}), "val");
        assert!(matches!(result, Err(MotionError::Payload(_))));
    }

    #[test]
    fn test_unexpected_type_is_error() {
        let result = parse_motion(&json!({"val": ["ON"]}), "val");
        assert!(matches!(result, Err(MotionError::Payload(_))));
    }
}
