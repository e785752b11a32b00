//! Door actuator
//!
//! `trigger` is fire-and-forget: it must return immediately and never fail
//! the caller. The HTTP actuator performs the request on a spawned task.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default push request timeout
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 5;

/// Physical door release
pub trait DoorActuator: Send + Sync + 'static {
    /// Release the door for `identity`. Idempotent, never blocks.
    fn trigger(&self, identity: &str);
}

/// Actuator driven by an HTTP push endpoint (`GET <url>?value=true`)
#[derive(Clone)]
pub struct HttpActuator {
    client: reqwest::Client,
    push_url: String,
}

impl HttpActuator {
    pub fn new(push_url: String) -> Result<Self> {
        Self::with_timeout(push_url, Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS))
    }

    pub fn with_timeout(push_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, push_url })
    }

    /// Perform the push request and wait for the answer
    pub async fn send(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.push_url)
            .query(&[("value", "true")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "Push endpoint returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

impl DoorActuator for HttpActuator {
    fn trigger(&self, identity: &str) {
        let actuator = self.clone();
        let identity = identity.to_string();
        tokio::spawn(async move {
            match actuator.send().await {
                Ok(()) => tracing::info!(identity = %identity, "Door triggered"),
                Err(e) => tracing::warn!(identity = %identity, error = %e, "Door trigger failed"),
            }
        });
    }
}
