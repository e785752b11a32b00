//! AccessLog - Door-open history (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Record every door-open decision in a bounded ring buffer
//! - Provide latest / per-identity queries

use crate::access_engine::ClearanceReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default ring buffer capacity
pub const DEFAULT_ACCESS_LOG_CAPACITY: usize = 200;

/// One door-open decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub event_id: u64,
    pub identity_label: String,
    /// Distance of the observation that triggered the decision
    pub distance: f64,
    pub reason: ClearanceReason,
    /// Consecutive count at decision time (before reset)
    pub consecutive_count: u32,
    pub opened_at: DateTime<Utc>,
}

impl AccessEvent {
    /// New event; `event_id` is assigned on insert
    pub fn new(
        identity_label: impl Into<String>,
        distance: f64,
        reason: ClearanceReason,
        consecutive_count: u32,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: 0,
            identity_label: identity_label.into(),
            distance,
            reason,
            consecutive_count,
            opened_at,
        }
    }
}

struct AccessRingBuffer {
    events: VecDeque<AccessEvent>,
    capacity: usize,
    next_id: u64,
}

impl AccessRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, mut event: AccessEvent) -> u64 {
        let id = self.next_id;
        event.event_id = id;
        self.next_id += 1;

        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        id
    }

    fn latest(&self, count: usize) -> Vec<AccessEvent> {
        self.events.iter().rev().take(count).cloned().collect()
    }

    fn by_identity(&self, identity_label: &str, count: usize) -> Vec<AccessEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.identity_label == identity_label)
            .take(count)
            .cloned()
            .collect()
    }
}

/// AccessLog instance
pub struct AccessLog {
    buffer: RwLock<AccessRingBuffer>,
}

impl AccessLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(AccessRingBuffer::new(capacity)),
        }
    }

    /// Append an event, returning its id
    pub async fn record(&self, event: AccessEvent) -> u64 {
        let mut buffer = self.buffer.write().await;
        let id = buffer.push(event);
        tracing::debug!(event_id = id, "Access event recorded");
        id
    }

    /// Newest first
    pub async fn latest(&self, count: usize) -> Vec<AccessEvent> {
        self.buffer.read().await.latest(count)
    }

    /// Newest first, one identity
    pub async fn by_identity(&self, identity_label: &str, count: usize) -> Vec<AccessEvent> {
        self.buffer.read().await.by_identity(identity_label, count)
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.events.len()
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(label: &str) -> AccessEvent {
        AccessEvent::new(label, 0.3, ClearanceReason::Consecutive, 3, Utc::now())
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_latest_first() {
        let log = AccessLog::new(10);
        assert_eq!(log.record(event("max")).await, 1);
        assert_eq!(log.record(event("laura")).await, 2);

        let latest = log.latest(10).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].identity_label, "laura");
        assert_eq!(latest[1].event_id, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = AccessLog::new(2);
        log.record(event("a")).await;
        log.record(event("b")).await;
        log.record(event("c")).await;

        assert_eq!(log.count().await, 2);
        let labels: Vec<_> = log
            .latest(5)
            .await
            .into_iter()
            .map(|e| e.identity_label)
            .collect();
        assert_eq!(labels, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_by_identity() {
        let log = AccessLog::default();
        log.record(event("max")).await;
        log.record(event("laura")).await;
        log.record(event("max")).await;

        let max = log.by_identity("max", 10).await;
        assert_eq!(max.len(), 2);
        assert_eq!(max[0].event_id, 3);
        assert!(log.by_identity("bastian", 10).await.is_empty());
    }
}
