//! Link Status Tracker
//!
//! Tracks the connection state of a remote endpoint (camera stream, motion
//! sensor) so that lost/recovered transitions are logged once instead of on
//! every retry of a background loop.

use serde::{Deserialize, Serialize};

/// Endpoint connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Initial state (never attempted)
    Unknown,
    /// Endpoint is reachable and responding
    Online,
    /// Endpoint is unreachable or failing
    Offline,
}

/// Link status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Endpoint went from Online (or Unknown) to Offline
    Lost,
    /// Endpoint went from Offline to Online
    Recovered,
}

/// Tracks one endpoint and reports transitions
///
/// Owned by the single loop that talks to the endpoint, so no locking.
#[derive(Debug)]
pub struct LinkTracker {
    name: &'static str,
    status: LinkStatus,
    failures: u64,
}

impl LinkTracker {
    /// Create new tracker for a named endpoint ("camera", "motion")
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            status: LinkStatus::Unknown,
            failures: 0,
        }
    }

    /// Record a successful exchange
    pub fn mark_online(&mut self) -> Option<LinkEvent> {
        self.update(true)
    }

    /// Record a failed exchange
    pub fn mark_offline(&mut self) -> Option<LinkEvent> {
        self.failures += 1;
        self.update(false)
    }

    /// Update status and return transition event if any
    ///
    /// Returns:
    /// - `Some(Lost)` on Online -> Offline, or when the very first attempt fails
    /// - `Some(Recovered)` on Offline -> Online
    /// - `None` when nothing changed or on the first successful attempt
    fn update(&mut self, is_online: bool) -> Option<LinkEvent> {
        let prev = self.status;
        let next = if is_online {
            LinkStatus::Online
        } else {
            LinkStatus::Offline
        };
        self.status = next;

        match (prev, next) {
            (LinkStatus::Online, LinkStatus::Offline) => {
                tracing::warn!(link = self.name, "Connection lost");
                Some(LinkEvent::Lost)
            }
            (LinkStatus::Unknown, LinkStatus::Offline) => {
                tracing::warn!(link = self.name, "Initial connection failed - marking as lost");
                Some(LinkEvent::Lost)
            }
            (LinkStatus::Offline, LinkStatus::Online) => {
                tracing::info!(
                    link = self.name,
                    failures = self.failures,
                    "Connection recovered"
                );
                Some(LinkEvent::Recovered)
            }
            _ => None,
        }
    }

    /// Current status
    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Total failed exchanges since creation
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_online_no_event() {
        let mut tracker = LinkTracker::new("camera");
        assert!(tracker.mark_online().is_none());
        assert_eq!(tracker.status(), LinkStatus::Online);
    }

    #[test]
    fn test_initial_offline_triggers_lost() {
        let mut tracker = LinkTracker::new("camera");
        assert_eq!(tracker.mark_offline(), Some(LinkEvent::Lost));
    }

    #[test]
    fn test_repeated_failures_report_once() {
        let mut tracker = LinkTracker::new("motion");
        tracker.mark_online();
        assert_eq!(tracker.mark_offline(), Some(LinkEvent::Lost));
        assert!(tracker.mark_offline().is_none());
        assert!(tracker.mark_offline().is_none());
        assert_eq!(tracker.failures(), 3);
    }

    #[test]
    fn test_offline_to_online_triggers_recovered() {
        let mut tracker = LinkTracker::new("camera");
        tracker.mark_offline();
        assert_eq!(tracker.mark_online(), Some(LinkEvent::Recovered));
        assert!(tracker.mark_online().is_none());
    }
}
