//! AccessEngine - Debounced door-open decisions
//!
//! ## Responsibilities
//!
//! - Own the per-identity roster (created once, never resized)
//! - Decay partial counts after the last-seen timeout
//! - Fold recognition results into consecutive counts
//! - Emit at most one door-open per presence event
//!
//! ## Decision
//!
//! A frame updates at most one identity: the closest qualifying candidate
//! (ties: lower rank, then label). The winner is cleared when its distance is
//! within the pretty-sure threshold or its count reaches the clearance
//! threshold; the count is reset under the roster lock and the actuator is
//! called after the lock is released.

mod roster;
mod types;

pub use roster::load_roster;
pub use types::{
    CandidatePolicy, ClearanceReason, DecisionPolicy, FrameOutcome, IdentityRecord,
    DEFAULT_CLEARANCE_THRESHOLD, DEFAULT_LAST_SEEN_TIMEOUT_SECS, DEFAULT_RECOGNITION_THRESHOLD,
};

use crate::access_log::{AccessEvent, AccessLog};
use crate::actuator::DoorActuator;
use crate::recognition::{IdentityObservation, RecognitionError};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// AccessEngine instance
pub struct AccessEngine {
    roster: Mutex<BTreeMap<String, IdentityRecord>>,
    policy: DecisionPolicy,
    actuator: Arc<dyn DoorActuator>,
    access_log: Arc<AccessLog>,
}

impl AccessEngine {
    pub fn new(
        records: Vec<IdentityRecord>,
        policy: DecisionPolicy,
        actuator: Arc<dyn DoorActuator>,
        access_log: Arc<AccessLog>,
    ) -> Self {
        let roster = records
            .into_iter()
            .map(|r| (r.identity_label.clone(), r))
            .collect();

        Self {
            roster: Mutex::new(roster),
            policy,
            actuator,
            access_log,
        }
    }

    /// Reset every partial count not refreshed within the last-seen timeout.
    /// Returns the number of records reset.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut roster = self.roster.lock().await;
        let mut reset = 0;
        for record in roster.values_mut() {
            if record.is_stale(now, self.policy.last_seen_timeout) {
                tracing::debug!(
                    identity = %record.identity_label,
                    count = record.consecutive_count,
                    "Identity not seen within timeout, count reset"
                );
                record.consecutive_count = 0;
                reset += 1;
            }
        }
        reset
    }

    /// Fold one recognition result into the roster
    ///
    /// `NoFaceDetected` is a no-op frame; any other failure is returned to
    /// the caller untouched.
    pub async fn process(
        &self,
        result: Result<Vec<IdentityObservation>, RecognitionError>,
        now: DateTime<Utc>,
    ) -> Result<FrameOutcome, RecognitionError> {
        match result {
            Ok(observations) => Ok(self.apply(&observations, now).await),
            Err(RecognitionError::NoFaceDetected) => {
                tracing::debug!("No face in frame");
                Ok(FrameOutcome::NoFace)
            }
            Err(e) => Err(e),
        }
    }

    /// Fold one frame's observations into the roster
    pub async fn apply(&self, observations: &[IdentityObservation], now: DateTime<Utc>) -> FrameOutcome {
        let mut roster = self.roster.lock().await;

        let winner = observations
            .iter()
            .filter(|o| self.policy.candidate_policy == CandidatePolicy::All || o.rank == 0)
            .filter(|o| match roster.get(&o.identity_label) {
                Some(record) => o.distance <= record.recognition_threshold,
                None => false,
            })
            .min_by(|a, b| compare_candidates(a, b));

        let Some(winner) = winner else {
            for o in observations {
                tracing::debug!(
                    identity = %o.identity_label,
                    distance = o.distance,
                    rank = o.rank,
                    "Observation did not qualify"
                );
            }
            return FrameOutcome::NoMatch;
        };

        let Some(record) = roster.get_mut(&winner.identity_label) else {
            return FrameOutcome::NoMatch;
        };

        record.consecutive_count += 1;
        record.last_seen = Some(match record.last_seen {
            Some(prev) if prev > now => prev,
            _ => now,
        });

        let reason = if winner.distance <= self.policy.pretty_sure_threshold {
            Some(ClearanceReason::PrettySure)
        } else if record.consecutive_count >= self.policy.clearance_threshold {
            Some(ClearanceReason::Consecutive)
        } else {
            None
        };

        let Some(reason) = reason else {
            tracing::info!(
                identity = %record.identity_label,
                distance = winner.distance,
                count = record.consecutive_count,
                clearance = self.policy.clearance_threshold,
                "Face observed"
            );
            return FrameOutcome::Accumulating {
                identity_label: record.identity_label.clone(),
                distance: winner.distance,
                consecutive_count: record.consecutive_count,
            };
        };

        let count_at_clearance = record.consecutive_count;
        record.consecutive_count = 0;
        let identity_label = record.identity_label.clone();
        drop(roster);

        tracing::info!(
            identity = %identity_label,
            distance = winner.distance,
            count = count_at_clearance,
            reason = %reason,
            "Identity cleared, opening door"
        );
        self.actuator.trigger(&identity_label);
        self.access_log
            .record(AccessEvent::new(
                identity_label.clone(),
                winner.distance,
                reason,
                count_at_clearance,
                now,
            ))
            .await;

        FrameOutcome::Cleared {
            identity_label,
            distance: winner.distance,
            reason,
        }
    }

    /// Copy of every record, sorted by label
    pub async fn snapshot(&self) -> Vec<IdentityRecord> {
        self.roster.lock().await.values().cloned().collect()
    }

    /// Copy of one record
    pub async fn record(&self, identity_label: &str) -> Option<IdentityRecord> {
        self.roster.lock().await.get(identity_label).cloned()
    }
}

/// Closest distance first, then lower rank, then label order
fn compare_candidates(a: &IdentityObservation, b: &IdentityObservation) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.rank.cmp(&b.rank))
        .then_with(|| a.identity_label.cmp(&b.identity_label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingActuator {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingActuator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DoorActuator for RecordingActuator {
        fn trigger(&self, identity: &str) {
            self.calls.lock().unwrap().push(identity.to_string());
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn policy(candidate_policy: CandidatePolicy) -> DecisionPolicy {
        DecisionPolicy {
            clearance_threshold: 3,
            pretty_sure_threshold: 0.20,
            last_seen_timeout: Duration::from_secs(10),
            candidate_policy,
        }
    }

    fn engine_with(candidate_policy: CandidatePolicy) -> (AccessEngine, Arc<RecordingActuator>, Arc<AccessLog>) {
        let actuator = Arc::new(RecordingActuator::default());
        let log = Arc::new(AccessLog::new(16));
        let roster = vec![
            IdentityRecord::new("bastian", 0.40),
            IdentityRecord::new("laura", 0.40),
            IdentityRecord::new("max", 0.40),
        ];
        let engine = AccessEngine::new(roster, policy(candidate_policy), actuator.clone(), log.clone());
        (engine, actuator, log)
    }

    fn engine() -> (AccessEngine, Arc<RecordingActuator>, Arc<AccessLog>) {
        engine_with(CandidatePolicy::Nearest)
    }

    fn obs(label: &str, distance: f64) -> IdentityObservation {
        IdentityObservation::new(label, distance, 0, 0)
    }

    #[tokio::test]
    async fn test_consecutive_observations_clear_once() {
        let (engine, actuator, log) = engine();

        let first = engine.apply(&[obs("max", 0.35)], t(0)).await;
        let second = engine.apply(&[obs("max", 0.35)], t(1)).await;
        assert!(matches!(first, FrameOutcome::Accumulating { consecutive_count: 1, .. }));
        assert!(matches!(second, FrameOutcome::Accumulating { consecutive_count: 2, .. }));
        assert!(actuator.calls().is_empty());

        let third = engine.apply(&[obs("max", 0.35)], t(2)).await;
        assert_eq!(
            third,
            FrameOutcome::Cleared {
                identity_label: "max".to_string(),
                distance: 0.35,
                reason: ClearanceReason::Consecutive,
            }
        );
        assert_eq!(actuator.calls(), vec!["max"]);
        assert_eq!(engine.record("max").await.unwrap().consecutive_count, 0);

        let events = log.latest(10).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].consecutive_count, 3);
        assert_eq!(events[0].reason, ClearanceReason::Consecutive);
    }

    #[tokio::test]
    async fn test_pretty_sure_clears_immediately() {
        let (engine, actuator, log) = engine();

        let outcome = engine.apply(&[obs("laura", 0.15)], t(0)).await;
        assert!(matches!(
            outcome,
            FrameOutcome::Cleared { reason: ClearanceReason::PrettySure, .. }
        ));
        assert_eq!(actuator.calls(), vec!["laura"]);
        assert_eq!(engine.record("laura").await.unwrap().consecutive_count, 0);
        assert_eq!(log.by_identity("laura", 1).await[0].reason, ClearanceReason::PrettySure);
    }

    #[tokio::test]
    async fn test_stale_count_decays_without_door_open() {
        let (engine, actuator, _) = engine();

        engine.apply(&[obs("bastian", 0.30)], t(0)).await;
        assert_eq!(engine.sweep(t(5)).await, 0);
        assert_eq!(engine.record("bastian").await.unwrap().consecutive_count, 1);

        assert_eq!(engine.sweep(t(11)).await, 1);
        assert_eq!(engine.record("bastian").await.unwrap().consecutive_count, 0);
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_observation_does_not_interfere() {
        let (engine, actuator, _) = engine();

        engine.apply(&[obs("max", 0.35)], t(0)).await;
        engine.apply(&[obs("max", 0.35)], t(1)).await;

        assert_eq!(engine.apply(&[obs("laura", 0.90)], t(2)).await, FrameOutcome::NoMatch);
        assert_eq!(engine.apply(&[obs("stranger", 0.05)], t(3)).await, FrameOutcome::NoMatch);

        assert_eq!(engine.record("max").await.unwrap().consecutive_count, 2);
        assert_eq!(engine.record("laura").await.unwrap().consecutive_count, 0);
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_closest_candidate_wins() {
        let (engine, _, _) = engine();

        let frame = [
            IdentityObservation::new("max", 0.30, 0, 0),
            IdentityObservation::new("bastian", 0.25, 0, 1),
        ];
        let outcome = engine.apply(&frame, t(0)).await;

        assert!(matches!(
            outcome,
            FrameOutcome::Accumulating { ref identity_label, .. } if identity_label == "bastian"
        ));
        assert_eq!(engine.record("max").await.unwrap().consecutive_count, 0);
    }

    #[tokio::test]
    async fn test_equal_distance_tie_breaks_on_label() {
        let (engine, _, _) = engine();

        let frame = [
            IdentityObservation::new("max", 0.30, 0, 0),
            IdentityObservation::new("bastian", 0.30, 0, 1),
        ];
        engine.apply(&frame, t(0)).await;

        assert_eq!(engine.record("bastian").await.unwrap().consecutive_count, 1);
        assert_eq!(engine.record("max").await.unwrap().consecutive_count, 0);
    }

    #[tokio::test]
    async fn test_nearest_policy_ignores_lower_ranks() {
        let frame = [
            IdentityObservation::new("stranger", 0.22, 0, 0),
            IdentityObservation::new("max", 0.30, 1, 0),
        ];

        let (nearest, _, _) = engine_with(CandidatePolicy::Nearest);
        assert_eq!(nearest.apply(&frame, t(0)).await, FrameOutcome::NoMatch);

        let (all, _, _) = engine_with(CandidatePolicy::All);
        assert!(matches!(
            all.apply(&frame, t(0)).await,
            FrameOutcome::Accumulating { ref identity_label, consecutive_count: 1, .. } if identity_label == "max"
        ));
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_backward() {
        let (engine, _, _) = engine();

        engine.apply(&[obs("max", 0.35)], t(10)).await;
        engine.apply(&[obs("max", 0.35)], t(4)).await;

        assert_eq!(engine.record("max").await.unwrap().last_seen, Some(t(10)));
    }

    #[tokio::test]
    async fn test_process_distinguishes_no_face_from_failure() {
        let (engine, _, _) = engine();

        let no_face = engine.process(Err(RecognitionError::NoFaceDetected), t(0)).await;
        assert_eq!(no_face.unwrap(), FrameOutcome::NoFace);

        let failure = engine
            .process(Err(RecognitionError::Failure("model crashed".to_string())), t(0))
            .await;
        assert!(failure.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observations_clear_once_per_threshold() {
        let (engine, actuator, log) = engine();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..9)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.apply(&[obs("max", 0.35)], t(0)).await })
            })
            .collect();
        let mut cleared = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), FrameOutcome::Cleared { .. }) {
                cleared += 1;
            }
        }

        assert_eq!(cleared, 3);
        assert_eq!(actuator.calls(), vec!["max", "max", "max"]);
        assert_eq!(log.count().await, 3);
        assert_eq!(engine.record("max").await.unwrap().consecutive_count, 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted_and_complete() {
        let (engine, _, _) = engine();
        let labels: Vec<_> = engine
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.identity_label)
            .collect();
        assert_eq!(labels, vec!["bastian", "laura", "max"]);
    }
}
