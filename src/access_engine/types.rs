//! Access engine types

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default consecutive observations needed for clearance
pub const DEFAULT_CLEARANCE_THRESHOLD: u32 = 3;

/// Default per-identity recognition threshold
pub const DEFAULT_RECOGNITION_THRESHOLD: f64 = 0.40;

/// Default last-seen timeout (10 seconds)
pub const DEFAULT_LAST_SEEN_TIMEOUT_SECS: u64 = 10;

/// Which candidates of a recognition call are considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePolicy {
    /// Only the closest match of each detected face
    #[default]
    Nearest,
    /// Every returned rank
    All,
}

impl FromStr for CandidatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(CandidatePolicy::Nearest),
            "all" => Ok(CandidatePolicy::All),
            other => Err(Error::Config(format!(
                "unknown candidate policy '{}' (expected 'nearest' or 'all')",
                other
            ))),
        }
    }
}

/// Why a door-open was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceReason {
    /// Single observation within the pretty-sure threshold
    PrettySure,
    /// Consecutive count reached the clearance threshold
    Consecutive,
}

impl fmt::Display for ClearanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearanceReason::PrettySure => write!(f, "pretty_sure"),
            ClearanceReason::Consecutive => write!(f, "consecutive"),
        }
    }
}

/// Per-identity decision state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_label: String,
    pub recognition_threshold: f64,
    pub consecutive_count: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    pub fn new(identity_label: impl Into<String>, recognition_threshold: f64) -> Self {
        Self {
            identity_label: identity_label.into(),
            recognition_threshold,
            consecutive_count: 0,
            last_seen: None,
        }
    }

    /// Whether a partial count has outlived `timeout` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.consecutive_count == 0 {
            return false;
        }
        match self.last_seen {
            // Negative elapsed (clock went backward) counts as zero
            Some(last_seen) => (now - last_seen).to_std().unwrap_or_default() >= timeout,
            None => true,
        }
    }
}

/// Decision thresholds shared by every identity
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub clearance_threshold: u32,
    pub pretty_sure_threshold: f64,
    pub last_seen_timeout: Duration,
    pub candidate_policy: CandidatePolicy,
}

impl DecisionPolicy {
    /// Pretty-sure threshold derived from a recognition threshold and a ratio
    pub fn pretty_sure_from_ratio(recognition_threshold: f64, ratio: f64) -> f64 {
        recognition_threshold - recognition_threshold * ratio
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            clearance_threshold: DEFAULT_CLEARANCE_THRESHOLD,
            pretty_sure_threshold: Self::pretty_sure_from_ratio(DEFAULT_RECOGNITION_THRESHOLD, 0.5),
            last_seen_timeout: Duration::from_secs(DEFAULT_LAST_SEEN_TIMEOUT_SECS),
            candidate_policy: CandidatePolicy::Nearest,
        }
    }
}

/// Result of folding one frame into the engine
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Recognizer found no face
    NoFace,
    /// No candidate qualified for any roster identity
    NoMatch,
    /// Winner counted, threshold not reached yet
    Accumulating {
        identity_label: String,
        distance: f64,
        consecutive_count: u32,
    },
    /// Door-open emitted for the winner
    Cleared {
        identity_label: String,
        distance: f64,
        reason: ClearanceReason,
    },
}
