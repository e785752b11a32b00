//! Threshold calibration
//!
//! Accumulates recognition distances for one enrolled identity against
//! everything else so an operator can pick a recognition threshold.

use crate::recognition::IdentityObservation;
use serde::Serialize;
use std::fmt;

/// low / high / mean of a distance series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceSummary {
    pub count: u64,
    pub low: f64,
    pub high: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: u64,
    low: f64,
    high: f64,
    sum: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.low = value;
            self.high = value;
        } else {
            self.low = self.low.min(value);
            self.high = self.high.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn summary(&self) -> Option<DistanceSummary> {
        (self.count > 0).then(|| DistanceSummary {
            count: self.count,
            low: self.low,
            high: self.high,
            mean: self.sum / self.count as f64,
        })
    }
}

/// Distance statistics for one identity
#[derive(Debug, Clone)]
pub struct DistanceStats {
    identity_label: String,
    matches: RunningStats,
    false_matches: RunningStats,
    recognized_faces: u64,
    unrecognized_faces: u64,
    frames_without_face: u64,
}

impl DistanceStats {
    pub fn new(identity_label: impl Into<String>) -> Self {
        Self {
            identity_label: identity_label.into(),
            matches: RunningStats::default(),
            false_matches: RunningStats::default(),
            recognized_faces: 0,
            unrecognized_faces: 0,
            frames_without_face: 0,
        }
    }

    pub fn identity_label(&self) -> &str {
        &self.identity_label
    }

    /// Fold one frame, grouped by detected face
    ///
    /// An empty face list means the face was detected but nothing in the
    /// enrollment directory matched it.
    pub fn record(&mut self, faces: &[Vec<IdentityObservation>]) {
        for observations in faces {
            if observations.is_empty() {
                self.unrecognized_faces += 1;
                continue;
            }
            self.recognized_faces += 1;

            for o in observations {
                if o.identity_label == self.identity_label {
                    self.matches.push(o.distance);
                } else {
                    self.false_matches.push(o.distance);
                }
            }
        }
    }

    /// Count a frame in which no face was detected
    pub fn record_no_face(&mut self) {
        self.frames_without_face += 1;
    }

    /// Distances of the chosen identity
    pub fn matches(&self) -> Option<DistanceSummary> {
        self.matches.summary()
    }

    /// Distances of every other identity
    pub fn false_matches(&self) -> Option<DistanceSummary> {
        self.false_matches.summary()
    }

    /// Midpoint between the worst true match and the best false match,
    /// when the two ranges do not overlap
    pub fn suggested_threshold(&self) -> Option<f64> {
        let matches = self.matches()?;
        let false_matches = self.false_matches()?;
        (matches.high < false_matches.low).then(|| (matches.high + false_matches.low) / 2.0)
    }
}

impl fmt::Display for DistanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn line(f: &mut fmt::Formatter<'_>, name: &str, s: Option<DistanceSummary>) -> fmt::Result {
            match s {
                Some(s) => writeln!(
                    f,
                    "{:<14} low={:.4} high={:.4} mean={:.4} (n={})",
                    name, s.low, s.high, s.mean, s.count
                ),
                None => writeln!(f, "{:<14} no samples", name),
            }
        }

        writeln!(f, "identity:      {}", self.identity_label)?;
        line(f, "matches:", self.matches())?;
        line(f, "false matches:", self.false_matches())?;
        writeln!(
            f,
            "faces:         recognized={} unrecognized={} frames_without_face={}",
            self.recognized_faces, self.unrecognized_faces, self.frames_without_face
        )?;
        match self.suggested_threshold() {
            Some(t) => write!(f, "suggested:     {:.4}", t),
            None => write!(f, "suggested:     ranges overlap or incomplete"),
        }
    }
}
