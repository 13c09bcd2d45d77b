//! Observation confidence

use serde::{Deserialize, Serialize};

/// Confidence attached to a single field observation, in [0, 1]
///
/// This is a merge tie-break weight, not a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Present and valid
    pub const VALID: Confidence = Confidence(1.0);

    /// Present but with a validation issue
    pub const WITH_ISSUE: Confidence = Confidence(0.5);

    /// Absent
    pub const ABSENT: Confidence = Confidence(0.0);

    /// Create a confidence, clamping into [0, 1]
    ///
    /// NaN maps to 0.0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ABSENT;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Raw value
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Arithmetic mean of a set of confidences (0.0 for an empty set)
    pub fn mean<I: IntoIterator<Item = Confidence>>(values: I) -> Self {
        let (sum, count) = values
            .into_iter()
            .fold((0.0, 0usize), |(sum, count), c| (sum + c.0, count + 1));
        if count == 0 {
            Self::ABSENT
        } else {
            Self::new(sum / count as f64)
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::ABSENT
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}
