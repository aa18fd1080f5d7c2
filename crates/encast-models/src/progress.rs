//! Progress samples observed while an encode runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single observed progress position.
///
/// Both fields are seconds of output media time. `start` is the first
/// position observed in the run, so a resumed encode reports where it
/// picked up from rather than zero; `current` never decreases within a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSample {
    pub current: f64,
    pub start: f64,
}

impl ProgressSample {
    pub fn new(current: f64, start: f64) -> Self {
        Self { current, start }
    }

    /// Seconds of output produced since the run began.
    pub fn elapsed(&self) -> f64 {
        (self.current - self.start).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_relative_to_start() {
        let sample = ProgressSample::new(95.0, 90.0);
        assert!((sample.elapsed() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_elapsed_never_negative() {
        let sample = ProgressSample::new(1.0, 2.0);
        assert_eq!(sample.elapsed(), 0.0);
    }
}
