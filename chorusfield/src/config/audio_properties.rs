use crate::error::{ChorusError, Result};
use std::str::FromStr;

/// Distance falloff curve.
///
/// The directional panner tiers only implement the inverse model. When
/// `Logarithmic` is requested there, it is substituted with `Inverse`; the
/// gain-only and ambisonic tiers honor both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceAlgorithm {
    #[default]
    Inverse,
    /// Perceptually flatter falloff (square root of the linear gain curve).
    Logarithmic,
}

impl DistanceAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inverse => "inverse",
            Self::Logarithmic => "logarithmic",
        }
    }
}

impl FromStr for DistanceAlgorithm {
    type Err = ChorusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inverse" => Ok(Self::Inverse),
            "logarithmic" => Ok(Self::Logarithmic),
            other => Err(ChorusError::Configuration(format!(
                "Unknown distance algorithm '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DistanceAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distance and smoothing parameters shared by every spatializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioProperties {
    /// Distance below which volume is full
    pub min_distance: f32,
    /// Distance beyond which volume is zero
    pub max_distance: f32,
    /// Falloff steepness factor
    pub rolloff: f32,
    pub algorithm: DistanceAlgorithm,
    /// Default smoothing duration for pose changes, in seconds
    pub transition_time: f64,
}

impl Default for AudioProperties {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 10.0,
            rolloff: 1.0,
            algorithm: DistanceAlgorithm::Inverse,
            transition_time: 0.5,
        }
    }
}

impl AudioProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_distance(mut self, distance: f32) -> Self {
        self.min_distance = distance;
        self
    }

    pub fn max_distance(mut self, distance: f32) -> Self {
        self.max_distance = distance;
        self
    }

    pub fn rolloff(mut self, rolloff: f32) -> Self {
        self.rolloff = rolloff;
        self
    }

    pub fn algorithm(mut self, algorithm: DistanceAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn transition_time(mut self, seconds: f64) -> Self {
        self.transition_time = seconds;
        self
    }

    /// Rejects ranges no spatializer can render.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_distance >= 0.0) {
            return Err(ChorusError::Configuration(format!(
                "min_distance must be non-negative, got {}",
                self.min_distance
            )));
        }
        if !(self.max_distance >= self.min_distance) {
            return Err(ChorusError::Configuration(format!(
                "max_distance ({}) must not be below min_distance ({})",
                self.max_distance, self.min_distance
            )));
        }
        if !(self.rolloff >= 0.0) {
            return Err(ChorusError::Configuration(format!(
                "rolloff must be non-negative, got {}",
                self.rolloff
            )));
        }
        if !(self.transition_time >= 0.0) {
            return Err(ChorusError::Configuration(format!(
                "transition_time must be non-negative, got {}",
                self.transition_time
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!(
            "Logarithmic".parse::<DistanceAlgorithm>().unwrap(),
            DistanceAlgorithm::Logarithmic
        );
        assert_eq!(
            "inverse".parse::<DistanceAlgorithm>().unwrap(),
            DistanceAlgorithm::Inverse
        );
        assert!("exponential".parse::<DistanceAlgorithm>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let props = AudioProperties::default();
        assert_eq!(props.min_distance, 1.0);
        assert_eq!(props.max_distance, 10.0);
        assert_eq!(props.rolloff, 1.0);
        assert_eq!(props.transition_time, 0.5);
        assert_eq!(props.algorithm, DistanceAlgorithm::Inverse);
        assert!(props.validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let props = AudioProperties::new().min_distance(5.0).max_distance(2.0);
        assert!(props.validate().is_err());
    }
}
