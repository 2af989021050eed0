//! Correction recipe: the durable, user-reviewable correction plan

mod generator;
mod persist;

use serde::{Deserialize, Serialize};

use crate::error::{LyraError, Result};
use crate::types::{PitchPoint, WarpPoint};

pub use generator::{
    generate, strength_from_confidence, RecipeInputs, StrengthThresholds, MAX_CURVE_POINTS,
    SEGMENT_SECONDS,
};

/// Version written by this build
pub const RECIPE_VERSION: &str = "0.1";

/// Versions accepted on load
pub const SUPPORTED_VERSIONS: &[&str] = &[RECIPE_VERSION];

/// Reason code attached to segments whose alignment is unreliable
pub const LOW_CONFIDENCE: &str = "low_confidence";

/// Tolerance for segment boundaries meeting end to end
const BOUNDARY_TOLERANCE: f64 = 1e-6;

fn default_protect_unvoiced() -> bool {
    true
}

/// Correction parameters for one window `[t0, t1)` of the new performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub t0: f64,
    pub t1: f64,
    pub time_warp_points: Vec<WarpPoint>,
    pub pitch_target_curve: Vec<PitchPoint>,
    pub confidence: f64,
    pub pitch_strength: f64,
    pub time_strength: f64,
    #[serde(default = "default_protect_unvoiced")]
    pub protect_unvoiced: bool,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    fn validate(&self, index: usize) -> Result<()> {
        let scalars = [
            ("t0", self.t0),
            ("t1", self.t1),
            ("confidence", self.confidence),
            ("pitch_strength", self.pitch_strength),
            ("time_strength", self.time_strength),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(LyraError::invalid(format!(
                    "segments[{index}].{name} is not a finite number"
                )));
            }
        }
        for (name, value) in &scalars[2..] {
            if !(0.0..=1.0).contains(value) {
                return Err(LyraError::invalid(format!(
                    "segments[{index}].{name} = {value} is outside [0, 1]"
                )));
            }
        }
        if self.t1 < self.t0 {
            return Err(LyraError::invalid(format!(
                "segments[{index}] ends before it starts ({} < {})",
                self.t1, self.t0
            )));
        }

        let mut prev: Option<WarpPoint> = None;
        for p in &self.time_warp_points {
            if !p.new_time.is_finite() || !p.ref_time.is_finite() {
                return Err(LyraError::invalid(format!(
                    "segments[{index}].time_warp_points contains a non-finite value"
                )));
            }
            if let Some(q) = prev {
                if p.new_time < q.new_time || p.ref_time < q.ref_time {
                    return Err(LyraError::invalid(format!(
                        "segments[{index}].time_warp_points is not monotonic"
                    )));
                }
            }
            prev = Some(*p);
        }

        if self
            .pitch_target_curve
            .iter()
            .any(|p| !p.time.is_finite() || !p.hz.is_finite() || p.hz < 0.0)
        {
            return Err(LyraError::invalid(format!(
                "segments[{index}].pitch_target_curve contains an invalid value"
            )));
        }
        Ok(())
    }
}

/// Advisory flag on a stretch of the new performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub t0: f64,
    pub t1: f64,
    pub reason: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub version: String,
    pub sample_rate: u32,
    pub global_key_shift_semitones: f64,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl Recipe {
    /// End of the last segment, or 0 for an empty recipe
    pub fn duration(&self) -> f64 {
        self.segments.last().map(|s| s.t1).unwrap_or(0.0)
    }

    /// Check the semantic invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(LyraError::UnsupportedVersion {
                found: self.version.clone(),
                supported: SUPPORTED_VERSIONS.join(", "),
            });
        }
        if self.sample_rate == 0 {
            return Err(LyraError::invalid("sample_rate must be positive"));
        }
        if !self.global_key_shift_semitones.is_finite() {
            return Err(LyraError::invalid(
                "global_key_shift_semitones is not a finite number",
            ));
        }

        let mut expected_start = 0.0;
        for (index, segment) in self.segments.iter().enumerate() {
            segment.validate(index)?;
            if (segment.t0 - expected_start).abs() > BOUNDARY_TOLERANCE {
                return Err(LyraError::invalid(format!(
                    "segments[{index}] starts at {} but the previous segment ends at {expected_start}",
                    segment.t0
                )));
            }
            expected_start = segment.t1;
        }

        for (index, warning) in self.warnings.iter().enumerate() {
            if !warning.t0.is_finite() || !warning.t1.is_finite() {
                return Err(LyraError::invalid(format!(
                    "warnings[{index}] has a non-finite time"
                )));
            }
        }
        Ok(())
    }

    /// Set the strengths of one segment in place
    pub fn set_strengths(&mut self, segment: usize, pitch: f64, time: f64) -> Result<()> {
        for (name, value) in [("pitch_strength", pitch), ("time_strength", time)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LyraError::invalid(format!("{name} = {value} is outside [0, 1]")));
            }
        }
        let count = self.segments.len();
        let seg = self.segments.get_mut(segment).ok_or_else(|| {
            LyraError::invalid(format!("segment index {segment} out of range ({count} segments)"))
        })?;
        seg.pitch_strength = pitch;
        seg.time_strength = time;
        Ok(())
    }

    /// New snapshot with one segment's strengths replaced
    ///
    /// Renders hold their own snapshot, so edits never race an in-flight render.
    pub fn with_strengths(&self, segment: usize, pitch: f64, time: f64) -> Result<Recipe> {
        let mut next = self.clone();
        next.set_strengths(segment, pitch, time)?;
        Ok(next)
    }

    pub fn low_confidence_segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.segments
            .iter()
            .filter(|s| self.warnings.iter().any(|w| w.t0 == s.t0 && w.t1 == s.t1))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Two-segment recipe with a warning on the second segment
    pub(crate) fn sample_recipe() -> Recipe {
        Recipe {
            version: RECIPE_VERSION.to_string(),
            sample_rate: 44100,
            global_key_shift_semitones: -3.0,
            segments: vec![
                Segment {
                    t0: 0.0,
                    t1: 2.0,
                    time_warp_points: vec![WarpPoint::new(0.0, 0.0), WarpPoint::new(1.99, 2.05)],
                    pitch_target_curve: vec![PitchPoint::new(0.0, 220.0), PitchPoint::new(1.5, 246.94)],
                    confidence: 0.91,
                    pitch_strength: 1.0,
                    time_strength: 1.0,
                    protect_unvoiced: false,
                },
                Segment {
                    t0: 2.0,
                    t1: 3.5,
                    time_warp_points: vec![WarpPoint::new(2.0, 2.0), WarpPoint::new(3.5, 3.5)],
                    pitch_target_curve: vec![PitchPoint::new(2.0, 0.0), PitchPoint::new(3.5, 0.0)],
                    confidence: 0.123456789,
                    pitch_strength: 0.0,
                    time_strength: 0.1,
                    protect_unvoiced: true,
                },
            ],
            warnings: vec![Warning {
                t0: 2.0,
                t1: 3.5,
                reason: LOW_CONFIDENCE.to_string(),
                detail: "confidence=0.12".to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_recipe;
    use super::*;

    #[test]
    fn test_sample_recipe_is_valid() {
        let recipe = sample_recipe();
        recipe.validate().unwrap();
        assert_eq!(recipe.duration(), 3.5);
        assert_eq!(recipe.low_confidence_segments().count(), 1);
    }

    #[test]
    fn test_gap_between_segments_rejected() {
        let mut recipe = sample_recipe();
        recipe.segments[1].t0 = 2.5;
        assert!(matches!(recipe.validate(), Err(LyraError::InvalidRecipe(_))));
    }

    #[test]
    fn test_strength_out_of_range_rejected() {
        let mut recipe = sample_recipe();
        recipe.segments[0].pitch_strength = 1.5;
        let err = recipe.validate().unwrap_err();
        assert!(err.to_string().contains("segments[0].pitch_strength"));
    }

    #[test]
    fn test_non_monotonic_warp_rejected() {
        let mut recipe = sample_recipe();
        recipe.segments[0].time_warp_points = vec![WarpPoint::new(0.0, 1.0), WarpPoint::new(1.0, 0.5)];
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_with_strengths_leaves_original_untouched() {
        let original = sample_recipe();
        let edited = original.with_strengths(1, 0.4, 0.6).unwrap();
        assert_eq!(edited.segments[1].pitch_strength, 0.4);
        assert_eq!(edited.segments[1].time_strength, 0.6);
        assert_eq!(original.segments[1].pitch_strength, 0.0);

        assert!(original.with_strengths(5, 0.5, 0.5).is_err());
        assert!(original.with_strengths(0, -0.1, 0.5).is_err());
        assert!(original.with_strengths(0, 0.5, f64::NAN).is_err());
    }
}
