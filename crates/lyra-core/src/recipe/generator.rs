//! Recipe generation from alignment output

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Recipe, Segment, Warning, LOW_CONFIDENCE, RECIPE_VERSION};
use crate::interp::{interp, linspace, subsample};
use crate::types::{AlignmentResult, PitchCurve, PitchPoint, VoicedMask, WarpPoint};

/// Nominal segment length in seconds
pub const SEGMENT_SECONDS: f64 = 2.0;

/// Cap on warp and pitch-target points stored per segment
pub const MAX_CURVE_POINTS: usize = 20;

/// Confidence assumed for a segment that contains no frames
const EMPTY_SEGMENT_CONFIDENCE: f64 = 0.5;

/// Below this voiced fraction a segment is protected from pitch correction
const MIN_VOICED_RATIO: f64 = 0.3;

/// Time strength kept for low-confidence segments
const LOW_CONFIDENCE_TIME_STRENGTH: f64 = 0.1;

/// Confidence thresholds for the strength ramp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrengthThresholds {
    pub confidence_low: f64,
    pub confidence_high: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        Self {
            confidence_low: 0.5,
            confidence_high: 0.8,
        }
    }
}

/// Map a confidence to `(pitch_strength, time_strength)`
pub fn strength_from_confidence(confidence: f64, thresholds: &StrengthThresholds) -> (f64, f64) {
    let StrengthThresholds {
        confidence_low: low,
        confidence_high: high,
    } = *thresholds;
    if confidence >= high {
        (1.0, 1.0)
    } else if confidence >= low {
        let s = ((confidence - low) / (high - low)).clamp(0.0, 1.0);
        (s, s)
    } else {
        (0.0, LOW_CONFIDENCE_TIME_STRENGTH)
    }
}

/// Everything the generator reads about one analysis run
#[derive(Debug, Clone, Copy)]
pub struct RecipeInputs<'a> {
    /// Length of the new performance in seconds
    pub new_duration: f64,
    pub sample_rate: u32,
    pub global_key_shift: f64,
    pub alignment: &'a AlignmentResult,
    pub reference: &'a PitchCurve,
    pub new: &'a PitchCurve,
    pub voiced_mask: &'a VoicedMask,
}

/// Partition the new performance into segments and grade each one
pub fn generate(inputs: &RecipeInputs<'_>, thresholds: &StrengthThresholds) -> Recipe {
    let duration = if inputs.new_duration.is_finite() {
        inputs.new_duration.max(0.0)
    } else {
        0.0
    };
    let num_segments = ((duration / SEGMENT_SECONDS).ceil() as usize).max(1);
    let bounds = linspace(0.0, duration, num_segments + 1);

    let new_times = inputs.new.times();
    let voiced = inputs.voiced_mask.resample(new_times, duration);
    let confidence = &inputs.alignment.confidence_per_frame;

    let ref_times = inputs.reference.times();
    let ref_hz = inputs.reference.hz();

    let mut segments = Vec::with_capacity(num_segments);
    let mut warnings = Vec::new();

    for window in bounds.windows(2) {
        let (t0, t1) = (window[0], window[1]);
        let frames: Vec<usize> = (0..new_times.len())
            .filter(|&i| new_times[i] >= t0 && new_times[i] < t1)
            .collect();

        let scored: Vec<f64> = frames.iter().filter_map(|&i| confidence.get(i).copied()).collect();
        let seg_confidence = if scored.is_empty() {
            EMPTY_SEGMENT_CONFIDENCE
        } else {
            (scored.iter().sum::<f64>() / scored.len() as f64).clamp(0.0, 1.0)
        };
        let (pitch_strength, time_strength) = strength_from_confidence(seg_confidence, thresholds);

        let in_window: Vec<WarpPoint> = inputs
            .alignment
            .warp_map
            .iter()
            .copied()
            .filter(|p| p.new_time >= t0 && p.new_time < t1)
            .collect();
        let time_warp_points = if in_window.is_empty() {
            vec![WarpPoint::new(t0, t0), WarpPoint::new(t1, t1)]
        } else {
            subsample(&in_window, MAX_CURVE_POINTS)
        };

        let pitch_target_curve = if frames.is_empty() {
            vec![PitchPoint::new(t0, 0.0), PitchPoint::new(t1, 0.0)]
        } else {
            let warp_new: Vec<f64> = time_warp_points.iter().map(|p| p.new_time).collect();
            let warp_ref: Vec<f64> = time_warp_points.iter().map(|p| p.ref_time).collect();
            let targets: Vec<PitchPoint> = frames
                .iter()
                .map(|&i| {
                    let t = new_times[i];
                    let ref_t = interp(t, &warp_new, &warp_ref);
                    PitchPoint::new(t, interp(ref_t, ref_times, ref_hz))
                })
                .collect();
            subsample(&targets, MAX_CURVE_POINTS)
        };

        let protect_unvoiced = if frames.is_empty() {
            true
        } else {
            let voiced_frames = frames
                .iter()
                .filter(|&&i| voiced.get(i).copied().unwrap_or(false))
                .count();
            (voiced_frames as f64 / frames.len() as f64) < MIN_VOICED_RATIO
        };

        if seg_confidence < thresholds.confidence_low {
            warn!(t0, t1, confidence = seg_confidence, "low-confidence segment");
            warnings.push(Warning {
                t0,
                t1,
                reason: LOW_CONFIDENCE.to_string(),
                detail: format!("confidence={seg_confidence:.2}; only the global key shift applies"),
            });
        }

        segments.push(Segment {
            t0,
            t1,
            time_warp_points,
            pitch_target_curve,
            confidence: seg_confidence,
            pitch_strength,
            time_strength,
            protect_unvoiced,
        });
    }

    info!(
        segments = segments.len(),
        warnings = warnings.len(),
        key_shift = inputs.global_key_shift,
        "recipe generated"
    );

    Recipe {
        version: RECIPE_VERSION.to_string(),
        sample_rate: inputs.sample_rate,
        global_key_shift_semitones: inputs.global_key_shift,
        segments,
        warnings,
    }
}
