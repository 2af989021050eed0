//! Recipe rendering over a pluggable time-stretch / pitch-shift engine

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LyraError, Result};
use crate::interp::median;
use crate::recipe::{Recipe, Segment};
use crate::types::PitchCurve;

/// Global shifts at or below this many semitones are skipped
const MIN_GLOBAL_SHIFT: f64 = 0.01;
/// Time strengths at or below this are skipped
const MIN_TIME_STRENGTH: f64 = 0.05;
const MIN_RATIO_DEVIATION: f64 = 0.01;
const MIN_STRETCH_RATIO: f64 = 0.5;
const MAX_STRETCH_RATIO: f64 = 2.0;
const MIN_PITCH_STRENGTH: f64 = 0.01;
const MIN_SEGMENT_SHIFT: f64 = 0.05;
/// Bound on the raw residual before strength scaling
const MAX_RAW_RESIDUAL: f64 = 24.0;
/// Bound on the applied per-segment shift
const MAX_SEGMENT_SHIFT: f64 = 12.0;

/// Time-stretch / pitch-shift backend
///
/// Implementations must be deterministic for identical input.
pub trait StretchEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Verify the engine can run; called once before any render
    fn probe(&self) -> Result<()>;

    /// Change duration by `ratio` (> 1 lengthens) without changing pitch
    fn time_stretch(&self, samples: &[f32], sample_rate: u32, ratio: f64) -> Result<Vec<f32>>;

    /// Change pitch by `semitones` without changing duration
    fn pitch_shift(&self, samples: &[f32], sample_rate: u32, semitones: f64) -> Result<Vec<f32>>;
}

/// Stretch ratio a segment asks for after strength blending and clamping
///
/// Returns `None` when the segment should not be stretched.
pub fn segment_stretch_ratio(segment: &Segment) -> Option<f64> {
    if segment.time_strength <= MIN_TIME_STRENGTH || segment.time_warp_points.len() < 2 {
        return None;
    }
    let first = segment.time_warp_points.first()?;
    let last = segment.time_warp_points.last()?;
    let input_span = last.new_time - first.new_time;
    let output_span = last.ref_time - first.ref_time;
    if !(input_span > 0.0 && output_span > 0.0) {
        return None;
    }
    let full = output_span / input_span;
    let ratio = (1.0 + segment.time_strength * (full - 1.0)).clamp(MIN_STRETCH_RATIO, MAX_STRETCH_RATIO);
    if !ratio.is_finite() || (ratio - 1.0).abs() <= MIN_RATIO_DEVIATION {
        return None;
    }
    Some(ratio)
}

/// Strength-scaled semitone correction for a segment
///
/// `current` is the new performance's pitch, already carrying any global
/// shift. Returns `None` when no shift should be applied.
pub fn segment_pitch_shift(segment: &Segment, current: Option<&PitchCurve>) -> Option<f64> {
    let strength = if segment.protect_unvoiced { 0.0 } else { segment.pitch_strength };
    if strength <= MIN_PITCH_STRENGTH {
        return None;
    }
    let target = median(segment.pitch_target_curve.iter().map(|p| p.hz).filter(|&hz| hz > 0.0));
    let actual = current.and_then(|c| median(c.voiced_hz_between(segment.t0, segment.t1)));
    let residual = match (target, actual) {
        (Some(t), Some(a)) if t > 0.0 && a > 0.0 => {
            (12.0 * (t / a).log2()).clamp(-MAX_RAW_RESIDUAL, MAX_RAW_RESIDUAL)
        }
        _ => 0.0,
    };
    let shift = (residual * strength).clamp(-MAX_SEGMENT_SHIFT, MAX_SEGMENT_SHIFT);
    (shift.is_finite() && shift.abs() > MIN_SEGMENT_SHIFT).then_some(shift)
}

/// Applies recipes to audio
#[derive(Clone)]
pub struct Renderer {
    engine: Arc<dyn StretchEngine>,
}

impl Renderer {
    /// Probe the engine and fail immediately if it cannot run
    pub fn new(engine: Arc<dyn StretchEngine>) -> Result<Self> {
        engine.probe()?;
        info!(engine = engine.name(), "stretch engine ready");
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Arc<dyn StretchEngine> {
        &self.engine
    }

    /// Render `audio` through `recipe`
    ///
    /// The global key shift is applied to the whole buffer first; each
    /// segment is then stretched and shifted independently and the chunks
    /// are concatenated in order.
    pub fn render(
        &self,
        audio: &[f32],
        sample_rate: u32,
        recipe: &Recipe,
        new_pitch: Option<&PitchCurve>,
    ) -> Result<Vec<f32>> {
        let key_shift = recipe.global_key_shift_semitones;
        let (shifted, pitch) = if key_shift.abs() > MIN_GLOBAL_SHIFT {
            debug!(semitones = key_shift, "applying global key shift");
            let out = self.checked(self.engine.pitch_shift(audio, sample_rate, key_shift))?;
            let factor = 2f64.powf(key_shift / 12.0);
            (out, new_pitch.map(|p| p.scaled(factor)))
        } else {
            (audio.to_vec(), new_pitch.cloned())
        };

        let sr = sample_rate as f64;
        let mut chunks: Vec<Vec<f32>> = Vec::with_capacity(recipe.segments.len());
        for (index, segment) in recipe.segments.iter().enumerate() {
            let start = (segment.t0 * sr).floor().max(0.0) as usize;
            let end = ((segment.t1 * sr).floor().max(0.0) as usize).min(shifted.len());
            if start >= end {
                debug!(index, "segment outside the buffer, skipped");
                continue;
            }
            let mut chunk = shifted[start..end].to_vec();

            if let Some(ratio) = segment_stretch_ratio(segment) {
                debug!(index, ratio, "time stretch");
                chunk = self.checked(self.engine.time_stretch(&chunk, sample_rate, ratio))?;
            }
            if let Some(semitones) = segment_pitch_shift(segment, pitch.as_ref()) {
                debug!(index, semitones, "segment pitch shift");
                chunk = self.checked(self.engine.pitch_shift(&chunk, sample_rate, semitones))?;
            }
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            return Ok(shifted);
        }
        let out = chunks.concat();
        info!(
            input = audio.len(),
            output = out.len(),
            segments = chunks.len(),
            "render complete"
        );
        Ok(out)
    }

    fn checked(&self, result: Result<Vec<f32>>) -> Result<Vec<f32>> {
        let samples = result?;
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(LyraError::Engine(format!(
                "{} produced non-finite samples",
                self.engine.name()
            )));
        }
        Ok(samples)
    }
}
