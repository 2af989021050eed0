//! Built-in time-stretch / pitch-shift engine

mod phase_vocoder;

use std::sync::Arc;

use lyra_core::{LyraError, Renderer, StretchEngine};
use thiserror::Error;
use tracing::{debug, info};

pub use phase_vocoder::PhaseVocoder;

use crate::audio_io::resample_to_len;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_HOP: usize = 512;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Stretch engine unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Phase vocoder stretch with resampling-based pitch shift
pub struct PhaseVocoderEngine {
    vocoder: PhaseVocoder,
}

impl PhaseVocoderEngine {
    pub fn new(fft_size: usize, hop: usize) -> Result<Self, EngineError> {
        if fft_size < 16 || !fft_size.is_power_of_two() {
            return Err(EngineError::InvalidConfig(format!(
                "fft size {fft_size} must be a power of two >= 16"
            )));
        }
        if hop == 0 || hop > fft_size / 2 {
            return Err(EngineError::InvalidConfig(format!(
                "hop {hop} must be in 1..={}",
                fft_size / 2
            )));
        }
        Ok(Self {
            vocoder: PhaseVocoder::new(fft_size, hop),
        })
    }
}

impl Default for PhaseVocoderEngine {
    fn default() -> Self {
        Self {
            vocoder: PhaseVocoder::new(DEFAULT_FFT_SIZE, DEFAULT_HOP),
        }
    }
}

fn check_ratio(ratio: f64) -> lyra_core::Result<()> {
    if ratio.is_finite() && ratio > 0.0 {
        Ok(())
    } else {
        Err(LyraError::engine(format!("invalid stretch ratio {ratio}")))
    }
}

impl StretchEngine for PhaseVocoderEngine {
    fn name(&self) -> &str {
        "phase-vocoder"
    }

    fn probe(&self) -> lyra_core::Result<()> {
        let n = self.vocoder.fft_size() * 2;
        let tone: Vec<f32> = (0..n).map(|i| (i as f32 * 0.07).sin() * 0.5).collect();
        let out = self.vocoder.stretch(&tone, 1.25);
        if out.len() != (n as f64 * 1.25).round() as usize || out.iter().any(|s| !s.is_finite()) {
            return Err(LyraError::engine("phase vocoder self-test failed"));
        }
        Ok(())
    }

    fn time_stretch(&self, samples: &[f32], _sample_rate: u32, ratio: f64) -> lyra_core::Result<Vec<f32>> {
        check_ratio(ratio)?;
        debug!(frames = samples.len(), ratio, "time stretch");
        Ok(self.vocoder.stretch(samples, ratio))
    }

    fn pitch_shift(&self, samples: &[f32], _sample_rate: u32, semitones: f64) -> lyra_core::Result<Vec<f32>> {
        let factor = 2f64.powf(semitones / 12.0);
        check_ratio(factor)?;
        debug!(frames = samples.len(), semitones, "pitch shift");
        // Stretch by the pitch factor, then resample back to the original length
        let stretched = self.vocoder.stretch(samples, factor);
        resample_to_len(&stretched, 1.0 / factor, samples.len()).map_err(LyraError::engine)
    }
}

/// Probe `engine` and wrap it in a renderer
///
/// Failure here means no render can run, so callers treat it as fatal.
pub fn build_renderer(engine: Arc<dyn StretchEngine>) -> Result<Renderer, EngineError> {
    let name = engine.name().to_string();
    let renderer = Renderer::new(engine).map_err(|e| EngineError::Unavailable(format!("{name}: {e}")))?;
    info!(engine = %name, "renderer ready");
    Ok(renderer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PitchEstimator, YinConfig, YinPitchEstimator};

    const SR: u32 = 16000;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin() * 0.5)
            .collect()
    }

    fn median_pitch(samples: &[f32]) -> f64 {
        let yin = YinPitchEstimator::new(YinConfig::default());
        let curve = yin.estimate(samples, SR).unwrap();
        let mut voiced: Vec<f64> = curve.voiced_hz().collect();
        voiced.sort_by(f64::total_cmp);
        voiced[voiced.len() / 2]
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(PhaseVocoderEngine::new(1000, 256), Err(EngineError::InvalidConfig(_))));
        assert!(matches!(PhaseVocoderEngine::new(1024, 0), Err(EngineError::InvalidConfig(_))));
        assert!(PhaseVocoderEngine::new(1024, 256).is_ok());
    }

    #[test]
    fn test_probe_passes() {
        let engine = PhaseVocoderEngine::default();
        engine.probe().unwrap();
        assert!(build_renderer(Arc::new(engine)).is_ok());
    }

    #[test]
    fn test_pitch_shift_preserves_length() {
        let engine = PhaseVocoderEngine::default();
        let input = sine(220.0, SR as usize);
        for semitones in [-5.0, 3.0, 7.5] {
            let out = engine.pitch_shift(&input, SR, semitones).unwrap();
            assert_eq!(out.len(), input.len());
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_octave_up_doubles_pitch() {
        let engine = PhaseVocoderEngine::default();
        let input = sine(220.0, SR as usize * 2);
        let out = engine.pitch_shift(&input, SR, 12.0).unwrap();
        let hz = median_pitch(&out);
        assert!((hz - 440.0).abs() < 440.0 * 0.05, "detected {hz}");
    }

    #[test]
    fn test_time_stretch_keeps_pitch() {
        let engine = PhaseVocoderEngine::default();
        let input = sine(300.0, SR as usize);
        let out = engine.time_stretch(&input, SR, 1.5).unwrap();
        assert_eq!(out.len(), 24000);
        let hz = median_pitch(&out);
        assert!((hz - 300.0).abs() < 300.0 * 0.05, "detected {hz}");
    }

    #[test]
    fn test_bad_ratio_is_engine_error() {
        let engine = PhaseVocoderEngine::default();
        assert!(matches!(
            engine.time_stretch(&[0.0; 10], SR, -1.0),
            Err(LyraError::Engine(_))
        ));
    }
}
