//! Analysis collaborators: pitch, onsets, voicing and reference preparation
//!
//! Each capability sits behind a trait so model-backed implementations can
//! replace the built-in DSP ones without touching the pipeline.

mod onset;
mod pitch;
mod voiced;

use std::collections::HashMap;
use std::sync::Arc;

use lyra_core::{OnsetSet, PitchCurve, VoicedMask};
use thiserror::Error;
use tracing::{debug, info};

pub use onset::{OnsetConfig, SpectralFluxOnsetDetector};
pub use pitch::{YinConfig, YinPitchEstimator};
pub use voiced::{VoicedConfig, ZcrRmsVoicedDetector};

use crate::audio_io::AudioBuffer;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{analyzer} failed: {message}")]
    Failed { analyzer: String, message: String },
    #[error("Invalid analyzer configuration: {0}")]
    InvalidConfig(String),
}

/// Fundamental-frequency estimation
pub trait PitchEstimator: Send + Sync {
    fn name(&self) -> &str;
    fn estimate(&self, audio: &[f32], sample_rate: u32) -> Result<PitchCurve, AnalysisError>;
}

pub trait OnsetDetector: Send + Sync {
    fn detect(&self, audio: &[f32], sample_rate: u32) -> Result<OnsetSet, AnalysisError>;
}

pub trait VoicedDetector: Send + Sync {
    fn detect(&self, audio: &[f32], sample_rate: u32) -> Result<VoicedMask, AnalysisError>;
}

/// Isolates the vocal from a reference recording
pub trait VocalSeparator: Send + Sync {
    fn name(&self) -> &str;
    fn isolate(&self, reference: AudioBuffer) -> Result<AudioBuffer, AnalysisError>;
}

/// Treats the reference as an already isolated vocal stem
#[derive(Debug, Default, Clone, Copy)]
pub struct StemPassthrough;

impl VocalSeparator for StemPassthrough {
    fn name(&self) -> &str {
        "stem-passthrough"
    }

    fn isolate(&self, reference: AudioBuffer) -> Result<AudioBuffer, AnalysisError> {
        debug!(frames = reference.len(), "reference used as vocal stem");
        Ok(reference)
    }
}

/// Pitch backends the cache knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchBackend {
    Yin,
}

impl PitchBackend {
    pub fn name(self) -> &'static str {
        match self {
            PitchBackend::Yin => "yin",
        }
    }
}

/// Lazily built pitch estimators, reused across runs
///
/// Keyed by backend name and hop length. Entries live as long as the cache.
#[derive(Default)]
pub struct AnalyzerCache {
    pitch: HashMap<(&'static str, usize), Arc<dyn PitchEstimator>>,
}

impl AnalyzerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pitch_estimator(&mut self, backend: PitchBackend, hop_length: usize) -> Arc<dyn PitchEstimator> {
        self.pitch
            .entry((backend.name(), hop_length))
            .or_insert_with(|| {
                info!(backend = backend.name(), hop_length, "building pitch estimator");
                match backend {
                    PitchBackend::Yin => Arc::new(YinPitchEstimator::new(YinConfig {
                        hop_length,
                        ..YinConfig::default()
                    })),
                }
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.pitch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitch.is_empty()
    }
}

/// Number of centred frames for a signal: one per hop, plus the frame at t = 0
pub(crate) fn frame_count(len: usize, hop: usize) -> usize {
    if len == 0 { 0 } else { 1 + len / hop }
}

/// Copy the frame centred on `index * hop` into `out`, zero-padding past the edges
pub(crate) fn centred_frame(samples: &[f32], index: usize, hop: usize, out: &mut [f32]) {
    let half = out.len() / 2;
    let centre = index * hop;
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (centre + i)
            .checked_sub(half)
            .and_then(|j| samples.get(j))
            .copied()
            .unwrap_or(0.0);
    }
}

pub(crate) fn check_hop(hop: usize, frame_length: usize) -> Result<(), AnalysisError> {
    if hop == 0 || frame_length == 0 || hop > frame_length {
        return Err(AnalysisError::InvalidConfig(format!(
            "hop {hop} and frame length {frame_length} must be positive with hop <= frame"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centred_frame_pads_edges() {
        let samples: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let mut frame = vec![0.0; 4];
        centred_frame(&samples, 0, 2, &mut frame);
        assert_eq!(frame, vec![0.0, 0.0, 1.0, 2.0]);
        centred_frame(&samples, 4, 2, &mut frame);
        assert_eq!(frame, vec![7.0, 8.0, 0.0, 0.0]);
        assert_eq!(frame_count(8, 2), 5);
        assert_eq!(frame_count(0, 2), 0);
    }

    #[test]
    fn test_cache_reuses_estimators() {
        let mut cache = AnalyzerCache::new();
        let a = cache.pitch_estimator(PitchBackend::Yin, 512);
        let b = cache.pitch_estimator(PitchBackend::Yin, 512);
        let c = cache.pitch_estimator(PitchBackend::Yin, 256);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_stem_passthrough() {
        let buffer = AudioBuffer::new(vec![0.1, 0.2], 8000);
        assert_eq!(StemPassthrough.isolate(buffer.clone()).unwrap(), buffer);
    }
}
