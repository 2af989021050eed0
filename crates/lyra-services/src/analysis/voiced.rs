//! Voiced/unvoiced classification from zero-crossing rate and level

use lyra_core::VoicedMask;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{centred_frame, check_hop, frame_count, AnalysisError, VoicedDetector};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoicedConfig {
    pub frame_length: usize,
    pub hop_length: usize,
    /// Frames with a crossing rate at or above this are unvoiced
    pub max_zcr: f32,
    /// Minimum RMS relative to the loudest frame
    pub min_relative_rms: f32,
}

impl Default for VoicedConfig {
    fn default() -> Self {
        Self {
            frame_length: 2048,
            hop_length: 512,
            max_zcr: 0.15,
            min_relative_rms: 0.02,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZcrRmsVoicedDetector {
    config: VoicedConfig,
}

impl ZcrRmsVoicedDetector {
    pub fn new(config: VoicedConfig) -> Self {
        Self { config }
    }
}

impl VoicedDetector for ZcrRmsVoicedDetector {
    fn detect(&self, audio: &[f32], _sample_rate: u32) -> Result<VoicedMask, AnalysisError> {
        let cfg = &self.config;
        check_hop(cfg.hop_length, cfg.frame_length)?;

        let frames = frame_count(audio.len(), cfg.hop_length);
        let mut frame = vec![0.0f32; cfg.frame_length];
        let mut stats = Vec::with_capacity(frames);
        for i in 0..frames {
            centred_frame(audio, i, cfg.hop_length, &mut frame);
            let crossings = frame
                .windows(2)
                .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
                .count();
            let zcr = crossings as f32 / frame.len() as f32;
            let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
            stats.push((zcr, rms));
        }

        let loudest = stats.iter().map(|&(_, rms)| rms).fold(0.0f32, f32::max);
        let flags: Vec<bool> = stats
            .iter()
            .map(|&(zcr, rms)| {
                let relative = rms / (loudest + 1e-8);
                zcr < cfg.max_zcr && relative > cfg.min_relative_rms
            })
            .collect();

        debug!(
            frames = flags.len(),
            voiced = flags.iter().filter(|&&v| v).count(),
            "voicing classified"
        );
        Ok(VoicedMask::new(flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    #[test]
    fn test_tone_voiced_noise_unvoiced() {
        // Half a second of 220 Hz, then half a second alternating full-scale samples
        let mut audio: Vec<f32> = (0..8000)
            .map(|i| (std::f32::consts::TAU * 220.0 * i as f32 / SR as f32).sin() * 0.5)
            .collect();
        audio.extend((0..8000).map(|i| if i % 2 == 0 { 0.4 } else { -0.4 }));

        let detector = ZcrRmsVoicedDetector::default();
        let mask = detector.detect(&audio, SR).unwrap();
        assert_eq!(mask.len(), 1 + 16000 / 512);
        assert!(mask.flags()[5]);
        assert!(!mask.flags()[25]);
    }

    #[test]
    fn test_quiet_frames_unvoiced() {
        let mut audio: Vec<f32> = (0..8000)
            .map(|i| (std::f32::consts::TAU * 200.0 * i as f32 / SR as f32).sin() * 0.8)
            .collect();
        audio.extend(vec![0.0; 8000]);

        let mask = ZcrRmsVoicedDetector::default().detect(&audio, SR).unwrap();
        assert!(mask.flags()[4]);
        assert!(!mask.flags()[28]);
    }
}
