//! Spectral-flux onset detection with a moving-median threshold

use lyra_core::OnsetSet;
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{centred_frame, check_hop, frame_count, AnalysisError, OnsetDetector};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetConfig {
    pub frame_length: usize,
    pub hop_length: usize,
    /// Frames on each side of the moving median
    pub median_radius: usize,
    /// Multiplier on the local median
    pub median_scale: f32,
    /// Offset added to the threshold, as a fraction of the peak flux
    pub delta: f32,
    pub min_gap_secs: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            frame_length: 2048,
            hop_length: 512,
            median_radius: 8,
            median_scale: 1.5,
            delta: 0.1,
            min_gap_secs: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpectralFluxOnsetDetector {
    config: OnsetConfig,
}

impl SpectralFluxOnsetDetector {
    pub fn new(config: OnsetConfig) -> Self {
        Self { config }
    }

    /// Half-wave rectified spectral flux, one value per centred frame
    fn flux(&self, audio: &[f32]) -> Vec<f32> {
        let cfg = &self.config;
        let n = cfg.frame_length;
        let bins = n / 2 + 1;
        let fft = FftPlanner::new().plan_fft_forward(n);
        let window: Vec<f32> = (0..n)
            .map(|i| 0.5 * (1.0 - (std::f32::consts::TAU * i as f32 / n as f32).cos()))
            .collect();

        let mut frame = vec![0.0f32; n];
        let mut buffer = vec![Complex32::new(0.0, 0.0); n];
        let mut prev = vec![0.0f32; bins];
        let frames = frame_count(audio.len(), cfg.hop_length);

        (0..frames)
            .map(|i| {
                centred_frame(audio, i, cfg.hop_length, &mut frame);
                for ((slot, &s), &w) in buffer.iter_mut().zip(&frame).zip(&window) {
                    *slot = Complex32::new(s * w, 0.0);
                }
                fft.process(&mut buffer);
                let mut flux = 0.0;
                for (k, p) in prev.iter_mut().enumerate() {
                    let mag = buffer[k].norm();
                    let diff = mag - *p;
                    if diff > 0.0 {
                        flux += diff;
                    }
                    *p = mag;
                }
                flux
            })
            .collect()
    }
}

impl OnsetDetector for SpectralFluxOnsetDetector {
    fn detect(&self, audio: &[f32], sample_rate: u32) -> Result<OnsetSet, AnalysisError> {
        let cfg = &self.config;
        check_hop(cfg.hop_length, cfg.frame_length)?;
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidConfig("sample rate must be positive".into()));
        }

        let flux = self.flux(audio);
        let peak = flux.iter().copied().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return Ok(OnsetSet::default());
        }

        let hop_secs = cfg.hop_length as f64 / sample_rate as f64;
        let offset = cfg.delta * peak;
        let mut onsets: Vec<f64> = Vec::new();

        for i in 0..flux.len() {
            let value = flux[i];
            let prev = if i > 0 { flux[i - 1] } else { 0.0 };
            let next = flux.get(i + 1).copied().unwrap_or(0.0);
            if value < prev || value <= next {
                continue;
            }

            let lo = i.saturating_sub(cfg.median_radius);
            let hi = (i + cfg.median_radius + 1).min(flux.len());
            let mut local: Vec<f32> = flux[lo..hi].to_vec();
            local.sort_by(f32::total_cmp);
            let threshold = local[local.len() / 2] * cfg.median_scale + offset;
            if value <= threshold {
                continue;
            }

            let time = i as f64 * hop_secs;
            if onsets.last().is_some_and(|&t| time - t < cfg.min_gap_secs) {
                continue;
            }
            onsets.push(time);
        }

        debug!(onsets = onsets.len(), "spectral flux onsets");
        Ok(OnsetSet::new(onsets))
    }
}
