//! YIN pitch estimation over centred frames
//!
//! The difference function is computed from an FFT cross-correlation and
//! running energy sums, so each frame costs O(N log N) rather than
//! O(N * max_period).

use std::sync::Arc;

use lyra_core::PitchCurve;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{centred_frame, check_hop, frame_count, AnalysisError, PitchEstimator};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YinConfig {
    pub frame_length: usize,
    pub hop_length: usize,
    pub fmin: f64,
    pub fmax: f64,
    /// Absolute threshold on the cumulative mean normalised difference
    pub threshold: f64,
    /// Frames quieter than this RMS are unvoiced
    pub silence_rms: f64,
}

impl Default for YinConfig {
    fn default() -> Self {
        Self {
            frame_length: 2048,
            hop_length: 512,
            fmin: 50.0,
            fmax: 1100.0,
            threshold: 0.15,
            silence_rms: 1e-3,
        }
    }
}

pub struct YinPitchEstimator {
    config: YinConfig,
}

impl YinPitchEstimator {
    pub fn new(config: YinConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YinConfig {
        &self.config
    }
}

/// Per-call FFT plans and scratch buffers
struct YinScratch {
    fft_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    frame_spec: Vec<Complex32>,
    window_spec: Vec<Complex32>,
    cum_sq: Vec<f64>,
    cmnd: Vec<f64>,
}

impl YinScratch {
    fn new(frame_length: usize) -> Self {
        let fft_len = frame_length.next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            fft_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            frame_spec: vec![Complex32::new(0.0, 0.0); fft_len],
            window_spec: vec![Complex32::new(0.0, 0.0); fft_len],
            cum_sq: vec![0.0; frame_length + 1],
            cmnd: Vec::new(),
        }
    }
}

impl YinPitchEstimator {
    /// Pitch of one frame in Hz, or 0 when unvoiced
    fn frame_pitch(&self, frame: &[f32], sample_rate: f64, s: &mut YinScratch) -> f64 {
        let n = frame.len();
        let rms = (frame.iter().map(|&x| (x as f64).powi(2)).sum::<f64>() / n as f64).sqrt();
        if rms < self.config.silence_rms {
            return 0.0;
        }

        let min_period = ((sample_rate / self.config.fmax).floor() as usize).max(2);
        let max_period = ((sample_rate / self.config.fmin).ceil() as usize).min(n / 2);
        if max_period <= min_period + 1 {
            return 0.0;
        }
        // Integration window
        let w = n - max_period;

        // r(tau) = sum_{j < w} x[j] * x[j + tau]
        for (i, slot) in s.frame_spec.iter_mut().enumerate() {
            *slot = Complex32::new(frame.get(i).copied().unwrap_or(0.0), 0.0);
        }
        for (i, slot) in s.window_spec.iter_mut().enumerate() {
            *slot = Complex32::new(if i < w { frame[i] } else { 0.0 }, 0.0);
        }
        s.forward.process(&mut s.frame_spec);
        s.forward.process(&mut s.window_spec);
        for (a, b) in s.frame_spec.iter_mut().zip(&s.window_spec) {
            *a *= b.conj();
        }
        s.inverse.process(&mut s.frame_spec);
        let scale = 1.0 / s.fft_len as f64;

        for i in 0..n {
            s.cum_sq[i + 1] = s.cum_sq[i] + (frame[i] as f64).powi(2);
        }
        let energy = |start: usize| s.cum_sq[start + w] - s.cum_sq[start];
        let e0 = energy(0);

        s.cmnd.clear();
        s.cmnd.resize(max_period + 1, 1.0);
        let mut running = 0.0;
        for tau in 1..=max_period {
            let r = s.frame_spec[tau].re as f64 * scale;
            let d = (e0 + energy(tau) - 2.0 * r).max(0.0);
            running += d;
            s.cmnd[tau] = if running > 1e-12 { d * tau as f64 / running } else { 1.0 };
        }

        let mut tau = min_period;
        while tau < max_period {
            if s.cmnd[tau] < self.config.threshold {
                while tau + 1 < max_period && s.cmnd[tau + 1] < s.cmnd[tau] {
                    tau += 1;
                }
                let period = parabolic(&s.cmnd, tau);
                let hz = sample_rate / period;
                return if hz >= self.config.fmin && hz <= self.config.fmax { hz } else { 0.0 };
            }
            tau += 1;
        }
        0.0
    }
}

/// Vertex of the parabola through the three points around `tau`
fn parabolic(values: &[f64], tau: usize) -> f64 {
    if tau < 1 || tau + 1 >= values.len() {
        return tau as f64;
    }
    let (s0, s1, s2) = (values[tau - 1], values[tau], values[tau + 1]);
    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    if denominator.abs() > 1e-12 {
        tau as f64 + (s2 - s0) / denominator
    } else {
        tau as f64
    }
}

impl PitchEstimator for YinPitchEstimator {
    fn name(&self) -> &str {
        "yin"
    }

    fn estimate(&self, audio: &[f32], sample_rate: u32) -> Result<PitchCurve, AnalysisError> {
        let cfg = &self.config;
        check_hop(cfg.hop_length, cfg.frame_length)?;
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidConfig("sample rate must be positive".into()));
        }

        let frames = frame_count(audio.len(), cfg.hop_length);
        let mut scratch = YinScratch::new(cfg.frame_length);
        let mut frame = vec![0.0f32; cfg.frame_length];
        let sr = sample_rate as f64;

        let hz: Vec<f64> = (0..frames)
            .map(|i| {
                centred_frame(audio, i, cfg.hop_length, &mut frame);
                self.frame_pitch(&frame, sr, &mut scratch)
            })
            .collect();

        let curve = PitchCurve::from_hop(hz, cfg.hop_length as f64 / sr);
        debug!(
            frames = curve.len(),
            voiced = curve.voiced_hz().count(),
            "yin pitch estimated"
        );
        Ok(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    fn sine(freq: f64, seconds: f64) -> Vec<f32> {
        let n = (SR as f64 * seconds) as usize;
        (0..n)
            .map(|i| ((std::f64::consts::TAU * freq * i as f64 / SR as f64).sin() * 0.5) as f32)
            .collect()
    }

    fn median_voiced(curve: &PitchCurve) -> f64 {
        let mut v: Vec<f64> = curve.voiced_hz().collect();
        v.sort_by(f64::total_cmp);
        v[v.len() / 2]
    }

    #[test]
    fn test_detects_sine_frequencies() {
        let yin = YinPitchEstimator::new(YinConfig::default());
        for freq in [110.0, 220.0, 261.6, 440.0, 880.0] {
            let curve = yin.estimate(&sine(freq, 1.0), SR).unwrap();
            let hz = median_voiced(&curve);
            assert!((hz - freq).abs() < freq * 0.01, "expected {freq}, got {hz}");
        }
    }

    #[test]
    fn test_frame_grid() {
        let yin = YinPitchEstimator::new(YinConfig::default());
        let curve = yin.estimate(&sine(220.0, 1.0), SR).unwrap();
        assert_eq!(curve.len(), 1 + 16000 / 512);
        assert_eq!(curve.times()[0], 0.0);
        assert!((curve.times()[1] - 512.0 / 16000.0).abs() < 1e-12);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let yin = YinPitchEstimator::new(YinConfig::default());
        let curve = yin.estimate(&vec![0.0; 8000], SR).unwrap();
        assert!(!curve.is_empty());
        assert_eq!(curve.voiced_hz().count(), 0);
    }

    #[test]
    fn test_empty_audio() {
        let yin = YinPitchEstimator::new(YinConfig::default());
        assert!(yin.estimate(&[], SR).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_hop() {
        let yin = YinPitchEstimator::new(YinConfig {
            hop_length: 0,
            ..YinConfig::default()
        });
        assert!(matches!(yin.estimate(&[0.0; 10], SR), Err(AnalysisError::InvalidConfig(_))));
    }
}
