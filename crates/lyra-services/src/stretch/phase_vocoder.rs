//! Offline phase vocoder time stretch
//!
//! Whole-buffer STFT analysis at a fixed hop, phase propagation at a
//! variable synthesis hop, and overlap-add normalised by the summed squared
//! window. Stationary partials keep their frequency while the duration
//! scales by the requested ratio.

use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Overlap-add positions whose window energy falls below this are left unscaled
const MIN_WINDOW_SUM: f32 = 1e-3;

pub struct PhaseVocoder {
    fft_size: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl PhaseVocoder {
    pub fn new(fft_size: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft_size,
            hop,
            window: hann(fft_size),
            forward: planner.plan_fft_forward(fft_size),
            inverse: planner.plan_fft_inverse(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Stretch `samples` so the output has `round(len * ratio)` samples
    pub fn stretch(&self, samples: &[f32], ratio: f64) -> Vec<f32> {
        let out_len = (samples.len() as f64 * ratio).round() as usize;
        if samples.is_empty() || out_len == 0 {
            return vec![0.0; out_len];
        }

        let n = self.fft_size;
        let ha = self.hop;
        let bins = n / 2 + 1;
        let pad = n / 2;

        let mut padded = vec![0.0f32; pad];
        padded.extend_from_slice(samples);
        padded.resize(padded.len() + n + ha, 0.0);
        let num_frames = (padded.len() - n) / ha + 1;

        let out_pos = |m: usize| (m as f64 * ha as f64 * ratio).round() as usize;
        let total = out_pos(num_frames - 1) + n;
        let mut output = vec![0.0f32; total];
        let mut norm = vec![0.0f32; total];

        let expected: Vec<f64> = (0..bins).map(|k| TAU * k as f64 * ha as f64 / n as f64).collect();
        let mut prev_phase = vec![0.0f64; bins];
        let mut synth_phase = vec![0.0f64; bins];
        let mut buffer = vec![Complex32::new(0.0, 0.0); n];
        let scale = 1.0 / n as f32;

        for m in 0..num_frames {
            let start = m * ha;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex32::new(padded[start + i] * self.window[i], 0.0);
            }
            self.forward.process(&mut buffer);

            let hs = if m == 0 { 0 } else { out_pos(m) - out_pos(m - 1) };
            for k in 0..bins {
                let mag = buffer[k].norm();
                let phase = buffer[k].arg() as f64;
                if m == 0 {
                    synth_phase[k] = phase;
                } else {
                    let delta = wrap_phase(phase - prev_phase[k] - expected[k]);
                    let omega = (expected[k] + delta) / ha as f64;
                    synth_phase[k] = wrap_phase(synth_phase[k] + omega * hs as f64);
                }
                prev_phase[k] = phase;
                buffer[k] = Complex32::from_polar(mag, synth_phase[k] as f32);
            }
            // Hermitian mirror for a real inverse transform
            for k in 1..n - bins + 1 {
                buffer[n - k] = buffer[k].conj();
            }
            self.inverse.process(&mut buffer);

            let pos = out_pos(m);
            for i in 0..n {
                let w = self.window[i];
                output[pos + i] += buffer[i].re * scale * w;
                norm[pos + i] += w * w;
            }
        }

        for (s, &w) in output.iter_mut().zip(&norm) {
            if w > MIN_WINDOW_SUM {
                *s /= w;
            }
        }

        let crop = (pad as f64 * ratio).round() as usize;
        let mut out: Vec<f32> = output.into_iter().skip(crop).take(out_len).collect();
        out.resize(out_len, 0.0);
        out
    }
}

fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| (0.5 * (1.0 - (TAU * i as f64 / size as f64).cos())) as f32)
        .collect()
}

/// Wrap a phase into [-PI, PI]
fn wrap_phase(p: f64) -> f64 {
    let wrapped = p - TAU * (p / TAU).round();
    wrapped.clamp(-PI, PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_unit_ratio_reconstructs_input() {
        let pv = PhaseVocoder::new(2048, 512);
        let input = sine(440.0, 16000.0, 16000);
        let out = pv.stretch(&input, 1.0);
        assert_eq!(out.len(), input.len());
        let max_err = out[2048..14000]
            .iter()
            .zip(&input[2048..14000])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max error {max_err}");
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let pv = PhaseVocoder::new(2048, 512);
        let input = sine(220.0, 16000.0, 10000);
        assert_eq!(pv.stretch(&input, 1.5).len(), 15000);
        assert_eq!(pv.stretch(&input, 0.5).len(), 5000);
        assert_eq!(pv.stretch(&input, 2.0).len(), 20000);
    }

    #[test]
    fn test_stretch_keeps_level() {
        let pv = PhaseVocoder::new(2048, 512);
        let input = sine(330.0, 16000.0, 16000);
        let out = pv.stretch(&input, 1.3);
        let rms = |s: &[f32]| (s.iter().map(|x| x * x).sum::<f32>() / s.len() as f32).sqrt();
        let mid = out.len() / 2;
        let level = rms(&out[mid - 2000..mid + 2000]);
        assert!((level - rms(&input)).abs() < 0.05, "rms {level}");
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_short_and_empty_inputs() {
        let pv = PhaseVocoder::new(2048, 512);
        assert!(pv.stretch(&[], 1.5).is_empty());
        let short = vec![0.1f32; 100];
        assert_eq!(pv.stretch(&short, 1.2).len(), 120);
    }

    #[test]
    fn test_wrap_phase() {
        assert!((wrap_phase(3.0 * PI) - PI).abs() < 1e-9 || (wrap_phase(3.0 * PI) + PI).abs() < 1e-9);
        assert!((wrap_phase(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_phase(-TAU - 0.25) + 0.25).abs() < 1e-9);
    }
}
