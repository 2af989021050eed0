//! Per-frame alignment features built from a pitch curve and its onsets

use crate::types::{OnsetSet, PitchCurve};

/// Two-channel feature for one analysis frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureFrame {
    /// Cents relative to A440, z-scored over the voiced frames; 0 when unvoiced
    pub pitch: f64,
    /// 1 within one frame of an onset, else 0
    pub onset: f64,
}

impl FeatureFrame {
    /// Euclidean distance used as the alignment's local cost
    pub fn distance(&self, other: &FeatureFrame) -> f64 {
        (self.pitch - other.pitch).hypot(self.onset - other.onset)
    }
}

/// Convert a frequency to cents relative to 440 Hz
pub fn hz_to_cents(hz: f64) -> f64 {
    1200.0 * (hz / 440.0).log2()
}

/// Build one feature frame per pitch frame
pub fn build_features(pitch: &PitchCurve, onsets: &OnsetSet) -> Vec<FeatureFrame> {
    let mut frames: Vec<FeatureFrame> = pitch
        .hz()
        .iter()
        .map(|&hz| FeatureFrame {
            pitch: if hz > 0.0 { hz_to_cents(hz) } else { 0.0 },
            onset: 0.0,
        })
        .collect();

    normalize_voiced(&mut frames, pitch.hz());
    mark_onsets(&mut frames, pitch.times(), onsets);
    frames
}

/// Z-score the voiced frames in place using their own mean and population std
fn normalize_voiced(frames: &mut [FeatureFrame], hz: &[f64]) {
    let voiced: Vec<usize> = (0..frames.len()).filter(|&i| hz[i] > 0.0).collect();
    if voiced.is_empty() {
        return;
    }
    let n = voiced.len() as f64;
    let mean = voiced.iter().map(|&i| frames[i].pitch).sum::<f64>() / n;
    let var = voiced
        .iter()
        .map(|&i| (frames[i].pitch - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = var.sqrt();
    if std > 0.0 {
        for &i in &voiced {
            frames[i].pitch = (frames[i].pitch - mean) / std;
        }
    }
}

/// Mark the frame nearest each onset plus its immediate neighbours
///
/// Onsets outside the grid snap to the first or last frame.
fn mark_onsets(frames: &mut [FeatureFrame], times: &[f64], onsets: &OnsetSet) {
    let n = frames.len();
    if n == 0 {
        return;
    }

    for &onset in onsets.times() {
        let idx = times.partition_point(|&t| t < onset);
        let nearest = if idx == 0 {
            0
        } else if idx >= n {
            n - 1
        } else if onset - times[idx - 1] <= times[idx] - onset {
            idx - 1
        } else {
            idx
        };
        let lo = nearest.saturating_sub(1);
        let hi = (nearest + 1).min(n - 1);
        for frame in &mut frames[lo..=hi] {
            frame.onset = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_to_cents() {
        assert!(hz_to_cents(440.0).abs() < 1e-9);
        assert!((hz_to_cents(880.0) - 1200.0).abs() < 1e-9);
        assert!((hz_to_cents(220.0) + 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_voiced_frames_are_z_scored() {
        let curve = PitchCurve::from_hop(vec![220.0, 0.0, 440.0, 880.0], 0.01);
        let feats = build_features(&curve, &OnsetSet::default());
        assert_eq!(feats.len(), 4);
        assert_eq!(feats[1].pitch, 0.0);

        let voiced = [feats[0].pitch, feats[2].pitch, feats[3].pitch];
        let mean = voiced.iter().sum::<f64>() / 3.0;
        let var = voiced.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_pitch_is_not_normalized() {
        let curve = PitchCurve::from_hop(vec![880.0; 5], 0.01);
        let feats = build_features(&curve, &OnsetSet::default());
        assert!(feats.iter().all(|f| (f.pitch - 1200.0).abs() < 1e-9));
    }

    #[test]
    fn test_onset_marks_neighbours() {
        let curve = PitchCurve::from_hop(vec![0.0; 10], 0.01);
        let onsets = OnsetSet::new(vec![0.051, 0.0, 5.0]);
        let feats = build_features(&curve, &onsets);
        let marked: Vec<usize> = (0..10).filter(|&i| feats[i].onset == 1.0).collect();
        // 0.0 marks frames 0..=1, 0.051 marks 4..=6, 5.0 snaps to the last frame
        assert_eq!(marked, vec![0, 1, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn test_onset_past_end_marks_last_frames() {
        let curve = PitchCurve::from_hop(vec![0.0; 10], 0.01);
        let feats = build_features(&curve, &OnsetSet::new(vec![0.2]));
        let marked: Vec<usize> = (0..10).filter(|&i| feats[i].onset == 1.0).collect();
        assert_eq!(marked, vec![8, 9]);
    }

    #[test]
    fn test_empty_input() {
        let feats = build_features(&PitchCurve::default(), &OnsetSet::new(vec![1.0]));
        assert!(feats.is_empty());
    }
}
