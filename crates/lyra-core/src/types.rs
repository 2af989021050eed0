//! Shared data model: pitch curves, onsets, voicing and alignment output

use serde::{Deserialize, Serialize};

use crate::interp::{interp, linspace};

/// Fundamental-frequency curve sampled at a fixed hop
///
/// A frequency of 0 marks an unvoiced frame. Non-finite or negative input
/// frequencies are stored as 0 so downstream math never sees NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchCurve {
    times: Vec<f64>,
    hz: Vec<f64>,
}

impl PitchCurve {
    /// Pair frame times with frequencies; the longer input is truncated
    pub fn new(mut times: Vec<f64>, hz: Vec<f64>) -> Self {
        let len = times.len().min(hz.len());
        times.truncate(len);
        let hz = hz
            .into_iter()
            .take(len)
            .map(|f| if f.is_finite() && f > 0.0 { f } else { 0.0 })
            .collect();
        Self { times, hz }
    }

    /// Build a curve whose frame `i` sits at `i * hop_seconds`
    pub fn from_hop(hz: Vec<f64>, hop_seconds: f64) -> Self {
        let times = (0..hz.len()).map(|i| i as f64 * hop_seconds).collect();
        Self::new(times, hz)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn hz(&self) -> &[f64] {
        &self.hz
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Frequencies of voiced frames only
    pub fn voiced_hz(&self) -> impl Iterator<Item = f64> + '_ {
        self.hz.iter().copied().filter(|&f| f > 0.0)
    }

    /// Voiced frequencies whose frame time falls in `[t0, t1)`
    pub fn voiced_hz_between(&self, t0: f64, t1: f64) -> impl Iterator<Item = f64> + '_ {
        self.times
            .iter()
            .zip(&self.hz)
            .filter(move |&(&t, &f)| t >= t0 && t < t1 && f > 0.0)
            .map(|(_, &f)| f)
    }

    /// Copy of the curve with every frequency multiplied by `factor`
    ///
    /// Unvoiced frames stay at 0.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.times.clone(),
            self.hz.iter().map(|f| f * factor).collect(),
        )
    }
}

/// Sorted onset timestamps in seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnsetSet {
    times: Vec<f64>,
}

impl OnsetSet {
    pub fn new(mut times: Vec<f64>) -> Self {
        times.retain(|t| t.is_finite());
        times.sort_by(f64::total_cmp);
        times.dedup();
        Self { times }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Per-frame voiced/unvoiced flags over the new performance
///
/// The detector's hop may differ from the pitch hop. The mask is assumed to
/// span `[0, duration]` evenly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoicedMask {
    flags: Vec<bool>,
}

impl VoicedMask {
    pub fn new(flags: Vec<bool>) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Resample onto `grid` by linear interpolation of the 0/1 signal
    ///
    /// A mask that already has one flag per grid point is returned as is.
    pub fn resample(&self, grid: &[f64], duration: f64) -> Vec<bool> {
        if self.flags.len() == grid.len() {
            return self.flags.clone();
        }
        let mask_times = linspace(0.0, duration, self.flags.len());
        let values: Vec<f64> = self
            .flags
            .iter()
            .map(|&v| if v { 1.0 } else { 0.0 })
            .collect();
        grid.iter()
            .map(|&t| interp(t, &mask_times, &values) > 0.5)
            .collect()
    }
}

/// One correspondence between the new timeline and the reference timeline
///
/// Serialized as a `[new_time, ref_time]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct WarpPoint {
    pub new_time: f64,
    pub ref_time: f64,
}

impl WarpPoint {
    pub fn new(new_time: f64, ref_time: f64) -> Self {
        Self { new_time, ref_time }
    }
}

impl From<(f64, f64)> for WarpPoint {
    fn from((new_time, ref_time): (f64, f64)) -> Self {
        Self { new_time, ref_time }
    }
}

impl From<WarpPoint> for (f64, f64) {
    fn from(p: WarpPoint) -> Self {
        (p.new_time, p.ref_time)
    }
}

/// Target pitch at a point on the new timeline, serialized as `[time, hz]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct PitchPoint {
    pub time: f64,
    pub hz: f64,
}

impl PitchPoint {
    pub fn new(time: f64, hz: f64) -> Self {
        Self { time, hz }
    }
}

impl From<(f64, f64)> for PitchPoint {
    fn from((time, hz): (f64, f64)) -> Self {
        Self { time, hz }
    }
}

impl From<PitchPoint> for (f64, f64) {
    fn from(p: PitchPoint) -> Self {
        (p.time, p.hz)
    }
}

/// Output of the banded aligner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentResult {
    /// At most one point per new frame, non-decreasing in both coordinates
    pub warp_map: Vec<WarpPoint>,
    /// One value in [0, 1] per new frame
    pub confidence_per_frame: Vec<f64>,
}

impl AlignmentResult {
    /// Result used when either performance has no frames
    pub fn empty(new_frames: usize) -> Self {
        Self {
            warp_map: Vec::new(),
            confidence_per_frame: vec![0.0; new_frames],
        }
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.confidence_per_frame.is_empty() {
            return 0.0;
        }
        self.confidence_per_frame.iter().sum::<f64>() / self.confidence_per_frame.len() as f64
    }
}
