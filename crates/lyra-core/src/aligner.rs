//! Banded dynamic time warping between a reference and a new performance
//!
//! The cost table is restricted to a corridor around the slope-adjusted
//! diagonal, so time and memory grow with `frames * band_width` instead of
//! `n_ref * n_new`. Only two rows of cumulative cost are kept; the backtrace
//! uses one byte per banded cell.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{build_features, FeatureFrame};
use crate::types::{AlignmentResult, OnsetSet, PitchCurve, WarpPoint};

/// Minimum band half-width and truncation margin, in frames
const MIN_BAND_FRAMES: usize = 10;

const EPSILON: f64 = 1e-8;

/// Tunable alignment parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentParams {
    /// Band half-width as a fraction of the longer sequence, clamped to [0, 1]
    pub band_radius: f64,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self { band_radius: 0.1 }
    }
}

/// Backtrace moves
const DIAGONAL: u8 = 0;
const VERTICAL: u8 = 1;
const HORIZONTAL: u8 = 2;

/// One cell of the optimal path: new frame `i`, reference frame `j`
#[derive(Debug, Clone, Copy, PartialEq)]
struct PathStep {
    i: usize,
    j: usize,
    cost: f64,
}

/// Align the new performance onto the reference
///
/// Both performances are assumed to start together at t = 0. A reference
/// much longer than the new take is truncated to the new length plus a
/// margin before the band is laid out.
pub fn align(
    reference: &PitchCurve,
    reference_onsets: &OnsetSet,
    new: &PitchCurve,
    new_onsets: &OnsetSet,
    params: &AlignmentParams,
) -> AlignmentResult {
    let ref_feats = build_features(reference, reference_onsets);
    let new_feats = build_features(new, new_onsets);
    let n_new = new_feats.len();
    if n_new == 0 || ref_feats.is_empty() {
        debug!(n_ref = ref_feats.len(), n_new, "empty sequence, skipping alignment");
        return AlignmentResult::empty(n_new);
    }

    let band = if params.band_radius.is_finite() {
        params.band_radius.clamp(0.0, 1.0)
    } else {
        AlignmentParams::default().band_radius
    };

    let margin = MIN_BAND_FRAMES.max((band * n_new as f64).floor() as usize);
    let n_ref = ref_feats.len().min(n_new + margin);
    if n_ref < ref_feats.len() {
        debug!(
            from = ref_feats.len(),
            to = n_ref,
            "truncating reference to the head of the new performance"
        );
    }
    let ref_feats = &ref_feats[..n_ref];
    let ref_times = &reference.times()[..n_ref];

    let window = MIN_BAND_FRAMES.max((band * n_ref.max(n_new) as f64).floor() as usize);
    let path = banded_dtw(&new_feats, ref_feats, window);
    debug!(n_ref, n_new, window, path_len = path.len(), "banded alignment complete");

    let mut warp_map = Vec::with_capacity(n_new);
    let mut last_i = None;
    for step in &path {
        if last_i != Some(step.i) {
            warp_map.push(WarpPoint::new(new.times()[step.i], ref_times[step.j]));
            last_i = Some(step.i);
        }
    }

    let max_cost = path.iter().map(|s| s.cost).fold(0.0, f64::max);
    let mut confidence_per_frame = vec![0.0; n_new];
    for step in &path {
        let c = (1.0 - step.cost / (max_cost + EPSILON)).clamp(0.0, 1.0);
        if c > confidence_per_frame[step.i] {
            confidence_per_frame[step.i] = c;
        }
    }

    AlignmentResult {
        warp_map,
        confidence_per_frame,
    }
}

/// Inclusive column range `[lo, hi]` of the band for each row
fn band_ranges(n_rows: usize, n_cols: usize, window: usize) -> Vec<(usize, usize)> {
    let slope = if n_rows > 1 {
        (n_cols - 1) as f64 / (n_rows - 1) as f64
    } else {
        (n_cols - 1) as f64
    };
    // A band narrower than the slope could leave rows disconnected
    let half = (window as f64).max(slope.ceil());
    let last_col = (n_cols - 1) as f64;

    let mut ranges: Vec<(usize, usize)> = (0..n_rows)
        .map(|i| {
            let centre = i as f64 * slope;
            let lo = (centre - half).floor().clamp(0.0, last_col) as usize;
            let hi = (centre + half).ceil().clamp(0.0, last_col) as usize;
            (lo, hi)
        })
        .collect();
    ranges[0].0 = 0;
    ranges[n_rows - 1].1 = n_cols - 1;
    ranges
}

/// Symmetric step pattern DTW within the band; returns the path from (0, 0)
fn banded_dtw(rows: &[FeatureFrame], cols: &[FeatureFrame], window: usize) -> Vec<PathStep> {
    let n = rows.len();
    let m = cols.len();
    let ranges = band_ranges(n, m, window);

    let mut offsets = Vec::with_capacity(n);
    let mut total = 0usize;
    for &(lo, hi) in &ranges {
        offsets.push(total);
        total += hi - lo + 1;
    }
    let mut bp = vec![DIAGONAL; total];

    let mut prev: Vec<f64> = Vec::new();
    let mut prev_range = (0usize, 0usize);

    for i in 0..n {
        let (lo, hi) = ranges[i];
        let mut curr = vec![f64::INFINITY; hi - lo + 1];
        let prev_cost = |j: usize| -> f64 {
            if i == 0 || j < prev_range.0 || j > prev_range.1 {
                f64::INFINITY
            } else {
                prev[j - prev_range.0]
            }
        };

        for j in lo..=hi {
            let d = rows[i].distance(&cols[j]);
            if i == 0 && j == 0 {
                curr[0] = d;
                continue;
            }

            let diag = if j > 0 { prev_cost(j - 1) + 2.0 * d } else { f64::INFINITY };
            let vert = prev_cost(j) + d;
            let horiz = if j > lo { curr[j - 1 - lo] + d } else { f64::INFINITY };

            let (best, mv) = if diag <= vert && diag <= horiz {
                (diag, DIAGONAL)
            } else if vert <= horiz {
                (vert, VERTICAL)
            } else {
                (horiz, HORIZONTAL)
            };
            curr[j - lo] = best;
            bp[offsets[i] + (j - lo)] = mv;
        }

        prev = curr;
        prev_range = (lo, hi);
    }

    let mut path = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n - 1, m - 1);
    loop {
        path.push(PathStep {
            i,
            j,
            cost: rows[i].distance(&cols[j]),
        });
        if i == 0 && j == 0 {
            break;
        }
        if i == 0 {
            j -= 1;
            continue;
        }
        if j == 0 {
            i -= 1;
            continue;
        }
        match bp[offsets[i] + (j - ranges[i].0)] {
            DIAGONAL => {
                i -= 1;
                j -= 1;
            }
            VERTICAL => i -= 1,
            _ => j -= 1,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: f64 = 0.01;

    /// Twelve distinct quarter-second notes
    fn melody_hz(t: f64) -> f64 {
        let note = ((t / 0.25).floor() as i64).clamp(0, 11);
        220.0 * 2f64.powf(((note * 5) % 12) as f64 / 12.0)
    }

    fn melody(frames: usize, delay: f64) -> (PitchCurve, OnsetSet) {
        let hz = (0..frames)
            .map(|i| {
                let t = i as f64 * HOP - delay;
                if t < 0.0 { 0.0 } else { melody_hz(t) }
            })
            .collect();
        let onsets = (0..12).map(|k| k as f64 * 0.25 + delay).collect();
        (PitchCurve::from_hop(hz, HOP), OnsetSet::new(onsets))
    }

    fn is_monotonic(map: &[WarpPoint]) -> bool {
        map.windows(2)
            .all(|w| w[1].new_time > w[0].new_time && w[1].ref_time >= w[0].ref_time)
    }

    #[test]
    fn test_identity_alignment() {
        let (curve, onsets) = melody(300, 0.0);
        let result = align(&curve, &onsets, &curve, &onsets, &AlignmentParams::default());

        assert_eq!(result.warp_map.len(), 300);
        assert_eq!(result.confidence_per_frame.len(), 300);
        let mean_err = result
            .warp_map
            .iter()
            .map(|p| (p.new_time - p.ref_time).abs())
            .sum::<f64>()
            / result.warp_map.len() as f64;
        assert!(mean_err < 0.5, "mean error {mean_err}");
        assert!(mean_err < 1e-9);
        assert!(result.confidence_per_frame.iter().all(|&c| (c - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_delayed_take_is_recovered() {
        let (reference, ref_onsets) = melody(300, 0.0);
        let (late, late_onsets) = melody(300, 0.2);
        let result = align(&reference, &ref_onsets, &late, &late_onsets, &AlignmentParams::default());

        assert!(is_monotonic(&result.warp_map));
        let middle: Vec<f64> = result
            .warp_map
            .iter()
            .filter(|p| p.new_time >= 0.5 && p.new_time < 2.5)
            .map(|p| (p.ref_time - (p.new_time - 0.2)).abs())
            .collect();
        let mean_err = middle.iter().sum::<f64>() / middle.len() as f64;
        assert!(mean_err < 0.06, "mean error {mean_err}");
    }

    #[test]
    fn test_warp_map_monotonic_and_confidence_bounded() {
        let ref_hz: Vec<f64> = (0..400)
            .map(|i| 200.0 + 80.0 * (i as f64 * 0.07).sin())
            .collect();
        let new_hz: Vec<f64> = (0..250)
            .map(|i| if i % 17 == 0 { 0.0 } else { 210.0 + 60.0 * (i as f64 * 0.11).cos() })
            .collect();
        let reference = PitchCurve::from_hop(ref_hz, HOP);
        let new = PitchCurve::from_hop(new_hz, HOP);
        let result = align(
            &reference,
            &OnsetSet::new(vec![0.3, 1.1, 2.0]),
            &new,
            &OnsetSet::new(vec![0.5, 1.4]),
            &AlignmentParams { band_radius: 0.05 },
        );

        assert_eq!(result.warp_map.len(), 250);
        assert!(is_monotonic(&result.warp_map));
        assert!(result
            .confidence_per_frame
            .iter()
            .all(|&c| (0.0..=1.0).contains(&c)));
        assert_eq!(result.warp_map[0].ref_time, 0.0);
    }

    #[test]
    fn test_long_reference_is_truncated_to_head() {
        let (new, new_onsets) = melody(100, 0.0);
        let (reference, ref_onsets) = melody(1000, 0.0);
        let result = align(&reference, &ref_onsets, &new, &new_onsets, &AlignmentParams::default());

        // n_new + max(10, 0.1 * n_new) frames survive truncation
        let last = result.warp_map.last().map(|p| p.ref_time).unwrap_or_default();
        assert!(last <= 109.0 * HOP + 1e-9, "last ref time {last}");
        assert!(is_monotonic(&result.warp_map));
    }

    #[test]
    fn test_empty_sequences() {
        let (curve, onsets) = melody(50, 0.0);
        let empty = PitchCurve::default();

        let result = align(&empty, &OnsetSet::default(), &curve, &onsets, &AlignmentParams::default());
        assert!(result.warp_map.is_empty());
        assert_eq!(result.confidence_per_frame, vec![0.0; 50]);

        let result = align(&curve, &onsets, &empty, &OnsetSet::default(), &AlignmentParams::default());
        assert!(result.warp_map.is_empty());
        assert!(result.confidence_per_frame.is_empty());
    }

    #[test]
    fn test_single_frame_new_take() {
        let (reference, onsets) = melody(40, 0.0);
        let new = PitchCurve::from_hop(vec![220.0], HOP);
        let result = align(&reference, &onsets, &new, &OnsetSet::default(), &AlignmentParams::default());
        assert_eq!(result.warp_map.len(), 1);
        assert_eq!(result.warp_map[0], WarpPoint::new(0.0, 0.0));
    }

    #[test]
    fn test_oversized_band_radius_is_clamped() {
        let (new, new_onsets) = melody(60, 0.0);
        let (reference, ref_onsets) = melody(200, 0.0);
        let huge = align(&reference, &ref_onsets, &new, &new_onsets, &AlignmentParams { band_radius: 1e30 });
        let full = align(&reference, &ref_onsets, &new, &new_onsets, &AlignmentParams { band_radius: 1.0 });
        assert_eq!(huge, full);
        assert_eq!(huge.warp_map.len(), 60);
    }

    #[test]
    fn test_band_rows_connect() {
        let ranges = band_ranges(50, 400, 10);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges[49].1, 399);
        for w in ranges.windows(2) {
            assert!(w[1].0 >= w[0].0);
            assert!(w[1].0 <= w[0].1 + 1);
        }
    }
}
