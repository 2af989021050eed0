//! Global key offset between two performances

use crate::interp::median;
use crate::types::PitchCurve;

/// Whole-semitone shift that moves `new` into the key of `reference`
///
/// Compares the medians of the voiced frames. Positive means the new
/// performance must be raised. Returns 0 when either curve has no voiced
/// frames.
pub fn detect_key_shift(reference: &PitchCurve, new: &PitchCurve) -> f64 {
    match (median(reference.voiced_hz()), median(new.voiced_hz())) {
        (Some(ref_median), Some(new_median)) if ref_median > 0.0 && new_median > 0.0 => {
            let shift = (12.0 * (ref_median / new_median).log2()).round_ties_even();
            // Avoid handing out -0.0
            if shift == 0.0 { 0.0 } else { shift }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(hz: f64, frames: usize) -> PitchCurve {
        PitchCurve::from_hop(vec![hz; frames], 0.01)
    }

    #[test]
    fn test_minor_third_down() {
        let shift = detect_key_shift(&tone(220.0, 100), &tone(261.6, 100));
        assert!((shift + 3.0).abs() <= 1.0);
        assert_eq!(shift, -3.0);
    }

    #[test]
    fn test_octave_up() {
        assert_eq!(detect_key_shift(&tone(440.0, 50), &tone(220.0, 80)), 12.0);
    }

    #[test]
    fn test_unvoiced_frames_ignored() {
        let mut hz = vec![0.0; 200];
        hz.extend(vec![330.0; 20]);
        let reference = PitchCurve::from_hop(hz, 0.01);
        assert_eq!(detect_key_shift(&reference, &tone(330.0, 10)), 0.0);
    }

    #[test]
    fn test_no_voiced_frames() {
        assert_eq!(detect_key_shift(&tone(0.0, 10), &tone(220.0, 10)), 0.0);
        assert_eq!(detect_key_shift(&tone(220.0, 10), &PitchCurve::default()), 0.0);
    }
}
