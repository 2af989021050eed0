//! Numeric helpers shared by the aligner, generator and renderer

/// Piecewise-linear interpolation of `(xp, fp)` at `x`
///
/// `xp` must be non-decreasing. Queries outside the table clamp to the end
/// values; an empty table yields 0.
pub(crate) fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return 0.0;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    // xp[hi - 1] <= x < xp[hi]
    let hi = xp[..n].partition_point(|&v| v <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span <= 0.0 {
        return fp[lo];
    }
    fp[lo] + (x - xp[lo]) / span * (fp[hi] - fp[lo])
}

/// `n` evenly spaced values over `[start, stop]`, endpoint included
pub(crate) fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            out[n - 1] = stop;
            out
        }
    }
}

/// Median of the values, averaging the two middle values for even counts
pub(crate) fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut v: Vec<f64> = values.into_iter().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}

/// Keep at most `max_n` items picked at evenly spaced indices, first and last included
pub(crate) fn subsample<T: Copy>(items: &[T], max_n: usize) -> Vec<T> {
    if items.len() <= max_n {
        return items.to_vec();
    }
    linspace(0.0, (items.len() - 1) as f64, max_n)
        .into_iter()
        .map(|i| items[(i.round_ties_even() as usize).min(items.len() - 1)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interp_clamps_at_edges() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [10.0, 20.0, 40.0];
        assert_eq!(interp(-1.0, &xp, &fp), 10.0);
        assert_eq!(interp(5.0, &xp, &fp), 40.0);
        assert!((interp(1.5, &xp, &fp) - 30.0).abs() < 1e-12);
        assert_eq!(interp(1.0, &xp, &fp), 20.0);
        assert_eq!(interp(0.5, &[], &[]), 0.0);
    }

    #[test]
    fn test_linspace_includes_endpoint() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 7.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_median() {
        assert_eq!(median([3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median([4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(std::iter::empty()), None);
    }

    #[test]
    fn test_subsample_keeps_ends() {
        let items: Vec<usize> = (0..100).collect();
        let picked = subsample(&items, 20);
        assert_eq!(picked.len(), 20);
        assert_eq!(picked[0], 0);
        assert_eq!(picked[19], 99);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));

        let short = subsample(&items[..5], 20);
        assert_eq!(short, vec![0, 1, 2, 3, 4]);
    }
}
