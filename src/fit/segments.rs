//! Plateau bookkeeping shared by the detector, the fit merge and step extraction.
//!
//! A piecewise-constant fit is described by its change points: the sample
//! indices `i` (in `1..n`) where `fit[i] != fit[i - 1]`. Plateau levels are
//! always the mean of the underlying samples over each plateau.

/// Prefix sums for O(1) plateau statistics over `[a, b)`.
#[derive(Debug, Clone)]
pub(crate) struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    pub(crate) fn new(x: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(x.len() + 1);
        let mut sum_sq = Vec::with_capacity(x.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        let (mut s, mut ss) = (0.0, 0.0);
        for &v in x {
            s += v;
            ss += v * v;
            sum.push(s);
            sum_sq.push(ss);
        }
        Self { sum, sum_sq }
    }

    pub(crate) fn sum(&self, a: usize, b: usize) -> f64 {
        self.sum[b] - self.sum[a]
    }

    /// Sum of squared deviations from the plateau mean.
    pub(crate) fn chi2(&self, a: usize, b: usize) -> f64 {
        if b <= a {
            return 0.0;
        }
        let n = (b - a) as f64;
        let s = self.sum(a, b);
        (self.sum_sq[b] - self.sum_sq[a] - s * s / n).max(0.0)
    }

    /// Best single split of plateau `[a, b)`.
    ///
    /// Returns `(index, chi2 reduction)`; ties go to the earliest index.
    /// Plateaus shorter than two samples cannot be split.
    pub(crate) fn best_split(&self, a: usize, b: usize) -> Option<(usize, f64)> {
        if b < a + 2 {
            return None;
        }
        let total = self.sum(a, b);
        let n = (b - a) as f64;
        let base = total * total / n;

        let mut best: Option<(usize, f64)> = None;
        for j in a + 1..b {
            let nl = (j - a) as f64;
            let nr = (b - j) as f64;
            let sl = self.sum(a, j);
            let sr = total - sl;
            let gain = (sl * sl / nl + sr * sr / nr - base).max(0.0);
            match best {
                Some((_, g)) if gain <= g => {}
                _ => best = Some((j, gain)),
            }
        }
        best
    }
}

/// Indices where a piecewise-constant sequence changes level.
pub fn change_points(fit: &[f64]) -> Vec<usize> {
    (1..fit.len()).filter(|&i| fit[i] != fit[i - 1]).collect()
}

/// Plateau-mean fit of `data` for sorted, deduplicated change points.
pub fn plateau_fit(data: &[f64], change_points: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    for (a, b) in plateaus(data.len(), change_points) {
        let seg = &data[a..b];
        let level = seg.iter().sum::<f64>() / seg.len() as f64;
        out.extend(std::iter::repeat_n(level, seg.len()));
    }
    out
}

/// Plateau bounds `[a, b)` of an `n`-sample sequence split at `change_points`.
pub(crate) fn plateaus(n: usize, change_points: &[usize]) -> Vec<(usize, usize)> {
    if n == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(change_points.len() + 1);
    let mut start = 0;
    for &cp in change_points {
        if cp > start && cp < n {
            out.push((start, cp));
            start = cp;
        }
    }
    out.push((start, n));
    out
}

/// Merge a residual fit into the accumulated fit.
///
/// The merged fit keeps every change point of both inputs and re-levels each
/// resulting plateau to the mean of `original`. All three slices must have
/// the same length; the output has `original.len()` samples.
pub fn append_fit(candidate: &[f64], accumulated: &[f64], original: &[f64]) -> Vec<f64> {
    debug_assert_eq!(candidate.len(), original.len());
    debug_assert_eq!(accumulated.len(), original.len());

    let mut merged = change_points(candidate);
    merged.extend(change_points(accumulated));
    merged.sort_unstable();
    merged.dedup();

    plateau_fit(original, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_points_of_stairs() {
        assert_eq!(change_points(&[1.0, 1.0, 2.0, 2.0, 0.5]), vec![2, 4]);
        assert!(change_points(&[3.0; 5]).is_empty());
        assert!(change_points(&[]).is_empty());
    }

    #[test]
    fn plateau_fit_uses_means() {
        let data = [1.0, 3.0, 10.0, 12.0, 11.0];
        assert_eq!(plateau_fit(&data, &[2]), vec![2.0, 2.0, 11.0, 11.0, 11.0]);
        assert_eq!(plateau_fit(&data, &[]), vec![7.4; 5]);
    }

    #[test]
    fn best_split_finds_level_change() {
        let sums = PrefixSums::new(&[0.0, 0.0, 0.0, 4.0, 4.0]);
        let (idx, gain) = sums.best_split(0, 5).unwrap();
        assert_eq!(idx, 3);
        // chi2 of the whole plateau; both halves are flat.
        assert!((gain - sums.chi2(0, 5)).abs() < 1e-9);
        assert!(sums.best_split(2, 3).is_none());
    }

    #[test]
    fn append_fit_unions_change_points() {
        let original = [0.0, 0.0, 5.0, 5.0, 9.0, 9.0];
        let accumulated = [2.5, 2.5, 2.5, 2.5, 9.0, 9.0];
        let candidate = [-2.5, -2.5, 2.5, 2.5, 0.0, 0.0];

        let merged = append_fit(&candidate, &accumulated, &original);
        assert_eq!(merged, original.to_vec());
    }

    #[test]
    fn append_fit_of_flat_inputs_is_the_mean() {
        let original = [4.0, 4.0, 4.0];
        let merged = append_fit(&[0.0; 3], &[0.0; 3], &original);
        assert_eq!(merged, vec![4.0; 3]);
    }
}
