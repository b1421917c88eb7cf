//! Step-detection primitive.
//!
//! A detector looks at one residual signal and proposes a piecewise-constant
//! fit for it. The fitter treats it as a black box behind `StepDetector`.
//!
//! The built-in `SplitDetector` works in three stages:
//!
//! 1. greedy binary segmentation: repeatedly split the plateau whose best split
//!    removes the most chi-square, logging the split order; splitting stops
//!    once the best reduction is within the noise penalty
//! 2. for every step count `k`, compare the chi-square of the `k`-step fit with
//!    that of its counter fit (one step placed at the best split of each
//!    plateau, original steps removed); the ratio is the S-curve
//! 3. keep the first `best_shot` splits, where `best_shot` is the S-curve peak
//!    if it clears `1 + threshold`
//!
//! Unchecked splitting overfits noise, and on noise the S-curve then climbs
//! with `k`. The penalty is `NOISE_PENALTY * sigma^2 * ln(n)`, with `sigma^2`
//! estimated from the median absolute deviation of successive differences, so
//! noise-only splits are never tried and the S-curve peak sits at the genuine
//! steps. Noise-free plateaus give `sigma = 0` and the loop runs until the fit
//! is exact.

use std::collections::BTreeSet;

use crate::error::DetectError;
use crate::fit::segments::{PrefixSums, plateau_fit};

/// Split gains below this fraction of the total chi-square are rounding noise.
const GAIN_TOL: f64 = 1e-12;

/// Same, relative to the uncentered sum of squares (offset-dominated signals).
const SCALE_TOL: f64 = 1e-24;

/// Lower bound of the S-curve denominator, relative to the total chi-square.
const CHI2_FLOOR: f64 = 1e-12;

/// Split gains must exceed this many `sigma^2 * ln(n)` to be tried.
const NOISE_PENALTY: f64 = 4.0;

/// MAD of a unit Gaussian.
const MAD_TO_SIGMA: f64 = 0.674_489_750_196_081_7;

/// Default cap on the number of splits, as a fraction of the sample count.
pub const DEFAULT_MAX_STEP_FRACTION: f64 = 0.25;

/// Result of one detection call.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Piecewise-constant fit of the residual, same length as the input.
    pub fit: Vec<f64>,
    /// S-curve value for `k = 1..=len` steps.
    pub s_curve: Vec<f64>,
    /// Number of steps kept; 0 means no structure worth keeping.
    pub best_shot: usize,
}

pub trait StepDetector {
    fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError>;
}

impl<D: StepDetector + ?Sized> StepDetector for &D {
    fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError> {
        (**self).detect(residual, threshold)
    }
}

/// Binary-segmentation detector scored by counter fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitDetector {
    max_step_fraction: f64,
}

impl Default for SplitDetector {
    fn default() -> Self {
        Self {
            max_step_fraction: DEFAULT_MAX_STEP_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Plateau {
    start: usize,
    end: usize,
    split: Option<(usize, f64)>,
}

impl Plateau {
    fn new(sums: &PrefixSums, start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            split: sums.best_split(start, end),
        }
    }
}

impl SplitDetector {
    pub fn new(max_step_fraction: f64) -> Self {
        Self { max_step_fraction }
    }

    pub fn max_step_fraction(&self) -> f64 {
        self.max_step_fraction
    }

    /// Upper bound on the number of splits tried for `n` samples.
    pub fn max_steps(&self, n: usize) -> usize {
        if n < 2 {
            return 0;
        }
        let fraction = self.max_step_fraction.clamp(0.0, 1.0);
        let steps = (n as f64 * fraction).ceil();
        // NaN casts to 0 and is clamped up with everything else.
        (steps as usize).clamp(1, n - 1)
    }

    /// Run the split loop; returns the split order and the S-curve.
    fn split_and_score(
        &self,
        sums: &PrefixSums,
        n: usize,
        raw_sum_sq: f64,
        penalty: f64,
    ) -> (Vec<usize>, Vec<f64>) {
        let total = sums.chi2(0, n);
        let tol = (GAIN_TOL * total + SCALE_TOL * raw_sum_sq).max(penalty);
        let floor = CHI2_FLOOR * total;
        let max_steps = self.max_steps(n);

        let mut plateaus = vec![Plateau::new(sums, 0, n)];
        let mut counter: BTreeSet<usize> = plateaus.iter().filter_map(|p| p.split.map(|s| s.0)).collect();
        let mut splits = Vec::new();
        let mut s_curve = Vec::new();

        while splits.len() < max_steps {
            // Earliest plateau wins ties.
            let mut pick: Option<(usize, usize, f64)> = None;
            for (i, p) in plateaus.iter().enumerate() {
                if let Some((j, gain)) = p.split {
                    if pick.is_none_or(|(_, _, best)| gain > best) {
                        pick = Some((i, j, gain));
                    }
                }
            }
            let Some((pi, j, gain)) = pick else { break };
            if gain <= tol {
                break;
            }

            let parent = plateaus[pi];
            let left = Plateau::new(sums, parent.start, j);
            let right = Plateau::new(sums, j, parent.end);
            plateaus.splice(pi..=pi, [left, right]);

            counter.remove(&j);
            counter.extend(left.split.map(|s| s.0));
            counter.extend(right.split.map(|s| s.0));

            splits.push(j);

            let fit_chi2: f64 = plateaus.iter().map(|p| sums.chi2(p.start, p.end)).sum();
            let counter_chi2 = chi2_of_bounds(sums, n, &counter);
            s_curve.push(counter_chi2 / fit_chi2.max(floor));
        }

        (splits, s_curve)
    }
}

impl StepDetector for SplitDetector {
    fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError> {
        if let Some(index) = residual.iter().position(|v| !v.is_finite()) {
            return Err(DetectError::NonFinite { index });
        }
        let n = residual.len();
        if n == 0 {
            return Ok(Detection {
                fit: Vec::new(),
                s_curve: Vec::new(),
                best_shot: 0,
            });
        }

        // Unit scale keeps squares finite; centering keeps the prefix sums
        // well conditioned for offset signals. Both leave split order and
        // S-curve unchanged.
        let scale = residual.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let scaled: Vec<f64> = residual.iter().map(|v| v / scale).collect();
        let mean = scaled.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = scaled.iter().map(|v| v - mean).collect();
        let sums = PrefixSums::new(&centered);
        let raw_sum_sq: f64 = scaled.iter().map(|v| v * v).sum();
        let penalty = NOISE_PENALTY * noise_variance(&scaled) * (n.max(2) as f64).ln();

        let (splits, s_curve) = self.split_and_score(&sums, n, raw_sum_sq, penalty);
        let best_shot = pick_best_shot(&s_curve, threshold);

        let mut kept = splits[..best_shot].to_vec();
        kept.sort_unstable();
        let fit = plateau_fit(residual, &kept);

        log::trace!(
            "detect: n={n} splits={} best_shot={best_shot} penalty={penalty:.3e} s_max={:.3}",
            splits.len(),
            s_curve.iter().copied().fold(f64::NAN, f64::max)
        );

        Ok(Detection {
            fit,
            s_curve,
            best_shot,
        })
    }
}

fn chi2_of_bounds(sums: &PrefixSums, n: usize, bounds: &BTreeSet<usize>) -> f64 {
    let mut chi2 = 0.0;
    let mut start = 0;
    for &b in bounds {
        chi2 += sums.chi2(start, b);
        start = b;
    }
    chi2 + sums.chi2(start, n)
}

/// Noise variance from the median absolute deviation of successive
/// differences. Steps move few differences, so they barely shift the
/// estimate. Zero when most differences are equal.
fn noise_variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let center = median(diffs.clone());
    let mad = median(diffs.iter().map(|d| (d - center).abs()).collect());
    let sigma = mad / MAD_TO_SIGMA;
    sigma * sigma / 2.0
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Step count at the S-curve peak, or 0 if the peak stays below `1 + threshold`.
fn pick_best_shot(s_curve: &[f64], threshold: f64) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in s_curve.iter().enumerate() {
        if best.is_none_or(|(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    match best {
        Some((i, s)) if s > 1.0 + threshold => i + 1,
        _ => 0,
    }
}
