//! Step table extraction from a finished fit.

use crate::domain::StepRecord;
use crate::fit::segments::{change_points, plateaus};

/// One `StepRecord` per level change of `fit`, in sample order.
///
/// Levels come from `fit`; the per-step error is the standard error of the
/// level difference estimated from `original` on both adjacent plateaus.
/// `original` and `fit` must have the same length; mismatched inputs give an
/// empty table.
pub fn extract_steps(original: &[f64], fit: &[f64]) -> Vec<StepRecord> {
    if original.len() != fit.len() {
        log::warn!(
            "extract_steps: {} samples but {} fitted levels; no steps reported",
            original.len(),
            fit.len()
        );
        return Vec::new();
    }
    let cps = change_points(fit);
    let bounds = plateaus(fit.len(), &cps);

    bounds
        .windows(2)
        .map(|pair| {
            let (a, b) = pair[0];
            let (c, d) = pair[1];
            let level_before = fit[a];
            let level_after = fit[c];
            StepRecord {
                index: c,
                level_before,
                level_after,
                size: level_after - level_before,
                dwell_before: b - a,
                dwell_after: d - c,
                error: (variance(&original[a..b], level_before) / (b - a) as f64
                    + variance(&original[c..d], level_after) / (d - c) as f64)
                    .sqrt(),
            }
        })
        .collect()
}

fn variance(samples: &[f64], level: f64) -> f64 {
    samples.iter().map(|v| (v - level).powi(2)).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_fit_has_no_steps() {
        assert!(extract_steps(&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]).is_empty());
        assert!(extract_steps(&[], &[]).is_empty());
    }

    #[test]
    fn mismatched_lengths_give_no_steps() {
        assert!(extract_steps(&[1.0], &[1.0, 2.0]).is_empty());
        assert!(extract_steps(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_empty());
    }

    #[test]
    fn records_levels_and_dwells() {
        let original = [10.0, 10.0, 10.0, 4.0, 4.0, 6.0];
        let fit = [10.0, 10.0, 10.0, 4.0, 4.0, 6.0];

        let steps = extract_steps(&original, &fit);
        assert_eq!(steps.len(), 2);

        assert_eq!(steps[0].index, 3);
        assert_eq!(steps[0].level_before, 10.0);
        assert_eq!(steps[0].level_after, 4.0);
        assert_eq!(steps[0].size, -6.0);
        assert_eq!(steps[0].dwell_before, 3);
        assert_eq!(steps[0].dwell_after, 2);
        assert_eq!(steps[0].error, 0.0);

        assert_eq!(steps[1].index, 5);
        assert_eq!(steps[1].size, 2.0);
        assert_eq!(steps[1].dwell_after, 1);
    }

    #[test]
    fn error_reflects_plateau_noise() {
        let original = [1.0, 3.0, 11.0, 9.0];
        let fit = [2.0, 2.0, 10.0, 10.0];

        let steps = extract_steps(&original, &fit);
        assert_eq!(steps.len(), 1);
        // variance 1 on both plateaus, two samples each.
        assert!((steps[0].error - 1.0).abs() < 1e-12);
    }
}
