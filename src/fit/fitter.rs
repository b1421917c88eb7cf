//! Iterative residual step fitting.
//!
//! Given an intensity trace `x`, we:
//! - start from an all-zero fit
//! - on each pass, detect steps in the residual `x - fit`
//! - merge the detected structure into the accumulated fit
//!
//! and after a fixed number of passes extract the step table from the final
//! fit. One detection pass tends to capture only the dominant transitions;
//! weaker ones surface in the residual on later passes. The pass count is
//! fixed, so steps that need more than `passes` refinements stay unresolved.

use crate::domain::{DEFAULT_PASSES, DEFAULT_THRESHOLD, PassRecord, StepFit};
use crate::error::FitError;
use crate::fit::detector::{SplitDetector, StepDetector};
use crate::fit::segments::append_fit;
use crate::fit::steps::extract_steps;

/// Residual samples below this fraction of the largest absolute intensity
/// are rounding error and are zeroed before detection.
const ROUNDING_FLOOR: f64 = 1e-12;

/// Step fitter over a pluggable detection primitive.
#[derive(Debug, Clone)]
pub struct StepFitter<D = SplitDetector> {
    detector: D,
    threshold: f64,
    passes: usize,
}

impl Default for StepFitter<SplitDetector> {
    fn default() -> Self {
        Self {
            detector: SplitDetector::default(),
            threshold: DEFAULT_THRESHOLD,
            passes: DEFAULT_PASSES,
        }
    }
}

impl StepFitter<SplitDetector> {
    pub fn new(threshold: f64, passes: usize) -> Result<Self, FitError> {
        Self::with_detector(SplitDetector::default(), threshold, passes)
    }
}

impl<D: StepDetector> StepFitter<D> {
    pub fn with_detector(detector: D, threshold: f64, passes: usize) -> Result<Self, FitError> {
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(FitError::InvalidThreshold(threshold));
        }
        if passes == 0 {
            return Err(FitError::ZeroPasses);
        }
        Ok(Self {
            detector,
            threshold,
            passes,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Fit a step function to `intensity`.
    ///
    /// An empty trace yields `StepFit::empty()` without calling the detector.
    pub fn fit_steps(&self, intensity: &[f64]) -> Result<StepFit, FitError> {
        if intensity.is_empty() {
            return Ok(StepFit::empty());
        }
        if let Some(index) = intensity.iter().position(|v| !v.is_finite()) {
            return Err(FitError::NonFinite { index });
        }

        let n = intensity.len();
        let scale = intensity.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let floor = ROUNDING_FLOOR * scale;

        let mut fit = vec![0.0; n];
        let mut history = Vec::new();

        for pass in 1..=self.passes {
            let residual: Vec<f64> = intensity
                .iter()
                .zip(&fit)
                .map(|(x, f)| {
                    let r = x - f;
                    if r.abs() <= floor { 0.0 } else { r }
                })
                .collect();

            let detection = self
                .detector
                .detect(&residual, self.threshold)
                .map_err(|source| FitError::Detection { pass, source })?;

            if detection.fit.len() != n {
                return Err(FitError::LengthMismatch {
                    pass,
                    expected: n,
                    actual: detection.fit.len(),
                });
            }

            // Every pass is merged; best_shot only decides what goes into the history.
            fit = append_fit(&detection.fit, &fit, intensity);

            log::debug!(
                "pass {pass}/{}: best_shot={} s_curve_len={}",
                self.passes,
                detection.best_shot,
                detection.s_curve.len()
            );

            if pass == 1 || detection.best_shot > 0 {
                history.push(PassRecord {
                    pass,
                    fit: fit.clone(),
                    s_curve: detection.s_curve,
                    best_shot: detection.best_shot,
                });
            }
        }

        let steps = extract_steps(intensity, &fit);
        Ok(StepFit {
            fit,
            steps,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use approx::assert_relative_eq;

    use super::*;
    use crate::error::DetectError;
    use crate::fit::detector::Detection;
    use crate::fit::segments::{change_points, plateau_fit};

    /// Counts calls and proposes no structure.
    #[derive(Default)]
    struct CountingDetector {
        calls: Cell<usize>,
    }

    impl StepDetector for CountingDetector {
        fn detect(&self, residual: &[f64], _threshold: f64) -> Result<Detection, DetectError> {
            self.calls.set(self.calls.get() + 1);
            Ok(Detection {
                fit: plateau_fit(residual, &[]),
                s_curve: Vec::new(),
                best_shot: 0,
            })
        }
    }

    struct FailingDetector {
        fail_on: usize,
        calls: Cell<usize>,
    }

    impl StepDetector for FailingDetector {
        fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if call == self.fail_on {
                return Err(DetectError::NotConverged("stalled".to_string()));
            }
            SplitDetector::default().detect(residual, threshold)
        }
    }

    struct ShortDetector;

    impl StepDetector for ShortDetector {
        fn detect(&self, residual: &[f64], _threshold: f64) -> Result<Detection, DetectError> {
            Ok(Detection {
                fit: vec![0.0; residual.len().saturating_sub(1)],
                s_curve: Vec::new(),
                best_shot: 0,
            })
        }
    }

    /// Reports scripted best shots and records the residuals it was given.
    struct ScriptedDetector {
        best_shots: Vec<usize>,
        seen: RefCell<Vec<Vec<f64>>>,
    }

    impl StepDetector for ScriptedDetector {
        fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError> {
            let call = self.seen.borrow().len();
            self.seen.borrow_mut().push(residual.to_vec());
            let mut det = SplitDetector::default().detect(residual, threshold)?;
            det.best_shot = self.best_shots[call];
            Ok(det)
        }
    }

    fn resolved(fit: &[f64], truth: &[usize]) -> usize {
        change_points(fit).iter().filter(|cp| truth.contains(cp)).count()
    }

    #[test]
    fn rejects_invalid_settings() {
        assert_eq!(StepFitter::new(0.1, 0).unwrap_err(), FitError::ZeroPasses);
        assert!(matches!(
            StepFitter::new(-1.0, 3).unwrap_err(),
            FitError::InvalidThreshold(_)
        ));
        assert!(StepFitter::new(f64::NAN, 3).is_err());
    }

    #[test]
    fn empty_input_skips_detection() {
        let detector = CountingDetector::default();
        let fitter = StepFitter::with_detector(&detector, 0.1, 3).unwrap();

        let out = fitter.fit_steps(&[]).unwrap();
        assert!(out.is_empty());
        assert!(out.steps.is_empty());
        assert_eq!(detector.calls.get(), 0);
    }

    #[test]
    fn calls_detector_once_per_pass() {
        let detector = CountingDetector::default();
        let fitter = StepFitter::with_detector(&detector, 0.1, 3).unwrap();
        fitter.fit_steps(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(detector.calls.get(), 3);
    }

    #[test]
    fn flat_trace_is_a_fixed_point() {
        for passes in 1..=4 {
            let fitter = StepFitter::new(0.1, passes).unwrap();
            let out = fitter.fit_steps(&[4.0; 9]).unwrap();
            assert_eq!(out.fit, vec![4.0; 9]);
            assert!(out.steps.is_empty());

            let out = fitter.fit_steps(&[0.1; 7]).unwrap();
            for v in &out.fit {
                assert_relative_eq!(*v, 0.1, max_relative = 1e-12);
            }
            assert!(out.steps.is_empty());
        }
    }

    #[test]
    fn recovers_single_step() {
        let fitter = StepFitter::default();
        let out = fitter.fit_steps(&[0.0, 0.0, 0.0, 10.0, 10.0, 10.0]).unwrap();

        assert_eq!(out.fit.len(), 6);
        assert_eq!(change_points(&out.fit), vec![3]);
        assert_eq!(out.step_count(), 1);
        assert_eq!(out.steps[0].index, 3);
        assert_relative_eq!(out.steps[0].size, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn more_passes_never_lose_transitions() {
        let x = [0.0, 0.0, 5.0, 5.0, 5.0, 12.0, 12.0];
        let truth = [2, 5];

        let one = StepFitter::new(0.1, 1).unwrap().fit_steps(&x).unwrap();
        let three = StepFitter::new(0.1, 3).unwrap().fit_steps(&x).unwrap();

        assert!(resolved(&three.fit, &truth) >= resolved(&one.fit, &truth));
        assert_eq!(resolved(&three.fit, &truth), 2);
        assert_eq!(three.step_count(), 2);
    }

    fn noisy(levels: &[(f64, usize)], sigma: f64, seed: u64) -> Vec<f64> {
        use rand::prelude::*;
        use rand_distr::Normal;

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, sigma).unwrap();
        levels
            .iter()
            .flat_map(|&(level, dwell)| std::iter::repeat_n(level, dwell))
            .map(|v| v + noise.sample(&mut rng))
            .collect()
    }

    #[test]
    fn pure_noise_stays_flat_over_passes() {
        for seed in [2, 21, 64] {
            let x = noisy(&[(50.0, 200)], 2.0, seed);
            for passes in [1, 3] {
                let out = StepFitter::new(0.1, passes).unwrap().fit_steps(&x).unwrap();
                assert_eq!(out.step_count(), 0, "seed {seed}, {passes} passes");
            }
        }
    }

    #[test]
    fn noisy_levels_resolve_monotonically() {
        let x = noisy(&[(0.0, 40), (5.0, 40), (12.0, 40)], 0.5, 8);
        let near = |fit: &[f64]| {
            change_points(fit)
                .iter()
                .filter(|cp| cp.abs_diff(40) <= 1 || cp.abs_diff(80) <= 1)
                .count()
        };

        let mut last = 0;
        for passes in 1..=3 {
            let out = StepFitter::new(0.1, passes).unwrap().fit_steps(&x).unwrap();
            let found = near(&out.fit);
            assert!(found >= last, "{passes} passes lost a transition");
            last = found;
            if passes == 3 {
                assert_eq!(out.step_count(), 2, "{:?}", change_points(&out.fit));
            }
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn huge_levels_fit_without_overflow() {
        let x = [1e300, 1e300, -1e300, -1e300];
        let out = StepFitter::default().fit_steps(&x).unwrap();
        assert_eq!(change_points(&out.fit), vec![2]);
        assert_eq!(out.steps.len(), 1);
        assert!(out.steps[0].size.is_finite());
        assert_relative_eq!(out.steps[0].size, -2e300);
    }

    #[test]
    fn fit_length_matches_every_pass() {
        let x = [3.0, 3.2, 2.9, 8.0, 8.1, 7.9, 8.0, 1.0, 1.1, 0.9];
        let out = StepFitter::default().fit_steps(&x).unwrap();
        assert_eq!(out.fit.len(), x.len());
        for record in &out.history {
            assert_eq!(record.fit.len(), x.len());
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let x: Vec<f64> = (0..60)
            .map(|i| {
                let level = if i < 20 { 30.0 } else if i < 45 { 18.0 } else { 5.0 };
                level + ((i * 37 % 11) as f64 - 5.0) * 0.3
            })
            .collect();
        let fitter = StepFitter::default();
        let a = fitter.fit_steps(&x).unwrap();
        let b = fitter.fit_steps(&x).unwrap();

        let bits = |v: &[f64]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a.fit), bits(&b.fit));
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn detection_failure_names_the_pass() {
        let detector = FailingDetector {
            fail_on: 2,
            calls: Cell::new(0),
        };
        let fitter = StepFitter::with_detector(&detector, 0.1, 3).unwrap();

        let err = fitter.fit_steps(&[0.0, 0.0, 4.0, 4.0]).unwrap_err();
        match err {
            FitError::Detection { pass, source } => {
                assert_eq!(pass, 2);
                assert_eq!(source, DetectError::NotConverged("stalled".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(detector.calls.get(), 2);
    }

    #[test]
    fn short_candidate_is_an_internal_fault() {
        let fitter = StepFitter::with_detector(ShortDetector, 0.1, 3).unwrap();
        let err = fitter.fit_steps(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            FitError::LengthMismatch {
                pass: 1,
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn non_finite_intensity_is_rejected() {
        let err = StepFitter::default()
            .fit_steps(&[1.0, 2.0, f64::INFINITY])
            .unwrap_err();
        assert_eq!(err, FitError::NonFinite { index: 2 });
    }

    #[test]
    fn history_keeps_first_and_productive_passes() {
        let detector = ScriptedDetector {
            best_shots: vec![1, 0, 2],
            seen: RefCell::new(Vec::new()),
        };
        let fitter = StepFitter::with_detector(&detector, 0.1, 3).unwrap();
        let out = fitter.fit_steps(&[0.0, 0.0, 0.0, 10.0, 10.0, 10.0]).unwrap();

        let passes: Vec<usize> = out.history.iter().map(|r| r.pass).collect();
        assert_eq!(passes, vec![1, 3]);

        // Pass 2 and 3 work on the exact residual of pass 1.
        let seen = detector.seen.borrow();
        assert_eq!(seen[0], vec![0.0, 0.0, 0.0, 10.0, 10.0, 10.0]);
        assert_eq!(seen[1], vec![0.0; 6]);
    }

    #[test]
    fn second_pass_resolves_structure_left_in_residual() {
        // The scripted first pass keeps only the fit of its dominant step.
        struct FirstStepOnly {
            calls: Cell<usize>,
        }
        impl StepDetector for FirstStepOnly {
            fn detect(&self, residual: &[f64], threshold: f64) -> Result<Detection, DetectError> {
                let call = self.calls.get();
                self.calls.set(call + 1);
                let det = SplitDetector::default().detect(residual, threshold)?;
                if call > 0 {
                    return Ok(det);
                }
                let cps = change_points(&det.fit);
                let dominant = cps.iter().copied().max_by(|a, b| {
                    let jump = |i: usize| (det.fit[i] - det.fit[i - 1]).abs();
                    jump(*a).total_cmp(&jump(*b))
                });
                Ok(Detection {
                    fit: plateau_fit(residual, &dominant.into_iter().collect::<Vec<_>>()),
                    s_curve: det.s_curve,
                    best_shot: 1,
                })
            }
        }

        let x = [0.0, 0.0, 5.0, 5.0, 5.0, 12.0, 12.0];
        let detector = FirstStepOnly { calls: Cell::new(0) };

        let one = StepFitter::with_detector(&detector, 0.1, 1).unwrap().fit_steps(&x).unwrap();
        assert_eq!(change_points(&one.fit), vec![5]);

        detector.calls.set(0);
        let three = StepFitter::with_detector(&detector, 0.1, 3).unwrap().fit_steps(&x).unwrap();
        assert_eq!(change_points(&three.fit), vec![2, 5]);
        assert_eq!(three.fit, x.to_vec());
    }
}
