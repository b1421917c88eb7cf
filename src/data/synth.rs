//! Synthetic step traces.
//!
//! Piecewise-constant levels with uniform random dwell times and step sizes,
//! plus Gaussian noise. A fixed seed reproduces the same trace.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::StepDirection;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub n_steps: usize,
    pub dwell_min: usize,
    pub dwell_max: usize,
    pub step_min: f64,
    pub step_max: f64,
    /// Level of the first plateau.
    pub baseline: f64,
    pub noise_sigma: f64,
    pub direction: StepDirection,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            n_steps: 4,
            dwell_min: 15,
            dwell_max: 40,
            step_min: 8.0,
            step_max: 15.0,
            baseline: 100.0,
            noise_sigma: 1.0,
            direction: StepDirection::Down,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    pub intensity: Vec<f64>,
    /// Noise-free levels.
    pub truth: Vec<f64>,
    /// Sample indices where the true level changes.
    pub change_points: Vec<usize>,
}

pub fn generate_trace(config: &SynthConfig) -> Result<SyntheticTrace, AppError> {
    if config.dwell_min == 0 || config.dwell_max < config.dwell_min {
        return Err(AppError::new(2, "Invalid dwell range for synthetic trace."));
    }
    if !(config.step_min.is_finite() && config.step_max.is_finite() && config.step_min > 0.0)
        || config.step_max < config.step_min
    {
        return Err(AppError::new(2, "Invalid step size range for synthetic trace."));
    }
    if !(config.noise_sigma.is_finite() && config.noise_sigma >= 0.0) || !config.baseline.is_finite() {
        return Err(AppError::new(2, "Invalid noise or baseline for synthetic trace."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, config.noise_sigma)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let mut truth = Vec::new();
    let mut change_points = Vec::with_capacity(config.n_steps);
    let mut level = config.baseline;

    for plateau in 0..=config.n_steps {
        if plateau > 0 {
            let size = rng.gen_range(config.step_min..=config.step_max);
            let sign = match config.direction {
                StepDirection::Down => -1.0,
                StepDirection::Up => 1.0,
                StepDirection::Mixed => {
                    if rng.gen_bool(0.5) {
                        1.0
                    } else {
                        -1.0
                    }
                }
            };
            level += sign * size;
            change_points.push(truth.len());
        }
        let dwell = rng.gen_range(config.dwell_min..=config.dwell_max);
        truth.extend(std::iter::repeat_n(level, dwell));
    }

    let intensity = truth.iter().map(|&v| v + noise.sample(&mut rng)).collect();

    Ok(SyntheticTrace {
        intensity,
        truth,
        change_points,
    })
}
