//! Fitting many tracks.
//!
//! Tracks are independent, so the batch can run them on the rayon pool. The
//! passes inside one track stay sequential. Cancellation is polled before a
//! track starts; a fit that is already running always completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::domain::{Track, TrackFit, TrackSummary};
use crate::error::FitError;
use crate::fit::detector::StepDetector;
use crate::fit::fitter::StepFitter;

/// Shared flag used to stop a batch between tracks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub parallel: bool,
    pub cancel: Option<CancelToken>,
}

/// A track whose fit failed.
#[derive(Debug, Clone)]
pub struct TrackFailure {
    pub track: String,
    pub error: FitError,
}

/// Batch output: fits in input order, plus what did not make it.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub fits: Vec<TrackFit>,
    pub failures: Vec<TrackFailure>,
    /// Tracks without samples.
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

enum Outcome {
    Fit(Box<TrackFit>),
    Failed(TrackFailure),
    Skipped(String),
    Cancelled,
}

/// Fit every track, calling `on_progress(done, total)` after each one.
pub fn fit_tracks<D>(
    tracks: &[Track],
    fitter: &StepFitter<D>,
    options: &BatchOptions,
    on_progress: &(dyn Fn(usize, usize) + Sync),
) -> BatchOutcome
where
    D: StepDetector + Sync,
{
    let total = tracks.len();
    let done = std::sync::atomic::AtomicUsize::new(0);

    let run_one = |track: &Track| -> Outcome {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Outcome::Cancelled;
        }
        let outcome = fit_one(track, fitter);
        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
        on_progress(finished, total);
        outcome
    };

    // Order is preserved by both paths.
    let outcomes: Vec<Outcome> = if options.parallel {
        tracks.par_iter().map(run_one).collect()
    } else {
        tracks.iter().map(run_one).collect()
    };

    let mut batch = BatchOutcome::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Fit(fit) => batch.fits.push(*fit),
            Outcome::Failed(failure) => batch.failures.push(failure),
            Outcome::Skipped(id) => batch.skipped.push(id),
            Outcome::Cancelled => batch.cancelled = true,
        }
    }

    log::info!(
        "batch: {} fitted, {} failed, {} skipped{}",
        batch.fits.len(),
        batch.failures.len(),
        batch.skipped.len(),
        if batch.cancelled { " (cancelled)" } else { "" }
    );

    batch
}

fn fit_one<D: StepDetector>(track: &Track, fitter: &StepFitter<D>) -> Outcome {
    if track.is_empty() {
        log::warn!("track {}: no samples, nothing to fit", track.id);
        return Outcome::Skipped(track.id.clone());
    }

    match fitter.fit_steps(&track.intensity) {
        Ok(fit) => {
            log::debug!("track {}: {} steps over {} frames", track.id, fit.step_count(), track.len());
            let summary = TrackSummary::from_fit(track, &fit);
            Outcome::Fit(Box::new(TrackFit {
                track: track.clone(),
                fit,
                summary,
            }))
        }
        Err(error) => {
            log::warn!("track {}: {error}", track.id);
            Outcome::Failed(TrackFailure {
                track: track.id.clone(),
                error,
            })
        }
    }
}
