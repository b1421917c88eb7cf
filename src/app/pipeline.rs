//! Shared "fit pipeline" logic.
//!
//! Keeps the core workflow in one place:
//! load track table -> filter tracks -> fit every track -> filter fits
//!
//! so the front-end can focus on presentation.

use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::batch::{BatchOptions, BatchOutcome, fit_tracks};
use crate::fit::{SplitDetector, StepFitter};
use crate::io::ingest::{IngestedTracks, filter_tracks, load_tracks};

/// All computed outputs of a single `stepfit fit` run.
#[derive(Debug)]
pub struct RunOutput {
    /// Ingest stats; `tracks` holds every loaded track, before filtering.
    pub ingest: IngestedTracks,
    pub tracks_kept: usize,
    /// Fitted tracks whose summary the property filter rejects are removed from `batch.fits`.
    pub batch: BatchOutcome,
    pub filtered_out: usize,
}

/// Execute the full fitting pipeline, reporting `(done, total)` tracks.
pub fn run_fit(config: &FitConfig, on_progress: &(dyn Fn(usize, usize) + Sync)) -> Result<RunOutput, AppError> {
    let fitter = fitter_from_config(config)?;

    let ingest = load_tracks(&config.input, &config.columns)?;
    log::info!(
        "loaded {} tracks from {} rows ({} row errors)",
        ingest.tracks.len(),
        ingest.rows_read,
        ingest.row_errors.len()
    );

    let kept = filter_tracks(ingest.tracks.clone(), &config.filter)?;
    if kept.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "No tracks to fit in '{}' ({} loaded, none pass the length filter).",
                config.input.display(),
                ingest.tracks.len()
            ),
        ));
    }
    let tracks_kept = kept.len();

    let options = BatchOptions {
        parallel: config.parallel,
        cancel: None,
    };
    let mut batch = fit_tracks(&kept, &fitter, &options, on_progress);

    if batch.fits.is_empty() {
        return Err(match batch.failures.first() {
            Some(failure) => AppError::new(
                4,
                format!("No track could be fitted; track {}: {}", failure.track, failure.error),
            ),
            None => AppError::new(3, "No track has samples to fit."),
        });
    }

    let mut filtered_out = 0;
    if let Some(filter) = &config.property_filter {
        let before = batch.fits.len();
        batch.fits.retain(|f| filter.matches(&f.summary));
        filtered_out = before - batch.fits.len();
        log::info!(
            "property filter on {} kept {} of {before} fitted tracks",
            filter.field.name(),
            batch.fits.len()
        );
        if batch.fits.is_empty() {
            return Err(AppError::new(
                3,
                format!("No fitted track has {} in the requested range.", filter.field.name()),
            ));
        }
    }

    Ok(RunOutput {
        ingest,
        tracks_kept,
        batch,
        filtered_out,
    })
}

fn fitter_from_config(config: &FitConfig) -> Result<StepFitter, AppError> {
    let detector = SplitDetector::new(config.max_step_fraction);
    Ok(StepFitter::with_detector(detector, config.threshold, config.passes)?)
}
