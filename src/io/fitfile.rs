//! Read/write fit JSON files.
//!
//! The fit file is the portable form of a run: fitter settings plus, per
//! track, the trace, its fit and its step table. `stepfit plot` renders it
//! without refitting. The schema is `domain::FitFile`.

use std::fs::File;
use std::path::Path;

use chrono::Utc;

use crate::domain::{FitFile, FitFileTrack, TrackFit};
use crate::error::AppError;

/// Build the fit file for a set of track fits.
pub fn build_fit_file(fits: &[TrackFit], threshold: f64, passes: usize) -> FitFile {
    FitFile {
        tool: "stepfit".to_string(),
        generated: Utc::now(),
        threshold,
        passes,
        tracks: fits
            .iter()
            .map(|tf| FitFileTrack {
                id: tf.track.id.clone(),
                frames: tf.track.frames.clone(),
                intensity: tf.track.intensity.clone(),
                fit: tf.fit.fit.clone(),
                steps: tf.fit.steps.clone(),
            })
            .collect(),
    }
}

/// Write a fit JSON file.
pub fn write_fit_json(path: &Path, file: &FitFile) -> Result<(), AppError> {
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create fit JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| AppError::new(2, format!("Failed to write fit JSON: {e}")))?;
    Ok(())
}

/// Read a fit JSON file.
pub fn read_fit_json(path: &Path) -> Result<FitFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    let fit: FitFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid fit JSON: {e}")))?;
    if let Some(bad) = fit
        .tracks
        .iter()
        .find(|t| t.fit.len() != t.intensity.len() || t.frames.len() != t.intensity.len())
    {
        return Err(AppError::new(
            2,
            format!("Invalid fit JSON: track '{}' has mismatched series lengths", bad.id),
        ));
    }
    Ok(fit)
}
