//! Export step tables, track summaries and per-frame fits to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets, pandas or
//! downstream scripts. Frame numbers are the input frames, not sample indices.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::domain::TrackFit;
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct StepRow<'a> {
    track: &'a str,
    index: usize,
    frame: i64,
    level_before: f64,
    level_after: f64,
    step: f64,
    dwell_before: usize,
    dwell_after: usize,
    error: f64,
}

#[derive(Debug, Serialize)]
struct FitRow<'a> {
    track: &'a str,
    frame: i64,
    intensity: f64,
    fit: f64,
}

/// Write one row per detected step.
pub fn write_steps_csv(path: &Path, fits: &[TrackFit]) -> Result<(), AppError> {
    let mut writer = create_writer(path, "steps")?;
    for tf in fits {
        for s in &tf.fit.steps {
            let row = StepRow {
                track: &tf.track.id,
                index: s.index,
                frame: tf.track.frames.get(s.index).copied().unwrap_or(s.index as i64),
                level_before: s.level_before,
                level_after: s.level_after,
                step: s.size,
                dwell_before: s.dwell_before,
                dwell_after: s.dwell_after,
                error: s.error,
            };
            writer
                .serialize(row)
                .map_err(|e| AppError::new(2, format!("Failed to write steps CSV row: {e}")))?;
        }
    }
    finish(writer, "steps")
}

/// Write the per-track meta table.
pub fn write_summary_csv(path: &Path, fits: &[TrackFit]) -> Result<(), AppError> {
    let mut writer = create_writer(path, "summary")?;
    for tf in fits {
        writer
            .serialize(&tf.summary)
            .map_err(|e| AppError::new(2, format!("Failed to write summary CSV row: {e}")))?;
    }
    finish(writer, "summary")
}

/// Write trace and fit side by side, one row per frame.
pub fn write_fit_csv(path: &Path, fits: &[TrackFit]) -> Result<(), AppError> {
    let mut writer = create_writer(path, "fit")?;
    for tf in fits {
        let rows = tf
            .track
            .frames
            .iter()
            .zip(&tf.track.intensity)
            .zip(&tf.fit.fit);
        for ((&frame, &intensity), &fit) in rows {
            writer
                .serialize(FitRow {
                    track: &tf.track.id,
                    frame,
                    intensity,
                    fit,
                })
                .map_err(|e| AppError::new(2, format!("Failed to write fit CSV row: {e}")))?;
        }
    }
    finish(writer, "fit")
}

fn create_writer(path: &Path, what: &str) -> Result<csv::Writer<File>, AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} CSV '{}': {e}", path.display())))?;
    Ok(csv::Writer::from_writer(file))
}

fn finish(mut writer: csv::Writer<File>, what: &str) -> Result<(), AppError> {
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush {what} CSV: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Track, TrackSummary};
    use crate::fit::StepFitter;

    fn sample_fits() -> Vec<TrackFit> {
        let track = Track {
            id: "7".to_string(),
            frames: vec![10, 11, 12, 13, 14, 15],
            intensity: vec![9.0, 9.0, 9.0, 3.0, 3.0, 3.0],
        };
        let fit = StepFitter::default().fit_steps(&track.intensity).unwrap();
        let summary = TrackSummary::from_fit(&track, &fit);
        vec![TrackFit { track, fit, summary }]
    }

    #[test]
    fn steps_csv_uses_input_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.csv");
        write_steps_csv(&path, &sample_fits()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("track,index,frame,level_before,level_after,step,dwell_before,dwell_after,error")
        );
        assert_eq!(lines.next(), Some("7,3,13,9.0,3.0,-6.0,3,3,0.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn summary_and_fit_csv() {
        let dir = tempfile::tempdir().unwrap();
        let fits = sample_fits();

        let summary = dir.path().join("summary.csv");
        write_summary_csv(&summary, &fits).unwrap();
        let text = std::fs::read_to_string(&summary).unwrap();
        assert_eq!(
            text,
            "track,n_points,mean_intensity,n_steps,n_positive,n_negative\n7,6,6.0,1,0,1\n"
        );

        let fit = dir.path().join("fit.csv");
        write_fit_csv(&fit, &fits).unwrap();
        let text = std::fs::read_to_string(&fit).unwrap();
        assert_eq!(text.lines().count(), 7);
        assert_eq!(text.lines().nth(4), Some("7,13,3.0,3.0"));
    }
}
