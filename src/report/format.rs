//! Formatted terminal output.
//!
//! Formatting lives here so the fitting code stays free of presentation and
//! output changes stay localized.

use crate::domain::{FitConfig, TrackFit};
use crate::fit::batch::BatchOutcome;
use crate::io::ingest::IngestedTracks;

/// Format the run summary (input stats, fitter settings, totals).
pub fn format_run_summary(
    ingest: &IngestedTracks,
    tracks_kept: usize,
    batch: &BatchOutcome,
    filtered_out: usize,
    config: &FitConfig,
) -> String {
    let mut out = String::new();

    out.push_str("=== stepfit - Iterative Step Fit ===\n");
    out.push_str(&format!("Input: {}\n", config.input.display()));
    out.push_str(&format!(
        "Rows: read={} | used={} | errors={}\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len()
    ));
    out.push_str(&format!(
        "Tracks: loaded={} | kept={}\n",
        ingest.tracks.len(),
        tracks_kept
    ));
    out.push_str(&format!(
        "Fitter: threshold={} | passes={} | max_step_fraction={}\n",
        config.threshold, config.passes, config.max_step_fraction
    ));

    let steps: usize = batch.fits.iter().map(|f| f.summary.n_steps).sum();
    let positive: usize = batch.fits.iter().map(|f| f.summary.n_positive).sum();
    let negative: usize = batch.fits.iter().map(|f| f.summary.n_negative).sum();
    out.push_str(&format!(
        "Fitted: tracks={} | steps={steps} (+{positive} / -{negative})\n",
        batch.fits.len()
    ));

    if let Some(filter) = &config.property_filter {
        let bound = |b: Option<f64>| b.map_or_else(|| "-".to_string(), |v| v.to_string());
        out.push_str(&format!(
            "Property filter: {} in [{}, {}] | removed={filtered_out}\n",
            filter.field.name(),
            bound(filter.min),
            bound(filter.max)
        ));
    }

    if !batch.failures.is_empty() || !batch.skipped.is_empty() {
        out.push_str(&format!(
            "Not fitted: failed={} | skipped={}\n",
            batch.failures.len(),
            batch.skipped.len()
        ));
        for failure in &batch.failures {
            out.push_str(&format!("  (failed {}) {}\n", failure.track, failure.error));
        }
    }
    if batch.cancelled {
        out.push_str("Run cancelled before all tracks were fitted.\n");
    }
    for err in ingest.row_errors.iter().take(5) {
        let track = err.track.as_deref().unwrap_or("?");
        out.push_str(&format!("  (row {} track {track}) {}\n", err.line, err.message));
    }
    if ingest.row_errors.len() > 5 {
        out.push_str(&format!("  ... {} more row errors\n", ingest.row_errors.len() - 5));
    }

    out
}

/// Top-N tracks by step count; ties keep input order.
pub fn top_tracks(fits: &[TrackFit], top_n: usize) -> Vec<&TrackFit> {
    let mut sorted: Vec<&TrackFit> = fits.iter().collect();
    // Stable sort keeps input order among equal counts.
    sorted.sort_by(|a, b| b.summary.n_steps.cmp(&a.summary.n_steps));
    sorted.truncate(top_n);
    sorted
}

/// Format the per-track summary table.
pub fn format_summary_table(fits: &[TrackFit], top_n: usize) -> String {
    let mut out = String::new();

    out.push_str(&format!("Tracks by step count (top {top_n}):\n"));
    push_row(
        &mut out,
        format!(
            "{:<16} {:>8} {:>12} {:>8} {:>8} {:>8}",
            "track", "points", "mean", "steps", "pos", "neg"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<16} {:-<8} {:-<12} {:-<8} {:-<8} {:-<8}", "", "", "", "", "", ""),
    );

    for f in top_tracks(fits, top_n) {
        let s = &f.summary;
        push_row(
            &mut out,
            format!(
                "{:<16} {:>8} {:>12.2} {:>8} {:>8} {:>8}",
                truncate(&s.track, 16),
                s.n_points,
                s.mean_intensity,
                s.n_steps,
                s.n_positive,
                s.n_negative
            ),
        );
    }

    out
}

/// Format the detected steps of one track.
pub fn format_step_table(fit: &TrackFit) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Steps for track {} ({} found):\n",
        fit.track.id,
        fit.fit.steps.len()
    ));
    push_row(
        &mut out,
        format!(
            "{:>6} {:>8} {:>12} {:>12} {:>10} {:>8} {:>8} {:>8}",
            "index", "frame", "before", "after", "step", "dwell-", "dwell+", "error"
        ),
    );
    push_row(
        &mut out,
        format!(
            "{:-<6} {:-<8} {:-<12} {:-<12} {:-<10} {:-<8} {:-<8} {:-<8}",
            "", "", "", "", "", "", "", ""
        ),
    );

    for step in &fit.fit.steps {
        let frame = fit
            .track
            .frames
            .get(step.index)
            .map(|f| f.to_string())
            .unwrap_or_default();
        push_row(
            &mut out,
            format!(
                "{:>6} {:>8} {:>12.2} {:>12.2} {:>10.2} {:>8} {:>8} {:>8.3}",
                step.index,
                frame,
                step.level_before,
                step.level_after,
                step.size,
                step.dwell_before,
                step.dwell_after,
                step.error
            ),
        );
    }

    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
