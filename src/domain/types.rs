//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to CSV/JSON
//! - reloaded later for plotting

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default significance threshold handed to the step detector.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Default number of residual refinement passes.
pub const DEFAULT_PASSES: usize = 3;

/// One detected level transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Sample index of the first sample on the new level.
    pub index: usize,
    pub level_before: f64,
    pub level_after: f64,
    /// `level_after - level_before`.
    pub size: f64,
    /// Length (samples) of the plateau before the step.
    pub dwell_before: usize,
    /// Length (samples) of the plateau after the step.
    pub dwell_after: usize,
    /// Standard error of the level difference.
    pub error: f64,
}

/// Diagnostics retained for one refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    /// 1-based pass number.
    pub pass: usize,
    /// Accumulated fit after this pass.
    pub fit: Vec<f64>,
    /// Counter-fit quality curve reported by the detector.
    pub s_curve: Vec<f64>,
    pub best_shot: usize,
}

/// Output of the step fitter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepFit {
    pub fit: Vec<f64>,
    pub steps: Vec<StepRecord>,
    pub history: Vec<PassRecord>,
}

impl StepFit {
    /// The "nothing to fit" result.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fit.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// One tracked particle: frames and per-frame intensity, ordered by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub frames: Vec<i64>,
    pub intensity: Vec<f64>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }
}

/// Per-track meta properties derived from a step fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub track: String,
    pub n_points: usize,
    pub mean_intensity: f64,
    pub n_steps: usize,
    pub n_positive: usize,
    pub n_negative: usize,
}

impl TrackSummary {
    pub fn from_fit(track: &Track, fit: &StepFit) -> Self {
        let n = track.intensity.len();
        let mean_intensity = if n == 0 {
            f64::NAN
        } else {
            track.intensity.iter().sum::<f64>() / n as f64
        };
        Self {
            track: track.id.clone(),
            n_points: n,
            mean_intensity,
            n_steps: fit.steps.len(),
            n_positive: fit.steps.iter().filter(|s| s.size > 0.0).count(),
            n_negative: fit.steps.iter().filter(|s| s.size < 0.0).count(),
        }
    }
}

/// Step fit of one track, as produced by the batch runner.
#[derive(Debug, Clone)]
pub struct TrackFit {
    pub track: Track,
    pub fit: StepFit,
    pub summary: TrackSummary,
}

/// Column names used to read a track table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub track: String,
    pub frame: String,
    pub intensity: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            track: "particle".to_string(),
            frame: "frame".to_string(),
            intensity: "intensity_mean".to_string(),
        }
    }
}

/// Which tracks of a table take part in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFilter {
    /// Keep only this track id (takes precedence over the length window).
    pub track: Option<String>,
    pub min_len: usize,
    pub max_len: Option<usize>,
}

/// Per-track summary column usable in a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum SummaryField {
    NPoints,
    MeanIntensity,
    NSteps,
    NPositive,
    NNegative,
}

impl SummaryField {
    pub fn name(self) -> &'static str {
        match self {
            SummaryField::NPoints => "n_points",
            SummaryField::MeanIntensity => "mean_intensity",
            SummaryField::NSteps => "n_steps",
            SummaryField::NPositive => "n_positive",
            SummaryField::NNegative => "n_negative",
        }
    }
}

impl TrackSummary {
    pub fn value(&self, field: SummaryField) -> f64 {
        match field {
            SummaryField::NPoints => self.n_points as f64,
            SummaryField::MeanIntensity => self.mean_intensity,
            SummaryField::NSteps => self.n_steps as f64,
            SummaryField::NPositive => self.n_positive as f64,
            SummaryField::NNegative => self.n_negative as f64,
        }
    }
}

/// Inclusive range over one summary column, applied to fitted tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyFilter {
    pub field: SummaryField,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PropertyFilter {
    /// NaN values (e.g. the mean of an empty track) never match.
    pub fn matches(&self, summary: &TrackSummary) -> bool {
        let v = summary.value(self.field);
        !v.is_nan() && self.min.is_none_or(|min| v >= min) && self.max.is_none_or(|max| v <= max)
    }
}

/// Direction of synthetic steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    /// Every step lowers the level (photobleaching).
    Down,
    /// Every step raises the level (binding).
    Up,
    /// Random sign per step.
    Mixed,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus env and defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input: PathBuf,
    pub columns: ColumnMap,
    pub filter: TrackFilter,
    /// Applied to the fitted tracks, after fitting.
    pub property_filter: Option<PropertyFilter>,

    pub threshold: f64,
    pub passes: usize,
    pub max_step_fraction: f64,
    pub parallel: bool,

    pub top_n: usize,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub progress: bool,

    pub export_steps: Option<PathBuf>,
    pub export_summary: Option<PathBuf>,
    pub export_fit: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
}

/// A saved fit file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub threshold: f64,
    pub passes: usize,
    pub tracks: Vec<FitFileTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitFileTrack {
    pub id: String,
    pub frames: Vec<i64>,
    pub intensity: Vec<f64>,
    pub fit: Vec<f64>,
    pub steps: Vec<StepRecord>,
}
