//! Command-line parsing for the step fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code;
//! `app` turns these structs into a plain `FitConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{DEFAULT_PASSES, DEFAULT_THRESHOLD, StepDirection, SummaryField};
use crate::fit::detector::DEFAULT_MAX_STEP_FRACTION;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "stepfit", version, about = "Iterative step fitting of particle intensity traces")]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit steps to every track of a track table, print reports, and optionally plot/export.
    Fit(FitArgs),
    /// Plot a track from a previously exported fit JSON.
    Plot(PlotArgs),
    /// Generate a synthetic step trace, fit it, and compare with the truth.
    Demo(DemoArgs),
}

/// Fitter settings shared by `fit` and `demo`.
#[derive(Debug, Args, Clone)]
pub struct FitterArgs {
    /// Minimum relative S-curve excess over 1 for a pass to count as a detection.
    #[arg(long, env = "STEPFIT_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// Number of residual refinement passes.
    #[arg(long, env = "STEPFIT_PASSES", default_value_t = DEFAULT_PASSES)]
    pub passes: usize,

    /// Largest number of splits tried, as a fraction of the trace length.
    #[arg(long, env = "STEPFIT_MAX_STEP_FRACTION", default_value_t = DEFAULT_MAX_STEP_FRACTION)]
    pub max_step_fraction: f64,
}

/// Options for fitting a track table.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Track table CSV (one row per particle and frame).
    #[arg(short, long, value_name = "CSV")]
    pub input: PathBuf,

    /// Fit only this track id.
    #[arg(short, long)]
    pub track: Option<String>,

    /// Minimum number of frames for a track to be fitted.
    #[arg(long, default_value_t = 2)]
    pub min_len: usize,

    /// Maximum number of frames for a track to be fitted.
    #[arg(long)]
    pub max_len: Option<usize>,

    /// Keep only fitted tracks whose summary column lies in [--min, --max].
    #[arg(long, value_enum, value_name = "FIELD")]
    pub filter_by: Option<SummaryField>,

    /// Lower bound for --filter-by (inclusive).
    #[arg(long, requires = "filter_by", allow_negative_numbers = true)]
    pub min: Option<f64>,

    /// Upper bound for --filter-by (inclusive).
    #[arg(long, requires = "filter_by", allow_negative_numbers = true)]
    pub max: Option<f64>,

    #[command(flatten)]
    pub fitter: FitterArgs,

    /// Column holding the track id.
    #[arg(long, default_value = "particle")]
    pub track_col: String,

    /// Column holding the frame number.
    #[arg(long, default_value = "frame")]
    pub frame_col: String,

    /// Column holding the intensity.
    #[arg(long, default_value = "intensity_mean")]
    pub intensity_col: String,

    /// Fit tracks in parallel.
    #[arg(long)]
    pub parallel: bool,

    /// Show the top-N tracks by step count.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Render an ASCII plot (single-track runs only).
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Export detected steps to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_steps: Option<PathBuf>,

    /// Export per-track summaries to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_summary: Option<PathBuf>,

    /// Export per-frame fitted levels to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_fit: Option<PathBuf>,

    /// Export traces, fits and steps to JSON (readable by `stepfit plot`).
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

/// Options for plotting a saved fit.
#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Fit JSON file produced by `stepfit fit --export-json`.
    #[arg(long, value_name = "JSON")]
    pub fit: PathBuf,

    /// Track to plot (defaults to the first track in the file).
    #[arg(short, long)]
    pub track: Option<String>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

/// Options for the synthetic demo.
#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Number of true steps.
    #[arg(long, default_value_t = 4)]
    pub steps: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Gaussian noise sigma.
    #[arg(long, default_value_t = 1.0)]
    pub noise: f64,

    /// Shortest plateau (frames).
    #[arg(long, default_value_t = 15)]
    pub dwell_min: usize,

    /// Longest plateau (frames).
    #[arg(long, default_value_t = 40)]
    pub dwell_max: usize,

    /// Smallest step size.
    #[arg(long, default_value_t = 8.0)]
    pub step_min: f64,

    /// Largest step size.
    #[arg(long, default_value_t = 15.0)]
    pub step_max: f64,

    /// Level of the first plateau.
    #[arg(long, default_value_t = 100.0)]
    pub baseline: f64,

    /// Step direction.
    #[arg(long, value_enum, default_value_t = StepDirection::Down)]
    pub direction: StepDirection,

    #[command(flatten)]
    pub fitter: FitterArgs,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_defaults() {
        let cli = Cli::try_parse_from(["stepfit", "fit", "--input", "tracks.csv"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.input, PathBuf::from("tracks.csv"));
        assert_eq!(args.min_len, 2);
        assert_eq!(args.filter_by, None);
        assert_eq!(args.top, 20);
        assert_eq!(args.intensity_col, "intensity_mean");
        assert!(!args.parallel);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn property_filter_flags() {
        let cli = Cli::try_parse_from([
            "stepfit", "fit", "-i", "t.csv", "--filter-by", "n_steps", "--min", "1", "--max", "3",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.filter_by, Some(SummaryField::NSteps));
        assert_eq!((args.min, args.max), (Some(1.0), Some(3.0)));

        // Bounds without a field are rejected.
        assert!(Cli::try_parse_from(["stepfit", "fit", "-i", "t.csv", "--min", "1"]).is_err());
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::try_parse_from(["stepfit", "demo", "-vv", "--seed", "3"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.seed, 3);
        assert_eq!(args.direction, StepDirection::Down);
    }
}
