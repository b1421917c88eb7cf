//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - runs the fit pipeline or the demo
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::{Cli, Command, DemoArgs, FitArgs, FitterArgs, PlotArgs};
use crate::data::{SynthConfig, generate_trace};
use crate::domain::{ColumnMap, FitConfig, PropertyFilter, Track, TrackFilter, TrackFit, TrackSummary};
use crate::error::AppError;
use crate::fit::{SplitDetector, StepFitter, change_points};

pub mod pipeline;

/// Entry point for the `stepfit` binary.
pub fn run() -> Result<(), AppError> {
    // Settings may come from a local `.env`; a missing file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Plot(args) => handle_plot(&args),
        Command::Demo(args) => handle_demo(&args),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    // `RUST_LOG` wins over the flags.
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(args)?;

    let bar = if config.progress {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} tracks ({eta})") {
        bar.set_style(style);
    }
    let run = pipeline::run_fit(&config, &|done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    });
    bar.finish_and_clear();
    let run = run?;

    println!(
        "{}",
        crate::report::format_run_summary(&run.ingest, run.tracks_kept, &run.batch, run.filtered_out, &config)
    );

    if let [single] = run.batch.fits.as_slice() {
        println!("{}", crate::report::format_step_table(single));
        if config.plot {
            println!("{}", plot_track_fit(single, config.plot_width, config.plot_height));
        }
    } else {
        println!("{}", crate::report::format_summary_table(&run.batch.fits, config.top_n));
        if config.plot {
            log::warn!("--plot needs a single fitted track; select one with --track");
        }
    }

    // Optional exports.
    if let Some(path) = &config.export_steps {
        crate::io::export::write_steps_csv(path, &run.batch.fits)?;
    }
    if let Some(path) = &config.export_summary {
        crate::io::export::write_summary_csv(path, &run.batch.fits)?;
    }
    if let Some(path) = &config.export_fit {
        crate::io::export::write_fit_csv(path, &run.batch.fits)?;
    }
    if let Some(path) = &config.export_json {
        let file = crate::io::fitfile::build_fit_file(&run.batch.fits, config.threshold, config.passes);
        crate::io::fitfile::write_fit_json(path, &file)?;
    }

    Ok(())
}

fn handle_plot(args: &PlotArgs) -> Result<(), AppError> {
    let file = crate::io::fitfile::read_fit_json(&args.fit)?;

    let track = match &args.track {
        Some(id) => file
            .tracks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| AppError::new(2, format!("Track '{id}' not found in '{}'.", args.fit.display())))?,
        None => file
            .tracks
            .first()
            .ok_or_else(|| AppError::new(3, "Fit file contains no tracks."))?,
    };

    println!("Track {} ({} steps)", track.id, track.steps.len());
    let plot = crate::plot::render_trace_plot(&track.frames, &track.intensity, &track.fit, args.width, args.height);
    println!("{plot}");
    Ok(())
}

fn handle_demo(args: &DemoArgs) -> Result<(), AppError> {
    let synth = SynthConfig {
        n_steps: args.steps,
        dwell_min: args.dwell_min,
        dwell_max: args.dwell_max,
        step_min: args.step_min,
        step_max: args.step_max,
        baseline: args.baseline,
        noise_sigma: args.noise,
        direction: args.direction,
        seed: args.seed,
    };
    let trace = generate_trace(&synth)?;
    let fitter = fitter_from_args(&args.fitter)?;

    let track = Track {
        id: format!("demo-{}", args.seed),
        frames: (0..trace.intensity.len() as i64).collect(),
        intensity: trace.intensity.clone(),
    };
    let fit = fitter.fit_steps(&track.intensity)?;
    let summary = TrackSummary::from_fit(&track, &fit);
    let track_fit = TrackFit { track, fit, summary };

    println!("=== stepfit - Synthetic Demo ===");
    println!("Samples: {} | noise sigma={}", trace.intensity.len(), args.noise);
    println!("True change points:     {:?}", trace.change_points);
    println!("Detected change points: {:?}", change_points(&track_fit.fit.fit));
    println!();
    println!("{}", crate::report::format_step_table(&track_fit));
    println!("{}", plot_track_fit(&track_fit, args.width, args.height));
    Ok(())
}

fn plot_track_fit(fit: &TrackFit, width: usize, height: usize) -> String {
    crate::plot::render_trace_plot(&fit.track.frames, &fit.track.intensity, &fit.fit.fit, width, height)
}

fn fitter_from_args(args: &FitterArgs) -> Result<StepFitter, AppError> {
    validate_max_step_fraction(args.max_step_fraction)?;
    let detector = SplitDetector::new(args.max_step_fraction);
    Ok(StepFitter::with_detector(detector, args.threshold, args.passes)?)
}

fn validate_max_step_fraction(fraction: f64) -> Result<(), AppError> {
    if fraction.is_finite() && fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(AppError::new(
            2,
            format!("--max-step-fraction must be in (0, 1] (got {fraction})."),
        ))
    }
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    validate_max_step_fraction(args.fitter.max_step_fraction)?;
    if let Some(max_len) = args.max_len.filter(|&m| m < args.min_len) {
        return Err(AppError::new(
            2,
            format!("--max-len ({max_len}) is below --min-len ({}).", args.min_len),
        ));
    }

    let property_filter = property_filter_from_args(args)?;

    Ok(FitConfig {
        input: args.input.clone(),
        columns: ColumnMap {
            track: args.track_col.clone(),
            frame: args.frame_col.clone(),
            intensity: args.intensity_col.clone(),
        },
        filter: TrackFilter {
            track: args.track.clone(),
            min_len: args.min_len,
            max_len: args.max_len,
        },
        property_filter,
        threshold: args.fitter.threshold,
        passes: args.fitter.passes,
        max_step_fraction: args.fitter.max_step_fraction,
        parallel: args.parallel,
        top_n: args.top,
        plot: args.plot,
        plot_width: args.width,
        plot_height: args.height,
        progress: !args.no_progress,
        export_steps: args.export_steps.clone(),
        export_summary: args.export_summary.clone(),
        export_fit: args.export_fit.clone(),
        export_json: args.export_json.clone(),
    })
}

fn property_filter_from_args(args: &FitArgs) -> Result<Option<PropertyFilter>, AppError> {
    let Some(field) = args.filter_by else {
        return Ok(None);
    };
    let problem = match (args.min, args.max) {
        (None, None) => Some(format!("--filter-by {} needs --min and/or --max.", field.name())),
        (min, max) if min.is_some_and(f64::is_nan) || max.is_some_and(f64::is_nan) => {
            Some("--min/--max must be numbers.".to_string())
        }
        (Some(min), Some(max)) if min > max => Some(format!("--min ({min}) is above --max ({max}).")),
        _ => None,
    };
    if let Some(message) = problem {
        return Err(AppError::new(2, message));
    }
    Ok(Some(PropertyFilter {
        field,
        min: args.min,
        max: args.max,
    }))
}
