//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - fit outputs (`StepRecord`, `PassRecord`, `StepFit`)
//! - tracks and their summaries (`Track`, `TrackSummary`, `TrackFit`)
//! - run configuration (`FitConfig`, `ColumnMap`, `TrackFilter`)
//! - the portable fit file (`FitFile`)

pub mod types;

pub use types::*;
