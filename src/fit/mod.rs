//! Step fitting.
//!
//! Responsibilities:
//!
//! - detect steps in one residual signal (`detector`)
//! - refine a trace fit over a fixed number of residual passes (`fitter`)
//! - merge fits and extract step tables (`segments`, `steps`)
//! - fit many tracks (parallel, cancellable) (`batch`)

pub mod batch;
pub mod detector;
pub mod fitter;
pub mod segments;
pub mod steps;

pub use batch::*;
pub use detector::*;
pub use fitter::*;
pub use segments::{append_fit, change_points, plateau_fit};
pub use steps::*;
