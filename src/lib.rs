//! `stepfit` library crate.
//!
//! The binary (`stepfit`) is a thin wrapper around this library so that:
//!
//! - the step fitter is testable without spawning processes
//! - the fitting core (`fit`) can be embedded without the CLI
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod plot;
pub mod report;
