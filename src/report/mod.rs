//! Reporting: run summaries and tables for the terminal.

pub mod format;

pub use format::*;
