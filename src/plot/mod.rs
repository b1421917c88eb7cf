//! Terminal plots of traces and their step fits.

pub mod ascii;

pub use ascii::*;
