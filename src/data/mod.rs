//! Data sources other than track tables.

pub mod synth;

pub use synth::*;
