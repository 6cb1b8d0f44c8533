//! Core type definitions
//!
//! Step descriptors and their strongly-typed names.

mod step;

pub use step::{InitStep, StepName};
