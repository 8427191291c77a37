//! Report generation for refresh runs.

pub mod generator;

pub use generator::*;
