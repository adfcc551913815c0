//! Toolbox library crate
//!
//! Exposes the generation pipeline and script library so benchmarks and
//! tests can exercise them without going through CLI startup.

pub mod config;
pub mod generate;
pub mod library;
pub mod logging;
pub mod packages;
pub mod python;
pub mod runner;
pub mod versions;
