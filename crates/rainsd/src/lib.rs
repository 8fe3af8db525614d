//! # rainsd
//!
//! Command-line entry point for a RAINS naming node: reads configuration,
//! installs logging and runs the server until interrupted.

pub mod cli;

pub use cli::run;
