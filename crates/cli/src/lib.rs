//! Support library for the `moe-gate` command line tool.

pub mod config;
pub mod logging;
pub mod report;
