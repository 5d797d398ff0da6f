//! Subcommand implementations.

pub mod calibrate;
pub mod config;
pub mod density;
pub mod measure;
