//! Environment boundary, simulated world and configuration files.

pub mod config;
pub mod environment;
pub mod sim;
