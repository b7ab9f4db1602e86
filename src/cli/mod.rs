//! Command-line interface for the fleet manager.

pub mod commands;
pub mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
