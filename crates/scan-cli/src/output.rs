//! Output helpers shared by the commands.
//!
//! In JSON mode only the result document goes to stdout; status lines are
//! suppressed so the output can be piped straight into other tools.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a result document.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: failed to serialize output: {}", "Error".red().bold(), e),
        },
        OutputFormat::Text => {
            // Text callers print their own layout
        }
    }
}

pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "→".blue(), message);
    }
}

pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "✓".green().bold(), message);
    }
}

/// Warnings go to stderr in both formats.
pub fn warning(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{} {}", "!".yellow().bold(), message);
    }
}

/// Section heading for text output.
pub fn heading(title: &str) {
    println!("{}", title.bold().underline());
}

/// Indented `label: value` line for text output.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {}: {}", label.cyan(), value);
}
