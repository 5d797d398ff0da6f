//! scanvol config command - print the default pipeline configuration.

use anyhow::{Context, Result};
use scan_volume::PipelineConfig;

use crate::{Cli, OutputFormat, output};

pub fn run(cli: &Cli) -> Result<()> {
    let config = PipelineConfig::default();
    match cli.format {
        OutputFormat::Json => output::print(&config, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                let toml = config
                    .to_toml()
                    .context("Failed to render the default configuration")?;
                print!("{}", toml);
            }
        }
    }
    Ok(())
}
