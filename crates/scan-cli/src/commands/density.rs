//! scanvol density command - density from a weighed volume.

use anyhow::{Result, bail};
use colored::Colorize;
use scan_volume::{DensityResult, estimate_density};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct DensityReport {
    mass_g: f64,
    volume_ml: f64,
    #[serde(flatten)]
    result: DensityResult,
}

pub fn run(mass_g: f64, mass_sigma_g: f64, volume_ml: f64, volume_sigma_ml: f64, cli: &Cli) -> Result<()> {
    let result = estimate_density(
        mass_g * 1e-3,
        mass_sigma_g * 1e-3,
        volume_ml * 1e-6,
        volume_sigma_ml * 1e-6,
    );

    if let DensityResult::Undefined { reason } = &result {
        bail!("Density is undefined: {}", reason);
    }

    let report = DensityReport {
        mass_g,
        volume_ml,
        result,
    };

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if let (false, Some(e)) = (cli.quiet, report.result.estimate()) {
                output::heading("Density");
                output::field(
                    "Density",
                    format!("{:.4} g/mL ({:.1} kg/m³)", e.density_g_per_ml(), e.density).bold(),
                );
                output::field(
                    "Uncertainty",
                    format!("± {:.1} kg/m³ ({:.1}%)", e.uncertainty, e.relative_uncertainty() * 100.0),
                );
                output::field("Quality", e.tier);
                if !e.is_plausible() {
                    output::warning(
                        "Density is outside 0.05 to 3.0 g/mL; check the mass and the scan selection",
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}
