//! scanvol measure command - volume of a captured point cloud.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use scan_volume::calibration::{CalibrationStore, now_ms};
use scan_volume::pipeline::{PipelineConfig, ScanInput, ScanMeasurement, VolumePipeline};
use scan_volume::{DensityResult, VolumeSource, estimate_density};
use serde::Serialize;
use tracing::debug;

use crate::{Cli, OutputFormat, Strategy, input, output};

pub struct MeasureArgs<'a> {
    pub input: &'a Path,
    pub config: Option<&'a Path>,
    pub calibration: Option<&'a Path>,
    pub strategy: Option<Strategy>,
    pub mesh: Option<&'a Path>,
    pub captured_at: Option<u64>,
    pub mass_g: Option<f64>,
    pub mass_sigma_g: f64,
    /// Relative.
    pub volume_sigma: f64,
}

#[derive(Serialize)]
struct MeasureReport<'a> {
    input: String,
    volume_ml: f64,
    #[serde(flatten)]
    measurement: &'a ScanMeasurement,
    #[serde(skip_serializing_if = "Option::is_none")]
    density: Option<DensityResult>,
}

pub fn run(args: &MeasureArgs<'_>, cli: &Cli) -> Result<()> {
    let mut config = match args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }

    let cloud = input::read_cloud(args.input)?;
    debug!(
        points = cloud.len(),
        normals = cloud.has_normals(),
        strategy = ?config.strategy,
        "Loaded capture"
    );
    let mut scan = ScanInput::at(cloud, args.captured_at.unwrap_or_else(now_ms));
    if let Some(path) = args.mesh {
        scan = scan.with_mesh(input::read_obj(path)?);
    }

    let mut pipeline = VolumePipeline::new(config);
    if let Some(path) = args.calibration {
        let store = CalibrationStore::open(path)
            .with_context(|| format!("Failed to open calibration store {:?}", path))?;
        if store.applicable_for(scan.captured_at_ms).is_none() {
            output::warning("No valid calibration for this capture, measuring uncalibrated", cli.quiet);
        }
        pipeline = pipeline.with_calibration(store);
    }

    output::info(
        &format!("Measuring {} points from {}...", scan.cloud.len(), args.input.display()),
        cli.format,
        cli.quiet,
    );
    let measurement = pipeline
        .run(&scan)
        .with_context(|| format!("Failed to measure {:?}", args.input))?;

    let density = args.mass_g.map(|mass_g| {
        estimate_density(
            mass_g * 1e-3,
            args.mass_sigma_g * 1e-3,
            measurement.volume,
            measurement.volume * args.volume_sigma,
        )
    });

    let report = MeasureReport {
        input: args.input.display().to_string(),
        volume_ml: measurement.volume_ml(),
        measurement: &measurement,
        density,
    };

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                print_text(&report);
            }
        }
    }

    Ok(())
}

fn print_text(report: &MeasureReport<'_>) {
    let m = report.measurement;
    output::heading("Scan Measurement");
    output::field("File", &report.input);
    output::field("Volume", format!("{:.2} mL", report.volume_ml).bold());
    match &m.source {
        VolumeSource::Mesh => output::field("Source", "mesh"),
        VolumeSource::BoundingVolume { reason } => {
            output::field("Source", format!("bounding volume ({})", reason).yellow())
        }
    }
    output::field("Points", format!("{} → {}", m.input_points, m.conditioned_points));

    if let Some(mesh) = &m.mesh {
        output::field("Triangles", mesh.face_count);
        output::field("Surface area", format!("{:.2} cm²", mesh.surface_area * 1e4));
        output::field("Quality", format!("{:.2}", mesh.quality_score));
        output::field("Watertight", if mesh.is_watertight { "yes" } else { "no" });
        for warning in &mesh.warnings {
            println!("    {} {}", "-".yellow(), warning);
        }
    }
    if let Some(s) = &m.simplification {
        output::field(
            "Simplified",
            format!("{} → {} triangles", s.original_triangles, s.final_triangles),
        );
    }
    match &m.calibration {
        Some(c) => output::field(
            "Calibration",
            format!("×{:.4} ({}, {})", c.scale_factor, c.reference_id, c.timestamp_ms),
        ),
        None => output::field("Calibration", "none".dimmed()),
    }

    match &report.density {
        Some(DensityResult::Estimated(e)) => {
            output::field(
                "Density",
                format!(
                    "{:.3} ± {:.3} g/mL ({})",
                    e.density_g_per_ml(),
                    e.uncertainty * 1e-3,
                    e.tier
                ),
            );
            if !e.is_plausible() {
                println!("    {} density is outside the plausible range", "!".yellow());
            }
        }
        Some(DensityResult::Undefined { reason }) => {
            output::field("Density", format!("undefined ({})", reason).yellow())
        }
        None => {}
    }
}
