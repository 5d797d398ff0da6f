//! scanvol calibrate / calibration commands - scale calibration lifecycle.
//!
//! Frames are read from a JSON array of observations. Each entry may carry
//! an `angle` (`frontal`, `left`, `top`); entries without one are assigned
//! the required angles in order.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use scan_volume::VolumeError;
use scan_volume::calibration::{
    BuiltinCatalog, CALIBRATION_VALIDITY_MS, CalibrationFrame, CalibrationResult,
    CalibrationStore, CaptureAngle, FrameObservation, REQUIRED_ANGLES, ReferenceCatalog,
    calibrate, now_ms,
};
use serde::{Deserialize, Serialize};

use crate::{CalibrationAction, Cli, OutputFormat, output};

#[derive(Deserialize)]
struct FrameRecord {
    #[serde(default)]
    angle: Option<CaptureAngle>,
    #[serde(flatten)]
    observation: FrameObservation,
}

#[derive(Serialize)]
struct FrameInfo {
    angle: CaptureAngle,
    scale_factor_estimate: f64,
    valid: bool,
}

#[derive(Serialize)]
struct CalibrateReport {
    reference: String,
    frames: Vec<FrameInfo>,
    result: CalibrationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
}

#[derive(Serialize)]
struct StoreReport {
    store: String,
    version: u64,
    calibration: Option<CalibrationResult>,
    valid_now: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
}

pub fn run(frames_path: &Path, reference_id: &str, store_path: Option<&Path>, cli: &Cli) -> Result<()> {
    let reference = BuiltinCatalog
        .resolve(reference_id)
        .map_err(VolumeError::from)
        .with_context(|| {
            let known: Vec<_> = BuiltinCatalog.objects().into_iter().map(|o| o.id).collect();
            format!("Known reference objects: {}", known.join(", "))
        })?;

    let text = std::fs::read_to_string(frames_path)
        .with_context(|| format!("Failed to read frames from {:?}", frames_path))?;
    let records: Vec<FrameRecord> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid frames file {:?}", frames_path))?;

    let frames: Vec<CalibrationFrame> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let angle = record
                .angle
                .unwrap_or(REQUIRED_ANGLES[i % REQUIRED_ANGLES.len()]);
            CalibrationFrame::new(&reference, angle, record.observation)
        })
        .collect();

    output::info(
        &format!("Calibrating against {} from {} frames...", reference.name, frames.len()),
        cli.format,
        cli.quiet,
    );

    // A failed calibration never touches the store
    let (result, version) = match store_path {
        Some(path) => {
            let store = CalibrationStore::open(path)
                .with_context(|| format!("Failed to open calibration store {:?}", path))?;
            let result = store.calibrate(&reference, &frames)?;
            (result, Some(store.version()))
        }
        None => (calibrate(&reference, &frames).map_err(VolumeError::from)?, None),
    };

    let report = CalibrateReport {
        reference: reference.id.clone(),
        frames: frames
            .iter()
            .map(|f| FrameInfo {
                angle: f.angle(),
                scale_factor_estimate: f.scale_factor_estimate(),
                valid: f.is_valid(),
            })
            .collect(),
        result,
        store: store_path.map(|p| p.display().to_string()),
        version,
    };

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::heading("Calibration");
                output::field("Reference", &reference.name);
                for f in &report.frames {
                    let mark = if f.valid { "✓".green() } else { "✗".red() };
                    println!(
                        "    {} {:<8} {:.4}",
                        mark,
                        f.angle.name(),
                        f.scale_factor_estimate
                    );
                }
                print_result(&report.result);
                if let (Some(store), Some(version)) = (&report.store, report.version) {
                    output::success(
                        &format!("Saved to {} (version {})", store, version),
                        cli.format,
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}

/// `calibration show` and `calibration reset`.
pub fn manage(action: &CalibrationAction, cli: &Cli) -> Result<()> {
    match action {
        CalibrationAction::Show { store } => show(store, cli),
        CalibrationAction::Reset { store } => {
            CalibrationStore::open(store)
                .and_then(|s| s.reset())
                .with_context(|| format!("Failed to reset calibration store {:?}", store))?;
            output::success("Calibration cleared", cli.format, cli.quiet);
            Ok(())
        }
    }
}

fn show(path: &Path, cli: &Cli) -> Result<()> {
    let store = CalibrationStore::open(path)
        .with_context(|| format!("Failed to open calibration store {:?}", path))?;
    let calibration = store.current();
    let now = now_ms();

    let report = StoreReport {
        store: path.display().to_string(),
        version: store.version(),
        valid_now: calibration.as_ref().is_some_and(|c| c.is_valid_at(now)),
        expires_at_ms: calibration
            .as_ref()
            .map(|c| c.timestamp_ms.saturating_add(CALIBRATION_VALIDITY_MS)),
        calibration,
    };

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::heading("Stored Calibration");
                output::field("Store", &report.store);
                match &report.calibration {
                    Some(result) => {
                        print_result(result);
                        let status = if report.valid_now {
                            "valid".green()
                        } else {
                            "expired".red()
                        };
                        output::field("Status", status);
                    }
                    None => output::field("Status", "none".dimmed()),
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &CalibrationResult) {
    output::field("Scale factor", format!("{:.5}", result.scale_factor).bold());
    output::field("Quality", format!("{:.1} / 100", result.quality_score));
    output::field(
        "Frames",
        format!("{} valid of {}", result.valid_frame_count, result.frame_count),
    );
    let bias = result.depth_bias();
    output::field(
        "Depth bias",
        format!("{:+.4} m {:+.4} × depth", bias.offset, bias.slope),
    );
    output::field("Timestamp", format!("{} ms", result.timestamp_ms));
}
