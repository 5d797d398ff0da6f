//! scanvol: Command-line interface for scan-volume.
//!
//! Measures the volume of scanned point clouds, runs scale calibration
//! against a reference object and turns a weighed volume into a density.
//! Suitable for scripting and for checking captures offline.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=scan_volume=info` - Stage summaries
//! - `RUST_LOG=scan_volume=debug` - Detailed progress logging
//! - `RUST_LOG=scan_volume::timing=debug` - Stage timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Measure a capture with the stored calibration
//! scanvol measure capture.xyz --calibration ~/.scanvol/calibration.json
//!
//! # Calibrate against a credit card and store the result
//! scanvol calibrate frames.json --reference credit_card --store ~/.scanvol/calibration.json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use scan_volume::pipeline::ReconstructionStrategy;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod input;
mod output;

use commands::{calibrate, config, density, measure};

/// scanvol - Volume measurement from depth-sensor point clouds.
///
/// Fuse captures into a surface, measure the enclosed volume, and keep the
/// scale honest with a reference-object calibration.
#[derive(Parser)]
#[command(name = "scanvol")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Strategy {
    /// Fuse the point cloud into a TSDF
    Tsdf,
    /// Measure the mesh given with --mesh
    DirectMesh,
}

impl From<Strategy> for ReconstructionStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Tsdf => ReconstructionStrategy::Tsdf,
            Strategy::DirectMesh => ReconstructionStrategy::DirectMesh,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the volume of a captured point cloud
    Measure {
        /// Point cloud file: PLY, or XYZ text (x y z [nx ny nz] [confidence] per line)
        input: PathBuf,

        /// Pipeline configuration (TOML, or JSON by extension)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Calibration store to apply
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Override the reconstruction strategy from the configuration
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Surface mesh (OBJ) for the direct-mesh strategy
        #[arg(long)]
        mesh: Option<PathBuf>,

        /// Capture time in milliseconds since the Unix epoch (default: now)
        #[arg(long)]
        captured_at: Option<u64>,

        /// Weighed mass in grams, to report a density
        #[arg(long)]
        mass: Option<f64>,

        /// Uncertainty of the mass in grams
        #[arg(long, default_value = "1.0")]
        mass_sigma: f64,

        /// Relative uncertainty assumed for the measured volume
        #[arg(long, default_value = "0.05")]
        volume_sigma: f64,
    },

    /// Estimate density from a mass and a volume
    Density {
        /// Mass in grams
        #[arg(long)]
        mass: f64,

        /// Uncertainty of the mass in grams
        #[arg(long, default_value = "0.0")]
        mass_sigma: f64,

        /// Volume in milliliters
        #[arg(long)]
        volume: f64,

        /// Uncertainty of the volume in milliliters
        #[arg(long, default_value = "0.0")]
        volume_sigma: f64,
    },

    /// Compute a scale calibration from observed reference frames
    Calibrate {
        /// Frame observations (JSON array)
        frames: PathBuf,

        /// Reference object id (credit_card, us_quarter, a4_sheet)
        #[arg(long, short)]
        reference: String,

        /// Store the result in this calibration file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Inspect or clear a stored calibration
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },

    /// Print the default pipeline configuration
    Config,
}

#[derive(Subcommand)]
pub enum CalibrationAction {
    /// Show the stored calibration and whether it is still valid
    Show {
        /// Calibration file
        #[arg(long)]
        store: PathBuf,
    },
    /// Remove the stored calibration
    Reset {
        /// Calibration file
        #[arg(long)]
        store: PathBuf,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "scan_volume=info",
            2 => "scan_volume=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    // Nicer panic reports in development builds
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Measure {
            input,
            config,
            calibration,
            strategy,
            mesh,
            captured_at,
            mass,
            mass_sigma,
            volume_sigma,
        } => measure::run(
            &measure::MeasureArgs {
                input,
                config: config.as_deref(),
                calibration: calibration.as_deref(),
                strategy: *strategy,
                mesh: mesh.as_deref(),
                captured_at: *captured_at,
                mass_g: *mass,
                mass_sigma_g: *mass_sigma,
                volume_sigma: *volume_sigma,
            },
            &cli,
        ),
        Commands::Density {
            mass,
            mass_sigma,
            volume,
            volume_sigma,
        } => density::run(*mass, *mass_sigma, *volume, *volume_sigma, &cli),
        Commands::Calibrate {
            frames,
            reference,
            store,
        } => calibrate::run(frames, reference, store.as_deref(), &cli),
        Commands::Calibration { action } => calibrate::manage(action, &cli),
        Commands::Config => config::run(&cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            eprintln!("{}: {}", "Error".red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  {}: {}", "Caused by".yellow(), cause);
            }
            // Library errors carry a stable code and a next step
            if let Some(err) = e.downcast_ref::<scan_volume::VolumeError>() {
                eprintln!("  {}: {}", "Code".cyan(), err.code());
                eprintln!("  {}: {}", "Suggestion".green(), err.recovery_suggestion());
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
