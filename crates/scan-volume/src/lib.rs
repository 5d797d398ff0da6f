//! Volume measurement from depth-sensor point clouds.
//!
//! This crate turns a captured point cloud into a volume with a known
//! trustworthiness. It is built for handheld depth scanning of small objects
//! (food portions, parts, packages) where the answer has to come with a
//! calibrated scale and an honest quality estimate.
//!
//! # Features
//!
//! - **Conditioning**: Confidence filtering, voxel downsampling, outlier removal, pluggable denoising
//! - **Fusion**: Truncated signed distance volume with point splatting
//! - **Extraction**: Marching cubes with a shared-vertex cache
//! - **Simplification**: Quadric error edge collapse
//! - **Metrology**: Signed volume, surface area, topology validation, quality score
//! - **Calibration**: Scale factor and depth bias from a reference object
//! - **Density**: Density and weight with propagated uncertainty
//!
//! # Units and Scale
//!
//! **This library uses SI units throughout.** Positions are meters, volumes
//! cubic meters, masses kilograms, densities kg/m³.
//!
//! - Default downsampling and fusion voxel size is 2 mm (0.002)
//! - Fusion grids hold 64 to 256 samples per axis; the voxel size is coarsened for large objects
//! - Densities outside 0.05 to 3.0 g/mL are flagged as implausible
//!
//! # Coordinate System
//!
//! Right-handed. Face winding is **counter-clockwise (CCW) when viewed from
//! outside**, so a closed mesh has positive signed volume.
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::Point3;
//! use scan_volume::{condition, measure, reconstruct, ConditioningParams, GridConfig, PointCloud};
//!
//! // A sphere of radius 4 cm, as a depth sensor might see it
//! let positions: Vec<Point3<f64>> = (0..2000)
//!     .map(|i| {
//!         let y = 1.0 - 2.0 * (i as f64 + 0.5) / 2000.0;
//!         let r = (1.0 - y * y).sqrt();
//!         let t = 2.399_963 * i as f64;
//!         Point3::new(0.04 * r * t.cos(), 0.04 * y, 0.04 * r * t.sin())
//!     })
//!     .collect();
//! let cloud = PointCloud::from_positions(positions);
//!
//! let params = ConditioningParams { voxel_size: 0.004, ..Default::default() };
//! let conditioned = condition(&cloud, &params);
//!
//! let (min, max) = conditioned.bounds().unwrap();
//! let grid = GridConfig { voxel_size: 0.004, truncation_factor: 3.0, ..Default::default() }
//!     .fit(min, max)
//!     .unwrap();
//! let mesh = reconstruct(&conditioned, &grid).unwrap();
//!
//! let m = measure(&mesh).unwrap();
//! println!("{:.1} mL, quality {:.2}", m.volume * 1e6, m.quality_score);
//! ```
//!
//! # Common Workflows
//!
//! ## Full pipeline with calibration
//!
//! ```no_run
//! use scan_volume::calibration::CalibrationStore;
//! use scan_volume::pipeline::{PipelineConfig, ScanInput, VolumePipeline};
//! use scan_volume::PointCloud;
//!
//! let store = CalibrationStore::open("calibration.json").unwrap();
//! let pipeline = VolumePipeline::new(PipelineConfig::load("scan.toml").unwrap())
//!     .with_calibration(store);
//!
//! let cloud = PointCloud::new(); // from the capture source
//! let task = pipeline.spawn(ScanInput::new(cloud));
//! // ... poll task.status() or task.cancel() from the UI thread
//! let result = task.join().unwrap();
//! println!("{:.1} mL from {:?}", result.volume_ml(), result.source);
//! ```
//!
//! ## Density from a weighed object
//!
//! ```
//! use scan_volume::estimate_density;
//!
//! let result = estimate_density(0.150, 0.005, 0.000_120, 0.000_005);
//! let e = result.estimate().unwrap();
//! println!("{:.0} ± {:.0} kg/m³ ({})", e.density, e.uncertainty, e.tier);
//! ```
//!
//! # Error Handling
//!
//! Fallible operations return `VolumeResult<T>`, which is `Result<T, VolumeError>`.
//! Every error carries a stable [`ErrorCode`] and a [`RecoverySuggestion`].
//!
//! ```
//! use scan_volume::pipeline::{ScanInput, VolumePipeline};
//! use scan_volume::{PointCloud, VolumeError};
//!
//! match VolumePipeline::default().run(&ScanInput::at(PointCloud::new(), 0)) {
//!     Ok(m) => println!("{} m³", m.volume),
//!     Err(e @ VolumeError::InsufficientData { .. }) => {
//!         println!("[{}] {}: {}", e.code(), e, e.recovery_suggestion());
//!     }
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! # Troubleshooting
//!
//! ## "Using bounding volume estimate"
//!
//! The mesh quality score fell below the override threshold, usually
//! because the surface is not closed. Scan the object from more sides, or
//! check `result.mesh` for the warnings that lowered the score.
//!
//! ## "Points outside the TSDF grid were skipped"
//!
//! The grid was built for a different cloud than the one integrated. Build
//! grid parameters with [`GridConfig::fit`] from the cloud's own bounds.
//!
//! ## "Volume seems 10% off"
//!
//! Check that a calibration was applied (`result.calibration`). Calibrations
//! only apply to scans captured after them and expire after 30 days.

mod error;
mod types;

pub mod adjacency;
pub mod calibration;
pub mod decimate;
pub mod density;
pub mod measure;
pub mod pipeline;
pub mod pointcloud;
pub mod progress;
pub mod tracing_ext;
pub mod tsdf;
pub mod validate;

// Re-export core types at crate root
pub use error::{
    CalibrationFailure, ErrorCode, IssueSeverity, RecoverySuggestion, TopologyWarning,
    VolumeError, VolumeResult,
};
pub use types::{Mesh, Triangle, Vertex};

pub use adjacency::MeshAdjacency;

// Re-export the stage entry points
pub use calibration::{calibrate, CalibrationFrame, CalibrationResult, CalibrationStore, ReferenceObject};
pub use decimate::{decimate_mesh, decimate_mesh_with_progress, DecimateParams, DecimateResult};
pub use density::{estimate_density, estimate_weight, DensityEstimate, DensityResult, QualityTier};
pub use measure::{compute_surface_area, compute_volume, coarse_volume, measure, MeshMeasurement};
pub use pipeline::{PipelineConfig, ScanInput, ScanMeasurement, VolumePipeline, VolumeSource};
pub use pointcloud::{ConditioningParams, Denoiser, PointCloud, PointCloudConditioner};
pub use progress::{PipelineStage, Progress, ProgressCallback, RunHandle};
pub use tsdf::{GridConfig, GridParams, TsdfVolume};
pub use validate::{validate_mesh, validate_topology, MeshReport};

/// Condition a raw cloud with default smoothing.
pub fn condition(cloud: &PointCloud, params: &ConditioningParams) -> PointCloud {
    PointCloudConditioner::new(params.clone()).condition(cloud)
}

/// Fuse a cloud into a fresh TSDF and extract its zero level set.
///
/// An empty cloud gives an empty mesh. Invalid grid parameters fail with
/// `InvalidGridParameters`.
pub fn reconstruct(cloud: &PointCloud, params: &GridParams) -> VolumeResult<Mesh> {
    let mut volume = TsdfVolume::new(*params)?;
    volume.integrate_points_approx(cloud, 1.0)?;
    Ok(volume.extract_mesh(0.0))
}

/// Simplify a mesh down to at most `target_triangles` triangles.
pub fn simplify(mesh: &Mesh, target_triangles: usize) -> Mesh {
    decimate_mesh(mesh, &DecimateParams::with_target_triangles(target_triangles)).mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_reconstruct_empty_cloud() {
        let params = GridParams::new([64, 64, 64], Point3::origin(), 0.01, 0.03);
        let mesh = reconstruct(&PointCloud::new(), &params).unwrap();
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn test_reconstruct_rejects_bad_grid() {
        let params = GridParams::new([64, 64, 64], Point3::origin(), -0.01, 0.03);
        assert!(matches!(
            reconstruct(&PointCloud::new(), &params),
            Err(VolumeError::InvalidGridParameters { .. })
        ));
    }

    #[test]
    fn test_simplify_never_grows() {
        let mesh = crate::decimate::tests::make_sphere(1.0, 12, 12);
        let simplified = simplify(&mesh, 100);
        assert!(simplified.face_count() <= 100);
        assert!(simplified.has_valid_indices());
        assert_eq!(simplify(&mesh, 10_000).face_count(), mesh.face_count());
    }
}
