//! End-to-end scan measurement.
//!
//! A run takes one captured point cloud through conditioning, TSDF fusion,
//! surface extraction, simplification and measurement, then applies the
//! current calibration. Stages run in order on the calling thread (or on a
//! worker thread via [`VolumePipeline::spawn`]) and check for cancellation
//! between and inside stages.
//!
//! When no trustworthy mesh comes out of the run, the result falls back to
//! the bounding-volume estimate and records why.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use scan_volume::pipeline::{PipelineConfig, ReconstructionStrategy, ScanInput, VolumeSource, VolumePipeline};
//! use scan_volume::{Mesh, PointCloud};
//!
//! let cube = Mesh::from_parts(
//!     [
//!         Point3::new(0.0, 0.0, 0.0), Point3::new(0.1, 0.0, 0.0),
//!         Point3::new(0.1, 0.1, 0.0), Point3::new(0.0, 0.1, 0.0),
//!         Point3::new(0.0, 0.0, 0.1), Point3::new(0.1, 0.0, 0.1),
//!         Point3::new(0.1, 0.1, 0.1), Point3::new(0.0, 0.1, 0.1),
//!     ],
//!     vec![
//!         [0, 2, 1], [0, 3, 2], [4, 5, 6], [4, 6, 7], [0, 1, 5], [0, 5, 4],
//!         [3, 7, 6], [3, 6, 2], [0, 4, 7], [0, 7, 3], [1, 2, 6], [1, 6, 5],
//!     ],
//! );
//!
//! let config = PipelineConfig {
//!     strategy: ReconstructionStrategy::DirectMesh,
//!     ..Default::default()
//! };
//! let input = ScanInput::at(PointCloud::new(), 0).with_mesh(cube);
//! let result = VolumePipeline::new(config).run(&input).unwrap();
//! assert_eq!(result.source, VolumeSource::Mesh);
//! assert!((result.volume - 0.001).abs() < 1e-9);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::{now_ms, CalibrationStore};
use crate::decimate::{decimate_mesh_with_progress, DecimateParams};
use crate::error::{VolumeError, VolumeResult};
use crate::measure::{coarse_volume, measure, CoarseVolume, MeshMeasurement, DEFAULT_OVERRIDE_THRESHOLD};
use crate::pointcloud::{is_finite_point, ConditioningParams, Denoiser, PointCloud, PointCloudConditioner};
use crate::progress::{PipelineStage, RunHandle};
use crate::tracing_ext::{log_cloud_stats, log_measurement, log_mesh_stats, OperationTimer};
use crate::tsdf::{GridConfig, IntegrationStats, TsdfVolume};
use crate::types::Mesh;

/// How the surface is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionStrategy {
    /// Fuse the point cloud into a TSDF and extract the zero level set.
    #[default]
    Tsdf,
    /// Measure a mesh supplied with the scan. No fusion.
    DirectMesh,
}

/// When and how far extracted meshes are simplified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplificationConfig {
    /// Set to false to never simplify.
    pub enabled: bool,
    /// Meshes with more triangles than this are simplified.
    pub threshold_triangles: usize,
    /// Triangle count to simplify down to.
    pub target_triangles: usize,
    /// Passed to [`DecimateParams::aggressiveness`].
    pub aggressiveness: f64,
    /// Pin boundary vertices of open meshes.
    pub preserve_boundary: bool,
}

impl Default for SimplificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_triangles: 20_000,
            target_triangles: 10_000,
            aggressiveness: 7.0,
            preserve_boundary: true,
        }
    }
}

impl SimplificationConfig {
    fn decimate_params(&self) -> DecimateParams {
        DecimateParams {
            aggressiveness: self.aggressiveness,
            preserve_boundary: self.preserve_boundary,
            ..DecimateParams::with_target_triangles(self.target_triangles)
        }
    }
}

/// Settings for a [`VolumePipeline`]. Loadable from TOML or JSON.
///
/// # Example TOML
///
/// ```toml
/// strategy = "tsdf"
/// override_threshold = 0.5
///
/// [conditioning]
/// min_confidence = 0.3
/// voxel_size = 0.002
///
/// [grid]
/// voxel_size = 0.002
/// truncation_factor = 5.0
///
/// [simplification]
/// threshold_triangles = 20000
/// target_triangles = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How the surface is obtained.
    pub strategy: ReconstructionStrategy,
    /// Minimum mesh quality score for the mesh volume to replace the
    /// bounding-volume estimate.
    pub override_threshold: f64,
    /// Point cloud conditioning.
    pub conditioning: ConditioningParams,
    /// TSDF grid sizing.
    pub grid: GridConfig,
    /// Mesh simplification policy.
    pub simplification: SimplificationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: ReconstructionStrategy::Tsdf,
            override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
            conditioning: ConditioningParams::default(),
            grid: GridConfig::default(),
            simplification: SimplificationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML config.
    pub fn from_toml(s: &str) -> VolumeResult<Self> {
        toml::from_str(s).map_err(|e| VolumeError::config(format!("TOML: {}", e)))
    }

    /// Serialize as TOML.
    pub fn to_toml(&self) -> VolumeResult<String> {
        toml::to_string_pretty(self).map_err(|e| VolumeError::config(format!("TOML: {}", e)))
    }

    /// Parse a JSON config.
    pub fn from_json(s: &str) -> VolumeResult<Self> {
        serde_json::from_str(s).map_err(|e| VolumeError::config(format!("JSON: {}", e)))
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> VolumeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| VolumeError::config(format!("JSON: {}", e)))
    }

    /// Read a config file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> VolumeResult<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| VolumeError::persistence_read(path, e))?;
        if is_json(path) {
            Self::from_json(&text)
        } else {
            Self::from_toml(&text)
        }
    }

    /// Write a config file in the format its extension names.
    pub fn save(&self, path: impl AsRef<Path>) -> VolumeResult<()> {
        let path = path.as_ref();
        let text = if is_json(path) {
            self.to_json()?
        } else {
            self.to_toml()?
        };
        std::fs::write(path, text).map_err(|e| VolumeError::persistence_write(path, e))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// One capture to measure.
#[derive(Debug, Clone, Default)]
pub struct ScanInput {
    /// Captured samples.
    pub cloud: PointCloud,
    /// Caller-supplied mesh for [`ReconstructionStrategy::DirectMesh`].
    pub mesh: Option<Mesh>,
    /// Capture time, unix milliseconds.
    pub captured_at_ms: u64,
}

impl ScanInput {
    /// A cloud captured now.
    pub fn new(cloud: PointCloud) -> Self {
        Self::at(cloud, now_ms())
    }

    /// A cloud captured at `captured_at_ms`.
    pub fn at(cloud: PointCloud, captured_at_ms: u64) -> Self {
        Self {
            cloud,
            mesh: None,
            captured_at_ms,
        }
    }

    /// Attach a surface for the direct-mesh strategy.
    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.mesh = Some(mesh);
        self
    }
}

/// Where the reported volume came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeSource {
    /// Enclosed volume of the reconstructed mesh.
    Mesh,
    /// Bounding-box estimate, because no usable mesh was available.
    BoundingVolume { reason: String },
}

/// Calibration used for a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedCalibration {
    /// Linear correction; volume scales by its cube.
    pub scale_factor: f64,
    /// When the calibration completed, unix milliseconds.
    pub timestamp_ms: u64,
    /// Reference object the calibration was made against.
    pub reference_id: String,
}

/// Triangle counts before and after simplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimplificationSummary {
    pub original_triangles: usize,
    pub final_triangles: usize,
}

/// Result of one run. Volumes in cubic meters, calibration applied.
#[derive(Debug, Clone, Serialize)]
pub struct ScanMeasurement {
    /// The reported volume.
    pub volume: f64,
    /// Mesh or bounding-volume fallback.
    pub source: VolumeSource,
    /// Mesh metrics, when a mesh was measured.
    pub mesh: Option<MeshMeasurement>,
    /// Bounding-volume estimate, when one could be computed.
    pub coarse: Option<CoarseVolume>,
    /// Calibration applied, if any was valid for the capture.
    pub calibration: Option<AppliedCalibration>,
    /// Samples in the capture.
    pub input_points: usize,
    /// Samples left after conditioning.
    pub conditioned_points: usize,
    /// TSDF integration counts; absent for the direct-mesh strategy.
    pub integration: Option<IntegrationStats>,
    /// Set when the mesh was simplified.
    pub simplification: Option<SimplificationSummary>,
    /// Capture time, unix milliseconds.
    pub captured_at_ms: u64,
    /// Surface used for measurement, before calibration scaling.
    #[serde(skip)]
    pub surface: Option<Mesh>,
}

impl ScanMeasurement {
    /// Volume in milliliters.
    pub fn volume_ml(&self) -> f64 {
        self.volume * 1e6
    }
}

/// Runs scans through the measurement stages.
#[derive(Debug, Clone)]
pub struct VolumePipeline {
    config: PipelineConfig,
    conditioner: PointCloudConditioner,
    calibration: Option<CalibrationStore>,
}

impl Default for VolumePipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl VolumePipeline {
    /// Pipeline with default smoothing and no calibration.
    pub fn new(config: PipelineConfig) -> Self {
        let conditioner = PointCloudConditioner::new(config.conditioning.clone());
        Self {
            config,
            conditioner,
            calibration: None,
        }
    }

    /// Denoise with an external model, falling back to default smoothing.
    pub fn with_denoiser(mut self, denoiser: Arc<dyn Denoiser>) -> Self {
        self.conditioner = self.conditioner.with_denoiser(denoiser);
        self
    }

    /// Apply calibrations from `store`.
    pub fn with_calibration(mut self, store: CalibrationStore) -> Self {
        self.calibration = Some(store);
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Measure a scan on the current thread.
    pub fn run(&self, input: &ScanInput) -> VolumeResult<ScanMeasurement> {
        self.run_with_handle(input, &RunHandle::new())
    }

    /// Measure a scan, reporting to and honoring cancellation from `handle`.
    pub fn run_with_handle(&self, input: &ScanInput, handle: &RunHandle) -> VolumeResult<ScanMeasurement> {
        let _timer = OperationTimer::with_size("scan", input.cloud.len());
        let outcome = self.execute(input, handle);
        match &outcome {
            Ok(m) => {
                handle.set_stage(PipelineStage::Finished);
                info!(
                    volume_ml = m.volume_ml(),
                    source = ?m.source,
                    calibrated = m.calibration.is_some(),
                    "Scan measured"
                );
            }
            Err(e) if e.is_cancelled() => {
                handle.set_stage(PipelineStage::Cancelled);
                info!(stage = %e, "Scan cancelled");
            }
            Err(e) => {
                handle.set_stage(PipelineStage::Failed);
                warn!(code = e.code().as_str(), error = %e, "Scan failed");
            }
        }
        outcome
    }

    /// Measure a scan on a worker thread.
    pub fn spawn(self, input: ScanInput) -> PipelineTask {
        self.spawn_with_handle(input, RunHandle::new())
    }

    /// Like [`spawn`](Self::spawn), observed through `handle`.
    pub fn spawn_with_handle(self, input: ScanInput, handle: RunHandle) -> PipelineTask {
        let worker = handle.clone();
        let thread = std::thread::spawn(move || self.run_with_handle(&input, &worker));
        PipelineTask { handle, thread }
    }

    fn execute(&self, input: &ScanInput, handle: &RunHandle) -> VolumeResult<ScanMeasurement> {
        handle.enter(PipelineStage::Conditioning)?;
        let conditioned = {
            let _timer = OperationTimer::with_size("conditioning", input.cloud.len());
            self.conditioner.condition(&input.cloud)
        };
        if !conditioned.positions.iter().all(is_finite_point) {
            return Err(VolumeError::non_finite(
                "conditioning",
                format!("{} non-finite positions", conditioned.non_finite_count()),
            ));
        }
        log_cloud_stats(&conditioned, "conditioned");

        let mut run = RunRecord {
            input_points: input.cloud.len(),
            conditioned_points: conditioned.len(),
            ..Default::default()
        };

        let surface = match self.config.strategy {
            ReconstructionStrategy::Tsdf => self.fuse(&conditioned, handle, &mut run)?,
            ReconstructionStrategy::DirectMesh => {
                let mesh = input.mesh.clone().ok_or_else(|| {
                    VolumeError::invalid_input("direct mesh reconstruction needs a mesh in the scan input")
                })?;
                handle.enter(PipelineStage::Fusion)?;
                handle.enter(PipelineStage::Extraction)?;
                ensure_finite_mesh(&mesh, "extraction")?;
                Some(mesh)
            }
        };

        handle.enter(PipelineStage::Simplification)?;
        let surface = match surface {
            Some(mesh) => Some(self.simplify(mesh, handle, &mut run)?),
            None => None,
        };

        handle.enter(PipelineStage::Measurement)?;
        let (measured, mesh_failure) = match &surface {
            Some(mesh) => {
                let _timer = OperationTimer::with_size("measurement", mesh.face_count());
                match measure(mesh) {
                    Ok(m) => {
                        log_measurement(&m);
                        (Some(m), None)
                    }
                    Err(e) => (None, Some(format!("mesh measurement failed: {}", e))),
                }
            }
            None => (None, run.no_mesh_reason.take()),
        };

        let coarse = if conditioned.is_empty() {
            let vertices: Vec<_> = surface
                .iter()
                .flat_map(|m| m.vertices.iter().map(|v| v.position))
                .collect();
            coarse_volume(&vertices)
        } else {
            coarse_volume(&conditioned.positions)
        };

        let (volume, source, coarse) = select_volume(
            measured.as_ref(),
            mesh_failure,
            coarse,
            self.config.override_threshold,
        )?;

        handle.enter(PipelineStage::Calibration)?;
        let calibration = self
            .calibration
            .as_ref()
            .and_then(|store| store.applicable_for(input.captured_at_ms));
        let (volume, measured, coarse, applied) = match calibration {
            Some(c) => {
                let s = c.scale_factor;
                debug!(scale_factor = s, reference = %c.reference_id, "Applying calibration");
                (
                    volume * s * s * s,
                    measured.map(|m| m.scaled(s)),
                    coarse.map(|cv| CoarseVolume {
                        aabb_volume: cv.aabb_volume * s * s * s,
                        obb_volume: cv.obb_volume * s * s * s,
                        volume: cv.volume * s * s * s,
                    }),
                    Some(AppliedCalibration {
                        scale_factor: s,
                        timestamp_ms: c.timestamp_ms,
                        reference_id: c.reference_id,
                    }),
                )
            }
            None => (volume, measured, coarse, None),
        };
        if !volume.is_finite() {
            return Err(VolumeError::non_finite("calibration", format!("volume = {}", volume)));
        }

        Ok(ScanMeasurement {
            volume,
            source,
            mesh: measured,
            coarse,
            calibration: applied,
            input_points: run.input_points,
            conditioned_points: run.conditioned_points,
            integration: run.integration,
            simplification: run.simplification,
            captured_at_ms: input.captured_at_ms,
            surface,
        })
    }

    /// Fusion and extraction. `None` when no surface came out.
    fn fuse(&self, cloud: &PointCloud, handle: &RunHandle, run: &mut RunRecord) -> VolumeResult<Option<Mesh>> {
        handle.enter(PipelineStage::Fusion)?;
        let (min, max) = cloud
            .bounds()
            .ok_or_else(|| VolumeError::insufficient_data("no points left after conditioning"))?;
        let params = self.config.grid.fit(min, max)?;
        let mut volume = TsdfVolume::new(params)?;
        {
            let _timer = OperationTimer::with_size("fusion", cloud.len());
            run.integration = Some(volume.integrate_points_approx(cloud, self.config.grid.integration_weight)?);
        }

        handle.enter(PipelineStage::Extraction)?;
        let callback = handle.as_callback();
        let mesh = {
            let _timer = OperationTimer::with_size("extraction", params.sample_count());
            volume.extract_mesh_with_progress(self.config.grid.isovalue, Some(&callback))?
        };
        if mesh.face_count() == 0 {
            warn!(observed = volume.observed_count(), "Surface extraction produced no triangles");
            run.no_mesh_reason = Some("surface extraction produced no triangles".to_string());
            return Ok(None);
        }
        ensure_finite_mesh(&mesh, "extraction")?;
        log_mesh_stats(&mesh, "extracted");
        Ok(Some(mesh))
    }

    fn simplify(&self, mesh: Mesh, handle: &RunHandle, run: &mut RunRecord) -> VolumeResult<Mesh> {
        let config = &self.config.simplification;
        if !config.enabled || mesh.face_count() <= config.threshold_triangles {
            return Ok(mesh);
        }
        let _timer = OperationTimer::with_size("simplification", mesh.face_count());
        let callback = handle.as_callback();
        let result = decimate_mesh_with_progress(&mesh, &config.decimate_params(), Some(&callback))?;
        ensure_finite_mesh(&result.mesh, "simplification")?;
        run.simplification = Some(SimplificationSummary {
            original_triangles: result.original_triangles,
            final_triangles: result.final_triangles,
        });
        log_mesh_stats(&result.mesh, "simplified");
        Ok(result.mesh)
    }
}

#[derive(Debug, Default)]
struct RunRecord {
    input_points: usize,
    conditioned_points: usize,
    integration: Option<IntegrationStats>,
    simplification: Option<SimplificationSummary>,
    no_mesh_reason: Option<String>,
}

fn ensure_finite_mesh(mesh: &Mesh, stage: &'static str) -> VolumeResult<()> {
    let bad = mesh
        .vertices
        .iter()
        .filter(|v| !is_finite_point(&v.position))
        .count();
    if bad > 0 {
        return Err(VolumeError::non_finite(stage, format!("{} non-finite vertices", bad)));
    }
    Ok(())
}

/// Pick the mesh volume if it is trustworthy, else the bounding volume.
fn select_volume(
    measured: Option<&MeshMeasurement>,
    mesh_failure: Option<String>,
    coarse: VolumeResult<CoarseVolume>,
    threshold: f64,
) -> VolumeResult<(f64, VolumeSource, Option<CoarseVolume>)> {
    let reason = match (measured, mesh_failure) {
        (Some(m), _) if m.overrides_coarse(threshold) => {
            return Ok((m.volume, VolumeSource::Mesh, coarse.ok()));
        }
        (Some(m), _) => format!(
            "mesh quality {:.2} below override threshold {:.2}",
            m.quality_score, threshold
        ),
        (None, Some(reason)) => reason,
        (None, None) => "no mesh available".to_string(),
    };

    match (coarse, measured) {
        (Ok(cv), _) => {
            warn!(%reason, volume = cv.volume, "Using bounding volume estimate");
            Ok((cv.volume, VolumeSource::BoundingVolume { reason }, Some(cv)))
        }
        (Err(e), Some(m)) if !e.is_cancelled() => {
            warn!(%reason, error = %e, "Bounding volume unavailable, keeping low-quality mesh volume");
            Ok((m.volume, VolumeSource::Mesh, None))
        }
        (Err(e), _) => Err(e),
    }
}

/// A run on a worker thread.
#[derive(Debug)]
pub struct PipelineTask {
    handle: RunHandle,
    thread: JoinHandle<VolumeResult<ScanMeasurement>>,
}

impl PipelineTask {
    /// Ask the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Current stage of the run.
    pub fn status(&self) -> PipelineStage {
        self.handle.stage()
    }

    /// Handle shared with the worker thread.
    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// True once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the result. A panic on the worker is resumed on the caller.
    pub fn join(self) -> VolumeResult<ScanMeasurement> {
        self.thread
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationResult, CALIBRATION_VALIDITY_MS};
    use crate::progress::Progress;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn cube(size: f64) -> Mesh {
        let s = size;
        Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(s, 0.0, 0.0),
                Point3::new(s, s, 0.0),
                Point3::new(0.0, s, 0.0),
                Point3::new(0.0, 0.0, s),
                Point3::new(s, 0.0, s),
                Point3::new(s, s, s),
                Point3::new(0.0, s, s),
            ],
            vec![
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [3, 7, 6],
                [3, 6, 2],
                [0, 4, 7],
                [0, 7, 3],
                [1, 2, 6],
                [1, 6, 5],
            ],
        )
    }

    fn direct() -> VolumePipeline {
        VolumePipeline::new(PipelineConfig {
            strategy: ReconstructionStrategy::DirectMesh,
            ..Default::default()
        })
    }

    /// Points with outward normals on a sphere, roughly evenly spaced.
    pub(crate) fn sphere_cloud(radius: f64, n: usize) -> PointCloud {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let mut positions = Vec::with_capacity(n);
        let mut normals = Vec::with_capacity(n);
        for i in 0..n {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f64;
            let dir = Vector3::new(r * theta.cos(), y, r * theta.sin());
            positions.push(Point3::from(dir * radius));
            normals.push(dir);
        }
        PointCloud::from_parts(positions, Some(normals), None).unwrap()
    }

    fn calibration_at(timestamp_ms: u64, scale_factor: f64) -> CalibrationResult {
        CalibrationResult {
            scale_factor,
            depth_bias: [0.0, 0.0],
            quality_score: 100.0,
            frame_count: 3,
            valid_frame_count: 3,
            timestamp_ms,
            reference_id: "credit_card".into(),
            regression_mse: None,
        }
    }

    #[test]
    fn test_sphere_scan_volume() {
        let radius = 0.05;
        let config = PipelineConfig {
            conditioning: ConditioningParams {
                voxel_size: 0.003,
                ..Default::default()
            },
            grid: GridConfig {
                voxel_size: 0.004,
                truncation_factor: 3.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let input = ScanInput::at(sphere_cloud(radius, 4000), 0);
        let result = VolumePipeline::new(config).run(&input).unwrap();

        let expected = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);
        assert_eq!(result.source, VolumeSource::Mesh);
        assert!(
            (result.volume - expected).abs() / expected < 0.10,
            "volume {} vs {}",
            result.volume,
            expected
        );
        assert!(result.mesh.as_ref().unwrap().is_watertight);
        assert!(result.integration.unwrap().integrated > 0);
        assert!(result.conditioned_points <= result.input_points);
    }

    #[test]
    fn test_direct_mesh() {
        let input = ScanInput::at(PointCloud::new(), 0).with_mesh(cube(1.0));
        let result = direct().run(&input).unwrap();
        assert_eq!(result.source, VolumeSource::Mesh);
        assert_relative_eq!(result.volume, 1.0, epsilon = 1e-9);
        assert!(result.calibration.is_none());
        assert!(result.integration.is_none());
    }

    #[test]
    fn test_direct_mesh_requires_mesh() {
        let err = direct().run(&ScanInput::at(PointCloud::new(), 0)).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidInput { .. }));
    }

    #[test]
    fn test_empty_cloud_is_insufficient() {
        let err = VolumePipeline::default()
            .run(&ScanInput::at(PointCloud::new(), 0))
            .unwrap_err();
        assert!(matches!(err, VolumeError::InsufficientData { .. }));
    }

    #[test]
    fn test_open_mesh_falls_back_to_bounding_volume() {
        let mut mesh = cube(1.0);
        mesh.faces.pop();
        let input = ScanInput::at(PointCloud::new(), 0).with_mesh(mesh);
        let result = direct().run(&input).unwrap();
        match &result.source {
            VolumeSource::BoundingVolume { reason } => assert!(reason.contains("quality")),
            other => panic!("expected bounding volume, got {:?}", other),
        }
        assert_relative_eq!(result.volume, 1.0, epsilon = 1e-6);
        assert!(!result.mesh.unwrap().is_watertight);
    }

    #[test]
    fn test_calibration_applied_cubically() {
        let store = CalibrationStore::in_memory();
        store.replace(calibration_at(1_000, 0.9)).unwrap();
        let pipeline = direct().with_calibration(store);

        let result = pipeline
            .run(&ScanInput::at(PointCloud::new(), 2_000).with_mesh(cube(1.0)))
            .unwrap();
        assert_relative_eq!(result.volume, 0.729, epsilon = 1e-9);
        assert_relative_eq!(result.mesh.as_ref().unwrap().surface_area, 6.0 * 0.81, epsilon = 1e-9);
        assert_eq!(result.calibration.unwrap().scale_factor, 0.9);
    }

    #[test]
    fn test_calibration_not_applied_to_earlier_or_stale_scans() {
        let store = CalibrationStore::in_memory();
        store.replace(calibration_at(1_000, 0.9)).unwrap();
        let pipeline = direct().with_calibration(store);

        for captured_at in [500, 1_000, 1_000 + CALIBRATION_VALIDITY_MS + 1] {
            let result = pipeline
                .run(&ScanInput::at(PointCloud::new(), captured_at).with_mesh(cube(1.0)))
                .unwrap();
            assert!(result.calibration.is_none(), "applied at {}", captured_at);
            assert_relative_eq!(result.volume, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let handle = RunHandle::new();
        handle.cancel();
        let input = ScanInput::at(PointCloud::new(), 0).with_mesh(cube(1.0));
        let err = direct().run_with_handle(&input, &handle).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(handle.stage(), PipelineStage::Cancelled);
    }

    #[test]
    fn test_callback_cancels_at_stage() {
        let handle = RunHandle::with_callback(Box::new(|p: &Progress| p.message != "measurement"));
        let input = ScanInput::at(PointCloud::new(), 0).with_mesh(cube(1.0));
        let err = direct().run_with_handle(&input, &handle).unwrap_err();
        assert!(matches!(err, VolumeError::Cancelled { stage: "measurement" }));
    }

    #[test]
    fn test_spawn_and_join() {
        let task = direct().spawn(ScanInput::at(PointCloud::new(), 0).with_mesh(cube(2.0)));
        let handle = task.handle().clone();
        let result = task.join().unwrap();
        assert_relative_eq!(result.volume, 8.0, epsilon = 1e-9);
        assert_eq!(handle.stage(), PipelineStage::Finished);
    }

    #[test]
    fn test_simplification_kicks_in_above_threshold() {
        let config = PipelineConfig {
            strategy: ReconstructionStrategy::DirectMesh,
            simplification: SimplificationConfig {
                threshold_triangles: 200,
                target_triangles: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        let mesh = crate::decimate::tests::make_sphere(1.0, 16, 16);
        let original = mesh.face_count();
        assert!(original > 200);

        let result = VolumePipeline::new(config)
            .run(&ScanInput::at(PointCloud::new(), 0).with_mesh(mesh))
            .unwrap();
        let summary = result.simplification.unwrap();
        assert_eq!(summary.original_triangles, original);
        assert!(summary.final_triangles <= 100);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = PipelineConfig {
            strategy: ReconstructionStrategy::DirectMesh,
            override_threshold: 0.7,
            ..Default::default()
        };
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("direct_mesh"));
        assert_eq!(PipelineConfig::from_toml(&toml).unwrap(), config);
        assert_eq!(PipelineConfig::from_json(&config.to_json().unwrap()).unwrap(), config);

        let partial = PipelineConfig::from_toml("override_threshold = 0.8\n[grid]\nvoxel_size = 0.005\n").unwrap();
        assert_eq!(partial.override_threshold, 0.8);
        assert_eq!(partial.grid.voxel_size, 0.005);
        assert_eq!(partial.grid.truncation_factor, 5.0);

        assert!(matches!(
            PipelineConfig::from_toml("strategy = 3"),
            Err(VolumeError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_config_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pipeline.toml", "pipeline.json"] {
            let path = dir.path().join(name);
            PipelineConfig::default().save(&path).unwrap();
            assert_eq!(PipelineConfig::load(&path).unwrap(), PipelineConfig::default());
        }
    }
}
