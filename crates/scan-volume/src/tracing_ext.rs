//! Tracing helpers for pipeline stages.
//!
//! Stage timings go to the `scan_volume::timing` target and state dumps to
//! `scan_volume::state`, so they can be filtered independently:
//!
//! ```text
//! RUST_LOG=scan_volume=info,scan_volume::timing=debug scanvol measure cloud.xyz
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: Degraded paths (fallback denoiser, bounding-volume fallback)
//! - **INFO**: Stage summaries and timing
//! - **DEBUG**: Per-stage detail and intermediate state
//! - **TRACE**: Per-slab and per-pass progress

use nalgebra::Vector3;
use std::time::Instant;
use tracing::{debug, info, Span};

use crate::measure::MeshMeasurement;
use crate::pointcloud::PointCloud;
use crate::types::Mesh;

/// Logs the duration of a stage when dropped.
///
/// ```
/// use scan_volume::tracing_ext::OperationTimer;
///
/// let timer = OperationTimer::new("downsample");
/// let _guard = timer.span().clone().entered();
/// assert!(timer.elapsed_ms() >= 0.0);
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("scan_stage", stage = name);
        debug!(target: "scan_volume::timing", stage = name, "Starting stage");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Timer for a stage working on `items` inputs (points or faces).
    pub fn with_size(name: &'static str, items: usize) -> Self {
        let span = tracing::info_span!("scan_stage", stage = name, items);
        debug!(target: "scan_volume::timing", stage = name, items, "Starting stage");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "scan_volume::timing",
            stage = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Stage completed"
        );
    }
}

/// Log a point cloud at debug level.
pub fn log_cloud_stats(cloud: &PointCloud, context: &str) {
    let extent = cloud
        .bounds()
        .map(|(min, max)| max - min)
        .unwrap_or_else(Vector3::zeros);
    debug!(
        target: "scan_volume::state",
        context,
        points = cloud.len(),
        normals = cloud.has_normals(),
        extent = format!("{:.4} x {:.4} x {:.4}", extent.x, extent.y, extent.z),
        "Point cloud state"
    );
}

/// Log a mesh at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let extent = mesh
        .bounds()
        .map(|(min, max)| max - min)
        .unwrap_or_else(Vector3::zeros);
    debug!(
        target: "scan_volume::state",
        context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        extent = format!("{:.4} x {:.4} x {:.4}", extent.x, extent.y, extent.z),
        "Mesh state"
    );
}

/// Log a finished measurement.
pub fn log_measurement(m: &MeshMeasurement) {
    info!(
        volume_m3 = m.volume,
        area_m2 = m.surface_area,
        quality = format!("{:.3}", m.quality_score),
        watertight = m.is_watertight,
        warnings = m.warnings.len(),
        "Mesh measured"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::with_size("test_stage", 3);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_empty_inputs() {
        log_cloud_stats(&PointCloud::default(), "test");
        log_mesh_stats(&Mesh::new(), "test");
    }
}
