//! Truncated signed distance fusion.
//!
//! A [`TsdfVolume`] is a dense lattice of signed distance samples. Points are
//! splatted into it with [`TsdfVolume::integrate_points_approx`]; each sample
//! within the truncation band of a point receives the signed point-to-plane
//! distance along the point's normal, averaged with what it already holds.
//! The zero level set of the fused field is the reconstructed surface, which
//! [`TsdfVolume::extract_mesh`] turns into triangles with marching cubes.
//!
//! Distances are negative inside the object and positive outside.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use scan_volume::tsdf::{GridParams, TsdfVolume};
//!
//! let params = GridParams::new([64, 64, 64], Point3::origin(), 0.002, 0.01);
//! let volume = TsdfVolume::new(params).unwrap();
//! let mesh = volume.extract_mesh(0.0);
//! assert!(mesh.is_empty());
//! ```

mod marching_cubes;
pub(crate) mod tables;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{VolumeError, VolumeResult};
use crate::pointcloud::{is_finite_point, PointCloud};

/// Smallest allowed lattice dimension per axis.
pub const MIN_GRID_DIM: usize = 64;

/// Largest allowed lattice dimension per axis.
pub const MAX_GRID_DIM: usize = 256;

/// Geometry of a TSDF lattice.
///
/// Sample `(i, j, k)` sits at `origin + voxel_size * (i, j, k)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// Samples per axis.
    pub dims: [usize; 3],

    /// World position of sample `(0, 0, 0)`.
    pub origin: Point3<f64>,

    /// Lattice spacing in meters.
    pub voxel_size: f64,

    /// Half-width of the distance band in meters.
    pub truncation: f64,
}

impl GridParams {
    /// Grid parameters, unchecked until [`validate`](Self::validate).
    pub fn new(dims: [usize; 3], origin: Point3<f64>, voxel_size: f64, truncation: f64) -> Self {
        Self {
            dims,
            origin,
            voxel_size,
            truncation,
        }
    }

    /// Check dimensions, spacing, truncation and origin.
    pub fn validate(&self) -> VolumeResult<()> {
        for (axis, &d) in self.dims.iter().enumerate() {
            if !(MIN_GRID_DIM..=MAX_GRID_DIM).contains(&d) {
                return Err(VolumeError::invalid_grid(format!(
                    "dimension {} along axis {} outside [{}, {}]",
                    d, axis, MIN_GRID_DIM, MAX_GRID_DIM
                )));
            }
        }
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(VolumeError::invalid_grid(format!(
                "voxel size must be positive and finite, got {}",
                self.voxel_size
            )));
        }
        if !(self.truncation.is_finite() && self.truncation > 0.0) {
            return Err(VolumeError::invalid_grid(format!(
                "truncation must be positive and finite, got {}",
                self.truncation
            )));
        }
        if !is_finite_point(&self.origin) {
            return Err(VolumeError::invalid_grid("origin has non-finite coordinates"));
        }
        Ok(())
    }

    /// Derive a grid that covers `[min, max]` with room for the truncation band.
    ///
    /// The grid is centered on the box. When the box needs more than
    /// [`MAX_GRID_DIM`] samples along some axis at `voxel_size`, the spacing
    /// is coarsened until it fits; small boxes are padded up to
    /// [`MIN_GRID_DIM`].
    pub fn fit_to_bounds(
        min: Point3<f64>,
        max: Point3<f64>,
        voxel_size: f64,
        truncation_factor: f64,
    ) -> VolumeResult<Self> {
        if !is_finite_point(&min) || !is_finite_point(&max) {
            return Err(VolumeError::invalid_grid("bounds have non-finite coordinates"));
        }
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(VolumeError::invalid_grid(format!(
                "voxel size must be positive and finite, got {}",
                voxel_size
            )));
        }
        if !(truncation_factor.is_finite() && truncation_factor > 0.0) {
            return Err(VolumeError::invalid_grid(format!(
                "truncation factor must be positive and finite, got {}",
                truncation_factor
            )));
        }

        let extent = max - min;
        if extent.iter().any(|&e| e < 0.0) {
            return Err(VolumeError::invalid_grid("bounds minimum exceeds maximum"));
        }

        let padding = truncation_factor.ceil() as usize + 2;
        // ceil(extent / voxel) + 2 * padding + 1 must not exceed the limit.
        let usable = MAX_GRID_DIM.saturating_sub(2 * padding + 2).max(1) as f64;
        let voxel_size = voxel_size.max(extent.max() / usable);
        if !voxel_size.is_finite() {
            return Err(VolumeError::invalid_grid("bounds too large to grid"));
        }

        let mut dims = [0usize; 3];
        let mut origin = Point3::origin();
        let center = nalgebra::center(&min, &max);
        for axis in 0..3 {
            let cells = (extent[axis] / voxel_size).ceil() as usize;
            let d = (cells + 2 * padding + 1).clamp(MIN_GRID_DIM, MAX_GRID_DIM);
            dims[axis] = d;
            origin[axis] = center[axis] - (d - 1) as f64 * voxel_size * 0.5;
        }

        let params = Self {
            dims,
            origin,
            voxel_size,
            truncation: truncation_factor * voxel_size,
        };
        params.validate()?;
        Ok(params)
    }

    /// Total sample count.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// World position of lattice sample `(i, j, k)`.
    #[inline]
    pub fn sample_position(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.origin + Vector3::new(i as f64, j as f64, k as f64) * self.voxel_size
    }
}

/// User-facing fusion settings, resolved into [`GridParams`] per scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Requested lattice spacing in meters. Coarsened for large objects.
    pub voxel_size: f64,

    /// Truncation distance as a multiple of the voxel size.
    pub truncation_factor: f64,

    /// Weight each point contributes.
    pub integration_weight: f32,

    /// Isovalue for surface extraction.
    pub isovalue: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.002,
            truncation_factor: 5.0,
            integration_weight: 1.0,
            isovalue: 0.0,
        }
    }
}

impl GridConfig {
    /// Grid parameters covering a bounding box.
    pub fn fit(&self, min: Point3<f64>, max: Point3<f64>) -> VolumeResult<GridParams> {
        GridParams::fit_to_bounds(min, max, self.voxel_size, self.truncation_factor)
    }
}

/// Outcome of one integration call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationStats {
    /// Points splatted into the grid.
    pub integrated: usize,
    /// Points whose voxel lies outside the grid.
    pub skipped_out_of_bounds: usize,
    /// Points with NaN or infinite coordinates or normals.
    pub skipped_non_finite: usize,
    /// Points with no usable normal direction.
    pub skipped_no_direction: usize,
    /// Lattice samples updated, counted once per update.
    pub samples_updated: usize,
}

/// Dense truncated signed distance field.
///
/// Samples start unobserved (weight 0, distance = +truncation).
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    params: GridParams,
    distances: Vec<f32>,
    weights: Vec<f32>,
}

impl TsdfVolume {
    /// Allocate a fresh volume. Fails with `InvalidGridParameters` on bad geometry.
    pub fn new(params: GridParams) -> VolumeResult<Self> {
        params.validate()?;
        let n = params.sample_count();
        Ok(Self {
            params,
            distances: vec![params.truncation as f32; n],
            weights: vec![0.0; n],
        })
    }

    /// Grid geometry.
    #[inline]
    pub fn params(&self) -> &GridParams {
        &self.params
    }

    /// Samples per axis.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.params.dims
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.params.dims;
        i + nx * (j + ny * k)
    }

    /// Distance stored at `(i, j, k)`, or `None` outside the grid.
    pub fn distance(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        self.in_bounds(i, j, k)
            .then(|| self.distances[self.index(i, j, k)])
    }

    /// Weight stored at `(i, j, k)`, or `None` outside the grid.
    pub fn weight(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        self.in_bounds(i, j, k).then(|| self.weights[self.index(i, j, k)])
    }

    #[inline]
    fn in_bounds(&self, i: usize, j: usize, k: usize) -> bool {
        let [nx, ny, nz] = self.params.dims;
        i < nx && j < ny && k < nz
    }

    /// Number of samples with non-zero weight.
    pub fn observed_count(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }

    /// Splat points into the field.
    ///
    /// Each point updates every lattice sample within the truncation distance
    /// with `clamp((x - p) . n, -truncation, truncation)`, where `n` is the
    /// point's normal, or the direction away from the cloud centroid when the
    /// cloud has none. Points outside the grid are skipped, not rejected.
    ///
    /// `weight` must be positive and finite.
    pub fn integrate_points_approx(
        &mut self,
        cloud: &PointCloud,
        weight: f32,
    ) -> VolumeResult<IntegrationStats> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(VolumeError::invalid_input(format!(
                "integration weight must be positive and finite, got {}",
                weight
            )));
        }

        let mut stats = IntegrationStats::default();
        let centroid = if cloud.has_normals() {
            None
        } else {
            cloud.centroid()
        };

        let voxel = self.params.voxel_size;
        let trunc = self.params.truncation;
        let reach = (trunc / voxel).ceil() as i64;
        let trunc_sq = trunc * trunc;
        let dims = self.params.dims.map(|d| d as i64);

        for (idx, p) in cloud.positions.iter().enumerate() {
            if !is_finite_point(p) {
                stats.skipped_non_finite += 1;
                continue;
            }

            let normal = match (cloud.normal(idx), centroid) {
                (Some(n), _) => {
                    if !n.iter().all(|c| c.is_finite()) {
                        stats.skipped_non_finite += 1;
                        continue;
                    }
                    n.try_normalize(1e-12)
                }
                (None, Some(c)) => (p - c).try_normalize(1e-12),
                (None, None) => None,
            };
            let Some(normal) = normal else {
                stats.skipped_no_direction += 1;
                continue;
            };

            let Some(cell) = self.containing_cell(p) else {
                stats.skipped_out_of_bounds += 1;
                continue;
            };

            let lo = cell.map(|c| (c - reach).max(0));
            let hi = [0, 1, 2].map(|a| (cell[a] + reach + 1).min(dims[a] - 1));

            for k in lo[2]..=hi[2] {
                for j in lo[1]..=hi[1] {
                    for i in lo[0]..=hi[0] {
                        let (i, j, k) = (i as usize, j as usize, k as usize);
                        let offset = self.params.sample_position(i, j, k) - p;
                        if offset.norm_squared() > trunc_sq {
                            continue;
                        }
                        let sdf = offset.dot(&normal).clamp(-trunc, trunc) as f32;
                        let at = self.index(i, j, k);
                        let w_old = self.weights[at];
                        let w_new = w_old + weight;
                        self.distances[at] = (self.distances[at] * w_old + sdf * weight) / w_new;
                        self.weights[at] = w_new;
                        stats.samples_updated += 1;
                    }
                }
            }
            stats.integrated += 1;
        }

        if stats.skipped_out_of_bounds > 0 {
            warn!(
                skipped = stats.skipped_out_of_bounds,
                "Points outside the TSDF grid were skipped"
            );
        }
        debug!(
            integrated = stats.integrated,
            skipped_non_finite = stats.skipped_non_finite,
            skipped_no_direction = stats.skipped_no_direction,
            samples_updated = stats.samples_updated,
            "Integrated points into TSDF"
        );
        Ok(stats)
    }

    /// Lattice cell containing `p`, or `None` when outside the grid.
    ///
    /// `p` must already be finite.
    fn containing_cell(&self, p: &Point3<f64>) -> Option<[i64; 3]> {
        let local = (p - self.params.origin) / self.params.voxel_size;
        let mut cell = [0i64; 3];
        for axis in 0..3 {
            let f = local[axis].floor();
            if !f.is_finite() || f < 0.0 || f >= self.params.dims[axis] as f64 {
                return None;
            }
            cell[axis] = f as i64;
        }
        Some(cell)
    }
}
