//! Point cloud storage and conditioning.
//!
//! Raw depth-sensor clouds are dense, noisy and partly garbage. Conditioning
//! turns them into something fusion can digest:
//!
//! 1. Drop samples with non-finite coordinates or low confidence
//! 2. Voxel-grid downsampling ([`downsample`])
//! 3. Optional statistical outlier removal ([`remove_outliers`])
//! 4. Denoising through a pluggable [`Denoiser`], with
//!    [`SpatialHashSmoother`] as the always-available default
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use scan_volume::pointcloud::{downsample, PointCloud};
//!
//! let cloud = PointCloud::from_positions(vec![
//!     Point3::new(0.0001, 0.0001, 0.0),
//!     Point3::new(0.0002, 0.0003, 0.0),
//!     Point3::new(0.0150, 0.0000, 0.0),
//! ]);
//! let reduced = downsample(&cloud, 0.005);
//! assert_eq!(reduced.len(), 2);
//! ```
//!
//! # Units
//!
//! Positions are meters in the sensor's world frame.

use std::sync::Arc;

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{VolumeError, VolumeResult};

/// Confidence assumed for samples that carry none.
pub const DEFAULT_CONFIDENCE: f32 = 0.6;

/// Integer cell coordinates of a uniform grid.
pub type CellKey = (i64, i64, i64);

/// Point samples stored as parallel sequences.
///
/// `positions[i]`, `normals[i]` and `confidences[i]` describe the same sample.
/// Normals and confidences are optional as a whole; a cloud either has them
/// for every sample or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// Sample positions in meters.
    pub positions: Vec<Point3<f64>>,

    /// Unit normals, if the sensor provided them.
    pub normals: Option<Vec<Vector3<f64>>>,

    /// Per-sample confidence in [0, 1].
    pub confidences: Option<Vec<f32>>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloud with positions only.
    pub fn from_positions(positions: Vec<Point3<f64>>) -> Self {
        Self {
            positions,
            normals: None,
            confidences: None,
        }
    }

    /// Cloud from parallel attribute sequences.
    ///
    /// Fails with `InvalidInput` when the sequences have different lengths.
    pub fn from_parts(
        positions: Vec<Point3<f64>>,
        normals: Option<Vec<Vector3<f64>>>,
        confidences: Option<Vec<f32>>,
    ) -> VolumeResult<Self> {
        if let Some(n) = &normals {
            if n.len() != positions.len() {
                return Err(VolumeError::invalid_input(format!(
                    "{} normals for {} positions",
                    n.len(),
                    positions.len()
                )));
            }
        }
        if let Some(c) = &confidences {
            if c.len() != positions.len() {
                return Err(VolumeError::invalid_input(format!(
                    "{} confidences for {} positions",
                    c.len(),
                    positions.len()
                )));
            }
        }
        Ok(Self {
            positions,
            normals,
            confidences,
        })
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True if the cloud has no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// True if the cloud carries normals.
    #[inline]
    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    /// Normal of sample `i`, if present.
    #[inline]
    pub fn normal(&self, i: usize) -> Option<Vector3<f64>> {
        self.normals.as_ref().and_then(|n| n.get(i).copied())
    }

    /// Confidence of sample `i`, [`DEFAULT_CONFIDENCE`] when absent.
    #[inline]
    pub fn confidence(&self, i: usize) -> f32 {
        self.confidences
            .as_ref()
            .and_then(|c| c.get(i).copied())
            .unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// Axis-aligned bounding box of the finite samples.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let mut finite = self.positions.iter().filter(|p| is_finite_point(p));
        let first = *finite.next()?;
        Some(finite.fold((first, first), |(min, max), p| {
            (min.inf(p), max.sup(p))
        }))
    }

    /// Mean of the finite sample positions.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        let (sum, count) = self
            .positions
            .iter()
            .filter(|p| is_finite_point(p))
            .fold((Vector3::zeros(), 0usize), |(s, n), p| (s + p.coords, n + 1));
        (count > 0).then(|| Point3::from(sum / count as f64))
    }

    /// Number of samples with a NaN or infinite coordinate or normal.
    pub fn non_finite_count(&self) -> usize {
        (0..self.len())
            .filter(|&i| {
                !is_finite_point(&self.positions[i])
                    || self
                        .normal(i)
                        .is_some_and(|n| !n.iter().all(|c| c.is_finite()))
            })
            .count()
    }

    /// New cloud holding the samples at `indices`, attributes kept aligned.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            positions: indices.iter().map(|&i| self.positions[i]).collect(),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
            confidences: self
                .confidences
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
        }
    }

    /// Scale all positions uniformly around the origin.
    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.positions {
            p.coords *= factor;
        }
    }
}

#[inline]
pub(crate) fn is_finite_point(p: &Point3<f64>) -> bool {
    p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
}

/// Grid cell containing `p`, or `None` if the coordinates cannot be indexed.
#[inline]
pub fn cell_key(p: &Point3<f64>, cell_size: f64) -> Option<CellKey> {
    const LIMIT: f64 = (1u64 << 52) as f64;
    let fx = (p.x / cell_size).floor();
    let fy = (p.y / cell_size).floor();
    let fz = (p.z / cell_size).floor();
    if [fx, fy, fz].iter().all(|v| v.is_finite() && v.abs() < LIMIT) {
        Some((fx as i64, fy as i64, fz as i64))
    } else {
        None
    }
}

/// Replace the samples in each occupied grid cell with their centroid.
///
/// Cells are keyed by `floor(position / voxel_size)` and emitted in order of
/// first occurrence. Normals are averaged and renormalized, confidences
/// averaged. When rounding pushes a centroid out of its own cell, the cell's
/// first sample is emitted instead, so running this twice with the same voxel
/// size leaves the count unchanged.
///
/// Non-finite samples are dropped. A non-positive or non-finite voxel size
/// returns the input unchanged.
pub fn downsample(cloud: &PointCloud, voxel_size: f64) -> PointCloud {
    if cloud.is_empty() {
        return PointCloud::new();
    }
    if !(voxel_size > 0.0 && voxel_size.is_finite()) {
        warn!(voxel_size, "Invalid voxel size, skipping downsampling");
        return cloud.clone();
    }

    struct Cell {
        key: CellKey,
        first: usize,
        position_sum: Vector3<f64>,
        normal_sum: Vector3<f64>,
        confidence_sum: f64,
        count: usize,
    }

    let mut slots: HashMap<CellKey, usize> = HashMap::new();
    let mut cells: Vec<Cell> = Vec::new();
    let mut dropped = 0usize;

    for (i, p) in cloud.positions.iter().enumerate() {
        let Some(key) = cell_key(p, voxel_size).filter(|_| is_finite_point(p)) else {
            dropped += 1;
            continue;
        };
        let slot = *slots.entry(key).or_insert_with(|| {
            cells.push(Cell {
                key,
                first: i,
                position_sum: Vector3::zeros(),
                normal_sum: Vector3::zeros(),
                confidence_sum: 0.0,
                count: 0,
            });
            cells.len() - 1
        });
        let cell = &mut cells[slot];
        cell.position_sum += p.coords;
        if let Some(n) = cloud.normal(i).filter(|n| n.iter().all(|c| c.is_finite())) {
            cell.normal_sum += n;
        }
        cell.confidence_sum += f64::from(cloud.confidence(i));
        cell.count += 1;
    }

    let mut positions = Vec::with_capacity(cells.len());
    let mut normals = cloud.normals.as_ref().map(|_| Vec::with_capacity(cells.len()));
    let mut confidences = cloud
        .confidences
        .as_ref()
        .map(|_| Vec::with_capacity(cells.len()));

    for cell in &cells {
        let centroid = Point3::from(cell.position_sum / cell.count as f64);
        let position = if cell_key(&centroid, voxel_size) == Some(cell.key) {
            centroid
        } else {
            cloud.positions[cell.first]
        };
        positions.push(position);

        if let Some(out) = normals.as_mut() {
            let fallback = cloud.normal(cell.first).unwrap_or_else(Vector3::z);
            out.push(cell.normal_sum.try_normalize(1e-12).unwrap_or(fallback));
        }
        if let Some(out) = confidences.as_mut() {
            out.push((cell.confidence_sum / cell.count as f64) as f32);
        }
    }

    debug!(
        input = cloud.len(),
        output = positions.len(),
        dropped,
        voxel_size,
        "Downsampled point cloud"
    );

    PointCloud {
        positions,
        normals,
        confidences,
    }
}

/// Drop samples whose confidence is below `min_confidence`.
pub fn filter_confidence(cloud: &PointCloud, min_confidence: f32) -> PointCloud {
    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| cloud.confidence(i) >= min_confidence)
        .collect();
    if keep.len() < cloud.len() {
        debug!(
            removed = cloud.len() - keep.len(),
            min_confidence, "Filtered low-confidence samples"
        );
    }
    cloud.select(&keep)
}

/// Drop samples with non-finite coordinates or normals.
pub fn drop_non_finite(cloud: &PointCloud) -> PointCloud {
    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| {
            is_finite_point(&cloud.positions[i])
                && cloud
                    .normal(i)
                    .map_or(true, |n| n.iter().all(|c| c.is_finite()))
        })
        .collect();
    if keep.len() < cloud.len() {
        warn!(removed = cloud.len() - keep.len(), "Dropped non-finite samples");
    }
    cloud.select(&keep)
}

/// Remove statistical outliers.
///
/// Samples whose mean distance to their `k` nearest neighbors exceeds
/// `mean + std_ratio * std` are removed.
pub fn remove_outliers(cloud: &PointCloud, k: usize, std_ratio: f64) -> PointCloud {
    if k == 0 || cloud.len() <= k {
        return cloud.clone();
    }

    let kdtree = build_kdtree(cloud);

    let mean_distances: Vec<f64> = cloud
        .positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let neighbors = kdtree.nearest_n::<kiddo::SquaredEuclidean>(&[p.x, p.y, p.z], std::num::NonZero::new(k + 1).unwrap());
            let (sum, count) = neighbors
                .iter()
                .filter(|n| n.item as usize != i)
                .take(k)
                .fold((0.0, 0usize), |(s, c), n| (s + n.distance.sqrt(), c + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        })
        .collect();

    let global_mean = mean_distances.iter().sum::<f64>() / mean_distances.len() as f64;
    let variance = mean_distances
        .iter()
        .map(|d| (d - global_mean).powi(2))
        .sum::<f64>()
        / mean_distances.len() as f64;
    let threshold = global_mean + std_ratio * variance.sqrt();

    let keep: Vec<usize> = mean_distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d <= threshold)
        .map(|(i, _)| i)
        .collect();

    debug!(
        removed = cloud.len() - keep.len(),
        threshold, "Removed statistical outliers"
    );
    cloud.select(&keep)
}

/// Items are indices into `cloud.positions`. The immutable tree accepts any
/// number of samples sharing a coordinate, which lattice and planar scans do.
fn build_kdtree(cloud: &PointCloud) -> kiddo::ImmutableKdTree<f64, 3> {
    let points: Vec<[f64; 3]> = cloud.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
    kiddo::ImmutableKdTree::new_from_slice(&points)
}

/// A `points -> points` denoising strategy.
///
/// Implementations must not return more samples than they receive, and must
/// keep attribute sequences aligned.
pub trait Denoiser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Denoise a cloud.
    fn denoise(&self, cloud: &PointCloud) -> VolumeResult<PointCloud>;
}

/// Parameters for the default spatial-hash smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    /// Spatial hash cell size in meters.
    pub cell_size: f64,

    /// Neighbor search radius in meters.
    pub radius: f64,

    /// Weight kept on the original position, in (0, 1). The rest goes to the
    /// neighbor centroid.
    pub blend: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            cell_size: 0.004,
            radius: 0.004,
            blend: 0.6,
        }
    }
}

/// Most cells the smoother scans along each axis on either side of a sample.
pub const MAX_CELL_REACH: i64 = 4;

/// Default denoiser: blend each sample toward the centroid of its neighbors.
///
/// Samples are bucketed into a spatial hash of `cell_size` cells; neighbors
/// are gathered from the cells overlapping the search radius. A sample with
/// no neighbors is left where it is. Sample count never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialHashSmoother {
    params: SmoothingParams,
}

impl SpatialHashSmoother {
    /// Smoother with the given parameters.
    ///
    /// Out-of-range values are clamped: the blend into (0, 1), sizes to
    /// something positive. The cell size is raised to at least
    /// `radius / MAX_CELL_REACH` so the neighbor scan stays bounded.
    pub fn new(params: SmoothingParams) -> Self {
        let defaults = SmoothingParams::default();
        let positive = |v: f64, d: f64| if v > 0.0 && v.is_finite() { v } else { d };
        let radius = positive(params.radius, defaults.radius);
        let cell_size = positive(params.cell_size, defaults.cell_size)
            .max(radius / MAX_CELL_REACH as f64);
        Self {
            params: SmoothingParams {
                cell_size,
                radius,
                blend: if params.blend > 0.0 && params.blend < 1.0 {
                    params.blend
                } else {
                    defaults.blend
                },
            },
        }
    }

    /// Parameters in effect.
    pub fn params(&self) -> &SmoothingParams {
        &self.params
    }

    fn smooth(&self, cloud: &PointCloud) -> PointCloud {
        let SmoothingParams {
            cell_size,
            radius,
            blend,
        } = self.params;

        let mut grid: HashMap<CellKey, Vec<u32>> = HashMap::new();
        for (i, p) in cloud.positions.iter().enumerate() {
            if let Some(key) = cell_key(p, cell_size) {
                grid.entry(key).or_default().push(i as u32);
            }
        }

        let reach = ((radius / cell_size).ceil() as i64).clamp(1, MAX_CELL_REACH);
        let radius_sq = radius * radius;

        let positions: Vec<Point3<f64>> = cloud
            .positions
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                let Some((cx, cy, cz)) = cell_key(p, cell_size) else {
                    return *p;
                };
                let mut sum = Vector3::zeros();
                let mut count = 0usize;
                for dx in -reach..=reach {
                    for dy in -reach..=reach {
                        for dz in -reach..=reach {
                            let Some(members) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                                continue;
                            };
                            for &j in members {
                                if j as usize == i {
                                    continue;
                                }
                                let q = cloud.positions[j as usize];
                                if (q - p).norm_squared() <= radius_sq {
                                    sum += q.coords;
                                    count += 1;
                                }
                            }
                        }
                    }
                }
                if count == 0 {
                    *p
                } else {
                    let centroid = sum / count as f64;
                    Point3::from(p.coords * blend + centroid * (1.0 - blend))
                }
            })
            .collect();

        PointCloud {
            positions,
            normals: cloud.normals.clone(),
            confidences: cloud.confidences.clone(),
        }
    }
}

impl Denoiser for SpatialHashSmoother {
    fn name(&self) -> &str {
        "spatial-hash-smoothing"
    }

    fn denoise(&self, cloud: &PointCloud) -> VolumeResult<PointCloud> {
        Ok(self.smooth(cloud))
    }
}

/// Which denoiser a conditioner uses.
#[derive(Clone, Default)]
pub enum DenoiseStrategy {
    /// The built-in [`SpatialHashSmoother`].
    #[default]
    DefaultSmoothing,
    /// An external (e.g. learned) denoiser. Default smoothing takes over if it
    /// fails or breaks the contract.
    ModelBased(Arc<dyn Denoiser>),
}

impl std::fmt::Debug for DenoiseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenoiseStrategy::DefaultSmoothing => write!(f, "DefaultSmoothing"),
            DenoiseStrategy::ModelBased(d) => write!(f, "ModelBased({})", d.name()),
        }
    }
}

/// Statistical outlier filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierFilter {
    /// Neighbors considered per sample.
    pub neighbors: usize,
    /// Standard deviation multiplier for the cut-off.
    pub std_ratio: f64,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self {
            neighbors: 8,
            std_ratio: 2.0,
        }
    }
}

/// Parameters for point-cloud conditioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningParams {
    /// Samples below this confidence are discarded.
    pub min_confidence: f32,

    /// Downsampling voxel size in meters.
    pub voxel_size: f64,

    /// Statistical outlier removal; disabled when `None`.
    pub outlier_filter: Option<OutlierFilter>,

    /// Default smoothing parameters.
    pub smoothing: SmoothingParams,
}

impl Default for ConditioningParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            voxel_size: 0.002,
            outlier_filter: None,
            smoothing: SmoothingParams::default(),
        }
    }
}

/// Confidence filtering, downsampling, outlier removal and denoising.
#[derive(Debug, Clone, Default)]
pub struct PointCloudConditioner {
    params: ConditioningParams,
    strategy: DenoiseStrategy,
    fallback: SpatialHashSmoother,
}

impl PointCloudConditioner {
    /// Conditioner using default smoothing.
    pub fn new(params: ConditioningParams) -> Self {
        let fallback = SpatialHashSmoother::new(params.smoothing);
        Self {
            params,
            strategy: DenoiseStrategy::DefaultSmoothing,
            fallback,
        }
    }

    /// Replace the denoising strategy.
    pub fn with_strategy(mut self, strategy: DenoiseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Use an external denoiser, falling back to default smoothing.
    pub fn with_denoiser(self, denoiser: Arc<dyn Denoiser>) -> Self {
        self.with_strategy(DenoiseStrategy::ModelBased(denoiser))
    }

    /// Parameters in effect.
    pub fn params(&self) -> &ConditioningParams {
        &self.params
    }

    /// Run the full conditioning chain. Empty in, empty out.
    pub fn condition(&self, cloud: &PointCloud) -> PointCloud {
        if cloud.is_empty() {
            return PointCloud::new();
        }
        let input = cloud.len();

        let filtered = filter_confidence(&drop_non_finite(cloud), self.params.min_confidence);
        let mut reduced = downsample(&filtered, self.params.voxel_size);
        if let Some(filter) = self.params.outlier_filter {
            reduced = remove_outliers(&reduced, filter.neighbors, filter.std_ratio);
        }
        let output = self.denoise(&reduced);

        info!(
            input,
            after_filter = filtered.len(),
            output = output.len(),
            strategy = ?self.strategy,
            "Conditioned point cloud"
        );
        output
    }

    /// Denoise with the configured strategy. Never fails.
    pub fn denoise(&self, cloud: &PointCloud) -> PointCloud {
        if cloud.is_empty() {
            return PointCloud::new();
        }
        if let DenoiseStrategy::ModelBased(denoiser) = &self.strategy {
            match denoiser.denoise(cloud) {
                Ok(out) if out.len() > cloud.len() => warn!(
                    denoiser = denoiser.name(),
                    input = cloud.len(),
                    output = out.len(),
                    "Denoiser increased sample count, falling back to default smoothing"
                ),
                Ok(out) if !out.positions.iter().all(is_finite_point) => warn!(
                    denoiser = denoiser.name(),
                    "Denoiser produced non-finite positions, falling back to default smoothing"
                ),
                Ok(out) if !attributes_aligned(&out) => warn!(
                    denoiser = denoiser.name(),
                    "Denoiser misaligned sample attributes, falling back to default smoothing"
                ),
                Ok(out) => return out,
                Err(e) => warn!(
                    denoiser = denoiser.name(),
                    error = %e,
                    "Denoiser failed, falling back to default smoothing"
                ),
            }
        }
        self.fallback.smooth(cloud)
    }
}

fn attributes_aligned(cloud: &PointCloud) -> bool {
    cloud.normals.as_ref().map_or(true, |n| n.len() == cloud.len())
        && cloud
            .confidences
            .as_ref()
            .map_or(true, |c| c.len() == cloud.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_cloud(n: usize, spacing: f64) -> PointCloud {
        let mut positions = Vec::new();
        for i in 0..n {
            for j in 0..n {
                positions.push(Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0));
            }
        }
        PointCloud::from_positions(positions)
    }

    #[test]
    fn test_from_parts_rejects_misaligned() {
        let result = PointCloud::from_parts(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            None,
            Some(vec![0.9]),
        );
        assert!(matches!(result, Err(VolumeError::InvalidInput { .. })));
    }

    #[test]
    fn test_default_confidence() {
        let cloud = PointCloud::from_positions(vec![Point3::origin()]);
        assert_eq!(cloud.confidence(0), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_downsample_merges_cells() {
        let cloud = PointCloud::from_parts(
            vec![
                Point3::new(0.001, 0.001, 0.001),
                Point3::new(0.003, 0.003, 0.003),
                Point3::new(0.012, 0.0, 0.0),
            ],
            Some(vec![Vector3::x(), Vector3::y(), Vector3::z()]),
            Some(vec![0.4, 0.8, 1.0]),
        )
        .unwrap();

        let reduced = downsample(&cloud, 0.005);
        assert_eq!(reduced.len(), 2);
        assert_relative_eq!(reduced.positions[0].x, 0.002, epsilon = 1e-12);
        assert_relative_eq!(reduced.confidence(0), 0.6, epsilon = 1e-6);
        let n = reduced.normal(0).unwrap();
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
        assert_eq!(reduced.positions[1], Point3::new(0.012, 0.0, 0.0));
    }

    #[test]
    fn test_downsample_is_idempotent() {
        let cloud = grid_cloud(20, 0.0013);
        let once = downsample(&cloud, 0.005);
        let twice = downsample(&once, 0.005);
        assert!(once.len() < cloud.len());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn test_downsample_drops_non_finite() {
        let cloud = PointCloud::from_positions(vec![
            Point3::new(f64::NAN, 0.0, 0.0),
            Point3::new(0.0, f64::INFINITY, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ]);
        assert_eq!(downsample(&cloud, 0.01).len(), 1);
    }

    #[test]
    fn test_downsample_invalid_voxel_size_is_noop() {
        let cloud = grid_cloud(3, 0.001);
        assert_eq!(downsample(&cloud, 0.0).len(), 9);
        assert_eq!(downsample(&cloud, f64::NAN).len(), 9);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let empty = PointCloud::new();
        assert!(downsample(&empty, 0.01).is_empty());
        let conditioner = PointCloudConditioner::default();
        assert!(conditioner.condition(&empty).is_empty());
        assert!(conditioner.denoise(&empty).is_empty());
    }

    #[test]
    fn test_smoothing_pulls_toward_neighbors() {
        // A spike sitting 1 mm above a flat patch.
        let mut cloud = grid_cloud(5, 0.001);
        cloud.positions[12].z = 0.001;
        let smoother = SpatialHashSmoother::new(SmoothingParams {
            cell_size: 0.002,
            radius: 0.0025,
            blend: 0.6,
        });
        let out = smoother.denoise(&cloud).unwrap();
        assert_eq!(out.len(), cloud.len());
        assert!(out.positions[12].z < 0.001);
        assert!(out.positions[12].z > 0.0);
    }

    #[test]
    fn test_tiny_cell_size_is_raised() {
        let smoother = SpatialHashSmoother::new(SmoothingParams {
            cell_size: 1e-9,
            radius: 0.004,
            blend: 0.6,
        });
        let params = smoother.params();
        assert!(params.cell_size >= params.radius / MAX_CELL_REACH as f64);

        let mut cloud = grid_cloud(5, 0.001);
        cloud.positions[12].z = 0.001;
        let out = smoother.denoise(&cloud).unwrap();
        assert!(out.positions[12].z < 0.001);
    }

    #[test]
    fn test_isolated_point_unchanged() {
        let cloud = PointCloud::from_positions(vec![Point3::new(1.0, 1.0, 1.0)]);
        let out = SpatialHashSmoother::default().denoise(&cloud).unwrap();
        assert_eq!(out.positions[0], Point3::new(1.0, 1.0, 1.0));
    }

    struct Doubling;

    impl Denoiser for Doubling {
        fn name(&self) -> &str {
            "doubling"
        }

        fn denoise(&self, cloud: &PointCloud) -> VolumeResult<PointCloud> {
            let mut positions = cloud.positions.clone();
            positions.extend(cloud.positions.iter().copied());
            Ok(PointCloud::from_positions(positions))
        }
    }

    struct Failing;

    impl Denoiser for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn denoise(&self, _cloud: &PointCloud) -> VolumeResult<PointCloud> {
            Err(VolumeError::invalid_input("model unavailable"))
        }
    }

    struct Identity;

    impl Denoiser for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        fn denoise(&self, cloud: &PointCloud) -> VolumeResult<PointCloud> {
            Ok(cloud.clone())
        }
    }

    #[test]
    fn test_model_denoiser_fallbacks() {
        let cloud = grid_cloud(4, 0.001);
        let growing = PointCloudConditioner::default().with_denoiser(Arc::new(Doubling));
        assert_eq!(growing.denoise(&cloud).len(), cloud.len());

        let failing = PointCloudConditioner::default().with_denoiser(Arc::new(Failing));
        assert_eq!(failing.denoise(&cloud).len(), cloud.len());

        let identity = PointCloudConditioner::default().with_denoiser(Arc::new(Identity));
        assert_eq!(identity.denoise(&cloud), cloud);
    }

    #[test]
    fn test_condition_filters_confidence() {
        let cloud = PointCloud::from_parts(
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.5, 0.0, 0.0)],
            None,
            Some(vec![0.1, 0.9]),
        )
        .unwrap();
        let out = PointCloudConditioner::default().condition(&cloud);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out.positions[0].x, 0.5);
    }

    #[test]
    fn test_remove_outliers() {
        let mut cloud = grid_cloud(10, 0.001);
        cloud.positions.push(Point3::new(0.5, 0.5, 0.5));
        let cleaned = remove_outliers(&cloud, 4, 1.0);
        assert_eq!(cleaned.len(), 100);
        assert!(cleaned.positions.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn test_remove_outliers_on_coplanar_lattice() {
        // 400 samples sharing z = 0 and 20 per x and y value.
        let mut cloud = grid_cloud(20, 0.002);
        cloud.positions.push(Point3::new(0.02, 0.02, 0.3));
        let cleaned = remove_outliers(&cloud, 8, 1.0);
        assert_eq!(cleaned.len(), 400);
        assert!(cleaned.positions.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn test_condition_with_outlier_filter_on_flat_patch() {
        let mut cloud = grid_cloud(40, 0.002);
        cloud.positions.push(Point3::new(0.04, 0.04, 0.5));
        let conditioner = PointCloudConditioner::new(ConditioningParams {
            voxel_size: 0.0013,
            outlier_filter: Some(OutlierFilter {
                neighbors: 8,
                std_ratio: 2.0,
            }),
            ..Default::default()
        });
        let out = conditioner.condition(&cloud);
        assert!(out.len() >= 1500);
        assert!(out.positions.iter().all(|p| p.z.abs() < 1e-9));
    }
}
