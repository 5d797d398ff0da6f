//! Mesh metrology: volume, surface area, quality and the coarse fallback.
//!
//! Volume is integrated with the divergence theorem: each triangle closes a
//! signed tetrahedron with a common reference point, and the signed volumes
//! sum to the enclosed volume for any closed, consistently wound mesh. The
//! sign tells the winding: positive when faces point outward.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use scan_volume::measure::{compute_surface_area, compute_volume};
//! use scan_volume::Mesh;
//!
//! let mesh = Mesh::from_parts(
//!     [
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!         Point3::new(0.0, 0.0, 1.0),
//!     ],
//!     vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
//! );
//! let volume = compute_volume(&mesh);
//! assert!((volume.signed - 1.0 / 6.0).abs() < 1e-12);
//! assert!(compute_surface_area(&mesh) > 0.0);
//! ```

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{TopologyWarning, VolumeError, VolumeResult};
use crate::pointcloud::is_finite_point;
use crate::types::Mesh;
use crate::validate::validate_mesh;

/// Quality score at or above which a mesh volume replaces the coarse estimate.
pub const DEFAULT_OVERRIDE_THRESHOLD: f64 = 0.5;

const WATERTIGHT_WEIGHT: f64 = 0.6;
const NORMALS_WEIGHT: f64 = 0.15;
const DENSITY_WEIGHT: f64 = 0.25;

/// Triangles per square centimeter that earn the full density score.
const FULL_DENSITY_PER_CM2: f64 = 1.0;

/// Signed and unsigned enclosed volume in cubic meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeshVolume {
    /// Positive for outward winding.
    pub signed: f64,
    /// `abs(signed)`.
    pub unsigned: f64,
}

/// Enclosed volume by signed-tetrahedra integration.
///
/// Tetrahedra are taken from the vertex centroid, which keeps the terms small
/// for meshes far from the origin. Faces with out-of-range indices are
/// skipped; open meshes still return a number, but only validation can say
/// whether to trust it.
pub fn compute_volume(mesh: &Mesh) -> MeshVolume {
    let Some(reference) = mesh.centroid() else {
        return MeshVolume {
            signed: 0.0,
            unsigned: 0.0,
        };
    };
    let signed: f64 = mesh
        .triangles()
        .map(|tri| {
            let a = tri.v0 - reference;
            let b = tri.v1 - reference;
            let c = tri.v2 - reference;
            a.dot(&b.cross(&c))
        })
        .sum::<f64>()
        / 6.0;
    MeshVolume {
        signed,
        unsigned: signed.abs(),
    }
}

/// Sum of triangle areas in square meters.
pub fn compute_surface_area(mesh: &Mesh) -> f64 {
    mesh.triangles().map(|tri| tri.area()).sum()
}

/// Triangles per square centimeter of surface.
pub fn triangle_density(face_count: usize, surface_area_m2: f64) -> f64 {
    let area_cm2 = surface_area_m2 * 1e4;
    if area_cm2 > 0.0 && area_cm2.is_finite() {
        face_count as f64 / area_cm2
    } else {
        0.0
    }
}

/// Weighted mesh trust score in [0, 1]. Watertightness dominates.
///
/// `triangle_density` is in triangles per square centimeter.
pub fn quality_score(is_watertight: bool, has_normals: bool, triangle_density: f64) -> f64 {
    let density = if triangle_density.is_finite() {
        (triangle_density / FULL_DENSITY_PER_CM2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let watertight = if is_watertight { 1.0 } else { 0.0 };
    let normals = if has_normals { 1.0 } else { 0.0 };
    WATERTIGHT_WEIGHT * watertight + NORMALS_WEIGHT * normals + DENSITY_WEIGHT * density
}

/// Everything measured on one mesh.
#[derive(Debug, Clone, Serialize)]
pub struct MeshMeasurement {
    /// Unsigned enclosed volume in cubic meters.
    pub volume: f64,
    /// Signed enclosed volume in cubic meters.
    pub signed_volume: f64,
    /// Surface area in square meters.
    pub surface_area: f64,
    /// Trust score in [0, 1].
    pub quality_score: f64,
    /// No topology warnings.
    pub is_watertight: bool,
    /// Every vertex has a normal.
    pub has_normals: bool,
    /// Triangles per square centimeter.
    pub triangle_density: f64,
    /// Vertex count.
    pub vertex_count: usize,
    /// Triangle count.
    pub face_count: usize,
    /// Topology problems found.
    pub warnings: Vec<TopologyWarning>,
}

impl MeshMeasurement {
    /// Whether this mesh volume should replace a coarse estimate.
    pub fn overrides_coarse(&self, threshold: f64) -> bool {
        self.quality_score >= threshold
    }

    /// Scale linear dimensions by `factor`: area by its square, volume by its cube.
    pub fn scaled(&self, factor: f64) -> Self {
        let f2 = factor * factor;
        let f3 = f2 * factor;
        Self {
            volume: self.volume * f3,
            signed_volume: self.signed_volume * f3,
            surface_area: self.surface_area * f2,
            triangle_density: self.triangle_density / f2,
            warnings: self.warnings.clone(),
            ..*self
        }
    }
}

/// Measure volume, area, topology and quality.
///
/// Fails with `InsufficientData` for a mesh without faces and with
/// `NonFiniteValue` when volume or area come out NaN or infinite.
pub fn measure(mesh: &Mesh) -> VolumeResult<MeshMeasurement> {
    if mesh.face_count() == 0 || mesh.vertex_count() == 0 {
        return Err(VolumeError::insufficient_data("mesh has no triangles"));
    }

    let volume = compute_volume(mesh);
    if !volume.signed.is_finite() {
        return Err(VolumeError::non_finite(
            "measurement",
            format!("volume = {}", volume.signed),
        ));
    }
    let surface_area = compute_surface_area(mesh);
    if !surface_area.is_finite() {
        return Err(VolumeError::non_finite(
            "measurement",
            format!("surface area = {}", surface_area),
        ));
    }

    let report = validate_mesh(mesh);
    let is_watertight = report.is_watertight();
    let has_normals = mesh.has_normals();
    let density = triangle_density(mesh.face_count(), surface_area);
    let quality = quality_score(is_watertight, has_normals, density);

    info!(
        volume_m3 = volume.unsigned,
        surface_area_m2 = surface_area,
        quality,
        is_watertight,
        warnings = report.warnings.len(),
        "Measured mesh"
    );

    Ok(MeshMeasurement {
        volume: volume.unsigned,
        signed_volume: volume.signed,
        surface_area,
        quality_score: quality,
        is_watertight,
        has_normals,
        triangle_density: density,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        warnings: report.warnings,
    })
}

/// Bounding-volume estimate used when no trustworthy mesh exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoarseVolume {
    /// Axis-aligned bounding box volume.
    pub aabb_volume: f64,
    /// PCA-oriented bounding box volume.
    pub obb_volume: f64,
    /// The smaller of the two.
    pub volume: f64,
}

/// Smaller of the axis-aligned and PCA-oriented box volumes around `points`.
///
/// Non-finite points are ignored. Fails with `InsufficientData` below four
/// points and with `DegenerateGeometry` when the points span no volume.
pub fn coarse_volume(points: &[Point3<f64>]) -> VolumeResult<CoarseVolume> {
    let finite: Vec<Point3<f64>> = points.iter().copied().filter(is_finite_point).collect();
    if finite.len() < 4 {
        return Err(VolumeError::insufficient_data(format!(
            "{} finite points, need at least 4 for a bounding volume",
            finite.len()
        )));
    }

    let (min, max) = finite
        .iter()
        .skip(1)
        .fold((finite[0], finite[0]), |(lo, hi), p| (lo.inf(p), hi.sup(p)));
    let extent = max - min;
    let aabb_volume = extent.x * extent.y * extent.z;

    let n = finite.len() as f64;
    let centroid = finite.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let covariance = finite.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p.coords - centroid;
        acc + d * d.transpose()
    }) / n;
    let axes = SymmetricEigen::new(covariance).eigenvectors;

    let mut local_min = Vector3::repeat(f64::INFINITY);
    let mut local_max = Vector3::repeat(f64::NEG_INFINITY);
    for p in &finite {
        let local = axes.transpose() * (p.coords - centroid);
        local_min = local_min.inf(&local);
        local_max = local_max.sup(&local);
    }
    let local_extent = local_max - local_min;
    let obb_volume = local_extent.x * local_extent.y * local_extent.z;

    let volume = aabb_volume.min(obb_volume);
    if !volume.is_finite() {
        return Err(VolumeError::non_finite(
            "measurement",
            format!("bounding volume = {}", volume),
        ));
    }
    if volume <= 0.0 {
        return Err(VolumeError::degenerate_geometry(
            "points span no volume (flat or collinear)",
        ));
    }

    debug!(aabb_volume, obb_volume, "Computed coarse bounding volume");
    Ok(CoarseVolume {
        aabb_volume,
        obb_volume,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn unit_cube() -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(1.0, 0.0, 1.0),
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(0.0, 1.0, 1.0),
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

    #[test]
    fn test_unit_cube_volume_and_area() {
        let mesh = unit_cube();
        let volume = compute_volume(&mesh);
        assert_relative_eq!(volume.signed, 1.0, epsilon = 1e-5);
        assert_relative_eq!(volume.unsigned, 1.0, epsilon = 1e-5);
        assert_relative_eq!(compute_surface_area(&mesh), 6.0, epsilon = 1e-5);
    }

    #[test]
    fn test_volume_independent_of_position() {
        let mut mesh = unit_cube();
        mesh.translate(Vector3::new(1000.0, -250.0, 42.0));
        assert_relative_eq!(compute_volume(&mesh).signed, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inverted_cube_has_negative_sign() {
        let mut mesh = unit_cube();
        for face in &mut mesh.faces {
            face.swap(1, 2);
        }
        let volume = compute_volume(&mesh);
        assert_relative_eq!(volume.signed, -1.0, epsilon = 1e-9);
        assert_relative_eq!(volume.unsigned, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_volume_skips_invalid_faces() {
        let mut mesh = unit_cube();
        mesh.faces.push([0, 1, 77]);
        assert_relative_eq!(compute_volume(&mesh).signed, 1.0, epsilon = 1e-9);
        assert_eq!(compute_volume(&Mesh::new()).unsigned, 0.0);
    }

    #[test]
    fn test_quality_score_weights() {
        assert_relative_eq!(quality_score(true, true, 5.0), 1.0);
        assert_relative_eq!(quality_score(true, false, 0.0), 0.6);
        assert_relative_eq!(quality_score(false, true, 0.5), 0.275);
        assert_relative_eq!(quality_score(false, false, f64::NAN), 0.0);
        assert!(quality_score(true, false, 0.0) >= DEFAULT_OVERRIDE_THRESHOLD);
        assert!(quality_score(false, true, 10.0) < DEFAULT_OVERRIDE_THRESHOLD);
    }

    #[test]
    fn test_measure_unit_cube() {
        let m = measure(&unit_cube()).unwrap();
        assert!(m.is_watertight);
        assert!(m.warnings.is_empty());
        assert!(!m.has_normals);
        assert_eq!(m.face_count, 12);
        // 12 triangles over 60000 cm^2.
        assert_relative_eq!(m.triangle_density, 12.0 / 60_000.0);
        assert!(m.overrides_coarse(DEFAULT_OVERRIDE_THRESHOLD));
    }

    #[test]
    fn test_measure_scaled() {
        let m = measure(&unit_cube()).unwrap().scaled(0.5);
        assert_relative_eq!(m.volume, 0.125);
        assert_relative_eq!(m.surface_area, 1.5);
    }

    #[test]
    fn test_measure_rejects_empty_and_non_finite() {
        assert!(matches!(
            measure(&Mesh::new()),
            Err(VolumeError::InsufficientData { .. })
        ));
        let mut mesh = unit_cube();
        mesh.vertices[3].position.x = f64::INFINITY;
        assert!(matches!(
            measure(&mesh),
            Err(VolumeError::NonFiniteValue { .. })
        ));
    }

    fn box_corners(size: Vector3<f64>) -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    points.push(Point3::new(
                        size.x * i as f64,
                        size.y * j as f64,
                        size.z * k as f64,
                    ));
                }
            }
        }
        points
    }

    #[test]
    fn test_coarse_volume_axis_aligned() {
        let coarse = coarse_volume(&box_corners(Vector3::new(0.1, 0.2, 0.3))).unwrap();
        assert_relative_eq!(coarse.aabb_volume, 0.006, epsilon = 1e-12);
        assert_relative_eq!(coarse.volume, 0.006, epsilon = 1e-9);
    }

    #[test]
    fn test_coarse_volume_prefers_oriented_box() {
        let rotation = Rotation3::from_euler_angles(0.4, 0.3, 0.7);
        let points: Vec<_> = box_corners(Vector3::new(0.1, 0.2, 0.3))
            .into_iter()
            .map(|p| rotation * p)
            .collect();
        let coarse = coarse_volume(&points).unwrap();
        assert!(coarse.aabb_volume > coarse.obb_volume);
        assert_relative_eq!(coarse.volume, 0.006, max_relative = 1e-6);
    }

    #[test]
    fn test_coarse_volume_failures() {
        let few = [Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        assert!(matches!(
            coarse_volume(&few),
            Err(VolumeError::InsufficientData { .. })
        ));

        let flat: Vec<_> = (0..10)
            .map(|i| Point3::new(i as f64, (i * i) as f64, 0.0))
            .collect();
        assert!(matches!(
            coarse_volume(&flat),
            Err(VolumeError::DegenerateGeometry { .. })
        ));
    }
}
