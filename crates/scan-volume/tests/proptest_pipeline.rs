//! Property-based tests for the reconstruction stages.
//!
//! These tests use proptest to generate random grids, clouds and meshes and
//! verify invariants that must hold for any input.
//!
//! Run with: cargo test -p scan-volume -- proptest

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use scan_volume::pointcloud::downsample;
use scan_volume::{
    DecimateParams, GridParams, Mesh, PointCloud, TsdfVolume, Vertex, compute_volume,
    decimate_mesh, estimate_density,
};

// =============================================================================
// Strategies
// =============================================================================

/// Generate a random position in a bounded range.
fn arb_position(extent: f64) -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-extent..extent).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// Generate a random cloud of `min..=max` points.
fn arb_cloud(min: usize, max: usize) -> impl Strategy<Value = PointCloud> {
    prop::collection::vec(arb_position(0.2), min..=max).prop_map(PointCloud::from_positions)
}

/// A grid dimension, sometimes outside the accepted range.
fn arb_dim() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..64, 64usize..=256, 257usize..400]
}

/// A spacing that is sometimes zero, negative or not finite.
fn arb_spacing() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => 1e-4..0.1f64,
        1 => Just(0.0),
        1 => -0.1..0.0f64,
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
    ]
}

/// Generate a mesh whose face indices are all valid.
fn arb_mesh(
    min_vertices: usize,
    max_vertices: usize,
    min_faces: usize,
    max_faces: usize,
) -> impl Strategy<Value = Mesh> {
    (min_vertices..=max_vertices).prop_flat_map(move |num_vertices| {
        let vertices = prop::collection::vec(
            arb_position(1.0).prop_map(Vertex::new),
            num_vertices,
        );
        vertices.prop_flat_map(move |verts| {
            let n = verts.len() as u32;
            let faces = prop::collection::vec(prop::array::uniform3(0..n), min_faces..=max_faces);
            faces.prop_map(move |f| Mesh {
                vertices: verts.clone(),
                faces: f,
            })
        })
    })
}

/// Points on a sphere that fits well inside a 64³ grid at 1 cm spacing.
fn arb_sphere_cloud() -> impl Strategy<Value = PointCloud> {
    (arb_position(0.05), 0.05..0.2f64, 200usize..800).prop_map(|(center, radius, n)| {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let positions = (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let t = golden * i as f64;
                center + Vector3::new(r * t.cos(), y, r * t.sin()) * radius
            })
            .collect();
        PointCloud::from_positions(positions)
    })
}

/// Axis-aligned box with outward winding.
fn box_mesh(size: [f64; 3]) -> Mesh {
    let [x, y, z] = size;
    Mesh::from_parts(
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(x, 0.0, 0.0),
            Point3::new(x, y, 0.0),
            Point3::new(0.0, y, 0.0),
            Point3::new(0.0, 0.0, z),
            Point3::new(x, 0.0, z),
            Point3::new(x, y, z),
            Point3::new(0.0, y, z),
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

// =============================================================================
// Property Tests: Grid Parameters
// =============================================================================

proptest! {
    /// A volume is created exactly when every parameter is in range.
    #[test]
    fn proptest_grid_validity(
        dims in prop::array::uniform3(arb_dim()),
        voxel in arb_spacing(),
        truncation in arb_spacing(),
    ) {
        let params = GridParams::new(dims, Point3::origin(), voxel, truncation);
        let expected = dims.iter().all(|d| (64..=256).contains(d))
            && voxel.is_finite()
            && voxel > 0.0
            && truncation.is_finite()
            && truncation > 0.0;

        prop_assert_eq!(params.validate().is_ok(), expected);
        if !expected {
            prop_assert!(TsdfVolume::new(params).is_err());
        }
    }
}

// =============================================================================
// Property Tests: Fusion and Extraction
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Extracted faces only reference existing vertices.
    #[test]
    fn proptest_extraction_indices_in_bounds(cloud in arb_sphere_cloud()) {
        let params = GridParams::new([64, 64, 64], Point3::new(-0.32, -0.32, -0.32), 0.01, 0.03);
        let mut volume = TsdfVolume::new(params).unwrap();
        volume.integrate_points_approx(&cloud, 1.0).unwrap();
        let mesh = volume.extract_mesh(0.0);

        prop_assert!(mesh.has_valid_indices());
        for face in &mesh.faces {
            prop_assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2]);
        }
    }

    /// Stored distances never leave the truncation band.
    #[test]
    fn proptest_distances_within_truncation(cloud in arb_cloud(1, 200)) {
        let params = GridParams::new([64, 64, 64], Point3::new(-0.32, -0.32, -0.32), 0.01, 0.02);
        let mut volume = TsdfVolume::new(params).unwrap();
        volume.integrate_points_approx(&cloud, 1.0).unwrap();

        for k in (0..64).step_by(7) {
            for j in (0..64).step_by(5) {
                for i in 0..64 {
                    let d = volume.distance(i, j, k).unwrap();
                    prop_assert!(d.abs() <= 0.02 + 1e-6, "distance {} at ({}, {}, {})", d, i, j, k);
                }
            }
        }
    }
}

// =============================================================================
// Property Tests: Conditioning
// =============================================================================

proptest! {
    /// Downsampling twice at the same voxel size changes nothing further.
    #[test]
    fn proptest_downsample_idempotent(
        cloud in arb_cloud(1, 300),
        voxel in 0.005..0.1f64,
    ) {
        let once = downsample(&cloud, voxel);
        let twice = downsample(&once, voxel);
        prop_assert!(once.len() <= cloud.len());
        prop_assert_eq!(once.len(), twice.len());
    }
}

// =============================================================================
// Property Tests: Decimation
// =============================================================================

proptest! {
    /// Decimation never adds faces and keeps indices valid.
    #[test]
    fn proptest_decimation_bounded(
        mesh in arb_mesh(12, 100, 10, 50),
        ratio in 0.1..1.0f64,
    ) {
        let original = mesh.face_count();
        let target = ((original as f64) * ratio) as usize;

        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(target));
        prop_assert!(result.mesh.face_count() <= original,
            "Decimated mesh has more faces ({}) than original ({})",
            result.mesh.face_count(), original);
        prop_assert!(result.mesh.has_valid_indices());
    }
}

// =============================================================================
// Property Tests: Metrology
// =============================================================================

proptest! {
    /// Uniform scaling changes volume by the cube of the factor.
    #[test]
    fn proptest_volume_scales_cubically(
        size in prop::array::uniform3(0.01..2.0f64),
        factor in 0.1..10.0f64,
    ) {
        let mut mesh = box_mesh(size);
        let before = compute_volume(&mesh).signed;
        mesh.scale(factor);
        let after = compute_volume(&mesh).signed;

        prop_assert!((before - size[0] * size[1] * size[2]).abs() <= 1e-9 * before.max(1.0));
        let expected = before * factor.powi(3);
        prop_assert!((after - expected).abs() <= 1e-9 * expected.max(1.0));
    }

    /// Density times volume gives back the mass.
    #[test]
    fn proptest_density_consistent(
        mass in 0.001..50.0f64,
        volume in 1e-6..0.05f64,
        rel in 0.0..0.2f64,
    ) {
        let result = estimate_density(mass, mass * rel, volume, volume * rel);
        let e = result.estimate().unwrap();
        prop_assert!((e.density * volume - mass).abs() <= 1e-9 * mass);
        prop_assert!(e.uncertainty >= 0.0);
    }
}
