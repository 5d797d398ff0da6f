//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Dense marching-cubes output is simplified before measurement so that volume
//! and topology checks stay cheap. Each vertex carries the sum of the plane
//! quadrics of its faces; collapsing an edge merges the two quadrics and moves
//! the surviving vertex to the point minimizing their combined error.
//!
//! Collapses are drawn from a min-heap in passes. Pass `k` admits collapses
//! costing at most `base * (k + 3)^aggressiveness`, and a vertex takes part in
//! at most one collapse per pass. After [`MAX_THRESHOLD_PASSES`] passes the
//! threshold is lifted (or pinned to `max_error` when one is set).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::AddAssign;

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adjacency::MeshAdjacency;
use crate::error::{VolumeError, VolumeResult};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::types::{Mesh, Triangle, Vertex};

/// Passes with a rising threshold before it is lifted.
pub const MAX_THRESHOLD_PASSES: u32 = 64;

/// Base threshold relative to the squared bounding-box diagonal.
const BASE_THRESHOLD: f64 = 1e-9;

/// Parameters for mesh decimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimateParams {
    /// Target number of triangles. If None, uses target_ratio instead.
    pub target_triangles: Option<usize>,
    /// Target ratio of triangles to keep (0.0 to 1.0). Default: 0.5
    pub target_ratio: f64,
    /// Exponent of the per-pass threshold growth. Higher collapses faster and
    /// less carefully. Default: 7.0
    pub aggressiveness: f64,
    /// Maximum quadric error for any single collapse. If None, no limit.
    pub max_error: Option<f64>,
    /// Pin vertices on open boundaries. Default: true
    pub preserve_boundary: bool,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_triangles: None,
            target_ratio: 0.5,
            aggressiveness: 7.0,
            max_error: None,
            preserve_boundary: true,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a specific triangle count.
    pub fn with_target_triangles(count: usize) -> Self {
        Self {
            target_triangles: Some(count),
            ..Default::default()
        }
    }

    /// Create params targeting a ratio of original triangles.
    pub fn with_target_ratio(ratio: f64) -> Self {
        Self {
            target_ratio: ratio.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Create aggressive decimation params (more simplification).
    pub fn aggressive() -> Self {
        Self {
            target_ratio: 0.25,
            aggressiveness: 9.0,
            preserve_boundary: false,
            ..Default::default()
        }
    }

    /// Create conservative decimation params (preserve more detail).
    pub fn conservative() -> Self {
        Self {
            target_ratio: 0.75,
            aggressiveness: 5.0,
            preserve_boundary: true,
            ..Default::default()
        }
    }

    fn target_for(&self, triangles: usize) -> usize {
        self.target_triangles
            .unwrap_or_else(|| ((triangles as f64) * self.target_ratio.clamp(0.0, 1.0)).ceil() as usize)
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: Mesh,
    /// Number of triangles in original mesh.
    pub original_triangles: usize,
    /// Number of triangles in decimated mesh.
    pub final_triangles: usize,
    /// Number of edge collapses performed.
    pub collapses_performed: usize,
    /// Number of edge collapses rejected (link condition, flips, pinning).
    pub collapses_rejected: usize,
    /// Threshold passes run.
    pub passes: u32,
}

impl DecimateResult {
    fn unchanged(mesh: &Mesh) -> Self {
        Self {
            mesh: mesh.clone(),
            original_triangles: mesh.face_count(),
            final_triangles: mesh.face_count(),
            collapses_performed: 0,
            collapses_rejected: 0,
            passes: 0,
        }
    }
}

/// Quadric error `x^T A x + 2 b^T x + c`.
#[derive(Debug, Clone, Copy)]
struct Quadric {
    a: Matrix3<f64>,
    b: Vector3<f64>,
    c: f64,
}

impl Default for Quadric {
    fn default() -> Self {
        Self {
            a: Matrix3::zeros(),
            b: Vector3::zeros(),
            c: 0.0,
        }
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, other: Self) {
        self.a += other.a;
        self.b += other.b;
        self.c += other.c;
    }
}

impl Quadric {
    /// Squared distance to the plane `n . x + d = 0` (`n` unit length).
    fn from_plane(n: Vector3<f64>, d: f64) -> Self {
        Self {
            a: n * n.transpose(),
            b: n * d,
            c: d * d,
        }
    }

    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let x = p.coords;
        x.dot(&(self.a * x)) + 2.0 * self.b.dot(&x) + self.c
    }

    /// The point minimizing the error, or None if the system is singular.
    fn minimizer(&self) -> Option<Point3<f64>> {
        if self.a.determinant().abs() < 1e-10 {
            return None;
        }
        self.a.try_inverse().map(|inv| Point3::from(-(inv * self.b)))
    }
}

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    keep: u32,
    remove: u32,
    /// Vertex versions when the candidate was computed.
    stamps: (u32, u32),
    cost: f64,
    target: Point3<f64>,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (smaller cost = higher priority)
        other.cost.total_cmp(&self.cost)
    }
}

/// Decimate a mesh using edge collapse with quadric error metrics.
///
/// A target at or above the input triangle count returns the mesh unchanged.
/// Faces with out-of-range or repeated indices are dropped.
///
/// # Example
/// ```
/// use scan_volume::{decimate_mesh, DecimateParams, Mesh, Vertex};
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.5, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5));
/// assert!(result.final_triangles <= result.original_triangles);
/// ```
pub fn decimate_mesh(mesh: &Mesh, params: &DecimateParams) -> DecimateResult {
    Decimator::new(mesh, params)
        .and_then(|d| d.run(None))
        .unwrap_or_else(|| DecimateResult::unchanged(mesh))
}

/// Decimate a mesh with progress reporting.
///
/// The callback may return `false` to cancel, in which case `Cancelled` is
/// returned and the partially decimated mesh is discarded.
pub fn decimate_mesh_with_progress(
    mesh: &Mesh,
    params: &DecimateParams,
    callback: Option<&ProgressCallback>,
) -> VolumeResult<DecimateResult> {
    match Decimator::new(mesh, params) {
        None => Ok(DecimateResult::unchanged(mesh)),
        Some(decimator) => decimator
            .run(callback)
            .ok_or_else(|| VolumeError::cancelled("simplification")),
    }
}

/// Working state of one decimation.
struct Decimator<'a> {
    params: &'a DecimateParams,
    original_triangles: usize,
    had_normals: bool,
    target: usize,
    positions: Vec<Point3<f64>>,
    vertex_alive: Vec<bool>,
    versions: Vec<u32>,
    pinned: Vec<bool>,
    quadrics: Vec<Quadric>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
    active_faces: usize,
    base_threshold: f64,
}

impl<'a> Decimator<'a> {
    /// Returns None when there is nothing to do.
    fn new(mesh: &Mesh, params: &'a DecimateParams) -> Option<Self> {
        let original_triangles = mesh.face_count();
        let target = params.target_for(original_triangles);
        if original_triangles == 0 || original_triangles <= target {
            return None;
        }

        let n = mesh.vertex_count();
        let faces: Vec<[u32; 3]> = mesh
            .faces
            .iter()
            .copied()
            .filter(|f| {
                f.iter().all(|&v| (v as usize) < n) && f[0] != f[1] && f[1] != f[2] && f[0] != f[2]
            })
            .collect();

        let adjacency = MeshAdjacency::build(&faces, n);
        let pinned = if params.preserve_boundary {
            adjacency.boundary_vertices()
        } else {
            vec![false; n]
        };

        let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
        let mut quadrics = vec![Quadric::default(); n];
        for face in &faces {
            let tri = Triangle::new(
                positions[face[0] as usize],
                positions[face[1] as usize],
                positions[face[2] as usize],
            );
            let Some(normal) = tri.normal() else {
                continue;
            };
            let q = Quadric::from_plane(normal, -normal.dot(&tri.v0.coords));
            for &v in face {
                quadrics[v as usize] += q;
            }
        }

        let diag_sq = mesh
            .bounds()
            .map(|(min, max)| (max - min).norm_squared())
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(1.0);

        Some(Self {
            params,
            original_triangles,
            had_normals: mesh.has_normals(),
            target,
            positions,
            vertex_alive: vec![true; n],
            versions: vec![0; n],
            pinned,
            quadrics,
            active_faces: faces.len(),
            face_alive: vec![true; faces.len()],
            faces,
            vertex_faces: adjacency.vertex_to_faces,
            base_threshold: BASE_THRESHOLD * diag_sq,
        })
    }

    /// Threshold admitted in `pass`, `None` for unlimited.
    fn threshold(&self, pass: u32) -> Option<f64> {
        if pass >= MAX_THRESHOLD_PASSES {
            return self.params.max_error;
        }
        let t = self.base_threshold * f64::from(pass + 3).powf(self.params.aggressiveness);
        Some(match self.params.max_error {
            Some(max) => t.min(max),
            None => t,
        })
    }

    fn run(mut self, callback: Option<&ProgressCallback>) -> Option<DecimateResult> {
        let estimated = (self.active_faces.saturating_sub(self.target) / 2).max(1);
        let tracker = ProgressTracker::new(estimated as u64);

        let mut heap = BinaryHeap::new();
        for f in 0..self.faces.len() {
            let face = self.faces[f];
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                if a < b || !self.shares_face_reversed(a, b) {
                    if let Some(c) = self.candidate(a, b) {
                        heap.push(c);
                    }
                }
            }
        }

        let mut touched = vec![u32::MAX; self.positions.len()];
        let mut deferred = Vec::new();
        let mut performed = 0usize;
        let mut rejected = 0usize;
        let mut pass = 0u32;

        'passes: while self.active_faces > self.target {
            heap.extend(deferred.drain(..));
            let threshold = self.threshold(pass);
            let mut collapsed_this_pass = 0usize;

            while self.active_faces > self.target {
                let Some(top) = heap.peek() else {
                    break;
                };
                if threshold.is_some_and(|t| top.cost > t) {
                    break;
                }
                let Some(collapse) = heap.pop() else {
                    break;
                };
                if !self.is_current(&collapse) {
                    continue;
                }
                if touched[collapse.keep as usize] == pass || touched[collapse.remove as usize] == pass {
                    deferred.push(collapse);
                    continue;
                }
                if !self.is_collapse_valid(&collapse) {
                    rejected += 1;
                    continue;
                }

                self.collapse(&collapse);
                touched[collapse.keep as usize] = pass;
                touched[collapse.remove as usize] = pass;
                performed += 1;
                collapsed_this_pass += 1;
                tracker.increment();

                if !tracker.maybe_callback(
                    callback,
                    format!(
                        "Decimating: {} triangles remaining (target: {})",
                        self.active_faces, self.target
                    ),
                ) {
                    debug!(performed, "Decimation cancelled");
                    return None;
                }

                for c in self.neighbor_candidates(collapse.keep) {
                    heap.push(c);
                }
            }

            let exhausted = heap.is_empty() && deferred.is_empty();
            let limited = pass >= MAX_THRESHOLD_PASSES;
            if exhausted || (limited && collapsed_this_pass == 0) {
                break 'passes;
            }
            pass += 1;
        }

        let mesh = self.compact();
        debug!(
            original = self.original_triangles,
            result = mesh.face_count(),
            performed,
            rejected,
            passes = pass + 1,
            "Decimated mesh"
        );
        Some(DecimateResult {
            final_triangles: mesh.face_count(),
            mesh,
            original_triangles: self.original_triangles,
            collapses_performed: performed,
            collapses_rejected: rejected,
            passes: pass + 1,
        })
    }

    /// True if an edge `b -> a` also exists, so `(a, b)` with `a > b` is queued
    /// from the other side.
    fn shares_face_reversed(&self, a: u32, b: u32) -> bool {
        self.vertex_faces[b as usize].iter().any(|&f| {
            let face = self.faces[f as usize];
            (0..3).any(|k| face[k] == b && face[(k + 1) % 3] == a)
        })
    }

    fn is_current(&self, c: &EdgeCollapse) -> bool {
        self.vertex_alive[c.keep as usize]
            && self.vertex_alive[c.remove as usize]
            && self.versions[c.keep as usize] == c.stamps.0
            && self.versions[c.remove as usize] == c.stamps.1
    }

    fn candidate(&self, a: u32, b: u32) -> Option<EdgeCollapse> {
        if self.params.preserve_boundary && (self.pinned[a as usize] || self.pinned[b as usize]) {
            return None;
        }
        let mut q = self.quadrics[a as usize];
        q += self.quadrics[b as usize];

        let pa = self.positions[a as usize];
        let pb = self.positions[b as usize];
        let mid = nalgebra::center(&pa, &pb);
        let edge_len = (pb - pa).norm();

        let mut options = vec![pa, pb, mid];
        if let Some(p) = q.minimizer() {
            if (p - mid).norm() <= 2.0 * edge_len && p.iter().all(|c| c.is_finite()) {
                options.push(p);
            }
        }
        let (target, cost) = options
            .into_iter()
            .map(|p| (p, q.evaluate(&p).max(0.0)))
            .min_by(|x, y| x.1.total_cmp(&y.1))?;
        if !cost.is_finite() {
            return None;
        }

        Some(EdgeCollapse {
            keep: a,
            remove: b,
            stamps: (self.versions[a as usize], self.versions[b as usize]),
            cost,
            target,
        })
    }

    fn live_faces(&self, v: u32) -> impl Iterator<Item = u32> + '_ {
        self.vertex_faces[v as usize]
            .iter()
            .copied()
            .filter(|&f| self.face_alive[f as usize])
    }

    fn neighbors(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .live_faces(v)
            .flat_map(|f| self.faces[f as usize])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn neighbor_candidates(&self, v: u32) -> Vec<EdgeCollapse> {
        self.neighbors(v)
            .into_iter()
            .filter_map(|u| self.candidate(v, u))
            .collect()
    }

    /// Link condition plus normal-flip test around both endpoints.
    fn is_collapse_valid(&self, c: &EdgeCollapse) -> bool {
        let (a, b) = (c.keep, c.remove);
        let na = self.neighbors(a);
        let nb = self.neighbors(b);
        let common = na.iter().filter(|v| nb.binary_search(v).is_ok()).count();
        if common > 2 {
            return false;
        }

        for v in [a, b] {
            for f in self.live_faces(v) {
                let face = self.faces[f as usize];
                if face.contains(&a) && face.contains(&b) {
                    continue;
                }
                let before = self.triangle(face, None);
                let after = self.triangle(face, Some((a, b, c.target)));
                let (Some(n0), Some(n1)) = (before.normal(), after.normal()) else {
                    return false;
                };
                if n0.dot(&n1) <= 0.0 {
                    return false;
                }
            }
        }
        true
    }

    /// Triangle for `face`, optionally with `a` and `b` moved to `p`.
    fn triangle(&self, face: [u32; 3], moved: Option<(u32, u32, Point3<f64>)>) -> Triangle {
        let at = |v: u32| match moved {
            Some((a, b, p)) if v == a || v == b => p,
            _ => self.positions[v as usize],
        };
        Triangle::new(at(face[0]), at(face[1]), at(face[2]))
    }

    fn collapse(&mut self, c: &EdgeCollapse) {
        let (a, b) = (c.keep, c.remove);
        self.positions[a as usize] = c.target;
        let qb = self.quadrics[b as usize];
        self.quadrics[a as usize] += qb;
        self.vertex_alive[b as usize] = false;
        self.versions[a as usize] += 1;
        self.versions[b as usize] += 1;
        self.pinned[a as usize] |= self.pinned[b as usize];

        let moved = std::mem::take(&mut self.vertex_faces[b as usize]);
        for f in moved {
            if !self.face_alive[f as usize] {
                continue;
            }
            let face = &mut self.faces[f as usize];
            if face.contains(&a) {
                self.face_alive[f as usize] = false;
                self.active_faces -= 1;
                continue;
            }
            for v in face.iter_mut() {
                if *v == b {
                    *v = a;
                }
            }
            self.vertex_faces[a as usize].push(f);
        }
        let alive = &self.face_alive;
        self.vertex_faces[a as usize].retain(|&f| alive[f as usize]);
    }

    /// Build the final compacted mesh from the working data.
    fn compact(&self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut mesh = Mesh::with_capacity(self.positions.len(), self.active_faces);

        for (f, face) in self.faces.iter().enumerate() {
            if !self.face_alive[f] {
                continue;
            }
            let mut out = [0u32; 3];
            for (slot, &v) in out.iter_mut().zip(face) {
                if remap[v as usize] == u32::MAX {
                    remap[v as usize] = mesh.vertices.len() as u32;
                    mesh.vertices.push(Vertex::new(self.positions[v as usize]));
                }
                *slot = remap[v as usize];
            }
            mesh.faces.push(out);
        }

        if self.had_normals {
            mesh.compute_vertex_normals();
        }
        mesh
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::measure::compute_volume;
    use approx::assert_relative_eq;

    /// Create a cube mesh for testing.
    fn make_cube(size: f64) -> Mesh {
        let s = size / 2.0;
        Mesh::from_parts(
            [
                Point3::new(-s, -s, -s),
                Point3::new(s, -s, -s),
                Point3::new(s, s, -s),
                Point3::new(-s, s, -s),
                Point3::new(-s, -s, s),
                Point3::new(s, -s, s),
                Point3::new(s, s, s),
                Point3::new(-s, s, s),
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

    /// UV sphere with `rings * segments * 2` triangles, wound outward.
    pub(crate) fn make_sphere(radius: f64, rings: u32, segments: u32) -> Mesh {
        let mut positions = vec![Point3::new(0.0, 0.0, radius)];
        for r in 1..rings {
            let theta = std::f64::consts::PI * r as f64 / rings as f64;
            for s in 0..segments {
                let phi = 2.0 * std::f64::consts::PI * s as f64 / segments as f64;
                positions.push(Point3::new(
                    radius * theta.sin() * phi.cos(),
                    radius * theta.sin() * phi.sin(),
                    radius * theta.cos(),
                ));
            }
        }
        positions.push(Point3::new(0.0, 0.0, -radius));
        let south = positions.len() as u32 - 1;
        let ring = |r: u32, s: u32| 1 + (r - 1) * segments + (s % segments);

        let mut faces = Vec::new();
        for s in 0..segments {
            faces.push([0, ring(1, s), ring(1, s + 1)]);
        }
        for r in 1..rings - 1 {
            for s in 0..segments {
                let (a, b) = (ring(r, s), ring(r, s + 1));
                let (c, d) = (ring(r + 1, s), ring(r + 1, s + 1));
                faces.push([a, c, d]);
                faces.push([a, d, b]);
            }
        }
        for s in 0..segments {
            faces.push([south, ring(rings - 1, s + 1), ring(rings - 1, s)]);
        }
        Mesh::from_parts(positions, faces)
    }

    #[test]
    fn test_decimate_empty_mesh() {
        let mesh = Mesh::default();
        let result = decimate_mesh(&mesh, &DecimateParams::default());
        assert_eq!(result.original_triangles, 0);
        assert_eq!(result.final_triangles, 0);
        assert_eq!(result.collapses_performed, 0);
    }

    #[test]
    fn test_decimate_already_at_target() {
        let mesh = make_cube(10.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(20));
        assert_eq!(result.final_triangles, 12);
        assert_eq!(result.collapses_performed, 0);
        assert_eq!(result.mesh, mesh);
    }

    #[test]
    fn test_decimate_sphere_to_target() {
        let mesh = make_sphere(1.0, 24, 32);
        let original = mesh.face_count();
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(400));

        assert_eq!(result.original_triangles, original);
        assert!(result.final_triangles <= 400);
        assert!(result.final_triangles > 0);
        assert!(result.mesh.has_valid_indices());

        // Still a closed surface of roughly the same volume.
        let adj = MeshAdjacency::build(&result.mesh.faces, result.mesh.vertex_count());
        assert_eq!(adj.boundary_edge_count(), 0);
        let before = compute_volume(&mesh).signed;
        let after = compute_volume(&result.mesh).signed;
        assert_relative_eq!(after, before, max_relative = 0.1);
    }

    #[test]
    fn test_decimate_with_max_error_stops_early() {
        let mesh = make_sphere(1.0, 16, 24);
        let params = DecimateParams {
            target_triangles: Some(8),
            max_error: Some(1e-12),
            ..Default::default()
        };
        let result = decimate_mesh(&mesh, &params);
        assert!(result.final_triangles > 8);
    }

    #[test]
    fn test_decimate_preserves_open_boundary() {
        // A flat square grid: every collapse touching the rim is refused.
        let n = 6u32;
        let mut positions = Vec::new();
        for j in 0..n {
            for i in 0..n {
                positions.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut faces = Vec::new();
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let v = j * n + i;
                faces.push([v, v + 1, v + n + 1]);
                faces.push([v, v + n + 1, v + n]);
            }
        }
        let mesh = Mesh::from_parts(positions, faces);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(4));

        let (min, max) = result.mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(5.0, 5.0, 0.0));
        let adj = MeshAdjacency::build(&result.mesh.faces, result.mesh.vertex_count());
        assert_eq!(adj.boundary_edge_count(), 20);
    }

    #[test]
    fn test_decimate_drops_invalid_faces() {
        let mut mesh = make_sphere(1.0, 8, 8);
        mesh.faces.push([0, 1, 9999]);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5));
        assert!(result.mesh.has_valid_indices());
        assert!(result.final_triangles < result.original_triangles);
    }

    #[test]
    fn test_decimate_cancelled() {
        let mesh = make_sphere(1.0, 24, 32);
        let callback: ProgressCallback = Box::new(|_| false);
        let params = DecimateParams::with_target_triangles(100);
        // Reports are throttled, so a fast run may finish before the first one.
        let result = decimate_mesh_with_progress(&mesh, &params, Some(&callback));
        match result {
            Err(e) => assert!(e.is_cancelled()),
            Ok(r) => assert!(r.final_triangles <= 100),
        }
    }

    #[test]
    fn test_quadric_from_plane() {
        let q = Quadric::from_plane(Vector3::z(), 0.0);
        assert!(q.evaluate(&Point3::new(1.0, 2.0, 0.0)).abs() < 1e-12);
        assert_relative_eq!(q.evaluate(&Point3::new(0.0, 0.0, 2.0)), 4.0);
    }

    #[test]
    fn test_quadric_minimizer() {
        let mut q = Quadric::from_plane(Vector3::x(), -1.0);
        q += Quadric::from_plane(Vector3::y(), -2.0);
        q += Quadric::from_plane(Vector3::z(), -3.0);
        let p = q.minimizer().unwrap();
        assert_relative_eq!(p, Point3::new(1.0, 2.0, 3.0), epsilon = 1e-12);

        // A single plane leaves the system singular.
        assert!(Quadric::from_plane(Vector3::z(), 0.0).minimizer().is_none());
    }

    #[test]
    fn test_decimate_params_presets() {
        let aggressive = DecimateParams::aggressive();
        assert_eq!(aggressive.target_ratio, 0.25);
        assert!(!aggressive.preserve_boundary);

        let conservative = DecimateParams::conservative();
        assert_eq!(conservative.target_ratio, 0.75);
        assert!(conservative.preserve_boundary);
        assert!(conservative.aggressiveness < aggressive.aggressiveness);
    }
}
