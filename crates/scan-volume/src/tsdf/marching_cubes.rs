//! Isosurface extraction.

use hashbrown::HashMap;
use tracing::{debug, warn};

use super::tables::{CORNER_OFFSETS, EDGE_CANONICAL, EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};
use super::TsdfVolume;
use crate::error::{VolumeError, VolumeResult};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::types::{Mesh, Vertex};

/// Interpolation parameter limits along an edge.
///
/// Keeps crossings off the lattice samples themselves so that a sample lying
/// exactly on the isovalue cannot collapse several vertices onto one point.
const EDGE_T_MIN: f64 = 1e-3;
const EDGE_T_MAX: f64 = 1.0 - EDGE_T_MIN;

/// Shared edge: lower lattice point plus axis.
type EdgeId = ([usize; 3], usize);

impl TsdfVolume {
    /// Extract the `isovalue` level set as a triangle mesh.
    ///
    /// Cubes with any unobserved corner are skipped. An empty mesh means
    /// nothing was reconstructed and is not an error.
    pub fn extract_mesh(&self, isovalue: f32) -> Mesh {
        self.march(isovalue, |_, _| true).unwrap_or_default()
    }

    /// Extract the level set, reporting progress once per slab.
    ///
    /// Returns `Cancelled` if the callback asks to stop. No partial mesh is
    /// ever returned.
    pub fn extract_mesh_with_progress(
        &self,
        isovalue: f32,
        callback: Option<&ProgressCallback>,
    ) -> VolumeResult<Mesh> {
        let slabs = self.params.dims[2].saturating_sub(1) as u64;
        let tracker = ProgressTracker::new(slabs);
        self.march(isovalue, |k, _| {
            tracker.set(k as u64);
            match callback {
                Some(cb) => cb(&tracker.snapshot("Extracting isosurface")),
                None => true,
            }
        })
        .ok_or_else(|| VolumeError::cancelled("extraction"))
    }

    /// Marching cubes over the whole grid. `keep_going(slab, total)` runs
    /// before every z-slab; returning `false` abandons the mesh.
    fn march(
        &self,
        isovalue: f32,
        mut keep_going: impl FnMut(usize, usize) -> bool,
    ) -> Option<Mesh> {
        if !isovalue.is_finite() {
            warn!(isovalue, "Non-finite isovalue, nothing extracted");
            return Some(Mesh::new());
        }

        let [nx, ny, nz] = self.params.dims;
        let iso = f64::from(isovalue);
        let mut mesh = Mesh::new();
        let mut cache: HashMap<EdgeId, u32> = HashMap::new();
        let mut skipped_unobserved = 0usize;

        for k in 0..nz - 1 {
            if !keep_going(k, nz - 1) {
                debug!(slab = k, "Isosurface extraction cancelled");
                return None;
            }
            for j in 0..ny - 1 {
                for i in 0..nx - 1 {
                    let mut values = [0.0f64; 8];
                    let mut observed = true;
                    for (c, off) in CORNER_OFFSETS.iter().enumerate() {
                        let at = self.index(i + off[0], j + off[1], k + off[2]);
                        if self.weights[at] <= 0.0 {
                            observed = false;
                            break;
                        }
                        values[c] = f64::from(self.distances[at]);
                    }
                    if !observed {
                        skipped_unobserved += 1;
                        continue;
                    }

                    let cube = values
                        .iter()
                        .enumerate()
                        .filter(|(_, &v)| v < iso)
                        .fold(0usize, |acc, (c, _)| acc | (1 << c));
                    let crossed = EDGE_TABLE[cube];
                    if crossed == 0 {
                        continue;
                    }

                    let mut edge_vertex = [0u32; 12];
                    for (e, slot) in edge_vertex.iter_mut().enumerate() {
                        if crossed & (1 << e) == 0 {
                            continue;
                        }
                        let (off, axis) = EDGE_CANONICAL[e];
                        let lower = [i + off[0], j + off[1], k + off[2]];
                        *slot = *cache.entry((lower, axis)).or_insert_with(|| {
                            let [a, b] = EDGE_CORNERS[e];
                            let position =
                                self.edge_crossing(lower, axis, values[a], values[b], iso);
                            mesh.vertices.push(Vertex::new(position));
                            (mesh.vertices.len() - 1) as u32
                        });
                    }

                    // Table order winds inward with negative-inside distances.
                    for row in TRI_TABLE[cube].chunks_exact(3) {
                        if row[0] < 0 {
                            break;
                        }
                        mesh.faces.push([
                            edge_vertex[row[0] as usize],
                            edge_vertex[row[2] as usize],
                            edge_vertex[row[1] as usize],
                        ]);
                    }
                }
            }
        }

        if !mesh.faces.is_empty() {
            mesh.compute_vertex_normals();
        }
        debug!(
            vertices = mesh.vertex_count(),
            triangles = mesh.face_count(),
            cached_edges = cache.len(),
            skipped_unobserved,
            isovalue,
            "Extracted isosurface"
        );
        Some(mesh)
    }

    /// Crossing on the edge leaving lattice point `lower` along `axis`.
    ///
    /// `va` belongs to `lower`, `vb` to its neighbor.
    fn edge_crossing(
        &self,
        lower: [usize; 3],
        axis: usize,
        va: f64,
        vb: f64,
        iso: f64,
    ) -> nalgebra::Point3<f64> {
        let delta = vb - va;
        let t = if delta.abs() < f64::EPSILON {
            0.5
        } else {
            ((iso - va) / delta).clamp(EDGE_T_MIN, EDGE_T_MAX)
        };
        let mut p = self.params.sample_position(lower[0], lower[1], lower[2]);
        p[axis] += t * self.params.voxel_size;
        p
    }
}
