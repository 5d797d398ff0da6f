//! Mesh topology validation and reporting.
//!
//! A mesh is treated as watertight exactly when [`validate_topology`] finds
//! nothing to report: every index in range, every vertex finite and used, no
//! degenerate faces, and every edge shared by two faces that traverse it in
//! opposite directions.

use tracing::{debug, warn};

use crate::adjacency::{EdgeKey, MeshAdjacency};
use crate::error::{IssueSeverity, TopologyWarning};
use crate::pointcloud::is_finite_point;
use crate::types::Mesh;

/// Faces with area below this fraction of the squared bounding-box diagonal
/// count as degenerate.
pub const DEGENERATE_AREA_RATIO: f64 = 1e-12;

/// Detect topology problems.
///
/// Warnings come out grouped by kind, in index order within each kind.
pub fn validate_topology(mesh: &Mesh) -> Vec<TopologyWarning> {
    let n = mesh.vertex_count();
    let mut warnings = Vec::new();
    let mut used = vec![false; n];

    for (vertex_index, v) in mesh.vertices.iter().enumerate() {
        if !is_finite_point(&v.position) {
            warnings.push(TopologyWarning::NonFiniteVertex { vertex_index });
        }
    }

    let min_area = mesh
        .bounds()
        .map(|(min, max)| (max - min).norm_squared() * DEGENERATE_AREA_RATIO)
        .filter(|a| a.is_finite())
        .unwrap_or(0.0);

    for (face_index, face) in mesh.faces.iter().enumerate() {
        if let Some(&vertex_index) = face.iter().find(|&&v| v as usize >= n) {
            warnings.push(TopologyWarning::InvalidVertexIndex {
                face_index,
                vertex_index,
                vertex_count: n,
            });
            continue;
        }
        for &v in face {
            used[v as usize] = true;
        }
        if let Some(tri) = mesh.triangle(face_index) {
            let area = tri.area();
            if !area.is_finite() || area <= min_area {
                warnings.push(TopologyWarning::DegenerateFace { face_index, area });
            }
        }
    }

    let adjacency = MeshAdjacency::build(&mesh.faces, n);
    let mut edges: Vec<(&EdgeKey, usize, bool)> = adjacency
        .edge_to_faces
        .iter()
        .map(|(key, edge_use)| (key, edge_use.faces.len(), edge_use.is_manifold_consistent()))
        .collect();
    edges.sort_unstable_by_key(|(key, _, _)| **key);

    for &(&(vertex_a, vertex_b), face_count, consistent) in &edges {
        match face_count {
            1 => warnings.push(TopologyWarning::BoundaryEdge { vertex_a, vertex_b }),
            2 if !consistent => {
                warnings.push(TopologyWarning::InconsistentOrientation { vertex_a, vertex_b })
            }
            2 => {}
            _ => warnings.push(TopologyWarning::NonManifoldEdge {
                vertex_a,
                vertex_b,
                face_count,
            }),
        }
    }

    for (vertex_index, &is_used) in used.iter().enumerate() {
        if !is_used {
            warnings.push(TopologyWarning::IsolatedVertex { vertex_index });
        }
    }

    warnings
}

/// Validation report for a mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshReport {
    /// Total vertex count.
    pub vertex_count: usize,
    /// Total face count.
    pub face_count: usize,
    /// Faces referencing missing vertices.
    pub invalid_index_count: usize,
    /// Vertices with NaN or infinite coordinates.
    pub non_finite_vertex_count: usize,
    /// Faces with near-zero area.
    pub degenerate_face_count: usize,
    /// Number of boundary edges (edges with 1 adjacent face).
    pub boundary_edge_count: usize,
    /// Number of non-manifold edges (edges with >2 adjacent faces).
    pub non_manifold_edge_count: usize,
    /// Edges whose two faces agree on direction.
    pub inconsistent_edge_count: usize,
    /// Vertices not used by any face.
    pub isolated_vertex_count: usize,
    /// Every warning found.
    pub warnings: Vec<TopologyWarning>,
}

impl MeshReport {
    /// Tally a warning list.
    pub fn from_warnings(mesh: &Mesh, warnings: Vec<TopologyWarning>) -> Self {
        let mut report = Self {
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            ..Default::default()
        };
        for w in &warnings {
            let counter = match w {
                TopologyWarning::InvalidVertexIndex { .. } => &mut report.invalid_index_count,
                TopologyWarning::NonFiniteVertex { .. } => &mut report.non_finite_vertex_count,
                TopologyWarning::DegenerateFace { .. } => &mut report.degenerate_face_count,
                TopologyWarning::BoundaryEdge { .. } => &mut report.boundary_edge_count,
                TopologyWarning::NonManifoldEdge { .. } => &mut report.non_manifold_edge_count,
                TopologyWarning::InconsistentOrientation { .. } => {
                    &mut report.inconsistent_edge_count
                }
                TopologyWarning::IsolatedVertex { .. } => &mut report.isolated_vertex_count,
            };
            *counter += 1;
        }
        report.warnings = warnings;
        report
    }

    /// No warnings of any kind, and at least one face.
    pub fn is_watertight(&self) -> bool {
        self.face_count > 0 && self.warnings.is_empty()
    }

    /// Whether all edges have at most 2 adjacent faces.
    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edge_count == 0
    }

    /// Highest severity among the warnings.
    pub fn worst_severity(&self) -> Option<IssueSeverity> {
        self.warnings.iter().map(|w| w.severity()).max()
    }
}

impl std::fmt::Display for MeshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mesh Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(
            f,
            "  Watertight: {}",
            if self.is_watertight() { "yes" } else { "NO" }
        )?;
        let rows = [
            ("Invalid indices", self.invalid_index_count),
            ("Non-finite vertices", self.non_finite_vertex_count),
            ("Degenerate faces", self.degenerate_face_count),
            ("Boundary edges", self.boundary_edge_count),
            ("Non-manifold edges", self.non_manifold_edge_count),
            ("Inconsistent edges", self.inconsistent_edge_count),
            ("Isolated vertices", self.isolated_vertex_count),
        ];
        for (label, count) in rows {
            if count > 0 {
                writeln!(f, "  {}: {}", label, count)?;
            }
        }
        Ok(())
    }
}

/// Validate a mesh and return a report.
pub fn validate_mesh(mesh: &Mesh) -> MeshReport {
    let report = MeshReport::from_warnings(mesh, validate_topology(mesh));

    if report.boundary_edge_count > 0 {
        warn!(
            boundary_edges = report.boundary_edge_count,
            "Mesh is not watertight"
        );
    }
    if !report.is_manifold() {
        warn!(
            non_manifold_edges = report.non_manifold_edge_count,
            "Mesh is not manifold"
        );
    }
    if report.inconsistent_edge_count > 0 {
        warn!(
            inconsistent_edges = report.inconsistent_edge_count,
            "Mesh winding is inconsistent"
        );
    }

    debug!("{}", report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    pub(crate) fn unit_cube() -> Mesh {
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
    fn test_unit_cube_is_clean() {
        let mesh = unit_cube();
        assert!(validate_topology(&mesh).is_empty());
        let report = validate_mesh(&mesh);
        assert!(report.is_watertight());
        assert!(report.is_manifold());
        assert!(report.worst_severity().is_none());
    }

    #[test]
    fn test_flipped_face_is_inconsistent() {
        let mut mesh = unit_cube();
        mesh.faces[0] = [0, 1, 2];
        let warnings = validate_topology(&mesh);
        assert!(!warnings.is_empty());
        assert!(warnings
            .iter()
            .all(|w| matches!(w, TopologyWarning::InconsistentOrientation { .. })));
        let report = MeshReport::from_warnings(&mesh, warnings);
        assert_eq!(report.inconsistent_edge_count, 3);
        assert!(!report.is_watertight());
    }

    #[test]
    fn test_missing_face_opens_boundary() {
        let mut mesh = unit_cube();
        mesh.faces.pop();
        let report = validate_mesh(&mesh);
        assert_eq!(report.boundary_edge_count, 3);
        assert!(!report.is_watertight());
    }

    #[test]
    fn test_invalid_index_and_isolated_vertex() {
        let mut mesh = unit_cube();
        mesh.vertices.push(crate::types::Vertex::from_coords(5.0, 5.0, 5.0));
        mesh.faces.push([0, 1, 42]);
        let report = validate_mesh(&mesh);
        assert_eq!(report.invalid_index_count, 1);
        assert_eq!(report.isolated_vertex_count, 1);
        assert_eq!(report.worst_severity(), Some(IssueSeverity::Error));
    }

    #[test]
    fn test_degenerate_and_non_manifold() {
        let mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, -1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 1, 2], [0, 1, 3], [1, 0, 4], [0, 1, 5]],
        );
        let report = validate_mesh(&mesh);
        assert_eq!(report.degenerate_face_count, 1);
        assert!(report.non_manifold_edge_count >= 1);
    }

    #[test]
    fn test_non_finite_vertex() {
        let mut mesh = unit_cube();
        mesh.vertices[6].position.z = f64::NAN;
        let report = validate_mesh(&mesh);
        assert_eq!(report.non_finite_vertex_count, 1);
    }

    #[test]
    fn test_empty_mesh_is_not_watertight() {
        let report = validate_mesh(&Mesh::new());
        assert!(report.warnings.is_empty());
        assert!(!report.is_watertight());
    }
}
