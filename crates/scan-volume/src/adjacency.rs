//! Edge and vertex adjacency for triangle meshes.

use hashbrown::HashMap;

/// Undirected edge key with the smaller vertex index first.
pub type EdgeKey = (u32, u32);

/// How the faces around one undirected edge use it.
#[derive(Debug, Clone, Default)]
pub struct EdgeUse {
    /// Faces containing this edge.
    pub faces: Vec<u32>,
    /// Faces traversing the edge from the lower to the higher index.
    pub forward: u32,
    /// Faces traversing the edge from the higher to the lower index.
    pub backward: u32,
}

impl EdgeUse {
    /// Shared by exactly two faces with opposite traversal.
    #[inline]
    pub fn is_manifold_consistent(&self) -> bool {
        self.forward == 1 && self.backward == 1
    }
}

/// Edge-to-face and vertex-to-face incidence for a face list.
///
/// Faces whose indices fall outside `vertex_count` are ignored.
#[derive(Debug, Clone, Default)]
pub struct MeshAdjacency {
    /// Every undirected edge and the faces using it.
    pub edge_to_faces: HashMap<EdgeKey, EdgeUse>,
    /// Faces incident to each vertex.
    pub vertex_to_faces: Vec<Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency from a face list.
    pub fn build(faces: &[[u32; 3]], vertex_count: usize) -> Self {
        let mut edge_to_faces: HashMap<EdgeKey, EdgeUse> = HashMap::with_capacity(faces.len() * 3 / 2);
        let mut vertex_to_faces = vec![Vec::new(); vertex_count];

        for (face_idx, face) in faces.iter().enumerate() {
            if face.iter().any(|&v| v as usize >= vertex_count) {
                continue;
            }
            let face_idx = face_idx as u32;
            for k in 0..3 {
                let a = face[k];
                let b = face[(k + 1) % 3];
                if a == b {
                    continue;
                }
                let entry = edge_to_faces.entry(normalize_edge(a, b)).or_default();
                entry.faces.push(face_idx);
                if a < b {
                    entry.forward += 1;
                } else {
                    entry.backward += 1;
                }
            }
            for &v in face {
                let incident = &mut vertex_to_faces[v as usize];
                if incident.last() != Some(&face_idx) {
                    incident.push(face_idx);
                }
            }
        }

        Self {
            edge_to_faces,
            vertex_to_faces,
        }
    }

    /// Edges used by exactly one face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, u)| u.faces.len() == 1)
            .map(|(&e, _)| e)
    }

    /// Number of edges used by exactly one face.
    pub fn boundary_edge_count(&self) -> usize {
        self.boundary_edges().count()
    }

    /// Number of edges shared by more than two faces.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|u| u.faces.len() > 2)
            .count()
    }

    /// Vertices that appear on at least one boundary edge.
    pub fn boundary_vertices(&self) -> Vec<bool> {
        let mut on_boundary = vec![false; self.vertex_to_faces.len()];
        for (a, b) in self.boundary_edges() {
            on_boundary[a as usize] = true;
            on_boundary[b as usize] = true;
        }
        on_boundary
    }
}

/// Order an edge's endpoints so the smaller index comes first.
#[inline]
pub fn normalize_edge(a: u32, b: u32) -> EdgeKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
