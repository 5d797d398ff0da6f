//! Readers for captures.
//!
//! Point clouds come as PLY (via `ply-rs`) or plain-text XYZ. XYZ holds one
//! sample per line: `x y z`, optionally followed by a normal (`nx ny nz`)
//! and/or a confidence. Every line must have the same number of columns.
//! Blank lines and lines starting with `#` are skipped; commas count as
//! whitespace. PLY vertices may carry `nx ny nz` and `confidence`.
//!
//! Surfaces for the direct-mesh strategy are read from OBJ with `tobj`,
//! built with `use_f64` so coordinates keep full precision.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail};
use nalgebra::{Point3, Vector3};
use ply_rs::ply::Property;
use scan_volume::{Mesh, PointCloud};
use tracing::debug;

/// Load a point cloud, choosing the format by extension.
pub fn read_cloud(path: &Path) -> Result<PointCloud> {
    let is_ply = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ply"));
    if is_ply {
        read_ply(path)
    } else {
        read_xyz(path)
    }
}

/// Load an XYZ point cloud.
pub fn read_xyz(path: &Path) -> Result<PointCloud> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read point cloud from {:?}", path))?;
    parse_xyz(&text).with_context(|| format!("Invalid point cloud {:?}", path))
}

/// Load the vertex element of a PLY file as a point cloud.
pub fn read_ply(path: &Path) -> Result<PointCloud> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    let parser = ply_rs::parser::Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .with_context(|| format!("PLY parse error in {:?}", path))?;

    let Some(vertices) = ply.payload.get("vertex") else {
        bail!("{:?} has no vertex element", path);
    };

    let mut positions = Vec::with_capacity(vertices.len());
    let mut normals = Vec::with_capacity(vertices.len());
    let mut confidences = Vec::with_capacity(vertices.len());
    for (i, v) in vertices.iter().enumerate() {
        let coord = |name: &str| {
            ply_float(v.get(name)).with_context(|| format!("vertex {}: missing or invalid {}", i, name))
        };
        positions.push(Point3::new(coord("x")?, coord("y")?, coord("z")?));
        if let (Some(nx), Some(ny), Some(nz)) = (
            ply_float(v.get("nx")),
            ply_float(v.get("ny")),
            ply_float(v.get("nz")),
        ) {
            normals.push(Vector3::new(nx, ny, nz));
        }
        if let Some(c) = ply_float(v.get("confidence")) {
            confidences.push(c as f32);
        }
    }

    // Attributes count only when every vertex has them
    let n = positions.len();
    let normals = (n > 0 && normals.len() == n).then_some(normals);
    let confidences = (n > 0 && confidences.len() == n).then_some(confidences);
    debug!(points = n, normals = normals.is_some(), "Read PLY point cloud");
    Ok(PointCloud::from_parts(positions, normals, confidences)?)
}

/// Load an OBJ surface, merging all models.
pub fn read_obj(path: &Path) -> Result<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("Failed to load mesh from {:?}", path))?;

    if models.is_empty() {
        bail!("{:?} contains no models", path);
    }

    let mut mesh = Mesh::new();
    for model in &models {
        let offset = mesh.vertex_count() as u32;
        mesh.vertices.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|c| scan_volume::Vertex::from_coords(c[0], c[1], c[2])),
        );
        mesh.faces.extend(
            model
                .mesh
                .indices
                .chunks_exact(3)
                .map(|c| [c[0] + offset, c[1] + offset, c[2] + offset]),
        );
    }
    if !mesh.has_valid_indices() {
        bail!("{:?} has face indices past the vertex list", path);
    }
    debug!(vertices = mesh.vertex_count(), faces = mesh.face_count(), "Read OBJ mesh");
    Ok(mesh)
}

fn ply_float(prop: Option<&Property>) -> Option<f64> {
    match prop? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

fn parse_xyz(text: &str) -> Result<PointCloud> {
    let mut columns = None;
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut confidences = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("line {}: not a number", lineno + 1))?;

        let n = *columns.get_or_insert(values.len());
        if values.len() != n {
            bail!("line {}: expected {} columns, found {}", lineno + 1, n, values.len());
        }
        if !matches!(n, 3 | 4 | 6 | 7) {
            bail!("line {}: expected 3, 4, 6 or 7 columns, found {}", lineno + 1, n);
        }

        positions.push(Point3::new(values[0], values[1], values[2]));
        if n >= 6 {
            normals.push(Vector3::new(values[3], values[4], values[5]));
        }
        if n == 4 || n == 7 {
            confidences.push(values[n - 1] as f32);
        }
    }

    let normals = (!normals.is_empty()).then_some(normals);
    let confidences = (!confidences.is_empty()).then_some(confidences);
    Ok(PointCloud::from_parts(positions, normals, confidences)?)
}
