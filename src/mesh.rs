//! Indexed triangle meshes, the input of a BLAS build.

use glam::{Vec2, Vec3};
use raytracer_shared::TriangleData;

use crate::error::{BuildError, Result};

/// Indexed triangle list with optional per-vertex attributes.
///
/// Attribute arrays are either empty or as long as `positions`. Missing
/// normals fall back to the face normal, missing UVs to zero and missing
/// tangents are derived from the UV layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub tangents: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    /// One id per triangle; the triangle index is used when empty.
    pub face_ids: Vec<u32>,
}

impl Mesh {
    pub fn new(name: impl Into<String>, positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned box centered on the origin, 12 triangles with outward
    /// normals. Both triangles of a side share its face id (0..6 in the
    /// order +x, -x, +y, -y, +z, -z).
    pub fn cuboid(name: impl Into<String>, half_extents: Vec3) -> Self {
        // (normal, u, v) with u x v == normal so the quads wind outward
        let sides = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        let mut mesh = Self::new(name, Vec::with_capacity(24), Vec::with_capacity(36));
        for (side, (normal, u, v)) in sides.into_iter().enumerate() {
            mesh.push_quad(normal, u, v, half_extents, side as u32);
        }
        mesh
    }

    /// Square in the xz-plane facing +y, two triangles.
    pub fn plane(name: impl Into<String>, half_size: f32) -> Self {
        let mut mesh = Self::new(name, Vec::with_capacity(4), Vec::with_capacity(6));
        let extents = Vec3::new(half_size, 0.0, half_size);
        mesh.push_quad(Vec3::Y, Vec3::X, Vec3::NEG_Z, extents, 0);
        mesh
    }

    fn push_quad(&mut self, normal: Vec3, u: Vec3, v: Vec3, half_extents: Vec3, face_id: u32) {
        let base = self.positions.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let corner = (normal + u * su + v * sv) * half_extents;
            self.positions.push(corner.into());
            self.normals.push(normal.into());
            self.uvs.push([(su + 1.0) * 0.5, (1.0 - sv) * 0.5]);
            self.tangents.push(u.extend(1.0).into());
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.face_ids.extend_from_slice(&[face_id, face_id]);
    }

    /// Resolve the index buffer into per-triangle records.
    pub fn triangles(&self) -> Result<Vec<TriangleData>> {
        if self.indices.len() % 3 != 0 {
            return Err(BuildError::IndexCount {
                mesh: self.name.clone(),
                len: self.indices.len(),
            });
        }
        let vertex_count = self.positions.len();
        if let Some(&index) = self.indices.iter().find(|&&index| index as usize >= vertex_count) {
            return Err(BuildError::IndexOutOfRange {
                mesh: self.name.clone(),
                index,
                vertex_count,
            });
        }

        let has_normals = self.normals.len() == vertex_count;
        let has_uvs = self.uvs.len() == vertex_count;
        let has_tangents = self.tangents.len() == vertex_count;

        let triangles = self
            .indices
            .chunks_exact(3)
            .enumerate()
            .map(|(triangle, corners)| {
                let [a, b, c] = [corners[0], corners[1], corners[2]].map(|i| i as usize);
                let positions = [self.positions[a], self.positions[b], self.positions[c]];
                let face_id = self.face_ids.get(triangle).copied().unwrap_or(triangle as u32);

                let mut data = TriangleData::from_positions(positions[0], positions[1], positions[2], face_id);
                if has_normals {
                    data.normals = [self.normals[a], self.normals[b], self.normals[c]];
                }
                data.uvs = if has_uvs {
                    [self.uvs[a], self.uvs[b], self.uvs[c]]
                } else {
                    [[0.0; 2]; 3]
                };
                data.tangent = if has_tangents {
                    self.tangents[a]
                } else {
                    uv_tangent(&data)
                };
                data
            })
            .collect();
        Ok(triangles)
    }
}

/// Tangent along +u of the UV mapping, with handedness in `w`.
fn uv_tangent(triangle: &TriangleData) -> [f32; 4] {
    let [p0, p1, p2] = triangle.positions.map(Vec3::from);
    let [uv0, uv1, uv2] = triangle.uvs.map(Vec2::from);
    let (e1, e2) = (p1 - p0, p2 - p0);
    let (d1, d2) = (uv1 - uv0, uv2 - uv0);

    let det = d1.x * d2.y - d2.x * d1.y;
    if det.abs() < f32::EPSILON {
        return [1.0, 0.0, 0.0, 1.0];
    }
    let r = 1.0 / det;
    let tangent = (e1 * d2.y - e2 * d1.y) * r;
    let bitangent = (e2 * d1.x - e1 * d2.x) * r;
    let normal = e1.cross(e2);
    let handedness = if normal.cross(tangent).dot(bitangent) < 0.0 { -1.0 } else { 1.0 };
    tangent.normalize_or_zero().extend(handedness).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cuboid_has_outward_faces() {
        let mesh = Mesh::cuboid("box", Vec3::new(1.0, 2.0, 3.0));
        let triangles = mesh.triangles().unwrap();

        assert_eq!(triangles.len(), 12);
        for triangle in &triangles {
            let [a, b, c] = triangle.positions.map(Vec3::from);
            let geometric = (b - a).cross(c - a).normalize();
            let shading = Vec3::from(triangle.normals[0]);
            assert_relative_eq!(geometric.dot(shading), 1.0, epsilon = 1e-6);
            // the face center sits on the side the normal points to
            assert!(((a + b + c) / 3.0).dot(shading) > 0.0);
        }
        assert_eq!(triangles[10].face_id, 5);
    }

    #[test]
    fn cuboid_spans_half_extents() {
        let mesh = Mesh::cuboid("box", Vec3::new(1.0, 2.0, 3.0));
        let max = mesh
            .positions
            .iter()
            .fold(Vec3::splat(f32::MIN), |acc, p| acc.max(Vec3::from(*p)));
        assert_eq!(max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn plane_faces_up() {
        let triangles = Mesh::plane("floor", 5.0).triangles().unwrap();
        assert_eq!(triangles.len(), 2);
        for triangle in &triangles {
            let [a, b, c] = triangle.positions.map(Vec3::from);
            assert!((b - a).cross(c - a).y > 0.0);
        }
    }

    #[test]
    fn bare_positions_get_defaults() {
        let mesh = Mesh::new(
            "tri",
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        );
        let triangles = mesh.triangles().unwrap();

        assert_eq!(triangles[0].normals[2], [0.0, 0.0, 1.0]);
        assert_eq!(triangles[0].uvs, [[0.0; 2]; 3]);
        assert_eq!(triangles[0].tangent, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(triangles[0].face_id, 0);
    }

    #[test]
    fn tangent_follows_uv_u() {
        let mut mesh = Mesh::new(
            "tri",
            vec![[0.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            vec![0, 1, 2],
        );
        mesh.uvs = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let tangent = mesh.triangles().unwrap()[0].tangent;

        assert_relative_eq!(Vec3::new(tangent[0], tangent[1], tangent[2]), Vec3::Y, epsilon = 1e-6);
    }

    #[test]
    fn malformed_index_buffers_are_rejected() {
        let mut mesh = Mesh::new("bad", vec![[0.0; 3]; 3], vec![0, 1]);
        assert!(matches!(mesh.triangles(), Err(BuildError::IndexCount { len: 2, .. })));

        mesh.indices = vec![0, 1, 3];
        assert!(matches!(
            mesh.triangles(),
            Err(BuildError::IndexOutOfRange { index: 3, vertex_count: 3, .. })
        ));
    }
}
