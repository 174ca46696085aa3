use std::path::Path;

use glam::{Mat4, Vec3};
use gltf::{Camera as GltfCamera, Document, Node, Primitive};
use raytracer_shared::Camera;
use thiserror::Error;

use crate::mesh::Mesh;
use crate::scene::Instance;

/// glTF loader producing meshes for the BLAS set and instances for the TLAS
pub struct GltfLoader {
    document: Document,
    buffers: Vec<gltf::buffer::Data>,
}

/// Error types for glTF loading
#[derive(Error, Debug)]
pub enum GltfError {
    #[error("failed to read glTF file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid glTF document: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("{0}")]
    Validation(String),
}

/// Geometry and placements pulled out of one glTF scene.
///
/// `meshes[i]` is glTF mesh `i`, so an instance's BLAS id is its glTF mesh
/// index. Instances carry the glTF node index as their child id.
pub struct LoadedScene {
    pub meshes: Vec<Mesh>,
    pub instances: Vec<Instance>,
    pub cameras: Vec<Camera>,
}

impl GltfLoader {
    /// Load a glTF or GLB file from path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, GltfError> {
        let (document, buffers, _images) = gltf::import(path)?;
        Ok(Self { document, buffers })
    }

    /// Load from an in-memory glTF or GLB document
    pub fn load_from_glb(data: &[u8]) -> Result<Self, GltfError> {
        let (document, buffers, _images) = gltf::import_slice(data)?;
        Ok(Self { document, buffers })
    }

    pub fn extract_scene(&self, scene_index: Option<usize>) -> Result<LoadedScene, GltfError> {
        let scene = if let Some(index) = scene_index {
            self.document
                .scenes()
                .nth(index)
                .ok_or_else(|| GltfError::Validation(format!("Scene {index} not found")))?
        } else {
            self.document
                .default_scene()
                .or_else(|| self.document.scenes().next())
                .ok_or_else(|| GltfError::Validation("No scenes found in glTF file".to_string()))?
        };

        let meshes = self
            .document
            .meshes()
            .map(|mesh| self.convert_mesh(&mesh))
            .collect::<Result<Vec<_>, _>>()?;

        let mut instances = Vec::new();
        let mut cameras = Vec::new();
        for node in scene.nodes() {
            self.process_node(&node, &Mat4::IDENTITY, &mut instances, &mut cameras)?;
        }

        log::info!(
            "Loaded glTF scene: {} meshes, {} triangles, {} instances, {} cameras",
            meshes.len(),
            meshes.iter().map(Mesh::triangle_count).sum::<usize>(),
            instances.len(),
            cameras.len()
        );

        Ok(LoadedScene {
            meshes,
            instances,
            cameras,
        })
    }

    /// Process a single node and its children recursively
    fn process_node(
        &self,
        node: &Node,
        parent_transform: &Mat4,
        instances: &mut Vec<Instance>,
        cameras: &mut Vec<Camera>,
    ) -> Result<(), GltfError> {
        let local_transform = Mat4::from_cols_array_2d(&node.transform().matrix());
        let transform = *parent_transform * local_transform;

        if let Some(mesh) = node.mesh() {
            let child_id = node.index() as u32;
            if transform.determinant() == 0.0 {
                log::warn!("Skipping node {child_id}: transform is not invertible");
            } else {
                instances.push(Instance::new(child_id, mesh.index(), transform));
            }
        }

        if let Some(gltf_camera) = node.camera() {
            cameras.push(self.convert_camera(&gltf_camera, &transform));
        }

        for child in node.children() {
            self.process_node(&child, &transform, instances, cameras)?;
        }

        Ok(())
    }

    /// Convert glTF camera to raytracer camera
    fn convert_camera(&self, gltf_camera: &GltfCamera, transform: &Mat4) -> Camera {
        let position = transform.transform_point3(Vec3::ZERO);
        let direction = transform.transform_vector3(Vec3::NEG_Z).normalize_or_zero();
        let up = transform.transform_vector3(Vec3::Y).normalize_or_zero();

        let fov = match gltf_camera.projection() {
            gltf::camera::Projection::Perspective(perspective) => perspective.yfov().to_degrees(),
            gltf::camera::Projection::Orthographic(_) => 45.0,
        };

        Camera {
            position: position.to_array(),
            direction: direction.to_array(),
            up: up.to_array(),
            fov,
        }
    }

    /// All primitives of a glTF mesh merged into one object-space mesh
    fn convert_mesh(&self, gltf_mesh: &gltf::Mesh) -> Result<Mesh, GltfError> {
        let name = gltf_mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh{}", gltf_mesh.index()));
        let mut mesh = Mesh::new(name, Vec::new(), Vec::new());
        for primitive in gltf_mesh.primitives() {
            self.process_primitive(&primitive, &mut mesh)?;
        }
        Ok(mesh)
    }

    fn process_primitive(&self, primitive: &Primitive, mesh: &mut Mesh) -> Result<(), GltfError> {
        let reader = primitive.reader(|buffer| self.buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| GltfError::Validation("Primitive missing position data".to_string()))?
            .collect();
        let vertex_count = positions.len();
        let indices: Vec<u32> = reader
            .read_indices()
            .map(|indices| indices.into_u32().collect())
            .unwrap_or_else(|| (0..vertex_count as u32).collect());

        if let Some(&index) = indices.iter().find(|&&index| index as usize >= vertex_count) {
            return Err(GltfError::Validation(format!(
                "Primitive of mesh `{}` references vertex {index} of {vertex_count}",
                mesh.name
            )));
        }

        let triangles: Vec<[u32; 3]> = match primitive.mode() {
            gltf::mesh::Mode::Triangles => indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
            gltf::mesh::Mode::TriangleFan => indices
                .windows(2)
                .skip(1)
                .map(|pair| [indices[0], pair[0], pair[1]])
                .collect(),
            // alternate winding so every strip triangle faces the same way
            gltf::mesh::Mode::TriangleStrip => indices
                .windows(3)
                .enumerate()
                .map(|(i, w)| if i % 2 == 0 { [w[0], w[1], w[2]] } else { [w[0], w[2], w[1]] })
                .collect(),
            mode => {
                log::warn!("Skipping primitive of mesh `{}`: unsupported mode {mode:?}", mesh.name);
                return Ok(());
            }
        };

        let base = mesh.positions.len();
        merge_attribute(&mut mesh.normals, reader.read_normals().map(Iterator::collect), base, vertex_count);
        merge_attribute(
            &mut mesh.uvs,
            reader.read_tex_coords(0).map(|uvs| uvs.into_f32().collect()),
            base,
            vertex_count,
        );
        merge_attribute(&mut mesh.tangents, reader.read_tangents().map(Iterator::collect), base, vertex_count);
        mesh.positions.extend(positions);

        let offset = base as u32;
        mesh.indices
            .extend(triangles.into_iter().flatten().map(|index| index + offset));
        Ok(())
    }

    /// Get list of available scenes
    pub fn list_scenes(&self) -> Vec<(usize, Option<String>)> {
        self.document
            .scenes()
            .enumerate()
            .map(|(index, scene)| (index, scene.name().map(|s| s.to_string())))
            .collect()
    }

    pub fn scene_count(&self) -> usize {
        self.document.scenes().len()
    }
}

/// Append one primitive's attribute values. An attribute missing from any
/// primitive is dropped for the whole mesh, keeping the arrays either empty
/// or as long as the positions.
fn merge_attribute<T>(target: &mut Vec<T>, values: Option<Vec<T>>, previous_vertices: usize, count: usize) {
    match values {
        Some(values) if values.len() == count && target.len() == previous_vertices => target.extend(values),
        _ => target.clear(),
    }
}
