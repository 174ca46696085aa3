use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};
use raytracer_shared::Camera;

use crate::gltf_loader::{GltfError, GltfLoader};
use crate::mesh::Mesh;

/// Source of instance versions, shared by every [`InstanceSet`] in the
/// process so two sets never report the same version for different contents.
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Index of a BLAS in the world's BLAS set
pub type BlasId = usize;

/// One placement of a BLAS in the world
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Instance {
    /// Entity id reported back by hit queries.
    pub child_id: u32,
    pub blas: BlasId,
    pub transform: Mat4,
}

impl Instance {
    pub fn new(child_id: u32, blas: BlasId, transform: Mat4) -> Self {
        Self {
            child_id,
            blas,
            transform,
        }
    }
}

/// Scene instances plus a version that moves on every change.
///
/// The world compares this version against the one its current buffer was
/// built from to decide whether the top level needs rebuilding. Versions are
/// drawn from a process-wide counter, so they are unique across sets: a
/// freshly loaded set never matches the version of the one it replaces.
/// A new set starts at 0 until its first change.
#[derive(Clone, Debug, Default)]
pub struct InstanceSet {
    instances: Vec<Instance>,
    version: u64,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Add an instance and return its slot.
    pub fn push(&mut self, instance: Instance) -> usize {
        self.instances.push(instance);
        self.version = next_version();
        self.instances.len() - 1
    }

    /// Move an instance. Returns false for an unknown slot.
    pub fn set_transform(&mut self, slot: usize, transform: Mat4) -> bool {
        match self.instances.get_mut(slot) {
            Some(instance) => {
                instance.transform = transform;
                self.version = next_version();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<Instance> {
        if slot >= self.instances.len() {
            return None;
        }
        self.version = next_version();
        Some(self.instances.remove(slot))
    }

}

impl Extend<Instance> for InstanceSet {
    fn extend<I: IntoIterator<Item = Instance>>(&mut self, iter: I) {
        self.instances.extend(iter);
        self.version = next_version();
    }
}

/// Scene geometry, placements and camera
pub struct SceneState {
    pub camera: Camera,
    pub meshes: Vec<Mesh>,
    pub instances: InstanceSet,
}

impl SceneState {
    /// Ground plane with a 5x5 grid of unit cubes on it.
    pub fn new() -> Self {
        let meshes = vec![Mesh::cuboid("cube", Vec3::splat(0.5)), Mesh::plane("ground", 20.0)];

        let mut instances = InstanceSet::new();
        instances.push(Instance::new(0, 1, Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0))));
        let cubes = (0..25u32).map(|i| {
            let (row, column) = ((i / 5) as f32 - 2.0, (i % 5) as f32 - 2.0);
            let transform = Mat4::from_translation(Vec3::new(column * 2.0, 0.0, row * 2.0))
                * Mat4::from_rotation_y(i as f32 * 0.3);
            Instance::new(i + 1, 0, transform)
        });
        instances.extend(cubes);

        Self {
            camera: Camera::looking_at([0.0, 6.0, 12.0], [0.0, 0.0, 0.0], 45.0),
            meshes,
            instances,
        }
    }

    /// Load scene from glTF file
    pub fn load_from_gltf<P: AsRef<Path>>(path: P) -> Result<Self, GltfError> {
        let loader = GltfLoader::load_from_path(&path)?;
        let loaded = loader.extract_scene(None)?;

        // Use the first camera from glTF if available, otherwise default camera
        let camera = loaded.cameras.first().copied().unwrap_or_else(Camera::new);
        let mut instances = InstanceSet::new();
        instances.extend(loaded.instances);

        Ok(Self {
            camera,
            meshes: loaded.meshes,
            instances,
        })
    }

    /// Load scene from glTF file with fallback to default scene
    pub fn load_from_gltf_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_gltf(path.as_ref()) {
            Ok(scene) => {
                log::info!("Loaded glTF scene from {:?}", path.as_ref());
                scene
            }
            Err(e) => {
                log::warn!("Failed to load glTF scene from {:?}, using default scene: {e}", path.as_ref());
                Self::new()
            }
        }
    }
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_change_bumps_the_version() {
        let mut set = InstanceSet::new();
        assert_eq!(set.version(), 0);

        let slot = set.push(Instance::new(7, 0, Mat4::IDENTITY));
        let pushed = set.version();
        assert!(pushed > 0);

        assert!(set.set_transform(slot, Mat4::from_translation(Vec3::X)));
        let moved = set.version();
        assert!(moved > pushed);

        assert!(!set.set_transform(5, Mat4::IDENTITY));
        assert_eq!(set.version(), moved);

        assert_eq!(set.remove(slot).map(|i| i.child_id), Some(7));
        let removed = set.version();
        assert!(removed > moved);
        assert!(set.remove(slot).is_none());
        assert_eq!(set.version(), removed);
    }

    #[test]
    fn separate_sets_never_share_a_version() {
        let mut first = InstanceSet::new();
        let mut second = InstanceSet::new();
        first.push(Instance::new(1, 0, Mat4::IDENTITY));
        second.push(Instance::new(2, 0, Mat4::IDENTITY));

        assert_ne!(first.version(), second.version());
        assert!(second.version() > first.version());
    }

    #[test]
    fn default_scene_references_its_meshes() {
        let scene = SceneState::new();

        assert_eq!(scene.instances.len(), 26);
        assert!(scene.instances.instances().iter().all(|i| i.blas < scene.meshes.len()));
        assert!(scene.instances.version() > 0);
    }

    #[test]
    fn missing_gltf_falls_back_to_default() {
        let scene = SceneState::load_from_gltf_or_default("does/not/exist.glb");
        assert_eq!(scene.meshes.len(), 2);
    }
}
