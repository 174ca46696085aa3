//! Two-level bounding volume hierarchy for instanced triangle scenes.
//!
//! Meshes are turned into bottom-level hierarchies ([`Blas`]) once. Instance
//! placements feed a top-level hierarchy ([`Tlas`]) that is rebuilt whenever
//! the [`InstanceSet`] version moves. Both levels are flattened into one
//! `f32` buffer ([`SceneBuffer`]) that the `raytracer-shader` traversal
//! walks with a bounded stack.

pub mod bounds;
pub mod bvh;
pub mod error;
pub mod gltf_loader;
pub mod mesh;
pub mod scene;
pub mod serializer;
pub mod tlas;
pub mod world;

pub use bvh::{Blas, BuildConfig, Bvh, BvhNode, BvhStats};
pub use error::{BuildError, LayoutError, RecordKind};
pub use mesh::Mesh;
pub use scene::{BlasId, Instance, InstanceSet, SceneState};
pub use serializer::{serialize, BlasLayout, SceneBuffer};
pub use tlas::{Tlas, TlasInstance};
pub use world::{WorldBvh, WorldStats};

pub use raytracer_shader::{IntersectionResult, Ray, TraversalLimits};
pub use raytracer_shared::{Aabb, Camera, RaytracerConfig, TriangleData};
