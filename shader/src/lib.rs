#![cfg_attr(not(test), no_std)]

//! Ray queries against a serialized two-level acceleration buffer.
//!
//! Nothing in this crate allocates or recurses: the traversal keeps a fixed
//! 64-entry stack and a step budget, so the same code can run as a compute
//! kernel or on the CPU.

pub mod bvh;
pub mod intersection;
pub mod ray;
pub mod scene_access;

pub use bvh::{BvhTraverser, IntersectionResult, TraversalLimits};
pub use ray::Ray;
pub use scene_access::SceneAccessor;

use glam::Vec3;

/// Nearest hit with the default traversal limits
pub fn intersect(
    buffer: &[f32],
    tlas_root: u32,
    origin: Vec3,
    direction: Vec3,
    max_distance: Option<f32>,
) -> IntersectionResult {
    BvhTraverser::new(buffer).intersect(tlas_root, origin, direction, max_distance)
}

/// Occlusion test with the default traversal limits
pub fn occluded(buffer: &[f32], tlas_root: u32, origin: Vec3, direction: Vec3, max_distance: f32) -> bool {
    BvhTraverser::new(buffer).occluded(tlas_root, origin, direction, max_distance)
}
