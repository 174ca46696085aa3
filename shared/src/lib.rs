#![cfg_attr(not(test), no_std)]

//! Data shared between the host-side builders and the traversal kernel.
//!
//! Everything in here describes the serialized acceleration buffer: the
//! constants both sides agree on, the bounding box type, the per-triangle
//! attributes carried in BLAS leaves, and (in [`layout`]) the exact texel
//! encoding of every record kind.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub mod layout;

/// Configuration constants for building and traversing the hierarchy
pub struct RaytracerConfig;

impl RaytracerConfig {
    /// Outward padding applied to every triangle box and every merge.
    pub const BOUNDS_EPSILON: f32 = 1e-6;
    /// Nodes with fewer members than this are never split.
    pub const LEAF_THRESHOLD: usize = 10;
    /// Hits closer than this are rejected as self-intersections.
    pub const MIN_RAY_DISTANCE: f32 = 1e-7;
    /// Occlusion queries ignore hits this close to the target distance.
    pub const OCCLUSION_EPSILON: f32 = 1e-4;
    pub const TRAVERSAL_STACK_SIZE: usize = 64;
    pub const TRAVERSAL_MAX_STEPS: u32 = 800;
}

/// Camera configuration used to generate primary rays
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Camera {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub up: [f32; 3],
    pub fov: f32,
}

impl Camera {
    /// Create a new camera with default parameters
    pub fn new() -> Self {
        Self {
            position: [0.0, 0.0, 5.0],
            direction: [0.0, 0.0, -1.0],
            up: [0.0, 1.0, 0.0],
            fov: 45.0,
        }
    }

    /// Camera at `position` looking at `target`
    pub fn looking_at(position: [f32; 3], target: [f32; 3], fov: f32) -> Self {
        let direction = (Vec3::from(target) - Vec3::from(position)).normalize_or_zero();
        Self {
            position,
            direction: direction.into(),
            up: [0.0, 1.0, 0.0],
            fov,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-Aligned Bounding Box
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: [f32; 3],      // Minimum bounds
    pub _padding0: f32,     // Padding for alignment
    pub max: [f32; 3],      // Maximum bounds
    pub _padding1: f32,     // Padding for alignment
}

impl Aabb {
    /// Create a new AABB
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            _padding0: 0.0,
            max,
            _padding1: 0.0,
        }
    }

    /// Create an empty AABB; the identity of [`Aabb::union`]
    pub fn empty() -> Self {
        Self::new([f32::INFINITY; 3], [f32::NEG_INFINITY; 3])
    }

    /// Smallest box containing all `points`
    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::empty(), |aabb, p| aabb.expanded_to(*p))
    }

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0] || self.min[1] > self.max[1] || self.min[2] > self.max[2]
    }

    pub fn min_vec(&self) -> Vec3 {
        Vec3::from(self.min)
    }

    pub fn max_vec(&self) -> Vec3 {
        Vec3::from(self.max)
    }

    /// Combine this AABB with another
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(
            self.min_vec().min(other.min_vec()).into(),
            self.max_vec().max(other.max_vec()).into(),
        )
    }

    fn expanded_to(&self, point: Vec3) -> Aabb {
        Aabb::new(
            self.min_vec().min(point).into(),
            self.max_vec().max(point).into(),
        )
    }

    /// Pad the box outward by `epsilon` on every side
    pub fn inflated(&self, epsilon: f32) -> Aabb {
        Aabb::new(
            (self.min_vec() - Vec3::splat(epsilon)).into(),
            (self.max_vec() + Vec3::splat(epsilon)).into(),
        )
    }

    /// Get the center point of the AABB
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// True if `other` lies entirely inside this box
    pub fn contains(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }

    /// Conservative world-space box: all 8 corners pushed through `matrix`
    /// and refit.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let (min, max) = (self.min_vec(), self.max_vec());
        let corners = [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(max.x, max.y, max.z),
        ]
        .map(|corner| matrix.transform_point3(corner));
        Aabb::from_points(&corners)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Everything a BLAS leaf record carries for one triangle, in object space.
///
/// The traversal only needs `positions`; the remaining attributes are passed
/// through untouched for the material-resolution stage.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TriangleData {
    pub positions: [[f32; 3]; 3],
    pub normals: [[f32; 3]; 3],
    pub uvs: [[f32; 2]; 3],
    pub tangent: [f32; 4],
    pub face_id: u32,
}

impl TriangleData {
    /// Triangle with only positions set; the face normal fills all three
    /// vertex normals.
    pub fn from_positions(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], face_id: u32) -> Self {
        let (a, b, c) = (Vec3::from(v0), Vec3::from(v1), Vec3::from(v2));
        let normal: [f32; 3] = (b - a).cross(c - a).normalize_or_zero().into();
        Self {
            positions: [v0, v1, v2],
            normals: [normal; 3],
            uvs: [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            tangent: [1.0, 0.0, 0.0, 1.0],
            face_id,
        }
    }

    /// Calculate the bounding box of this triangle
    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_points(&self.positions.map(Vec3::from))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_triangle_bounding_box() {
        let triangle = TriangleData::from_positions(
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.5, 1.0, 0.0],
            0,
        );

        let bbox = triangle.bounding_box();
        assert_eq!(bbox.min, [0.0, 0.0, 0.0]);
        assert_eq!(bbox.max, [1.0, 1.0, 0.0]);
        assert_eq!(triangle.normals[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_aabb_union() {
        let aabb1 = Aabb::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let aabb2 = Aabb::new([0.5, 0.5, 0.5], [2.0, 2.0, 2.0]);

        let union = aabb1.union(&aabb2);
        assert_eq!(union.min, [0.0, 0.0, 0.0]);
        assert_eq!(union.max, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_empty_aabb_is_union_identity() {
        let aabb = Aabb::new([-1.0, 0.0, 2.0], [1.0, 3.0, 4.0]);
        assert!(Aabb::empty().is_empty());
        assert_eq!(Aabb::empty().union(&aabb), aabb);
    }

    #[test]
    fn test_aabb_center() {
        let aabb = Aabb::new([0.0, 0.0, 0.0], [2.0, 4.0, 6.0]);
        let center = aabb.center();
        assert_eq!(center, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_inflated_never_flat() {
        let flat = Aabb::new([0.0, 1.0, 0.0], [2.0, 1.0, 2.0]);
        let padded = flat.inflated(RaytracerConfig::BOUNDS_EPSILON);
        assert!(padded.max[1] > padded.min[1]);
        assert!(padded.contains(&flat));
    }

    #[test]
    fn test_transformed_translation() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let moved = aabb.transformed(&Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(moved.min, [9.0, -1.0, -1.0]);
        assert_eq!(moved.max, [11.0, 1.0, 1.0]);
    }

    #[test]
    fn test_transformed_rotation_is_conservative() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let rotated = aabb.transformed(&Mat4::from_rotation_y(core::f32::consts::FRAC_PI_4));
        let half_diagonal = 2.0_f32.sqrt();
        assert!((rotated.max[0] - half_diagonal).abs() < 1e-5);
        assert!((rotated.min[2] + half_diagonal).abs() < 1e-5);
        assert!((rotated.max[1] - 1.0).abs() < 1e-6);
    }
}
