use glam::Vec3;
use raytracer_shared::{Aabb, RaytracerConfig};

use crate::ray::Ray;

/// A ray/triangle hit in the space the triangle was tested in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    /// Weights of `(v0, v1, v2)`; they sum to one.
    pub barycentric: Vec3,
}

/// Ray-AABB slab test for BVH traversal.
///
/// Returns the entry distance, which is negative when the origin is inside
/// the box. A box counts as hit only if the exit distance lies beyond both
/// the entry distance and the origin.
#[inline]
pub fn ray_aabb_intersect(ray: &Ray, inv_dir: Vec3, aabb: &Aabb) -> Option<f32> {
    let t1 = (aabb.min_vec() - ray.origin) * inv_dir;
    let t2 = (aabb.max_vec() - ray.origin) * inv_dir;

    let near = t1.min(t2).max_element();
    let far = t1.max(t2).min_element();

    if far > near.max(0.0) {
        Some(near)
    } else {
        None
    }
}

/// Two-sided ray-triangle test built from the edge vectors and the face
/// normal, with a single reciprocal of the determinant.
#[inline]
pub fn test_triangle_intersection(ray: &Ray, vertices: [Vec3; 3]) -> Option<TriangleHit> {
    let [v0, v1, v2] = vertices;
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let to_origin = ray.origin - v0;

    let normal = edge1.cross(edge2);
    let q = to_origin.cross(ray.direction);
    let det = ray.direction.dot(normal);
    if det == 0.0 {
        return None;
    }
    let inv_det = 1.0 / det;

    let v = inv_det * (-q).dot(edge2);
    let w = inv_det * q.dot(edge1);
    let t = inv_det * (-normal).dot(to_origin);
    let u = 1.0 - v - w;

    // NaN fails every comparison below
    if t > RaytracerConfig::MIN_RAY_DISTANCE && u >= 0.0 && v >= 0.0 && w >= 0.0 {
        Some(TriangleHit {
            t,
            barycentric: Vec3::new(u, v, w),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_triangle() -> [Vec3; 3] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn triangle_hit_reports_distance_and_barycentrics() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = test_triangle_intersection(&ray, unit_triangle()).unwrap();

        assert_abs_diff_eq!(hit.t, 1.0);
        assert_abs_diff_eq!(hit.barycentric, Vec3::new(0.5, 0.25, 0.25));
    }

    #[test]
    fn triangle_is_two_sided() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(test_triangle_intersection(&ray, unit_triangle()).is_some());
    }

    #[test]
    fn triangle_miss_outside_edges() {
        let ray = Ray::new(Vec3::new(0.75, 0.75, 1.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(test_triangle_intersection(&ray, unit_triangle()).is_none());
    }

    #[test]
    fn triangle_behind_origin_is_rejected() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(test_triangle_intersection(&ray, unit_triangle()).is_none());
    }

    #[test]
    fn origin_on_triangle_is_rejected() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, 0.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(test_triangle_intersection(&ray, unit_triangle()).is_none());
    }

    #[test]
    fn parallel_ray_misses() {
        let ray = Ray::new(Vec3::new(-1.0, 0.25, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(test_triangle_intersection(&ray, unit_triangle()).is_none());
    }

    #[test]
    fn aabb_near_distance() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let near = ray_aabb_intersect(&ray, ray.direction.recip(), &aabb).unwrap();
        assert_abs_diff_eq!(near, 4.0);
    }

    #[test]
    fn aabb_origin_inside_has_negative_near() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let near = ray_aabb_intersect(&ray, ray.direction.recip(), &aabb).unwrap();
        assert!(near < 0.0);
    }

    #[test]
    fn aabb_behind_origin_misses() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(ray_aabb_intersect(&ray, ray.direction.recip(), &aabb).is_none());
    }

    #[test]
    fn aabb_side_miss() {
        let aabb = Aabb::new([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let ray = Ray::new(Vec3::new(3.0, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(ray_aabb_intersect(&ray, ray.direction.recip(), &aabb).is_none());
    }
}
