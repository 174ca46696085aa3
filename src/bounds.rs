//! Bounding boxes and centroids feeding the hierarchy builders.

use raytracer_shared::{Aabb, TriangleData};

/// Per-triangle boxes, each padded outward by `epsilon`.
pub fn triangle_bounds(triangles: &[TriangleData], epsilon: f32) -> Vec<Aabb> {
    triangles
        .iter()
        .map(|triangle| triangle.bounding_box().inflated(epsilon))
        .collect()
}

/// Fold the boxes of the members listed in `indices`.
///
/// Every member box is padded by `epsilon` before it is merged, the first
/// one included, so the result never has zero extent on any axis. An empty
/// member list gives [`Aabb::empty`].
pub fn compute_bounds(indices: &[u32], item_bounds: &[Aabb], epsilon: f32) -> Aabb {
    indices.iter().fold(Aabb::empty(), |bounds, &index| {
        bounds.union(&item_bounds[index as usize].inflated(epsilon))
    })
}

/// Center of every member box, computed once per build.
pub fn compute_centroids(item_bounds: &[Aabb]) -> Vec<[f32; 3]> {
    item_bounds.iter().map(Aabb::center).collect()
}
