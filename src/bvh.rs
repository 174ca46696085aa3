use raytracer_shared::{Aabb, RaytracerConfig, TriangleData};

use crate::bounds::{compute_bounds, compute_centroids, triangle_bounds};

/// Tuning knobs for the hierarchy builders
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BuildConfig {
    /// Nodes with fewer members than this stay leaves.
    pub leaf_threshold: usize,
    pub bounds_epsilon: f32,
    /// Subtrees at least this large build their two halves on separate threads.
    pub parallel_threshold: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            leaf_threshold: RaytracerConfig::LEAF_THRESHOLD,
            bounds_epsilon: RaytracerConfig::BOUNDS_EPSILON,
            parallel_threshold: 4096,
        }
    }
}

/// Node of a built hierarchy, before serialization.
///
/// A leaf covers `indices[offset..offset + length]` of the owning [`Bvh`].
#[derive(Clone, Debug, PartialEq)]
pub enum BvhNode {
    Branch {
        bounds: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
    Leaf {
        bounds: Aabb,
        offset: u32,
        length: u32,
    },
}

impl BvhNode {
    pub fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Branch { bounds, .. } | BvhNode::Leaf { bounds, .. } => bounds,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BvhNode::Leaf { .. })
    }

    pub fn node_count(&self) -> usize {
        match self {
            BvhNode::Branch { left, right, .. } => 1 + left.node_count() + right.node_count(),
            BvhNode::Leaf { .. } => 1,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            BvhNode::Branch { left, right, .. } => left.leaf_count() + right.leaf_count(),
            BvhNode::Leaf { .. } => 1,
        }
    }

    /// `(offset, length)` of every leaf, left to right.
    pub fn leaf_ranges(&self) -> Vec<(u32, u32)> {
        let mut ranges = Vec::new();
        self.collect_leaf_ranges(&mut ranges);
        ranges
    }

    fn collect_leaf_ranges(&self, ranges: &mut Vec<(u32, u32)>) {
        match self {
            BvhNode::Branch { left, right, .. } => {
                left.collect_leaf_ranges(ranges);
                right.collect_leaf_ranges(ranges);
            }
            BvhNode::Leaf { offset, length, .. } => ranges.push((*offset, *length)),
        }
    }
}

/// Binary hierarchy over a set of boxes. Both levels are built with it.
#[derive(Clone, Debug)]
pub struct Bvh {
    pub root: BvhNode,
    /// Member permutation; leaf runs index into it.
    pub indices: Vec<u32>,
    pub centroids: Vec<[f32; 3]>,
    /// Depth of the deepest node, the root being 0.
    pub max_depth: u32,
}

/// Node statistics reported after a build
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BvhStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: u32,
}

struct BuildContext<'a> {
    item_bounds: &'a [Aabb],
    centroids: &'a [[f32; 3]],
    config: &'a BuildConfig,
}

impl Bvh {
    /// Build over `item_bounds` by recursive centroid-median splitting.
    ///
    /// A node is split on the axis whose partition around the node box
    /// center is most balanced, ties going to the lowest axis. Members with
    /// a centroid exactly on the center go left. A split that would leave
    /// one side empty is abandoned and the node stays a leaf.
    pub fn build(item_bounds: &[Aabb], config: &BuildConfig) -> Self {
        let centroids = compute_centroids(item_bounds);
        let mut indices: Vec<u32> = (0..item_bounds.len() as u32).collect();
        let bounds = compute_bounds(&indices, item_bounds, config.bounds_epsilon);

        let context = BuildContext {
            item_bounds,
            centroids: &centroids,
            config,
        };
        let (root, max_depth) = subdivide(&context, &mut indices, 0, bounds, 0);

        Self {
            root,
            indices,
            centroids,
            max_depth,
        }
    }

    pub fn bounds(&self) -> &Aabb {
        self.root.bounds()
    }

    pub fn stats(&self) -> BvhStats {
        BvhStats {
            node_count: self.root.node_count(),
            leaf_count: self.root.leaf_count(),
            max_depth: self.max_depth,
        }
    }
}

fn subdivide(
    context: &BuildContext,
    indices: &mut [u32],
    offset: u32,
    bounds: Aabb,
    depth: u32,
) -> (BvhNode, u32) {
    let length = indices.len();
    let leaf = BvhNode::Leaf {
        bounds,
        offset,
        length: length as u32,
    };
    if length < context.config.leaf_threshold {
        return (leaf, depth);
    }

    let center = bounds.center();
    let Some((axis, left_count)) = choose_split(context.centroids, indices, center) else {
        return (leaf, depth);
    };
    partition(context.centroids, indices, axis, center[axis]);

    let (left_indices, right_indices) = indices.split_at_mut(left_count);
    let epsilon = context.config.bounds_epsilon;
    let left_bounds = compute_bounds(left_indices, context.item_bounds, epsilon);
    let right_bounds = compute_bounds(right_indices, context.item_bounds, epsilon);
    let right_offset = offset + left_count as u32;

    let ((left, left_depth), (right, right_depth)) = if length >= context.config.parallel_threshold {
        rayon::join(
            || subdivide(context, left_indices, offset, left_bounds, depth + 1),
            || subdivide(context, right_indices, right_offset, right_bounds, depth + 1),
        )
    } else {
        (
            subdivide(context, left_indices, offset, left_bounds, depth + 1),
            subdivide(context, right_indices, right_offset, right_bounds, depth + 1),
        )
    };

    let node = BvhNode::Branch {
        bounds,
        left: Box::new(left),
        right: Box::new(right),
    };
    (node, left_depth.max(right_depth))
}

/// Axis with the most balanced centroid partition, and the size of its left
/// side. `None` when that partition leaves a side empty.
fn choose_split(centroids: &[[f32; 3]], indices: &[u32], center: [f32; 3]) -> Option<(usize, usize)> {
    let total = indices.len();
    let mut best: Option<(usize, usize, usize)> = None;

    for axis in 0..3 {
        let right = indices
            .iter()
            .filter(|&&index| centroids[index as usize][axis] > center[axis])
            .count();
        let left = total - right;
        let score = left.abs_diff(right);
        if best.map_or(true, |(_, _, best_score)| score < best_score) {
            best = Some((axis, left, score));
        }
    }

    let (axis, left, _) = best?;
    if left == 0 || left == total {
        return None;
    }
    Some((axis, left))
}

/// Stable partition in place: members not beyond `split` first, each side
/// in its prior order.
fn partition(centroids: &[[f32; 3]], indices: &mut [u32], axis: usize, split: f32) {
    indices.sort_by_key(|&index| centroids[index as usize][axis] > split);
}

/// Bottom-level hierarchy over one mesh's triangles, in object space.
#[derive(Clone, Debug)]
pub struct Blas {
    pub bvh: Bvh,
    pub triangles: Vec<TriangleData>,
}

impl Blas {
    pub fn build(triangles: Vec<TriangleData>, config: &BuildConfig) -> Self {
        let item_bounds = triangle_bounds(&triangles, config.bounds_epsilon);
        let bvh = Bvh::build(&item_bounds, config);
        log::debug!(
            "BLAS built: {} triangles, {} nodes, depth {}",
            triangles.len(),
            bvh.root.node_count(),
            bvh.max_depth
        );
        Self { bvh, triangles }
    }

    /// Object-space bounds of the whole mesh.
    pub fn bounds(&self) -> &Aabb {
        self.bvh.bounds()
    }

    /// Triangles in leaf order, as they are laid out in the buffer.
    pub fn ordered_triangles(&self) -> impl Iterator<Item = &TriangleData> + '_ {
        self.bvh
            .indices
            .iter()
            .map(move |&index| &self.triangles[index as usize])
    }
}
