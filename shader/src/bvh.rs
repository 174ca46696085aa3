use glam::{Mat4, Vec3};
use raytracer_shared::layout::{TlasLeafRecord, BLAS_LEAF_TEXELS, TLAS_LEAF_TEXELS};
use raytracer_shared::RaytracerConfig;

use crate::intersection::{ray_aabb_intersect, test_triangle_intersection};
use crate::ray::Ray;
use crate::scene_access::SceneAccessor;

const STACK_SIZE: usize = RaytracerConfig::TRAVERSAL_STACK_SIZE;

/// Bounds that make every query terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraversalLimits {
    /// Loop iterations before the query gives up and returns its best hit.
    pub max_steps: u32,
}

impl TraversalLimits {
    /// No step budget; only the fixed stack depth remains.
    pub fn unbounded() -> Self {
        Self { max_steps: u32::MAX }
    }
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_steps: RaytracerConfig::TRAVERSAL_MAX_STEPS,
        }
    }
}

/// Result of a nearest-hit query
#[derive(Clone, Copy, Debug)]
pub struct IntersectionResult {
    pub hit: bool,
    /// World-space distance from the ray origin.
    pub distance: f32,
    pub position: Vec3,
    pub barycentric: Vec3,
    /// Opaque identifier of the instance that was hit.
    pub child_id: u32,
    pub instance_transform: Mat4,
    /// Texel offset of the triangle's BLAS leaf record.
    pub triangle_leaf: u32,
    /// The step budget or the stack ran out before the query finished; the
    /// hit, if any, is the best one found up to that point.
    pub budget_exhausted: bool,
    pub steps: u32,
}

impl IntersectionResult {
    pub fn miss() -> Self {
        Self {
            hit: false,
            distance: f32::INFINITY,
            position: Vec3::ZERO,
            barycentric: Vec3::ZERO,
            child_id: u32::MAX,
            instance_transform: Mat4::IDENTITY,
            triangle_leaf: 0,
            budget_exhausted: false,
            steps: 0,
        }
    }
}

#[derive(Clone, Copy)]
struct StackEntry {
    node: u32,
    cursor: u32,
}

impl StackEntry {
    const EMPTY: Self = Self { node: 0, cursor: 0 };

    fn new(node: u32) -> Self {
        Self { node, cursor: 0 }
    }
}

/// Fixed-capacity traversal stack.
struct NodeStack {
    entries: [StackEntry; STACK_SIZE],
    len: usize,
    overflowed: bool,
}

impl NodeStack {
    fn new() -> Self {
        Self {
            entries: [StackEntry::EMPTY; STACK_SIZE],
            len: 0,
            overflowed: false,
        }
    }

    fn push(&mut self, node: u32) -> bool {
        if self.len == STACK_SIZE {
            self.overflowed = true;
            return false;
        }
        self.entries[self.len] = StackEntry::new(node);
        self.len += 1;
        true
    }

    fn pop(&mut self) {
        self.len -= 1;
    }

    fn top(&mut self) -> &mut StackEntry {
        &mut self.entries[self.len - 1]
    }
}

#[derive(Clone, Copy)]
struct LocalHit {
    t: f32,
    barycentric: Vec3,
    leaf: u32,
}

/// State of the instance whose BLAS is currently being walked.
#[derive(Clone, Copy)]
struct InstanceContext {
    ray: Ray,
    inv_dir: Vec3,
    child_id: u32,
    transform: Mat4,
    best_t: f32,
    best: Option<LocalHit>,
}

impl InstanceContext {
    fn enter(world_ray: &Ray, leaf: &TlasLeafRecord, best_t: f32) -> Self {
        let ray = world_ray.to_local(&leaf.inverse);
        Self {
            inv_dir: ray.direction.recip(),
            ray,
            child_id: leaf.child_id,
            transform: leaf.transform,
            best_t,
            best: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Nearest,
    AnyHit,
}

/// Two-level BVH traverser over a serialized acceleration buffer
pub struct BvhTraverser<'a> {
    scene: SceneAccessor<'a>,
    limits: TraversalLimits,
}

impl<'a> BvhTraverser<'a> {
    pub fn new(buffer: &'a [f32]) -> Self {
        Self {
            scene: SceneAccessor::new(buffer),
            limits: TraversalLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: TraversalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn scene(&self) -> &SceneAccessor<'a> {
        &self.scene
    }

    /// Nearest hit along the ray, optionally no farther than `max_distance`
    pub fn intersect(
        &self,
        tlas_root: u32,
        origin: Vec3,
        direction: Vec3,
        max_distance: Option<f32>,
    ) -> IntersectionResult {
        let ray = Ray::new(origin, direction);
        self.traverse(&ray, tlas_root, max_distance.unwrap_or(f32::INFINITY), QueryKind::Nearest)
    }

    /// True if anything lies between `origin` and `max_distance` along the
    /// ray, short of the target by more than the occlusion epsilon.
    pub fn occluded(&self, tlas_root: u32, origin: Vec3, direction: Vec3, max_distance: f32) -> bool {
        let ray = Ray::new(origin, direction);
        let limit = max_distance - RaytracerConfig::OCCLUSION_EPSILON;
        self.traverse(&ray, tlas_root, limit, QueryKind::AnyHit).hit
    }

    fn traverse(&self, ray: &Ray, tlas_root: u32, max_t: f32, kind: QueryKind) -> IntersectionResult {
        let mut result = IntersectionResult::miss();
        if ray.direction == Vec3::ZERO || !(max_t > 0.0) {
            return result;
        }

        let Some(root) = self.scene.node(tlas_root) else {
            return result;
        };
        if root.is_leaf() && root.leaf_run().1 == 0 {
            return result;
        }

        let inv_dir = ray.direction.recip();
        match ray_aabb_intersect(ray, inv_dir, &root.bounds) {
            Some(near) if near < max_t => {}
            _ => return result,
        }

        let mut best_t = max_t;
        let mut stack = NodeStack::new();
        stack.push(tlas_root);

        // Stack length at which the current instance's BLAS entries begin
        let mut divider: Option<usize> = None;
        let mut instance: Option<InstanceContext> = None;
        let mut steps = 0;

        while stack.len > 0 {
            if steps >= self.limits.max_steps {
                result.budget_exhausted = true;
                break;
            }
            steps += 1;

            if divider == Some(stack.len) {
                if let Some(context) = instance.take() {
                    Self::commit(ray, &context, &mut best_t, &mut result);
                }
                divider = None;
                continue;
            }

            let entry = *stack.top();
            let Some(node) = self.scene.node(entry.node) else {
                return IntersectionResult::miss();
            };

            if node.is_leaf() {
                let (first, length) = node.leaf_run();
                if entry.cursor >= length {
                    stack.pop();
                    continue;
                }
                stack.top().cursor += 1;

                if let Some(context) = instance.as_mut() {
                    let leaf = first + entry.cursor * BLAS_LEAF_TEXELS;
                    let Some(vertices) = self.scene.triangle_positions(leaf) else {
                        return IntersectionResult::miss();
                    };
                    let Some(hit) = test_triangle_intersection(&context.ray, vertices) else {
                        continue;
                    };
                    if hit.t >= context.best_t {
                        continue;
                    }
                    context.best_t = hit.t;
                    context.best = Some(LocalHit {
                        t: hit.t,
                        barycentric: hit.barycentric,
                        leaf,
                    });

                    if kind == QueryKind::AnyHit {
                        Self::commit(ray, context, &mut best_t, &mut result);
                        if result.hit {
                            result.steps = steps;
                            return result;
                        }
                    }
                } else {
                    let leaf_offset = first + entry.cursor * TLAS_LEAF_TEXELS;
                    let Some(leaf) = self.scene.tlas_leaf(leaf_offset) else {
                        return IntersectionResult::miss();
                    };
                    match ray_aabb_intersect(ray, inv_dir, &leaf.bounds) {
                        Some(near) if near < best_t => {}
                        _ => continue,
                    }

                    let depth = stack.len;
                    if stack.push(leaf.blas_root) {
                        divider = Some(depth);
                        instance = Some(InstanceContext::enter(ray, &leaf, best_t));
                    }
                }
                continue;
            }

            stack.pop();
            let (left, right) = node.children();
            let (Some(left_node), Some(right_node)) = (self.scene.node(left), self.scene.node(right)) else {
                return IntersectionResult::miss();
            };

            let (local_ray, local_inv_dir, limit) = match &instance {
                Some(context) => (&context.ray, context.inv_dir, context.best_t),
                None => (ray, inv_dir, best_t),
            };
            let near_left = ray_aabb_intersect(local_ray, local_inv_dir, &left_node.bounds)
                .filter(|&near| near < limit);
            let near_right = ray_aabb_intersect(local_ray, local_inv_dir, &right_node.bounds)
                .filter(|&near| near < limit);

            // The nearer child goes on top so it is visited first
            match (near_left, near_right) {
                (Some(l), Some(r)) => {
                    let (near, far) = if l <= r { (left, right) } else { (right, left) };
                    stack.push(far);
                    stack.push(near);
                }
                (Some(_), None) => {
                    stack.push(left);
                }
                (None, Some(_)) => {
                    stack.push(right);
                }
                (None, None) => {}
            }
        }

        if let Some(context) = instance.take() {
            Self::commit(ray, &context, &mut best_t, &mut result);
        }
        result.budget_exhausted |= stack.overflowed;
        result.steps = steps;
        result
    }

    /// Bring an instance's best local hit back to world space and keep it if
    /// it beats the best hit so far.
    fn commit(ray: &Ray, context: &InstanceContext, best_t: &mut f32, result: &mut IntersectionResult) {
        let Some(hit) = context.best else {
            return;
        };
        let position = context.transform.transform_point3(context.ray.at(hit.t));
        let distance = (position - ray.origin).length();
        if distance >= *best_t {
            return;
        }

        *best_t = distance;
        result.hit = true;
        result.distance = distance;
        result.position = position;
        result.barycentric = hit.barycentric;
        result.child_id = context.child_id;
        result.instance_transform = context.transform;
        result.triangle_leaf = hit.leaf;
    }
}
