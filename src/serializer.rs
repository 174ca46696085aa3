//! Flattening of the BLAS set and TLAS into one texel buffer.
//!
//! Records are laid out as: header, every BLAS's nodes, every BLAS's
//! triangle records, TLAS nodes, TLAS instance records. Nodes of each tree
//! are written in pre-order, so every child sits after its parent. The BLAS
//! part does not depend on instance placement and is kept as a reusable
//! prefix ([`BlasLayout`]); only the TLAS part is rewritten on a rebuild.

use std::ops::Range;

use glam::Vec3;
use raytracer_shader::{BvhTraverser, IntersectionResult, TraversalLimits};
use raytracer_shared::layout::{
    texel_range, write_triangle, Header, NodeRecord, TlasLeafRecord, BLAS_LEAF_TEXELS, HEADER_TEXELS,
    MAX_ADDRESSABLE_TEXELS, NODE_TEXELS, TEXEL_WIDTH, TLAS_LEAF_TEXELS,
};

use crate::bvh::{Blas, BvhNode};
use crate::error::{LayoutError, RecordKind};
use crate::tlas::Tlas;

/// Texel ranges of the four record sections
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sections {
    pub blas_nodes: Range<u32>,
    pub blas_leaves: Range<u32>,
    pub tlas_nodes: Range<u32>,
    pub tlas_leaves: Range<u32>,
}

/// Serialized BLAS set with a placeholder header texel
#[derive(Clone, Debug)]
pub struct BlasLayout {
    data: Vec<f32>,
    roots: Vec<u32>,
    nodes: Range<u32>,
    leaves: Range<u32>,
}

impl BlasLayout {
    pub fn build(blas_set: &[Blas]) -> Result<Self, LayoutError> {
        let node_texels: usize = blas_set
            .iter()
            .map(|blas| blas.bvh.root.node_count() * NODE_TEXELS as usize)
            .sum();
        let leaf_texels: usize = blas_set
            .iter()
            .map(|blas| blas.triangles.len() * BLAS_LEAF_TEXELS as usize)
            .sum();
        let leaf_start = check_addressable(HEADER_TEXELS as usize + node_texels)?;
        let end = check_addressable(leaf_start as usize + leaf_texels)?;

        let mut data = vec![0.0; end as usize * TEXEL_WIDTH];
        let mut roots = Vec::with_capacity(blas_set.len());
        let mut node_cursor = HEADER_TEXELS;
        let mut leaf_cursor = leaf_start;

        for blas in blas_set {
            roots.push(emit_tree(
                &blas.bvh.root,
                &mut node_cursor,
                leaf_cursor,
                BLAS_LEAF_TEXELS,
                &mut data,
            ));
            for triangle in blas.ordered_triangles() {
                check_id(triangle.face_id)?;
                write_triangle(triangle, &mut data[texel_range(leaf_cursor, BLAS_LEAF_TEXELS)]);
                leaf_cursor += BLAS_LEAF_TEXELS;
            }
        }

        Ok(Self {
            data,
            roots,
            nodes: HEADER_TEXELS..leaf_start,
            leaves: leaf_start..end,
        })
    }

    /// Root node offset of every BLAS, by BLAS id
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    pub fn texel_count(&self) -> u32 {
        (self.data.len() / TEXEL_WIDTH) as u32
    }
}

fn check_addressable(texels: usize) -> Result<u32, LayoutError> {
    if texels > MAX_ADDRESSABLE_TEXELS as usize {
        return Err(LayoutError::TooLarge { texels });
    }
    Ok(texels as u32)
}

fn check_id(id: u32) -> Result<(), LayoutError> {
    if id > MAX_ADDRESSABLE_TEXELS {
        return Err(LayoutError::IdNotRepresentable { id });
    }
    Ok(())
}

/// Write `node` and its subtree in pre-order from `cursor`, returning the
/// node's offset. Leaf member `i` lives at `leaf_base + i * stride`.
fn emit_tree(node: &BvhNode, cursor: &mut u32, leaf_base: u32, stride: u32, out: &mut [f32]) -> u32 {
    let offset = *cursor;
    *cursor += NODE_TEXELS;

    let record = match node {
        BvhNode::Branch { bounds, left, right } => {
            let left = emit_tree(left, cursor, leaf_base, stride, out);
            let right = emit_tree(right, cursor, leaf_base, stride, out);
            NodeRecord::branch(*bounds, left, right)
        }
        BvhNode::Leaf { bounds, offset, length } => NodeRecord::leaf(*bounds, leaf_base + offset * stride, *length),
    };
    record.write(&mut out[texel_range(offset, NODE_TEXELS)]);
    offset
}

/// The complete acceleration buffer handed to the traversal
#[derive(Clone, Debug)]
pub struct SceneBuffer {
    data: Vec<f32>,
    blas_roots: Vec<u32>,
    tlas_root: u32,
    sections: Sections,
    version: u64,
}

/// Serialize a BLAS set and a TLAS built over it.
pub fn serialize(blas_set: &[Blas], tlas: &Tlas) -> Result<SceneBuffer, LayoutError> {
    let layout = BlasLayout::build(blas_set)?;
    SceneBuffer::assemble(&layout, tlas, 0)
}

impl SceneBuffer {
    /// Copy the BLAS prefix and append the TLAS records.
    pub fn assemble(layout: &BlasLayout, tlas: &Tlas, version: u64) -> Result<Self, LayoutError> {
        let tlas_start = layout.texel_count();
        let node_texels = tlas.bvh.root.node_count() * NODE_TEXELS as usize;
        let leaf_start = check_addressable(tlas_start as usize + node_texels)?;
        let end = check_addressable(leaf_start as usize + tlas.instances.len() * TLAS_LEAF_TEXELS as usize)?;

        let mut data = Vec::with_capacity(end as usize * TEXEL_WIDTH);
        data.extend_from_slice(&layout.data);
        data.resize(end as usize * TEXEL_WIDTH, 0.0);

        let mut node_cursor = tlas_start;
        let tlas_root = emit_tree(&tlas.bvh.root, &mut node_cursor, leaf_start, TLAS_LEAF_TEXELS, &mut data);

        let mut leaf_cursor = leaf_start;
        for instance in tlas.ordered_instances() {
            check_id(instance.child_id)?;
            let blas_root = *layout
                .roots
                .get(instance.blas)
                .ok_or(LayoutError::UnknownBlas { blas: instance.blas })?;
            TlasLeafRecord {
                bounds: instance.bounds,
                child_id: instance.child_id,
                blas_root,
                transform: instance.transform,
                inverse: instance.inverse,
            }
            .write(&mut data[texel_range(leaf_cursor, TLAS_LEAF_TEXELS)]);
            leaf_cursor += TLAS_LEAF_TEXELS;
        }

        Header {
            tlas_root,
            blas_count: layout.roots.len() as u32,
            texel_count: end,
        }
        .write(&mut data);

        let buffer = Self {
            data,
            blas_roots: layout.roots.clone(),
            tlas_root,
            sections: Sections {
                blas_nodes: layout.nodes.clone(),
                blas_leaves: layout.leaves.clone(),
                tlas_nodes: tlas_start..leaf_start,
                tlas_leaves: leaf_start..end,
            },
            version,
        };

        #[cfg(debug_assertions)]
        if let Err(e) = buffer.validate() {
            panic!("serialized buffer is inconsistent: {e}");
        }

        Ok(buffer)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Raw bytes, ready for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn tlas_root(&self) -> u32 {
        self.tlas_root
    }

    pub fn blas_roots(&self) -> &[u32] {
        &self.blas_roots
    }

    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    pub fn texel_count(&self) -> u32 {
        (self.data.len() / TEXEL_WIDTH) as u32
    }

    /// Instance version this buffer was built from
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn traverser(&self, limits: TraversalLimits) -> BvhTraverser<'_> {
        BvhTraverser::new(&self.data).with_limits(limits)
    }

    pub fn intersect(&self, origin: Vec3, direction: Vec3, max_distance: Option<f32>) -> IntersectionResult {
        self.traverser(TraversalLimits::default())
            .intersect(self.tlas_root, origin, direction, max_distance)
    }

    pub fn occluded(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> bool {
        self.traverser(TraversalLimits::default())
            .occluded(self.tlas_root, origin, direction, max_distance)
    }

    /// Walk every tree and check that each offset points at a record of the
    /// expected kind, that children follow their parents and that every
    /// instance names a known BLAS root.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let header = self
            .data
            .get(..TEXEL_WIDTH)
            .and_then(Header::read)
            .ok_or(LayoutError::BadHeader)?;
        if header.texel_count != self.texel_count()
            || header.tlas_root != self.tlas_root
            || header.blas_count as usize != self.blas_roots.len()
        {
            return Err(LayoutError::BadHeader);
        }

        let sections = &self.sections;
        for &root in &self.blas_roots {
            self.validate_tree(
                root,
                &sections.blas_nodes,
                RecordKind::BlasNode,
                &sections.blas_leaves,
                RecordKind::BlasLeaf,
                BLAS_LEAF_TEXELS,
            )?;
        }
        self.validate_tree(
            self.tlas_root,
            &sections.tlas_nodes,
            RecordKind::TlasNode,
            &sections.tlas_leaves,
            RecordKind::TlasLeaf,
            TLAS_LEAF_TEXELS,
        )?;

        for offset in sections.tlas_leaves.clone().step_by(TLAS_LEAF_TEXELS as usize) {
            let record = TlasLeafRecord::read(&self.data[texel_range(offset, TLAS_LEAF_TEXELS)]);
            if !self.blas_roots.contains(&record.blas_root) {
                return Err(LayoutError::KindMismatch {
                    offset: record.blas_root,
                    expected: RecordKind::BlasNode,
                });
            }
        }
        Ok(())
    }

    fn validate_tree(
        &self,
        root: u32,
        nodes: &Range<u32>,
        node_kind: RecordKind,
        leaves: &Range<u32>,
        leaf_kind: RecordKind,
        stride: u32,
    ) -> Result<(), LayoutError> {
        let mut pending = vec![root];
        while let Some(offset) = pending.pop() {
            self.check_record(offset, nodes, NODE_TEXELS, node_kind)?;
            let node = NodeRecord::read(&self.data[texel_range(offset, NODE_TEXELS)]);

            if node.is_leaf() {
                let (first, length) = node.leaf_run();
                if first == 0 || first > self.texel_count() {
                    return Err(LayoutError::OutOfBounds { offset: first });
                }
                if length == 0 {
                    continue;
                }
                self.check_record(first, leaves, stride, leaf_kind)?;
                let end = first as u64 + length as u64 * stride as u64;
                if end > leaves.end as u64 {
                    return Err(LayoutError::OutOfBounds { offset: end as u32 });
                }
            } else {
                let (left, right) = node.children();
                for child in [left, right] {
                    if child <= offset {
                        return Err(LayoutError::ChildOrder { parent: offset, child });
                    }
                    pending.push(child);
                }
            }
        }
        Ok(())
    }

    fn check_record(&self, offset: u32, section: &Range<u32>, texels: u32, kind: RecordKind) -> Result<(), LayoutError> {
        if offset as u64 + texels as u64 > self.texel_count() as u64 {
            return Err(LayoutError::OutOfBounds { offset });
        }
        if !section.contains(&offset) || (offset - section.start) % texels != 0 {
            return Err(LayoutError::KindMismatch { offset, expected: kind });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BuildConfig;
    use crate::mesh::Mesh;
    use crate::scene::Instance;
    use glam::Mat4;
    use raytracer_shader::intersection::test_triangle_intersection;
    use raytracer_shader::Ray;
    use raytracer_shared::layout::HEADER_MAGIC;
    use raytracer_shared::TriangleData;

    fn build(meshes: &[Mesh], instances: &[Instance]) -> SceneBuffer {
        let config = BuildConfig::default();
        let blas_set: Vec<Blas> = meshes
            .iter()
            .map(|mesh| Blas::build(mesh.triangles().unwrap(), &config))
            .collect();
        let tlas = Tlas::build(instances, &blas_set, &config).unwrap();
        serialize(&blas_set, &tlas).unwrap()
    }

    fn unit_cube() -> Mesh {
        Mesh::cuboid("cube", Vec3::ONE)
    }

    /// Deterministic pseudo-random source
    struct Lcg(u32);

    impl Lcg {
        fn next(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (self.0 >> 8) as f32 / (1 << 24) as f32
        }

        fn range(&mut self, min: f32, max: f32) -> f32 {
            min + (max - min) * self.next()
        }
    }

    fn scattered_mesh(rng: &mut Lcg, count: usize) -> Mesh {
        let mut positions = Vec::new();
        for _ in 0..count {
            let center = Vec3::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0), rng.range(-3.0, 3.0));
            for _ in 0..3 {
                let corner = center + Vec3::new(rng.range(-0.6, 0.6), rng.range(-0.6, 0.6), rng.range(-0.6, 0.6));
                positions.push(corner.into());
            }
        }
        let indices = (0..positions.len() as u32).collect();
        Mesh::new("scatter", positions, indices)
    }

    /// Nearest hit distance over every triangle of every instance
    fn brute_force(meshes: &[Mesh], instances: &[Instance], origin: Vec3, direction: Vec3) -> Option<(f32, u32)> {
        let ray = Ray::new(origin, direction);
        let mut best: Option<(f32, u32)> = None;
        for instance in instances {
            let local = ray.to_local(&instance.transform.inverse());
            for triangle in meshes[instance.blas].triangles().unwrap() {
                let Some(hit) = test_triangle_intersection(&local, triangle.positions.map(Vec3::from)) else {
                    continue;
                };
                let distance = (instance.transform.transform_point3(local.at(hit.t)) - origin).length();
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, instance.child_id));
                }
            }
        }
        best
    }

    #[test]
    fn records_follow_section_order() {
        let buffer = build(&[unit_cube()], &[Instance::new(1, 0, Mat4::IDENTITY)]);
        let sections = buffer.sections();

        assert_eq!(buffer.data()[0], HEADER_MAGIC);
        assert_eq!(sections.blas_nodes.start, HEADER_TEXELS);
        assert_eq!(sections.blas_nodes.end, sections.blas_leaves.start);
        assert_eq!(sections.blas_leaves.len(), 12 * BLAS_LEAF_TEXELS as usize);
        assert_eq!(sections.blas_leaves.end, sections.tlas_nodes.start);
        assert_eq!(sections.tlas_nodes.end, sections.tlas_leaves.start);
        assert_eq!(sections.tlas_leaves.end, buffer.texel_count());
        assert_eq!(buffer.blas_roots(), &[HEADER_TEXELS]);
        assert_eq!(buffer.tlas_root(), sections.tlas_nodes.start);
        assert_eq!(buffer.as_bytes().len(), buffer.texel_count() as usize * 16);
        assert_eq!(buffer.validate(), Ok(()));
    }

    #[test]
    fn empty_mesh_serializes_as_empty_leaf() {
        let meshes = [Mesh::new("nothing", Vec::new(), Vec::new()), unit_cube()];
        let buffer = build(&meshes, &[Instance::new(2, 1, Mat4::IDENTITY)]);

        let root = NodeRecord::read(&buffer.data()[texel_range(buffer.blas_roots()[0], NODE_TEXELS)]);
        assert!(root.is_leaf());
        assert_eq!(root.leaf_run().1, 0);
        assert!(root.leaf_run().0 > 0);
        assert_eq!(buffer.validate(), Ok(()));
    }

    #[test]
    fn empty_scene_misses() {
        let buffer = build(&[], &[]);

        assert_eq!(buffer.validate(), Ok(()));
        let result = buffer.intersect(Vec3::ZERO, Vec3::X, None);
        assert!(!result.hit);
        assert!(!buffer.occluded(Vec3::ZERO, Vec3::X, 100.0));
    }

    #[test]
    fn unit_cube_front_face_at_distance_four() {
        let buffer = build(&[unit_cube()], &[Instance::new(3, 0, Mat4::IDENTITY)]);
        let result = buffer.intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, None);

        assert!(result.hit);
        assert!((result.distance - 4.0).abs() < 1e-5);
        assert!((result.position.z - 1.0).abs() < 1e-5);
        assert_eq!(result.child_id, 3);
        assert!(!result.budget_exhausted);
    }

    #[test]
    fn second_instance_is_hit_through_its_transform() {
        let instances = [
            Instance::new(10, 0, Mat4::IDENTITY),
            Instance::new(20, 0, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))),
        ];
        let buffer = build(&[unit_cube()], &instances);
        let result = buffer.intersect(Vec3::new(5.0, 0.0, 0.0), Vec3::X, None);

        assert!(result.hit);
        assert!((result.position.x - 9.0).abs() < 1e-4);
        assert_eq!(result.child_id, 20);

        let back = buffer.intersect(Vec3::new(5.0, 0.0, 0.0), Vec3::NEG_X, None);
        assert_eq!(back.child_id, 10);
        assert!((back.position.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn traversal_agrees_with_brute_force() {
        let mut rng = Lcg(7);
        let meshes = [scattered_mesh(&mut rng, 60), scattered_mesh(&mut rng, 25), unit_cube()];
        let instances: Vec<Instance> = (0..12u32)
            .map(|i| {
                let offset = Vec3::new(rng.range(-8.0, 8.0), rng.range(-8.0, 8.0), rng.range(-8.0, 8.0));
                let transform = Mat4::from_translation(offset)
                    * Mat4::from_rotation_y(rng.range(0.0, 6.0))
                    * Mat4::from_scale(Vec3::splat(rng.range(0.5, 2.0)));
                Instance::new(100 + i, i as usize % meshes.len(), transform)
            })
            .collect();
        let buffer = build(&meshes, &instances);
        let traverser = buffer.traverser(TraversalLimits::unbounded());

        let mut hits = 0;
        for _ in 0..300 {
            let origin = Vec3::new(rng.range(-20.0, 20.0), rng.range(-20.0, 20.0), 25.0);
            let target = Vec3::new(rng.range(-8.0, 8.0), rng.range(-8.0, 8.0), rng.range(-8.0, 8.0));
            let direction = (target - origin).normalize();

            let result = traverser.intersect(buffer.tlas_root(), origin, direction, None);
            let expected = brute_force(&meshes, &instances, origin, direction);
            assert!(!result.budget_exhausted);

            match expected {
                Some((distance, _)) => {
                    assert!(result.hit, "missed a hit at {distance}");
                    assert!((result.distance - distance).abs() < 1e-3);
                    hits += 1;

                    assert!(traverser.occluded(buffer.tlas_root(), origin, direction, distance + 0.5));
                    assert!(!traverser.occluded(buffer.tlas_root(), origin, direction, distance * 0.5));
                }
                None => {
                    assert!(!result.hit);
                    assert!(!traverser.occluded(buffer.tlas_root(), origin, direction, 1000.0));
                }
            }
        }
        assert!(hits > 0);
    }

    #[test]
    fn triangle_attributes_reach_the_buffer() {
        let buffer = build(&[unit_cube()], &[Instance::new(1, 0, Mat4::IDENTITY)]);
        let result = buffer.intersect(Vec3::new(0.2, 0.3, 5.0), Vec3::NEG_Z, None);
        let triangle: TriangleData = buffer
            .traverser(TraversalLimits::default())
            .scene()
            .triangle(result.triangle_leaf)
            .unwrap();

        // +z is the fifth side of the cuboid
        assert_eq!(triangle.face_id, 4);
        assert_eq!(triangle.normals[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn oversized_ids_are_rejected() {
        let config = BuildConfig::default();
        let blas_set = vec![Blas::build(unit_cube().triangles().unwrap(), &config)];
        let instances = [Instance::new(MAX_ADDRESSABLE_TEXELS + 1, 0, Mat4::IDENTITY)];
        let tlas = Tlas::build(&instances, &blas_set, &config).unwrap();

        assert_eq!(
            serialize(&blas_set, &tlas).err(),
            Some(LayoutError::IdNotRepresentable {
                id: MAX_ADDRESSABLE_TEXELS + 1
            })
        );
    }

    #[test]
    fn corruption_is_detected() {
        let buffer = build(&[unit_cube()], &[Instance::new(1, 0, Mat4::IDENTITY)]);

        let mut bad_header = buffer.clone();
        bad_header.data[0] = 0.0;
        assert_eq!(bad_header.validate(), Err(LayoutError::BadHeader));

        // point the BLAS root's left child into the triangle section
        let root = buffer.blas_roots()[0];
        let leaf_start = buffer.sections().blas_leaves.start;
        let mut wrong_kind = buffer.clone();
        wrong_kind.data[texel_range(root, NODE_TEXELS)][3] = leaf_start as f32;
        assert_eq!(
            wrong_kind.validate(),
            Err(LayoutError::KindMismatch {
                offset: leaf_start,
                expected: RecordKind::BlasNode
            })
        );

        let mut out_of_range = buffer.clone();
        out_of_range.data[texel_range(root, NODE_TEXELS)][7] = 1.0e6;
        assert_eq!(out_of_range.validate(), Err(LayoutError::OutOfBounds { offset: 1_000_000 }));

        let mut backwards = buffer.clone();
        backwards.data[texel_range(root, NODE_TEXELS)][3] = root as f32;
        assert_eq!(
            backwards.validate(),
            Err(LayoutError::ChildOrder { parent: root, child: root })
        );
    }
}
