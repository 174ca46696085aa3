use glam::Vec3;
use raytracer_shared::layout::{
    self, Header, NodeRecord, TlasLeafRecord, BLAS_LEAF_TEXELS, HEADER_TEXELS, NODE_TEXELS,
    TLAS_LEAF_TEXELS,
};
use raytracer_shared::TriangleData;

/// Provides access to the records stored in the flat acceleration buffer.
///
/// Every fetch is bounds-checked and yields `None` past the end of the
/// buffer, which the traversal treats as a miss.
#[derive(Clone, Copy)]
pub struct SceneAccessor<'a> {
    buffer: &'a [f32],
}

impl<'a> SceneAccessor<'a> {
    pub fn new(buffer: &'a [f32]) -> Self {
        Self { buffer }
    }

    /// Number of whole texels in the buffer
    pub fn texel_count(&self) -> u32 {
        (self.buffer.len() / layout::TEXEL_WIDTH) as u32
    }

    #[inline]
    fn texels(&self, offset: u32, count: u32) -> Option<&'a [f32]> {
        self.buffer.get(layout::texel_range(offset, count))
    }

    pub fn header(&self) -> Option<Header> {
        self.texels(0, HEADER_TEXELS).and_then(Header::read)
    }

    #[inline]
    pub fn node(&self, offset: u32) -> Option<NodeRecord> {
        self.texels(offset, NODE_TEXELS).map(NodeRecord::read)
    }

    #[inline]
    pub fn tlas_leaf(&self, offset: u32) -> Option<TlasLeafRecord> {
        self.texels(offset, TLAS_LEAF_TEXELS).map(TlasLeafRecord::read)
    }

    #[inline]
    pub fn triangle_positions(&self, offset: u32) -> Option<[Vec3; 3]> {
        self.texels(offset, BLAS_LEAF_TEXELS).map(layout::read_triangle_positions)
    }

    /// Full attribute set of a triangle leaf, for the material stage.
    pub fn triangle(&self, offset: u32) -> Option<TriangleData> {
        self.texels(offset, BLAS_LEAF_TEXELS).map(layout::read_triangle)
    }
}
