//! Texel encoding of the flat acceleration buffer.
//!
//! The buffer is a plain `[f32]` read four floats (one texel) at a time.
//! Offsets stored inside it are texel offsets, written as `f32` and therefore
//! exact only below [`MAX_ADDRESSABLE_TEXELS`].
//!
//! ```text
//! header      1 texel   (magic, tlas root, blas count, texel count)
//! node        2 texels  (min.xyz, A) (max.xyz, B)
//! blas leaf   8 texels  (v0, tx) (v1, ty) (v2, tz) (n0, face) (n1, tw) (n2, 0)
//!                       (uv0, uv1) (uv2, 0, 0)
//! tlas leaf  10 texels  (min.xyz, child id) (max.xyz, blas root)
//!                       4 x matrix column, 4 x inverse matrix column
//! ```
//!
//! A node is a branch when `A >= 0`; `A` and `B` are then the offsets of its
//! left and right children. A node is a leaf when `A < 0`; `-A` is the offset
//! of its first leaf record and `B` the number of consecutive records.

use glam::{Mat4, Vec3, Vec4};

use crate::{Aabb, TriangleData};

pub const TEXEL_WIDTH: usize = 4;
pub const HEADER_TEXELS: u32 = 1;
pub const NODE_TEXELS: u32 = 2;
pub const BLAS_LEAF_TEXELS: u32 = 8;
pub const TLAS_LEAF_TEXELS: u32 = 10;

/// Largest texel offset that survives the round trip through `f32`.
pub const MAX_ADDRESSABLE_TEXELS: u32 = 1 << 24;

/// Tag stored in the first float of the header texel.
pub const HEADER_MAGIC: f32 = 1_234_567.0;

/// Float range of the texel at `offset`.
#[inline]
pub fn texel_range(offset: u32, texels: u32) -> core::ops::Range<usize> {
    let start = offset as usize * TEXEL_WIDTH;
    start..start + texels as usize * TEXEL_WIDTH
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Header {
    pub tlas_root: u32,
    pub blas_count: u32,
    pub texel_count: u32,
}

impl Header {
    pub fn write(&self, out: &mut [f32]) {
        out[..TEXEL_WIDTH].copy_from_slice(&[
            HEADER_MAGIC,
            self.tlas_root as f32,
            self.blas_count as f32,
            self.texel_count as f32,
        ]);
    }

    /// `None` if the texel does not carry the header tag.
    pub fn read(texel: &[f32]) -> Option<Self> {
        if texel.len() < TEXEL_WIDTH || texel[0] != HEADER_MAGIC {
            return None;
        }
        Some(Self {
            tlas_root: texel[1] as u32,
            blas_count: texel[2] as u32,
            texel_count: texel[3] as u32,
        })
    }
}

/// One generic node: bounds plus the two sign-encoded fields.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub bounds: Aabb,
    pub a: f32,
    pub b: f32,
}

impl NodeRecord {
    pub fn branch(bounds: Aabb, left: u32, right: u32) -> Self {
        Self {
            bounds,
            a: left as f32,
            b: right as f32,
        }
    }

    /// `first_record` must be non-zero; the header owns offset 0.
    pub fn leaf(bounds: Aabb, first_record: u32, length: u32) -> Self {
        debug_assert!(first_record > 0, "leaf data cannot live at offset 0");
        Self {
            bounds,
            a: -(first_record as f32),
            b: length as f32,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.a < 0.0
    }

    /// Left and right child offsets of a branch.
    #[inline]
    pub fn children(&self) -> (u32, u32) {
        (self.a as u32, self.b as u32)
    }

    /// First record offset and record count of a leaf.
    #[inline]
    pub fn leaf_run(&self) -> (u32, u32) {
        ((-self.a) as u32, self.b as u32)
    }

    pub fn write(&self, out: &mut [f32]) {
        let (min, max) = (self.bounds.min, self.bounds.max);
        out[..8].copy_from_slice(&[min[0], min[1], min[2], self.a, max[0], max[1], max[2], self.b]);
    }

    pub fn read(texels: &[f32]) -> Self {
        Self {
            bounds: Aabb::new([texels[0], texels[1], texels[2]], [texels[4], texels[5], texels[6]]),
            a: texels[3],
            b: texels[7],
        }
    }
}

/// One instance as stored in a TLAS leaf run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TlasLeafRecord {
    pub bounds: Aabb,
    pub child_id: u32,
    pub blas_root: u32,
    pub transform: Mat4,
    pub inverse: Mat4,
}

impl TlasLeafRecord {
    pub fn write(&self, out: &mut [f32]) {
        let (min, max) = (self.bounds.min, self.bounds.max);
        out[..4].copy_from_slice(&[min[0], min[1], min[2], self.child_id as f32]);
        out[4..8].copy_from_slice(&[max[0], max[1], max[2], self.blas_root as f32]);
        out[8..24].copy_from_slice(&self.transform.to_cols_array());
        out[24..40].copy_from_slice(&self.inverse.to_cols_array());
    }

    pub fn read(texels: &[f32]) -> Self {
        Self {
            bounds: Aabb::new([texels[0], texels[1], texels[2]], [texels[4], texels[5], texels[6]]),
            child_id: texels[3] as u32,
            blas_root: texels[7] as u32,
            transform: read_mat4(&texels[8..24]),
            inverse: read_mat4(&texels[24..40]),
        }
    }
}

fn read_mat4(floats: &[f32]) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(floats[0], floats[1], floats[2], floats[3]),
        Vec4::new(floats[4], floats[5], floats[6], floats[7]),
        Vec4::new(floats[8], floats[9], floats[10], floats[11]),
        Vec4::new(floats[12], floats[13], floats[14], floats[15]),
    )
}

pub fn write_triangle(triangle: &TriangleData, out: &mut [f32]) {
    let [v0, v1, v2] = triangle.positions;
    let [n0, n1, n2] = triangle.normals;
    let [uv0, uv1, uv2] = triangle.uvs;
    let t = triangle.tangent;
    out[..32].copy_from_slice(&[
        v0[0], v0[1], v0[2], t[0],
        v1[0], v1[1], v1[2], t[1],
        v2[0], v2[1], v2[2], t[2],
        n0[0], n0[1], n0[2], triangle.face_id as f32,
        n1[0], n1[1], n1[2], t[3],
        n2[0], n2[1], n2[2], 0.0,
        uv0[0], uv0[1], uv1[0], uv1[1],
        uv2[0], uv2[1], 0.0, 0.0,
    ]);
}

/// Object-space vertex positions only; the hot path of the traversal.
#[inline]
pub fn read_triangle_positions(texels: &[f32]) -> [Vec3; 3] {
    [
        Vec3::new(texels[0], texels[1], texels[2]),
        Vec3::new(texels[4], texels[5], texels[6]),
        Vec3::new(texels[8], texels[9], texels[10]),
    ]
}

pub fn read_triangle(texels: &[f32]) -> TriangleData {
    let vec3_at = |i: usize| [texels[i], texels[i + 1], texels[i + 2]];
    TriangleData {
        positions: [vec3_at(0), vec3_at(4), vec3_at(8)],
        normals: [vec3_at(12), vec3_at(16), vec3_at(20)],
        uvs: [
            [texels[24], texels[25]],
            [texels[26], texels[27]],
            [texels[28], texels[29]],
        ],
        tangent: [texels[3], texels[7], texels[11], texels[19]],
        face_id: texels[15] as u32,
    }
}
