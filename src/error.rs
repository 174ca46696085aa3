//! Error types for building and serializing the acceleration structures.

use thiserror::Error;

/// Which record a buffer offset is expected to point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    BlasNode,
    BlasLeaf,
    TlasNode,
    TlasLeaf,
}

/// Configuration errors caught while building.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Index buffer does not describe whole triangles.
    #[error("mesh `{mesh}` has {len} indices, not a multiple of 3")]
    IndexCount { mesh: String, len: usize },

    /// Index points past the vertex buffer.
    #[error("mesh `{mesh}` references vertex {index} but has {vertex_count} vertices")]
    IndexOutOfRange {
        mesh: String,
        index: u32,
        vertex_count: usize,
    },

    /// Instance names a BLAS that was never built.
    #[error("instance {child_id} references unknown BLAS {blas}")]
    UnknownBlas { child_id: u32, blas: usize },

    #[error("no BLAS with id {blas}")]
    UnknownMesh { blas: usize },

    /// Instance transform cannot be inverted.
    #[error("instance {child_id} has a non-invertible transform")]
    SingularTransform { child_id: u32 },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Violations of the serialized buffer contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("buffer header is missing or inconsistent")]
    BadHeader,

    #[error("{texels} texels exceed the addressable range")]
    TooLarge { texels: usize },

    #[error("identifier {id} cannot be stored exactly")]
    IdNotRepresentable { id: u32 },

    #[error("instance references BLAS {blas}, which is not in the layout")]
    UnknownBlas { blas: usize },

    #[error("offset {offset} lies outside the buffer")]
    OutOfBounds { offset: u32 },

    #[error("offset {offset} does not point at a {expected:?} record")]
    KindMismatch { offset: u32, expected: RecordKind },

    #[error("child {child} of node {parent} does not follow its parent")]
    ChildOrder { parent: u32, child: u32 },
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
