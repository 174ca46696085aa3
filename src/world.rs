use std::sync::Arc;

use rayon::prelude::*;

use crate::bvh::{Blas, BuildConfig, BvhStats};
use crate::error::{BuildError, Result};
use crate::mesh::Mesh;
use crate::scene::{BlasId, InstanceSet};
use crate::serializer::{BlasLayout, SceneBuffer};
use crate::tlas::Tlas;

/// Node statistics of every hierarchy in the world
#[derive(Clone, Debug, PartialEq)]
pub struct WorldStats {
    pub blas: Vec<BvhStats>,
    pub tlas: BvhStats,
    pub texel_count: u32,
}

/// Owner of the BLAS set and of the current serialized buffer.
///
/// BLASes are built once per mesh and only rebuilt when their mesh is
/// replaced. The TLAS and the buffer are rebuilt when the instance set
/// version moves. Each rebuild produces a fresh buffer behind a new [`Arc`],
/// so readers holding the previous one keep a consistent snapshot.
pub struct WorldBvh {
    config: BuildConfig,
    blas_set: Vec<Blas>,
    blas_layout: BlasLayout,
    tlas: Tlas,
    built_version: Option<u64>,
    buffer: Arc<SceneBuffer>,
}

impl WorldBvh {
    /// Build one BLAS per mesh, in parallel. No instances are placed until
    /// the first [`WorldBvh::rebuild_if_stale`].
    pub fn new(meshes: &[Mesh], config: BuildConfig) -> Result<Self> {
        let blas_set = meshes
            .par_iter()
            .map(|mesh| -> Result<Blas> { Ok(Blas::build(mesh.triangles()?, &config)) })
            .collect::<Result<Vec<_>>>()?;
        let blas_layout = BlasLayout::build(&blas_set)?;
        let tlas = Tlas::build(&[], &blas_set, &config)?;
        let buffer = Arc::new(SceneBuffer::assemble(&blas_layout, &tlas, 0)?);

        log::info!(
            "Built {} BLAS over {} triangles",
            blas_set.len(),
            blas_set.iter().map(|blas| blas.triangles.len()).sum::<usize>()
        );

        Ok(Self {
            config,
            blas_set,
            blas_layout,
            tlas,
            built_version: None,
            buffer,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn blas(&self, id: BlasId) -> Option<&Blas> {
        self.blas_set.get(id)
    }

    pub fn blas_count(&self) -> usize {
        self.blas_set.len()
    }

    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    /// Current buffer snapshot
    pub fn buffer(&self) -> Arc<SceneBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Rebuild one BLAS from scratch. The next
    /// [`WorldBvh::rebuild_if_stale`] rebuilds the TLAS regardless of the
    /// instance version.
    pub fn replace_mesh(&mut self, id: BlasId, mesh: &Mesh) -> Result<()> {
        if id >= self.blas_set.len() {
            return Err(BuildError::UnknownMesh { blas: id });
        }
        let blas = Blas::build(mesh.triangles()?, &self.config);
        let mut blas_set = self.blas_set.clone();
        blas_set[id] = blas;
        self.blas_layout = BlasLayout::build(&blas_set)?;
        self.blas_set = blas_set;
        self.built_version = None;
        Ok(())
    }

    pub fn is_stale(&self, instances: &InstanceSet) -> bool {
        self.built_version != Some(instances.version())
    }

    /// Rebuild the TLAS and buffer if `instances` changed since the last
    /// build, and return the version and buffer now current.
    ///
    /// On error the previous buffer stays current.
    pub fn rebuild_if_stale(&mut self, instances: &InstanceSet) -> Result<(u64, Arc<SceneBuffer>)> {
        let version = instances.version();
        if !self.is_stale(instances) {
            return Ok((version, self.buffer()));
        }

        let tlas = Tlas::build(instances.instances(), &self.blas_set, &self.config)?;
        let buffer = SceneBuffer::assemble(&self.blas_layout, &tlas, version)?;
        log::debug!(
            "Rebuilt world at version {version}: {} instances, {} texels",
            tlas.instances.len(),
            buffer.texel_count()
        );

        self.tlas = tlas;
        self.buffer = Arc::new(buffer);
        self.built_version = Some(version);
        Ok((version, self.buffer()))
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            blas: self.blas_set.iter().map(|blas| blas.bvh.stats()).collect(),
            tlas: self.tlas.bvh.stats(),
            texel_count: self.buffer.texel_count(),
        }
    }
}
