use glam::Mat4;
use raytracer_shared::Aabb;

use crate::bvh::{Blas, Bvh, BuildConfig};
use crate::error::{BuildError, Result};
use crate::scene::{BlasId, Instance};

/// One instance as the TLAS sees it: world bounds plus both matrices.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TlasInstance {
    pub bounds: Aabb,
    pub child_id: u32,
    pub blas: BlasId,
    pub transform: Mat4,
    pub inverse: Mat4,
}

/// Top-level hierarchy over the world-space boxes of all instances.
#[derive(Clone, Debug)]
pub struct Tlas {
    pub bvh: Bvh,
    pub instances: Vec<TlasInstance>,
}

impl Tlas {
    /// Build from the current placements.
    ///
    /// Each instance box is its BLAS root box with all eight corners pushed
    /// through the world matrix and refit. The hierarchy over those boxes
    /// uses the same splitting rules as a BLAS.
    pub fn build(instances: &[Instance], blas_set: &[Blas], config: &BuildConfig) -> Result<Self> {
        let instances = instances
            .iter()
            .map(|instance| -> Result<TlasInstance> {
                let blas = blas_set.get(instance.blas).ok_or(BuildError::UnknownBlas {
                    child_id: instance.child_id,
                    blas: instance.blas,
                })?;
                let determinant = instance.transform.determinant();
                if determinant == 0.0 || !determinant.is_finite() {
                    return Err(BuildError::SingularTransform {
                        child_id: instance.child_id,
                    });
                }
                Ok(TlasInstance {
                    bounds: blas.bounds().transformed(&instance.transform),
                    child_id: instance.child_id,
                    blas: instance.blas,
                    transform: instance.transform,
                    inverse: instance.transform.inverse(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let world_bounds: Vec<Aabb> = instances.iter().map(|instance| instance.bounds).collect();
        let bvh = Bvh::build(&world_bounds, config);
        log::debug!(
            "TLAS built: {} instances, {} nodes, depth {}",
            instances.len(),
            bvh.root.node_count(),
            bvh.max_depth
        );

        Ok(Self { bvh, instances })
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in leaf order, as they are laid out in the buffer.
    pub fn ordered_instances(&self) -> impl Iterator<Item = &TlasInstance> + '_ {
        self.bvh
            .indices
            .iter()
            .map(move |&index| &self.instances[index as usize])
    }
}
