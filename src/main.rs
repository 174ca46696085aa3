use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use glam::Mat4;
use image::{ImageBuffer, Luma};
use rayon::prelude::*;

use raytracer_bvh::{
    BuildConfig, Camera, Ray, RaytracerConfig, SceneBuffer, SceneState, TraversalLimits, WorldBvh,
};

/// Build the two-level BVH for a scene and cast one primary ray per pixel
#[derive(Parser, Debug)]
#[command(name = "raytracer-probe", version)]
struct Args {
    /// glTF or GLB scene; a grid of cubes is used when omitted
    scene: Option<PathBuf>,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Traversal step budget per ray
    #[arg(long, default_value_t = RaytracerConfig::TRAVERSAL_MAX_STEPS)]
    max_steps: u32,

    /// Ignore the step budget
    #[arg(long)]
    unbounded: bool,

    /// Frames to cast; every frame after the first spins the instances
    #[arg(long, default_value_t = 1)]
    frames: u32,

    #[arg(long, default_value_t = BuildConfig::default().leaf_threshold)]
    leaf_threshold: usize,

    /// Write the depth of the last frame as a grayscale PNG
    #[arg(long)]
    depth_image: Option<PathBuf>,
}

/// Per-frame counters
#[derive(Default, Debug)]
struct FrameStats {
    hits: usize,
    exhausted: usize,
    steps: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut scene = match &args.scene {
        Some(path) => SceneState::load_from_gltf(path)?,
        None => SceneState::new(),
    };

    let config = BuildConfig {
        leaf_threshold: args.leaf_threshold,
        ..BuildConfig::default()
    };
    let build_start = Instant::now();
    let mut world = WorldBvh::new(&scene.meshes, config)?;
    log::info!("BLAS build took {:?}", build_start.elapsed());

    let limits = if args.unbounded {
        TraversalLimits::unbounded()
    } else {
        TraversalLimits {
            max_steps: args.max_steps,
        }
    };
    let resolution = [args.width, args.height];
    let mut depth = Vec::new();

    for frame in 0..args.frames.max(1) {
        if frame > 0 {
            spin_instances(&mut scene, 0.1);
        }

        let rebuild_start = Instant::now();
        let (version, buffer) = world.rebuild_if_stale(&scene.instances)?;
        let rebuild_time = rebuild_start.elapsed();

        let cast_start = Instant::now();
        let (frame_depth, stats) = cast_frame(&buffer, &scene.camera, resolution, limits);
        let pixels = frame_depth.len();
        log::info!(
            "frame {frame} (version {version}): rebuild {rebuild_time:?}, cast {:?}, {}/{pixels} hits, {:.1} steps/ray",
            cast_start.elapsed(),
            stats.hits,
            stats.steps as f64 / pixels.max(1) as f64
        );
        if stats.exhausted > 0 {
            log::warn!("{} rays ran out of traversal budget", stats.exhausted);
        }
        depth = frame_depth;
    }

    let world_stats = world.stats();
    log::info!(
        "TLAS: {} nodes, depth {}; buffer {} texels",
        world_stats.tlas.node_count,
        world_stats.tlas.max_depth,
        world_stats.texel_count
    );

    if let Some(path) = &args.depth_image {
        write_depth_image(path, &depth, resolution)?;
        log::info!("Wrote depth image to {path:?}");
    }

    Ok(())
}

/// Rotate every instance about the world y axis.
fn spin_instances(scene: &mut SceneState, angle: f32) {
    let rotation = Mat4::from_rotation_y(angle);
    let transforms: Vec<Mat4> = scene
        .instances
        .instances()
        .iter()
        .map(|instance| rotation * instance.transform)
        .collect();
    for (slot, transform) in transforms.into_iter().enumerate() {
        scene.instances.set_transform(slot, transform);
    }
}

/// Nearest-hit distance per pixel, rows cast in parallel. Misses are infinite.
fn cast_frame(
    buffer: &SceneBuffer,
    camera: &Camera,
    resolution: [u32; 2],
    limits: TraversalLimits,
) -> (Vec<f32>, FrameStats) {
    let [width, height] = resolution;
    let rows: Vec<(Vec<f32>, FrameStats)> = (0..height)
        .into_par_iter()
        .map(|y| {
            let traverser = buffer.traverser(limits);
            let mut stats = FrameStats::default();
            let row: Vec<f32> = (0..width)
                .map(|x| {
                    let ray = Ray::from_camera(camera, [x, y], resolution);
                    let result = traverser.intersect(buffer.tlas_root(), ray.origin, ray.direction, None);
                    stats.steps += result.steps as u64;
                    stats.exhausted += result.budget_exhausted as usize;
                    if result.hit {
                        stats.hits += 1;
                        result.distance
                    } else {
                        f32::INFINITY
                    }
                })
                .collect();
            (row, stats)
        })
        .collect();

    let mut depth = Vec::with_capacity((width * height) as usize);
    let mut total = FrameStats::default();
    for (row, stats) in rows {
        depth.extend(row);
        total.hits += stats.hits;
        total.exhausted += stats.exhausted;
        total.steps += stats.steps;
    }
    (depth, total)
}

/// Near is bright, far is dark, misses are black.
fn write_depth_image(path: &Path, depth: &[f32], resolution: [u32; 2]) -> Result<(), Box<dyn Error>> {
    let (near, far) = depth
        .iter()
        .filter(|d| d.is_finite())
        .fold((f32::INFINITY, 0.0f32), |(near, far), &d| (near.min(d), far.max(d)));
    let span = (far - near).max(f32::EPSILON);

    let image = ImageBuffer::from_fn(resolution[0], resolution[1], |x, y| {
        let d = depth[(y * resolution[0] + x) as usize];
        let value = if d.is_finite() {
            (255.0 * (1.0 - (d - near) / span)).clamp(16.0, 255.0) as u8
        } else {
            0
        };
        Luma([value])
    });
    image.save(path)?;
    Ok(())
}
