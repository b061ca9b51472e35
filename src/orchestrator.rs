//! Parallel build orchestrator (C7): splits the tile grid covering the
//! scene's bounds across a `rayon` worker pool, stages each worker's output
//! to a scratch file, and replays the scratch files serially in
//! `z*numTilesX + x` order so tile installation is deterministic regardless
//! of worker completion order. Grounded on
//! `original_source/navigation/DynamicNavigationMesh.{h,cpp}`'s `BuildTiles`
//! scratch-file flow, with the rayon/`parking_lot` worker-pool idiom borrowed
//! from `qet8766-FastPATH`'s scheduler — this crate has no Bevy task-pool
//! analogue to generalize instead.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use glam::UVec2;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::build::build_tile;
use crate::collision::CollisionFile;
use crate::error::{BuildError, StreamError};
use crate::heightfields::NavArea;
use crate::scene::Scene;
use crate::stream::{InputFileStream, OutputFileStream, ReadCursor, ReadExt, WriteCursor, WriteExt};
use crate::tile_cache::{self, TileCache};
use crate::tiles::NavMeshTiles;
use crate::NavMeshSettings;

/// Tally of what a full-grid build did, surfaced to the embedding context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub num_tiles_x: u32,
    pub num_tiles_z: u32,
    pub tiles_built: u32,
    pub tiles_empty: u32,
}

/// One worker's contiguous slice of the linear tile index range `[start, end)`,
/// plus the scratch file it staged that range's layer blobs into.
struct WorkerRange {
    start: u32,
    end: u32,
    scratch_path: PathBuf,
}

/// Builds every tile overlapping `scene.bounds()`, replacing whatever the
/// tile cache and navmesh already held at those coordinates. An empty scene
/// short-circuits to a zero-size grid, matching the "build over an empty
/// scene" scenario: `num_tiles_x = num_tiles_z = 0`.
///
/// `worker_count` defaults to [`std::thread::available_parallelism`] when
/// `None`. Scratch files are written under `scratch_dir` (created if
/// missing) and left on disk afterward for inspection, matching the
/// filesystem contract.
pub fn build_all_tiles(
    scene: &Scene,
    collisions: &CollisionFile,
    nav_areas: &[NavArea],
    nav_mesh_settings: &NavMeshSettings,
    tile_cache: &TileCache,
    nav_mesh: &mut NavMeshTiles,
    scratch_dir: &Path,
    worker_count: Option<usize>,
) -> Result<BuildStats, BuildError> {
    if scene.is_empty() {
        return Ok(BuildStats::default());
    }

    let bounds = scene.bounds();
    let min_tile = nav_mesh_settings
        .get_tile_containing_position(glam::Vec2::new(bounds.min.x, bounds.min.z));
    let max_tile = nav_mesh_settings
        .get_tile_containing_position(glam::Vec2::new(bounds.max.x, bounds.max.z));

    let num_tiles_x = max_tile.x - min_tile.x + 1;
    let num_tiles_z = max_tile.y - min_tile.y + 1;
    let total_tiles = (num_tiles_x * num_tiles_z) as usize;

    fs::create_dir_all(scratch_dir)
        .map_err(|source| BuildError::ScratchIo { path: scratch_dir.to_path_buf(), source })?;

    let worker_count = worker_count
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1)
        .min(total_tiles.max(1));
    let chunk_size = ((total_tiles + worker_count - 1) / worker_count).max(1);

    let ranges: Vec<(u32, u32)> = (0..total_tiles)
        .step_by(chunk_size)
        .map(|start| (start as u32, (start + chunk_size).min(total_tiles) as u32))
        .collect();

    let completed: Mutex<Vec<WorkerRange>> = Mutex::new(Vec::with_capacity(ranges.len()));
    let errors: Mutex<Vec<BuildError>> = Mutex::new(Vec::new());

    tracing::info!(num_tiles_x, num_tiles_z, worker_count, "starting parallel tile build");

    ranges.par_iter().for_each(|&(start, end)| {
        let scratch_path = scratch_dir.join(format!("temp{start}_{end}.bin"));
        match build_range_to_scratch(
            start,
            end,
            num_tiles_x,
            min_tile,
            scene,
            collisions,
            nav_areas,
            nav_mesh_settings,
            &scratch_path,
        ) {
            Ok(()) => completed.lock().push(WorkerRange { start, end, scratch_path }),
            Err(err) => errors.lock().push(err),
        }
    });

    if let Some(err) = errors.into_inner().into_iter().next() {
        return Err(err);
    }

    let mut ranges = completed.into_inner();
    ranges.sort_unstable_by_key(|r| r.start);

    let mut stats = BuildStats { num_tiles_x, num_tiles_z, tiles_built: 0, tiles_empty: 0 };

    for range in &ranges {
        replay_scratch_range(range, num_tiles_x, min_tile, nav_mesh_settings, tile_cache, nav_mesh, &mut stats)?;
    }

    tracing::info!(tiles_built = stats.tiles_built, tiles_empty = stats.tiles_empty, "tile build complete");

    Ok(stats)
}

fn to_io_error(err: StreamError) -> std::io::Error {
    match err {
        StreamError::Io { source, .. } => source,
        other => std::io::Error::other(other.to_string()),
    }
}

/// Builds every tile index in `[start, end)` and appends its layer blobs to
/// a fresh scratch file, framed as described in the orchestrator's design:
/// `i32 layer_count` then, per layer, `i32 data_size` followed by
/// `data_size` bytes (an 8-byte min/max-height prefix plus the LZ4-compressed
/// poly-mesh payload `tile_cache::compress_layer` already produces).
fn build_range_to_scratch(
    start: u32,
    end: u32,
    num_tiles_x: u32,
    min_tile: UVec2,
    scene: &Scene,
    collisions: &CollisionFile,
    nav_areas: &[NavArea],
    nav_mesh_settings: &NavMeshSettings,
    scratch_path: &Path,
) -> Result<(), BuildError> {
    let file = File::create(scratch_path)
        .map_err(|source| BuildError::ScratchIo { path: scratch_path.to_path_buf(), source })?;
    let mut out = OutputFileStream::new(file);

    let io_err = |source: StreamError| BuildError::ScratchIo { path: scratch_path.to_path_buf(), source: to_io_error(source) };

    for tile_idx in start..end {
        let tile_coord = UVec2::new(min_tile.x + tile_idx % num_tiles_x, min_tile.y + tile_idx / num_tiles_x);
        let layers = build_tile(tile_coord, scene, collisions, nav_areas, nav_mesh_settings);

        out.write_i32(layers.len() as i32).map_err(io_err)?;

        for layer in &layers {
            let compressed = tile_cache::compress_layer(&layer.poly_mesh, layer.detail_mesh.as_ref()).map_err(
                |_| BuildError::PolyMesh { x: tile_coord.x as i32, z: tile_coord.y as i32, reason: "layer compression failed" },
            )?;

            let data_size = 8 + compressed.len();
            out.write_i32(data_size as i32).map_err(io_err)?;
            out.write_u32(layer.min_height).map_err(io_err)?;
            out.write_u32(layer.max_height).map_err(io_err)?;
            out.write_bytes(&compressed).map_err(io_err)?;
        }
    }

    Ok(())
}

/// Reads back one worker's scratch file and installs its tiles into
/// `tile_cache`/`nav_mesh`, in ascending tile-index order within the range.
fn replay_scratch_range(
    range: &WorkerRange,
    num_tiles_x: u32,
    min_tile: UVec2,
    nav_mesh_settings: &NavMeshSettings,
    tile_cache: &TileCache,
    nav_mesh: &mut NavMeshTiles,
    stats: &mut BuildStats,
) -> Result<(), BuildError> {
    let file = File::open(&range.scratch_path)
        .map_err(|source| BuildError::ScratchIo { path: range.scratch_path.clone(), source })?;
    let mut input = InputFileStream::new(file)
        .map_err(|source| BuildError::ScratchIo { path: range.scratch_path.clone(), source })?;

    let io_err = |source: StreamError| BuildError::ScratchIo { path: range.scratch_path.clone(), source: to_io_error(source) };

    for tile_idx in range.start..range.end {
        let tile_coord = UVec2::new(min_tile.x + tile_idx % num_tiles_x, min_tile.y + tile_idx / num_tiles_x);

        let layer_count = input.read_i32().map_err(io_err)?;

        let mut layers = Vec::with_capacity(layer_count.max(0) as usize);
        for _ in 0..layer_count {
            let data_size = input.read_i32().map_err(io_err)? as usize;
            let min_height = input.read_u32().map_err(io_err)?;
            let max_height = input.read_u32().map_err(io_err)?;
            let mut compressed = vec![0u8; data_size.saturating_sub(8)];
            input.read_exact_or_err(&mut compressed).map_err(io_err)?;
            layers.push((compressed, min_height, max_height));
        }

        let reject = |_: crate::error::TileCacheError| BuildError::PolyMesh {
            x: tile_coord.x as i32,
            z: tile_coord.y as i32,
            reason: "tile cache rejected built layers",
        };

        if layers.is_empty() {
            tile_cache.remove_tile(tile_coord);
            stats.tiles_empty += 1;
        } else {
            tile_cache.install_compressed_layers(tile_coord, layers).map_err(reject)?;
            stats.tiles_built += 1;
        }

        tile_cache
            .build_nav_mesh_tile(tile_coord, nav_mesh_settings, nav_mesh)
            .map_err(reject)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{Collision, CollisionBounds, Face};
    use crate::math::{BoundingBox, PackedVertex};
    use glam::{Quat, Vec3};
    use std::num::NonZeroU16;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0)
            .with_tile_width(NonZeroU16::new(16).unwrap())
    }

    fn flat_platform(name: &str) -> Collision {
        let min = Vec3::new(-8.0, -0.1, -8.0);
        let max = Vec3::new(8.0, 0.1, 8.0);
        let corners = [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];
        let vertices: Vec<PackedVertex> = corners.iter().map(|&c| PackedVertex::pack(c)).collect();

        const QUADS: [[u16; 4]; 6] = [
            [0, 1, 2, 3],
            [5, 4, 7, 6],
            [4, 0, 3, 7],
            [1, 5, 6, 2],
            [4, 5, 1, 0],
            [3, 2, 6, 7],
        ];
        let mut faces = Vec::with_capacity(12);
        for quad in QUADS {
            faces.push(Face { a: quad[0], b: quad[1], c: quad[2], material: 0, light: 0 });
            faces.push(Face { a: quad[0], b: quad[2], c: quad[3], material: 0, light: 0 });
        }

        let bounds = CollisionBounds {
            aabb: BoundingBox::new(min, max),
            center: Vec3::ZERO,
            radius: min.distance(max) / 2.0,
        };

        Collision::from_parts(name.to_string(), vertices, faces, bounds)
    }

    #[test]
    fn empty_scene_builds_a_zero_size_grid() {
        let scene = Scene::new();
        let collisions = CollisionFile::new();
        let settings = settings();
        let tile_cache = TileCache::new(16);
        let mut nav_mesh = NavMeshTiles::new();
        let scratch = tempfile::tempdir().unwrap();

        let stats = build_all_tiles(
            &scene,
            &collisions,
            &[],
            &settings,
            &tile_cache,
            &mut nav_mesh,
            scratch.path(),
            Some(2),
        )
        .unwrap();

        assert_eq!(stats.num_tiles_x, 0);
        assert_eq!(stats.num_tiles_z, 0);
        assert_eq!(tile_cache.tile_count(), 0);
        assert_eq!(nav_mesh.tile_count(), 0);
    }

    #[test]
    fn building_a_platform_installs_tiles_into_cache_and_navmesh() {
        let mut scene = Scene::new();
        let mut collisions = CollisionFile::new();
        collisions.insert_direct(flat_platform("platform"));
        scene.add_node(&collisions, 1, "platform", Vec3::ZERO, Quat::IDENTITY, -1, 0).unwrap();

        let settings = settings();
        let tile_cache = TileCache::new(64);
        let mut nav_mesh = NavMeshTiles::new();
        let scratch = tempfile::tempdir().unwrap();

        let stats = build_all_tiles(
            &scene,
            &collisions,
            &[],
            &settings,
            &tile_cache,
            &mut nav_mesh,
            scratch.path(),
            Some(4),
        )
        .unwrap();

        assert!(stats.num_tiles_x >= 1 && stats.num_tiles_z >= 1);
        assert!(stats.tiles_built >= 1);
        assert!(tile_cache.tile_count() >= 1);
        assert!(nav_mesh.tile_count() >= 1);
    }
}
