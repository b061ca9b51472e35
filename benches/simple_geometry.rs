#[path = "common.rs"]
mod common;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use worldassistant_navmesh::orchestrator::build_all_tiles;
use worldassistant_navmesh::tile_cache::TileCache;
use worldassistant_navmesh::tiles::NavMeshTiles;
use worldassistant_navmesh::NavMeshSettings;

fn settings() -> NavMeshSettings {
    NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0)
        .with_tile_width(std::num::NonZeroU16::new(100).unwrap())
}

fn bench_build(c: &mut Criterion, label: &str, platform_count: usize) {
    let (scene, collisions) = common::scene_with_platforms(platform_count);
    let nav_mesh_settings = settings();
    let scratch_dir = std::env::temp_dir().join("worldassistant_navmesh_bench_geometry");

    c.bench_function(label, |b| {
        b.iter_batched(
            || (TileCache::new(1024), NavMeshTiles::new()),
            |(tile_cache, mut nav_mesh)| {
                black_box(build_all_tiles(
                    &scene,
                    &collisions,
                    &[],
                    &nav_mesh_settings,
                    &tile_cache,
                    &mut nav_mesh,
                    &scratch_dir,
                    Some(1),
                ))
            },
            BatchSize::SmallInput,
        );
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    bench_build(c, "Generate Single Primitive Geometry", 1);
    bench_build(c, "Generate Many Primitive Geometry", 5);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
