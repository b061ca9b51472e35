#[path = "common.rs"]
mod common;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;
use worldassistant_navmesh::orchestrator::build_all_tiles;
use worldassistant_navmesh::query::find_path;
use worldassistant_navmesh::tile_cache::TileCache;
use worldassistant_navmesh::tiles::NavMeshTiles;
use worldassistant_navmesh::NavMeshSettings;

fn settings() -> NavMeshSettings {
    NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0)
        .with_tile_width(std::num::NonZeroU16::new(100).unwrap())
}

fn built_nav_mesh(platform_count: usize, label: &str) -> NavMeshTiles {
    let (scene, collisions) = common::scene_with_platforms(platform_count);
    let nav_mesh_settings = settings();
    let tile_cache = TileCache::new(1024);
    let mut nav_mesh = NavMeshTiles::new();
    let scratch_dir = std::env::temp_dir().join(format!("worldassistant_navmesh_bench_nav_{label}"));

    build_all_tiles(&scene, &collisions, &[], &nav_mesh_settings, &tile_cache, &mut nav_mesh, &scratch_dir, Some(1)).unwrap();
    nav_mesh
}

fn criterion_benchmark(c: &mut Criterion) {
    let nav_mesh_settings = settings();

    let single_tile = built_nav_mesh(1, "single");
    let many_tiles = built_nav_mesh(5, "many");

    c.bench_function("Simple Navigation", |b| {
        b.iter(|| {
            black_box(find_path(
                &single_tile,
                &nav_mesh_settings,
                Vec3::new(2.0, 0.0, 2.0),
                Vec3::new(-2.0, 0.0, -2.0),
                None,
            ))
        });
    });

    c.bench_function("Many Navigation", |b| {
        b.iter(|| {
            black_box(find_path(
                &many_tiles,
                &nav_mesh_settings,
                Vec3::new(2.0, 0.0, 2.0),
                Vec3::new(60.0, 0.0, 2.0),
                None,
            ))
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
