//! Per-tile build pipeline (C6): turns placed collision geometry within one
//! tile's footprint into the layered polygon meshes the tile cache stores.
//! Wires together voxelization (`heightfields`), region partitioning
//! (`regions`), contour extraction (`contour`), mesh simplification
//! (`mesher`), layer splitting (`layers`), and optional height-corrected
//! detail mesh generation (`detail_mesh`) — the same stage order
//! `NavigationMeshBuilder::BuildTile` in `original_source` drives, minus its
//! tile-cache bookkeeping, which `tile_cache` owns instead.

use glam::{Mat4, Vec3};

use crate::collision::CollisionFile;
use crate::heightfields::{self, NavArea};
use crate::layers::{self, PolyMeshLayer};
use crate::mesher::{self, PolyMesh};
use crate::scene::Scene;
use crate::{contour, detail_mesh, regions};
use crate::{NavMeshPartitionType, NavMeshSettings};

/// One layer's worth of built mesh, ready to hand to the tile cache for
/// compression and, later, installation into the query-time [`crate::tiles::NavMeshTiles`].
pub struct BuiltLayer {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: Option<PolyMesh>,
    pub min_height: u32,
    pub max_height: u32,
}

/// Voxelizes every node overlapping `tile_coord`'s bordered footprint,
/// builds one combined polygon mesh for the tile, and splits it into
/// layers. Returns an empty `Vec` for a tile with no walkable geometry at
/// all, matching `BuildTile`'s early-out when the voxelized tile is empty.
pub fn build_tile(
    tile_coord: glam::UVec2,
    scene: &Scene,
    collisions: &CollisionFile,
    nav_areas: &[NavArea],
    nav_mesh_settings: &NavMeshSettings,
) -> Vec<BuiltLayer> {
    let tile_aabb = nav_mesh_settings.get_tile_bounding_box(tile_coord);
    let border = nav_mesh_settings.get_border_size();
    let query_box = crate::math::BoundingBox::new(
        tile_aabb.min - Vec3::new(border, 0.0, border),
        tile_aabb.max + Vec3::new(border, 0.0, border),
    );

    let overlapping = scene.query(query_box);

    let mut local_vertices = Vec::new();
    let mut local_indices = Vec::new();
    let mut collections = Vec::with_capacity(overlapping.len());

    for handle in overlapping {
        let Some(node) = scene.get(handle) else {
            continue;
        };
        let Some(collision) = collisions.get(node.model()) else {
            tracing::warn!(model = node.model(), "placed node references unknown collision model, skipping");
            continue;
        };
        if collision.is_empty() {
            continue;
        }

        collision.unpack(&mut local_vertices, &mut local_indices, &Mat4::IDENTITY, 0, true);

        collections.push(OwnedTriangleCollection {
            transform: node.transform(),
            vertices: local_vertices.clone(),
            indices: local_indices.clone(),
        });
    }

    if collections.is_empty() {
        return Vec::new();
    }

    let triangle_collections: Vec<heightfields::TriangleCollection> = collections
        .iter()
        .map(|owned| heightfields::TriangleCollection {
            transform: owned.transform,
            vertices: &owned.vertices,
            indices: &owned.indices,
            area: None,
        })
        .collect();

    let voxelized_tile = heightfields::build_heightfield_tile(tile_coord, &triangle_collections, nav_mesh_settings);

    let mut open_tile = heightfields::build_open_heightfield_tile(voxelized_tile, nav_mesh_settings);
    heightfields::erode_walkable_area(&mut open_tile, nav_mesh_settings);
    heightfields::mark_nav_areas(&mut open_tile, nav_areas, tile_coord, nav_mesh_settings);

    match nav_mesh_settings.partition_type {
        NavMeshPartitionType::Watershed => {
            heightfields::calculate_distance_field(&mut open_tile, nav_mesh_settings);
            regions::build_regions(&mut open_tile, nav_mesh_settings);
        }
        NavMeshPartitionType::Monotone => {
            regions::build_regions_monotone(&mut open_tile, nav_mesh_settings);
        }
    }

    let contour_set = contour::build_contours(&open_tile, nav_mesh_settings);
    let poly_mesh = mesher::build_poly_mesh(&contour_set, nav_mesh_settings);

    if poly_mesh.polygons.is_empty() {
        return Vec::new();
    }

    layers::split_into_layers(poly_mesh)
        .into_iter()
        .map(|PolyMeshLayer { poly_mesh, min_height, max_height }| {
            let detail = detail_mesh::build_detail_mesh(nav_mesh_settings, &open_tile, &poly_mesh);
            BuiltLayer {
                poly_mesh,
                detail_mesh: detail,
                min_height,
                max_height,
            }
        })
        .collect()
}

/// Owns the decoded triangle soup for one placed node so `TriangleCollection`
/// (which only borrows) can reference it across the span of a single
/// `build_tile` call without each node's geometry being decoded twice.
struct OwnedTriangleCollection {
    transform: Mat4,
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{Collision, CollisionBounds, CollisionFile, Face};
    use crate::math::{BoundingBox, PackedVertex};
    use glam::{Quat, Vec3};
    use std::num::NonZeroU16;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0).with_tile_width(NonZeroU16::new(16).unwrap())
    }

    /// A flat 4x4 platform centered on the origin, thin enough in Y to read
    /// as a single walkable surface once voxelized.
    fn box_collision(name: &str) -> Collision {
        let min = Vec3::new(-2.0, -0.1, -2.0);
        let max = Vec3::new(2.0, 0.1, 2.0);
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
    fn empty_scene_produces_no_layers() {
        let scene = Scene::new();
        let collisions = CollisionFile::new();
        let settings = settings();
        let layers = build_tile(glam::UVec2::new(0, 0), &scene, &collisions, &[], &settings);
        assert!(layers.is_empty());
    }

    #[test]
    fn tile_with_a_flat_platform_produces_a_layer() {
        let mut scene = Scene::new();
        let mut collisions = CollisionFile::new();
        collisions.insert_direct(box_collision("platform"));

        scene
            .add_node(&collisions, 1, "platform", Vec3::ZERO, Quat::IDENTITY, -1, 0)
            .unwrap();

        let settings = settings();
        let layers = build_tile(glam::UVec2::new(0, 0), &scene, &collisions, &[], &settings);
        assert!(!layers.is_empty());
    }
}
