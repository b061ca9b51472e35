//! Persisted tile-cache file format: a flat binary dump of every
//! compressed layer the tile cache holds, plus enough navmesh/tile-cache
//! parameters to sanity-check a reload. Grounded on `original_source/
//! navigation/DynamicNavigationMesh.{h,cpp}`'s `Serialize`/`Deserialize`
//! pair, re-expressed against this crate's `stream` capability traits
//! instead of the original's stream-subclass hierarchy.
//!
//! `load` only ever builds a [`LoadedTileCache`] value — it never touches a
//! live [`TileCache`] or navmesh. The caller (`embed`) installs the result
//! into fresh structures and only swaps them into place once every tile has
//! parsed and installed successfully, so a truncated or corrupt file leaves
//! whatever was loaded before untouched.

use std::fs::File;
use std::path::Path;

use glam::{UVec2, Vec3};

use crate::error::NavigationResult;
use crate::math::{next_power_of_two, log_base_two, BoundingBox};
use crate::stream::{InputFileStream, OutputFileStream, ReadCursor, ReadExt, WriteCursor, WriteExt};
use crate::tile_cache::TileCache;
use crate::NavMeshSettings;

/// Total bits a polygon reference would be packed into if this crate
/// bit-packed tile/poly indices the way the original engine's `dtPolyRef`
/// does. Tracked here purely to satisfy the persisted format's
/// `max_tiles`/`max_polys_per_tile` fields and the round-trip invariant
/// `log2(max_tiles) + log2(max_polys_per_tile) == 22`; this crate addresses
/// polygons by `(UVec2, u16)` rather than a packed integer, so the split is
/// informational only.
const TOTAL_REF_BITS: u32 = 22;

/// Splits the 22-bit reference budget between tile index bits and poly
/// index bits, giving the tile grid enough bits to address every tile with
/// room to spare (next power of two of `tile_count`, at least `1`).
pub(crate) fn poly_ref_bit_split(tile_count: u32) -> (u32, u32) {
    let tile_bits = log_base_two(next_power_of_two(tile_count.max(1))).min(TOTAL_REF_BITS);
    (tile_bits, TOTAL_REF_BITS - tile_bits)
}

/// The fully-parsed contents of a persisted tile-cache file, ready to be
/// installed into a fresh [`TileCache`] and navmesh.
pub struct LoadedTileCache {
    pub scene_bounds: BoundingBox,
    pub num_tiles_x: i32,
    pub num_tiles_z: i32,
    /// Per-tile layers in ascending layer order, ready for
    /// [`TileCache::install_compressed_layers`] style installation.
    pub tiles: Vec<(UVec2, Vec<(Vec<u8>, u32, u32)>)>,
}

/// Writes every layer currently in `tile_cache` to `path`, framed as
/// described in the module docs.
pub fn save(
    path: &Path,
    scene_bounds: BoundingBox,
    num_tiles_x: i32,
    num_tiles_z: i32,
    nav_mesh_settings: &NavMeshSettings,
    tile_cache: &TileCache,
) -> NavigationResult<()> {
    let file = File::create(path)?;
    let mut out = OutputFileStream::new(file);

    out.write_bounding_box(&scene_bounds)?;
    out.write_i32(num_tiles_x)?;
    out.write_i32(num_tiles_z)?;

    let total_tiles = (num_tiles_x.max(0) as u32).saturating_mul(num_tiles_z.max(0) as u32);
    let (tile_bits, poly_bits) = poly_ref_bit_split(total_tiles);
    let max_tiles = 1u32 << tile_bits;
    let max_polys_per_tile = 1u32 << poly_bits;

    // NavMeshParams
    let origin = Vec3::new(-nav_mesh_settings.world_half_extents, nav_mesh_settings.world_bottom_bound, -nav_mesh_settings.world_half_extents);
    out.write_vec3(origin)?;
    out.write_f32(nav_mesh_settings.get_tile_size())?;
    out.write_u32(max_tiles)?;
    out.write_u32(max_polys_per_tile)?;

    // TileCacheParams
    out.write_vec3(origin)?;
    out.write_f32(nav_mesh_settings.cell_height)?;
    out.write_f32(nav_mesh_settings.cell_width)?;
    out.write_u32(u32::from(nav_mesh_settings.tile_width.get()))?;
    out.write_f32(nav_mesh_settings.max_contour_simplification_error)?;
    out.write_u32(max_tiles)?;
    out.write_u32(total_tiles)?;
    out.write_u16(nav_mesh_settings.walkable_height)?;
    out.write_u16(nav_mesh_settings.walkable_radius)?;
    out.write_u16(nav_mesh_settings.step_height)?;

    for (tile_coord, layer, min_height, max_height, compressed) in tile_cache.all_compressed_layers_sorted() {
        out.write_i32(tile_coord.x as i32)?;
        out.write_i32(tile_coord.y as i32)?;
        out.write_u8(layer)?;
        out.write_u32(min_height)?;
        out.write_u32(max_height)?;
        out.write_i32(compressed.len() as i32)?;
        out.write_bytes(&compressed)?;
    }

    Ok(())
}

/// Parses `path` in full before returning, so a truncated or corrupt file
/// surfaces as an `Err` without partially populating the result.
pub fn load(path: &Path) -> NavigationResult<LoadedTileCache> {
    let file = File::open(path)?;
    let mut input = InputFileStream::new(file)?;

    let scene_bounds = input.read_bounding_box()?;
    let num_tiles_x = input.read_i32()?;
    let num_tiles_z = input.read_i32()?;

    let _nav_mesh_origin = input.read_vec3()?;
    let _tile_size = input.read_f32()?;
    let _max_tiles = input.read_u32()?;
    let _max_polys_per_tile = input.read_u32()?;

    let _tile_cache_origin = input.read_vec3()?;
    let _cell_height = input.read_f32()?;
    let _cell_width = input.read_f32()?;
    let _tile_width = input.read_u32()?;
    let _max_simplification_error = input.read_f32()?;
    let _max_tiles_again = input.read_u32()?;
    let _max_obstacles = input.read_u32()?;
    let _walkable_height = input.read_u16()?;
    let _walkable_radius = input.read_u16()?;
    let _step_height = input.read_u16()?;

    let mut flat: Vec<(UVec2, u8, u32, u32, Vec<u8>)> = Vec::new();
    while !input.eof() {
        let tx = input.read_i32()?;
        let ty = input.read_i32()?;
        let layer = input.read_u8()?;
        let min_height = input.read_u32()?;
        let max_height = input.read_u32()?;
        let data_size = input.read_i32()? as usize;
        let mut bytes = vec![0u8; data_size];
        input.read_exact_or_err(&mut bytes)?;
        flat.push((UVec2::new(tx as u32, ty as u32), layer, min_height, max_height, bytes));
    }

    flat.sort_unstable_by_key(|(tile, layer, ..)| (tile.x, tile.y, *layer));

    let mut tiles: Vec<(UVec2, Vec<(Vec<u8>, u32, u32)>)> = Vec::new();
    for (tile_coord, _layer, min_height, max_height, bytes) in flat {
        match tiles.last_mut() {
            Some((last_coord, layers)) if *last_coord == tile_coord => {
                layers.push((bytes, min_height, max_height));
            }
            _ => tiles.push((tile_coord, vec![(bytes, min_height, max_height)])),
        }
    }

    Ok(LoadedTileCache { scene_bounds, num_tiles_x, num_tiles_z, tiles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuiltLayer;
    use crate::mesher::PolyMesh;
    use crate::tiles::NavMeshTiles;
    use glam::UVec3;
    use std::num::NonZeroU16;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0).with_tile_width(NonZeroU16::new(16).unwrap())
    }

    fn sample_mesh() -> PolyMesh {
        PolyMesh {
            vertices: vec![UVec3::new(0, 0, 0), UVec3::new(4, 0, 0), UVec3::new(0, 0, 4), UVec3::new(4, 0, 4)],
            polygons: vec![[0, 1, 2], [1, 3, 2]],
            edges: vec![
                [crate::mesher::EdgeConnection::Internal(1), crate::mesher::EdgeConnection::None, crate::mesher::EdgeConnection::None],
                [crate::mesher::EdgeConnection::None, crate::mesher::EdgeConnection::None, crate::mesher::EdgeConnection::Internal(0)],
            ],
            areas: vec![crate::Area(0), crate::Area(0)],
            regions: vec![1, 1],
        }
    }

    #[test]
    fn bit_split_always_sums_to_22() {
        for tiles in [0u32, 1, 2, 17, 4096, 1_000_000] {
            let (tile_bits, poly_bits) = poly_ref_bit_split(tiles);
            assert_eq!(tile_bits + poly_bits, 22);
        }
    }

    #[test]
    fn save_then_load_roundtrips_a_single_tile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let settings = settings();
        let cache = TileCache::new(16);
        let built = vec![BuiltLayer { poly_mesh: sample_mesh(), detail_mesh: None, min_height: 0, max_height: 4 }];
        cache.set_tile_layers(UVec2::new(0, 0), built).unwrap();

        let scene_bounds = BoundingBox::new(Vec3::splat(-8.0), Vec3::splat(8.0));
        save(&path, scene_bounds, 1, 1, &settings, &cache).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.num_tiles_x, 1);
        assert_eq!(loaded.num_tiles_z, 1);
        assert_eq!(loaded.tiles.len(), 1);
        assert_eq!(loaded.tiles[0].0, UVec2::new(0, 0));
        assert_eq!(loaded.tiles[0].1.len(), 1);

        let reloaded_cache = TileCache::new(16);
        let mut nav_mesh = NavMeshTiles::new();
        for (tile_coord, layers) in loaded.tiles {
            reloaded_cache.install_compressed_layers(tile_coord, layers).unwrap();
            reloaded_cache.build_nav_mesh_tile(tile_coord, &settings, &mut nav_mesh).unwrap();
        }
        assert_eq!(nav_mesh.tile_count(), 1);
    }

    #[test]
    fn load_on_missing_file_errors_without_side_effects() {
        let path = Path::new("/nonexistent/navmesh/cache.bin");
        assert!(load(path).is_err());
    }
}
