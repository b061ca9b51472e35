//! Embedded query surface (C10): the single context object a host
//! embeds against. [`WorldNavigation`] owns the build/query parameters, the
//! compressed tile cache, and the queryable navmesh; it does **not** own the
//! [`Scene`] or [`CollisionFile`] — per the crate's quick-start, "callers own
//! the Scene and drive `WorldNavigation` directly" — so every operation that
//! needs placement data takes `&Scene`/`&CollisionFile` as arguments, the
//! same shape [`crate::orchestrator::build_all_tiles`] already takes.
//!
//! Every geometry value crossing this boundary is **Y-up**; the crate's
//! internal convention is **Z-up**. [`to_internal`]/[`to_external`] perform
//! that swap exactly once, here, matching the original engine's navmesh/game
//! axis convention mismatch — never inline in the build pipeline.
//!
//! Grounded on `original_source/navigation/DynamicNavigationMesh.{h,cpp}`'s
//! public surface (`Build`, `FindPath`, `GetNearestPoint`, `Load`/`Save`) and
//! on `NavMeshSettings`'s builder shape, generalized from a Bevy `Resource`
//! into a plain, host-owned context struct.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use glam::{UVec2, Vec3};
use parking_lot::Mutex;

use crate::collision::CollisionFile;
use crate::error::{NavigationError, NavigationResult};
use crate::heightfields::NavArea;
use crate::math::BoundingBox;
use crate::orchestrator::{self, BuildStats};
use crate::persist;
use crate::query::{self, FindPathError, StringPullingError};
use crate::scene::Scene;
use crate::tile_cache::TileCache;
use crate::tiles::NavMeshTiles;
use crate::NavMeshSettings;

/// Default radius `find_path`/`nearest_point` search for a polygon within,
/// matching [`crate::query::find_path`]'s own internal default.
const DEFAULT_SEARCH_RADIUS: f32 = 5.0;

/// World-build/query parameters outside of [`NavMeshSettings`] itself:
/// where the orchestrator stages scratch files, how many workers it uses,
/// how many tiles the cache may hold, and how many recent query results the
/// per-operation result cache retains.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub scratch_dir: PathBuf,
    pub worker_count: Option<usize>,
    pub max_tiles: u32,
    pub result_cache_capacity: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("navmesh/temp"),
            worker_count: None,
            max_tiles: 1024,
            result_cache_capacity: 8,
        }
    }
}

/// Swaps the Y and Z components. Its own inverse, so the same function
/// converts in either direction across the embedding boundary.
fn swap_yz(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, v.y)
}

/// Converts an external (Y-up) vector into this crate's internal (Z-up)
/// convention.
pub fn to_internal(v: Vec3) -> Vec3 {
    swap_yz(v)
}

/// Converts an internal (Z-up) vector back into the external (Y-up)
/// convention.
pub fn to_external(v: Vec3) -> Vec3 {
    swap_yz(v)
}

/// Tiny bounded memoization cache keyed by argument tuple. Linear-scan
/// eviction is fine at the small capacities this is used at (a handful of
/// entries); grounded on `qet8766-FastPATH`'s `TileCache` in shape (bounded,
/// keyed, evict-oldest-on-overflow) though this caches query results rather
/// than tile bytes.
struct ResultCache<K, V> {
    capacity: usize,
    entries: Vec<(K, V)>,
}

impl<K: PartialEq + Clone, V: Clone> ResultCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: Vec::new() }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos);
        let value = entry.1.clone();
        self.entries.push(entry);
        Some(value)
    }

    fn insert(&mut self, key: K, value: V) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(pos);
        }
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push((key, value));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FindPathKey {
    start: [u32; 3],
    end: [u32; 3],
}

impl FindPathKey {
    fn new(start: Vec3, end: Vec3) -> Self {
        Self {
            start: [start.x.to_bits(), start.y.to_bits(), start.z.to_bits()],
            end: [end.x.to_bits(), end.y.to_bits(), end.z.to_bits()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NearestPointKey([u32; 3]);

impl NearestPointKey {
    fn new(point: Vec3) -> Self {
        Self([point.x.to_bits(), point.y.to_bits(), point.z.to_bits()])
    }
}

/// The tile grid a prior `build`/`load` populated, kept around so `save`
/// can re-emit the same `numTilesX`/`numTilesZ` header fields `load` expects.
#[derive(Debug, Clone, Copy)]
struct BuiltGrid {
    scene_bounds: BoundingBox,
    num_tiles_x: i32,
    num_tiles_z: i32,
}

/// The embedding host's single entry point: build/query parameters, the
/// compressed tile cache, and the queryable navmesh. Exactly one of these
/// exists per embedding process, created at [`WorldNavigation::init`] and
/// dropped at the end of the host's lifetime — there is no process-wide
/// singleton to reach through instead.
pub struct WorldNavigation {
    nav_mesh_settings: NavMeshSettings,
    config: BuildConfig,
    nav_areas: Vec<NavArea>,
    tile_cache: TileCache,
    nav_mesh: NavMeshTiles,
    built_grid: Option<BuiltGrid>,
    find_path_cache: Mutex<ResultCache<FindPathKey, Vec<Vec3>>>,
    nearest_point_cache: Mutex<ResultCache<NearestPointKey, Option<Vec3>>>,
}

impl WorldNavigation {
    /// Validates `nav_mesh_settings` and constructs an empty context: no
    /// tiles built or loaded yet.
    pub fn new(nav_mesh_settings: NavMeshSettings, nav_areas: Vec<NavArea>, config: BuildConfig) -> NavigationResult<Self> {
        nav_mesh_settings.validate()?;
        let max_tiles = config.max_tiles;
        let cache_capacity = config.result_cache_capacity;
        Ok(Self {
            nav_mesh_settings,
            config,
            nav_areas,
            tile_cache: TileCache::new(max_tiles),
            nav_mesh: NavMeshTiles::new(),
            built_grid: None,
            find_path_cache: Mutex::new(ResultCache::new(cache_capacity)),
            nearest_point_cache: Mutex::new(ResultCache::new(cache_capacity)),
        })
    }

    /// Alias for [`WorldNavigation::new`], matching the context-object
    /// lifecycle name the embedding surface uses (`init`/`Drop` standing in
    /// for the original's explicit `init`/`shutdown` pair).
    pub fn init(nav_mesh_settings: NavMeshSettings, nav_areas: Vec<NavArea>, config: BuildConfig) -> NavigationResult<Self> {
        Self::new(nav_mesh_settings, nav_areas, config)
    }

    pub fn nav_mesh_settings(&self) -> &NavMeshSettings {
        &self.nav_mesh_settings
    }

    /// `true` once the navmesh holds at least one tile.
    pub fn state(&self) -> bool {
        self.nav_mesh.tile_count() > 0
    }

    fn invalidate_caches(&self) {
        self.find_path_cache.lock().clear();
        self.nearest_point_cache.lock().clear();
    }

    /// Rebuilds the full navmesh from `scene`/`collisions`. Builds into
    /// fresh tile-cache and navmesh instances and only swaps them into
    /// `self` on success, so a failed build leaves the prior mesh (if any)
    /// untouched rather than partially overwritten.
    pub fn build(&mut self, scene: &Scene, collisions: &CollisionFile) -> NavigationResult<BuildStats> {
        let mut fresh_tile_cache = TileCache::new(self.config.max_tiles);
        let mut fresh_nav_mesh = NavMeshTiles::new();

        let stats = orchestrator::build_all_tiles(
            scene,
            collisions,
            &self.nav_areas,
            &self.nav_mesh_settings,
            &fresh_tile_cache,
            &mut fresh_nav_mesh,
            &self.config.scratch_dir,
            self.config.worker_count,
        )?;

        std::mem::swap(&mut self.tile_cache, &mut fresh_tile_cache);
        self.nav_mesh = fresh_nav_mesh;
        self.built_grid = Some(BuiltGrid {
            scene_bounds: scene.bounds(),
            num_tiles_x: stats.num_tiles_x as i32,
            num_tiles_z: stats.num_tiles_z as i32,
        });
        self.invalidate_caches();

        Ok(stats)
    }

    /// Rebuilds only the named tiles, requiring a prior full [`build`] —
    /// partial rebuilds before an initial build fail fast rather than
    /// silently producing a sparse navmesh.
    ///
    /// [`build`]: WorldNavigation::build
    pub fn build_tiles(&mut self, scene: &Scene, collisions: &CollisionFile, tile_coords: &[UVec2]) -> NavigationResult<usize> {
        if self.built_grid.is_none() {
            return Err(NavigationError::NoPriorBuild);
        }

        let mut rebuilt = 0;
        for &tile_coord in tile_coords {
            let layers = crate::build::build_tile(tile_coord, scene, collisions, &self.nav_areas, &self.nav_mesh_settings);
            self.tile_cache.set_tile_layers(tile_coord, layers)?;
            self.tile_cache.build_nav_mesh_tile(tile_coord, &self.nav_mesh_settings, &mut self.nav_mesh)?;
            rebuilt += 1;
        }

        self.invalidate_caches();
        Ok(rebuilt)
    }

    /// Reads a persisted tile cache from `path` and installs it, replacing
    /// whatever navmesh existed before. Fully parses the file before
    /// mutating any live state, so a truncated or corrupt file leaves the
    /// prior navmesh (if any) untouched.
    pub fn load(&mut self, path: &Path) -> NavigationResult<()> {
        let loaded = persist::load(path)?;

        let mut fresh_tile_cache = TileCache::new(self.config.max_tiles);
        let mut fresh_nav_mesh = NavMeshTiles::new();
        for (tile_coord, layers) in loaded.tiles {
            fresh_tile_cache.install_compressed_layers(tile_coord, layers)?;
            fresh_tile_cache.build_nav_mesh_tile(tile_coord, &self.nav_mesh_settings, &mut fresh_nav_mesh)?;
        }

        self.tile_cache = fresh_tile_cache;
        self.nav_mesh = fresh_nav_mesh;
        self.built_grid = Some(BuiltGrid {
            scene_bounds: loaded.scene_bounds,
            num_tiles_x: loaded.num_tiles_x,
            num_tiles_z: loaded.num_tiles_z,
        });
        self.invalidate_caches();

        Ok(())
    }

    /// Writes the current tile cache to `path`. Fails with
    /// [`NavigationError::NoPriorBuild`] if nothing has been built or loaded
    /// yet, matching the precondition-violation policy for "query before
    /// load".
    pub fn save(&self, path: &Path) -> NavigationResult<()> {
        let grid = self.built_grid.ok_or(NavigationError::NoPriorBuild)?;
        persist::save(path, grid.scene_bounds, grid.num_tiles_x, grid.num_tiles_z, &self.nav_mesh_settings, &self.tile_cache)
    }

    /// Writes the navmesh to `path` as a Wavefront OBJ, for offline
    /// inspection. Only compiled in when the `debug-export` feature is on.
    /// Dumps fan-triangulated polygon faces across the whole navmesh; use
    /// [`crate::debug_export::dump_obj`] directly for the wireframe or
    /// bounds-limited variants.
    #[cfg(feature = "debug-export")]
    pub fn dump(&self, path: &Path) -> NavigationResult<()> {
        crate::debug_export::dump_obj(path, &self.nav_mesh, true, None)
    }

    /// A*-paths from `start` to `end` (both Y-up) and string-pulls the
    /// result into a world-space polyline, also Y-up. Returns an empty
    /// `Vec` rather than an error when no path exists, matching the
    /// external interface's "list of 3-vectors or empty" contract; the
    /// underlying failure is logged at `warn` level.
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Vec<Vec3> {
        let key = FindPathKey::new(start, end);
        if let Some(cached) = self.find_path_cache.lock().get(&key) {
            return cached;
        }

        let start_internal = to_internal(start);
        let end_internal = to_internal(end);

        let result = query::find_path(&self.nav_mesh, &self.nav_mesh_settings, start_internal, end_internal, Some(DEFAULT_SEARCH_RADIUS))
            .map_err(PathFailure::Find)
            .and_then(|polygon_path| {
                query::perform_string_pulling_on_path(&self.nav_mesh, start_internal, end_internal, &polygon_path)
                    .map_err(PathFailure::StringPull)
            });

        let points = match result {
            Ok(points) => points.into_iter().map(|(p, _)| to_external(p)).collect(),
            Err(failure) => {
                tracing::warn!(?failure, "find_path failed");
                Vec::new()
            }
        };

        self.find_path_cache.lock().insert(key, points.clone());
        points
    }

    /// Closest point on the navmesh to `point` (Y-up), searching within
    /// [`DEFAULT_SEARCH_RADIUS`] world units.
    pub fn nearest_point(&self, point: Vec3) -> Option<Vec3> {
        let key = NearestPointKey::new(point);
        if let Some(cached) = self.nearest_point_cache.lock().get(&key) {
            return cached;
        }

        let internal = to_internal(point);
        let result = self
            .nav_mesh
            .find_closest_polygon_in_box(&self.nav_mesh_settings, internal, DEFAULT_SEARCH_RADIUS)
            .map(|(_, _, closest)| to_external(closest));

        self.nearest_point_cache.lock().insert(key, result);
        result
    }

    /// Triangle soup of every placed node's collision mesh overlapping the
    /// Y-up box `[min, max]`, as flat `[x, y, z, x, y, z, ...]` triples.
    /// `z_bias` lifts every returned vertex along the external Y-up Z axis,
    /// letting a caller render collision and navigation geometry without
    /// z-fighting when both are drawn at once.
    pub fn collision_mesh(&self, scene: &Scene, collisions: &CollisionFile, min: Vec3, max: Vec3, z_bias: f32) -> Vec<f32> {
        let query_box = BoundingBox::new(to_internal(min), to_internal(max));

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut flat = Vec::new();

        for handle in scene.query(query_box) {
            let Some(node) = scene.get(handle) else { continue };
            let Some(collision) = collisions.get(node.model()) else { continue };

            collision.unpack(&mut vertices, &mut indices, &node.transform(), 0, true);

            for &index in &indices {
                let external = to_external(vertices[index as usize]) + Vec3::new(0.0, z_bias, 0.0);
                flat.extend_from_slice(&[external.x, external.y, external.z]);
            }
        }

        flat
    }

    /// Triangle soup of every built navmesh polygon overlapping the Y-up box
    /// `[min, max]`, as flat `[x, y, z, ...]` triples. `z_bias` lifts every
    /// vertex along the external Y-up Z axis, same as [`collision_mesh`].
    ///
    /// [`collision_mesh`]: WorldNavigation::collision_mesh
    pub fn navigation_mesh(&self, min: Vec3, max: Vec3, z_bias: f32) -> Vec<f32> {
        let query_box = BoundingBox::new(to_internal(min), to_internal(max));

        let mut flat = Vec::new();
        for tile in self.nav_mesh.tiles.values() {
            for polygon in &tile.polygons {
                if polygon.indices.len() < 3 {
                    continue;
                }
                let points: Vec<Vec3> = polygon.indices.iter().map(|&i| tile.vertices[i as usize]).collect();
                if !points.iter().any(|&p| query_box.contains_point(p) == crate::math::Intersection::Inside) {
                    continue;
                }

                let a = points[0];
                for i in 1..points.len() - 1 {
                    for vertex in [a, points[i], points[i + 1]] {
                        let external = to_external(vertex) + Vec3::new(0.0, z_bias, 0.0);
                        flat.extend_from_slice(&[external.x, external.y, external.z]);
                    }
                }
            }
        }

        flat
    }

    /// `model_id` of every node in `scene` whose world bounds overlap the
    /// Y-up box `[min, max]`.
    pub fn scan_world(&self, scene: &Scene, min: Vec3, max: Vec3) -> Vec<u32> {
        let query_box = BoundingBox::new(to_internal(min), to_internal(max));
        scene
            .query(query_box)
            .into_iter()
            .filter_map(|handle| scene.get(handle).map(|node| node.model_id()))
            .collect()
    }
}

#[derive(Debug)]
enum PathFailure {
    Find(FindPathError),
    StringPull(StringPullingError),
}

/// `NonZeroUsize` import is only used by downstream callers sizing
/// `BuildConfig::worker_count`; kept re-exported so a caller doesn't need a
/// separate `std::num` import just to construct one.
pub use std::num::NonZeroUsize as WorkerCount;
#[allow(unused_imports)]
use NonZeroUsize as _;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{Collision, CollisionBounds, Face};
    use crate::math::PackedVertex;
    use glam::Quat;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0)
            .with_tile_width(std::num::NonZeroU16::new(16).unwrap())
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

    fn built_world() -> (WorldNavigation, Scene, CollisionFile) {
        let mut scene = Scene::new();
        let mut collisions = CollisionFile::new();
        collisions.insert_direct(flat_platform("platform"));
        scene.add_node(&collisions, 42, "platform", Vec3::ZERO, Quat::IDENTITY, -1, 0).unwrap();

        let mut world = WorldNavigation::new(settings(), Vec::new(), BuildConfig {
            scratch_dir: std::env::temp_dir().join("worldassistant_navmesh_embed_test"),
            worker_count: Some(2),
            max_tiles: 64,
            result_cache_capacity: 4,
        })
        .unwrap();

        world.build(&scene, &collisions).unwrap();
        (world, scene, collisions)
    }

    #[test]
    fn empty_world_reports_no_state_and_empty_queries() {
        let world = WorldNavigation::new(settings(), Vec::new(), BuildConfig::default()).unwrap();
        assert!(!world.state());
        assert!(world.find_path(Vec3::ZERO, Vec3::ONE).is_empty());
        assert!(world.nearest_point(Vec3::ZERO).is_none());
    }

    #[test]
    fn build_populates_state_and_find_path_is_cached() {
        let (world, _scene, _collisions) = built_world();
        assert!(world.state());

        let a = world.find_path(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0));
        let b = world.find_path(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0));
        assert_eq!(a, b);
    }

    #[test]
    fn save_before_any_build_fails() {
        let world = WorldNavigation::new(settings(), Vec::new(), BuildConfig::default()).unwrap();
        let path = std::env::temp_dir().join("worldassistant_navmesh_embed_test_unbuilt.bin");
        assert!(world.save(&path).is_err());
    }

    #[test]
    fn build_tiles_before_any_build_fails() {
        let mut world = WorldNavigation::new(settings(), Vec::new(), BuildConfig::default()).unwrap();
        let scene = Scene::new();
        let collisions = CollisionFile::new();
        assert!(world.build_tiles(&scene, &collisions, &[UVec2::new(0, 0)]).is_err());
    }

    #[test]
    fn save_then_load_roundtrips_find_path_output() {
        let (mut world, _scene, _collisions) = built_world();
        let path = std::env::temp_dir().join("worldassistant_navmesh_embed_test_roundtrip.bin");
        world.save(&path).unwrap();

        let before = world.find_path(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0));

        let mut reloaded = WorldNavigation::new(settings(), Vec::new(), BuildConfig::default()).unwrap();
        reloaded.load(&path).unwrap();
        let after = reloaded.find_path(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0));

        assert_eq!(before, after);
    }

    #[test]
    fn scan_world_finds_the_placed_node() {
        let (world, scene, _collisions) = built_world();
        let found = world.scan_world(&scene, Vec3::splat(-20.0), Vec3::splat(20.0));
        assert_eq!(found, vec![42]);
    }
}
