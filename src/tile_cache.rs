//! Compressed layered tile cache (C8): stores a tile's built layers as
//! LZ4-compressed blobs keyed by tile coordinate and layer index, carves
//! dynamic obstacles into those layers on `update()`, tracks off-mesh
//! connections, and installs the merged result into the query-time
//! [`NavMeshTiles`]. Grounded on `original_source/navigation/
//! DynamicNavigationMesh.{h,cpp}` for the operation set (`AddTile`/
//! `RemoveTile`/`AddObstacle`/`ObstacleChanged`/`RemoveObstacle`/
//! `CollectOffMeshConnections`) and on `qet8766-FastPATH`'s `cache.rs` for
//! the `DashMap` + `parking_lot` concurrency idiom this crate otherwise has
//! no teacher analogue for.

use std::collections::VecDeque;

use dashmap::DashMap;
use glam::{UVec2, UVec3, Vec2, Vec3};
use parking_lot::Mutex;

use crate::build::BuiltLayer;
use crate::error::{StreamError, TileCacheError};
use crate::layers::MAX_LAYERS;
use crate::math::BoundingBox;
use crate::mesher::{EdgeConnection, EdgeConnectionDirection, PolyMesh, VERTICES_IN_TRIANGLE};
use crate::stream::{InputMemoryStream, OutputMemoryStream, ReadExt, WriteExt};
use crate::tiles::NavMeshTiles;
use crate::{Area, NavMeshSettings};

/// Queued add/remove obstacle requests, processed one `step` at a time by
/// `update()`. Bounded so one misbehaving caller can't grow the queue
/// unboundedly; callers must spin `update(1, ...)` between
/// `add_obstacle`/`remove_obstacle` calls once `is_obstacle_queue_full`
/// reports true, mirroring the original's fixed-size request ring.
const MAX_PENDING_REQUESTS: usize = 64;

/// Fallback search radius `build_nav_mesh_tile` resolves an off-mesh
/// connection's endpoints within, when the connection's own `radius` is too
/// small to reliably land on a just-built polygon's surface.
const OFF_MESH_RESOLVE_RADIUS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LayerKey {
    tile: UVec2,
    layer: u8,
}

struct CompressedLayer {
    compressed: Vec<u8>,
    min_height: u32,
    max_height: u32,
}

/// Stable handle to a tracked obstacle. `add_obstacle` returns `None`
/// instead of handing back a sentinel zero handle when the request queue is
/// full — see the Open Question decision recorded in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObstacleRef {
    index: u32,
    generation: u32,
}

/// The two obstacle primitives the original engine's `dtTileCache` supports;
/// oriented boxes are intentionally not modeled.
#[derive(Debug, Clone, Copy)]
pub enum ObstacleShape {
    Cylinder { radius: f32, height: f32 },
    Box { half_extents: Vec3 },
}

#[derive(Debug, Clone, Copy)]
pub struct Obstacle {
    pub position: Vec3,
    pub shape: ObstacleShape,
}

impl Obstacle {
    fn bounds(&self) -> BoundingBox {
        match self.shape {
            ObstacleShape::Cylinder { radius, height } => BoundingBox::new(
                self.position - Vec3::new(radius, 0.0, radius),
                self.position + Vec3::new(radius, height, radius),
            ),
            ObstacleShape::Box { half_extents } => {
                BoundingBox::new(self.position - half_extents, self.position + half_extents)
            }
        }
    }

    fn contains(&self, point: Vec3) -> bool {
        match self.shape {
            ObstacleShape::Cylinder { radius, height } => {
                let dx = point.x - self.position.x;
                let dz = point.z - self.position.z;
                point.y >= self.position.y
                    && point.y <= self.position.y + height
                    && dx * dx + dz * dz <= radius * radius
            }
            ObstacleShape::Box { half_extents } => {
                (point - self.position).abs().cmple(half_extents).all()
            }
        }
    }
}

struct ObstacleSlot {
    generation: u32,
    obstacle: Option<Obstacle>,
}

enum ObstacleRequestKind {
    Add(Obstacle),
    Remove,
}

struct ObstacleRequest {
    kind: ObstacleRequestKind,
    slot_index: u32,
    generation: u32,
}

/// A teleport-like connection between two points. `build_nav_mesh_tile`
/// resolves each endpoint to its nearest polygon and splices a
/// [`crate::tiles::Link::OffMesh`] edge into the navmesh's link graph once
/// both sides have a built tile, so `crate::query::find_path`'s A* can
/// traverse it like any other polygon edge.
#[derive(Debug, Clone, Copy)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub bidirectional: bool,
    pub area: Area,
    pub flags: u16,
}

pub struct TileCache {
    layers: DashMap<LayerKey, CompressedLayer>,
    obstacles: Mutex<ObstacleTable>,
    pending: Mutex<VecDeque<ObstacleRequest>>,
    off_mesh_connections: Mutex<Vec<OffMeshConnection>>,
    max_tiles: u32,
}

#[derive(Default)]
struct ObstacleTable {
    slots: Vec<ObstacleSlot>,
    free: Vec<u32>,
}

impl TileCache {
    pub fn new(max_tiles: u32) -> Self {
        Self {
            layers: DashMap::new(),
            obstacles: Mutex::new(ObstacleTable::default()),
            pending: Mutex::new(VecDeque::new()),
            off_mesh_connections: Mutex::new(Vec::new()),
            max_tiles,
        }
    }

    /// Number of distinct tile coordinates currently holding at least one layer.
    pub fn tile_count(&self) -> usize {
        let mut coords: Vec<UVec2> = self.layers.iter().map(|entry| entry.key().tile).collect();
        coords.sort_unstable_by_key(|c| (c.x, c.y));
        coords.dedup();
        coords.len()
    }

    pub fn layer_count_at(&self, tile_coord: UVec2) -> usize {
        self.layers.iter().filter(|entry| entry.key().tile == tile_coord).count()
    }

    /// Replaces every layer at `tile_coord` with `built`, compressing each.
    /// A tile with no layers (an empty `built`) is removed outright.
    pub fn set_tile_layers(&self, tile_coord: UVec2, built: Vec<BuiltLayer>) -> Result<(), TileCacheError> {
        let existing_here = self.layer_count_at(tile_coord);
        if existing_here == 0 && !built.is_empty() && self.tile_count() as u32 >= self.max_tiles {
            return Err(TileCacheError::CacheFull { max_tiles: self.max_tiles });
        }
        if built.len() > MAX_LAYERS {
            return Err(TileCacheError::LayerLimitExceeded {
                tx: tile_coord.x as i32,
                ty: tile_coord.y as i32,
            });
        }

        self.remove_tile(tile_coord);

        for (layer_index, built_layer) in built.into_iter().enumerate() {
            let compressed = compress_layer(&built_layer.poly_mesh, built_layer.detail_mesh.as_ref())
                .map_err(|source| TileCacheError::Decompression { reason: source.to_string() })?;
            self.layers.insert(
                LayerKey { tile: tile_coord, layer: layer_index as u8 },
                CompressedLayer {
                    compressed,
                    min_height: built_layer.min_height,
                    max_height: built_layer.max_height,
                },
            );
        }

        Ok(())
    }

    /// Drops every layer at `tile_coord`. Returns how many were removed.
    pub fn remove_tile(&self, tile_coord: UVec2) -> usize {
        let keys: Vec<LayerKey> = self
            .layers
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| key.tile == tile_coord)
            .collect();
        for key in &keys {
            self.layers.remove(key);
        }
        keys.len()
    }

    fn decode_tile_layers(&self, tile_coord: UVec2) -> Result<Vec<(PolyMesh, Option<PolyMesh>)>, TileCacheError> {
        let mut layer_indices: Vec<u8> = self
            .layers
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| key.tile == tile_coord)
            .map(|key| key.layer)
            .collect();
        layer_indices.sort_unstable();

        layer_indices
            .into_iter()
            .map(|layer| {
                let entry = self
                    .layers
                    .get(&LayerKey { tile: tile_coord, layer })
                    .ok_or(TileCacheError::TileNotFound {
                        tx: tile_coord.x as i32,
                        ty: tile_coord.y as i32,
                        layer,
                    })?;
                decompress_layer(&entry.compressed)
            })
            .collect()
    }

    /// Merges every layer at `tile_coord` into a single polygon mesh and
    /// installs it into `nav_mesh`, replacing whatever was there before. A
    /// tile with no cached layers is removed from `nav_mesh` instead. Also
    /// resolves (or re-resolves) every off-mesh connection whose AABB
    /// overlaps this tile against the now-current polygon set — see
    /// [`NavMeshTiles::connect_off_mesh_connection`].
    pub fn build_nav_mesh_tile(
        &self,
        tile_coord: UVec2,
        nav_mesh_settings: &NavMeshSettings,
        nav_mesh: &mut NavMeshTiles,
    ) -> Result<bool, TileCacheError> {
        let decoded = self.decode_tile_layers(tile_coord)?;
        if decoded.is_empty() {
            nav_mesh.remove_tile(tile_coord);
            return Ok(false);
        }

        let merged = merge_poly_meshes(decoded.iter().map(|(mesh, _)| mesh));
        nav_mesh.add_tile(tile_coord, &merged, nav_mesh_settings);

        let tile_bounds = nav_mesh_settings.get_tile_bounding_box(tile_coord);
        for connection in self.off_mesh_connections_in(tile_bounds) {
            let search_radius = connection.radius.max(OFF_MESH_RESOLVE_RADIUS);
            nav_mesh.connect_off_mesh_connection(
                nav_mesh_settings,
                connection.start,
                connection.end,
                connection.bidirectional,
                search_radius,
            );
        }

        Ok(true)
    }

    /// Merges every layer's detail mesh at `tile_coord`, for callers that
    /// want height-corrected geometry to render or sample rather than to
    /// query paths against.
    pub fn build_detail_mesh(&self, tile_coord: UVec2) -> Result<Option<PolyMesh>, TileCacheError> {
        let decoded = self.decode_tile_layers(tile_coord)?;
        let details: Vec<&PolyMesh> = decoded.iter().filter_map(|(_, detail)| detail.as_ref()).collect();
        if details.is_empty() {
            return Ok(None);
        }
        Ok(Some(merge_poly_meshes(details.into_iter())))
    }

    pub fn is_obstacle_queue_full(&self) -> bool {
        self.pending.lock().len() >= MAX_PENDING_REQUESTS
    }

    /// Queues an obstacle addition. Returns `None` (rather than a sentinel
    /// handle) when the pending-request queue is already full; the caller
    /// should call `update()` to drain it and retry.
    pub fn add_obstacle(&self, obstacle: Obstacle) -> Option<ObstacleRef> {
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_PENDING_REQUESTS {
            return None;
        }

        let mut table = self.obstacles.lock();
        let (index, generation) = if let Some(index) = table.free.pop() {
            let slot = &mut table.slots[index as usize];
            slot.generation += 1;
            slot.obstacle = None; // populated once the request is processed
            (index, slot.generation)
        } else {
            let index = table.slots.len() as u32;
            table.slots.push(ObstacleSlot { generation: 0, obstacle: None });
            (index, 0)
        };

        pending.push_back(ObstacleRequest {
            kind: ObstacleRequestKind::Add(obstacle),
            slot_index: index,
            generation,
        });

        Some(ObstacleRef { index, generation })
    }

    /// Queues removal of a previously added obstacle. Returns `false`
    /// without queuing if the queue is full or the handle is stale.
    pub fn remove_obstacle(&self, obstacle_ref: ObstacleRef) -> bool {
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_PENDING_REQUESTS {
            return false;
        }

        let table = self.obstacles.lock();
        let Some(slot) = table.slots.get(obstacle_ref.index as usize) else {
            return false;
        };
        if slot.generation != obstacle_ref.generation {
            return false;
        }
        drop(table);

        pending.push_back(ObstacleRequest {
            kind: ObstacleRequestKind::Remove,
            slot_index: obstacle_ref.index,
            generation: obstacle_ref.generation,
        });
        true
    }

    /// Processes at most `step` pending obstacle requests (one `pop_front()`
    /// per step), carving additions into (and restoring removals out of)
    /// every layer whose tile footprint overlaps the obstacle, then
    /// reinstalls the affected tiles into `nav_mesh`. Returns the set of
    /// tile coordinates touched. A caller adding many obstacles is expected
    /// to spin `update(1, ...)` while `is_obstacle_queue_full()` rather than
    /// rely on one call to drain an arbitrarily large queue.
    pub fn update(
        &self,
        step: usize,
        nav_mesh_settings: &NavMeshSettings,
        nav_mesh: &mut NavMeshTiles,
    ) -> Result<Vec<UVec2>, TileCacheError> {
        let mut touched_tiles: Vec<UVec2> = Vec::new();

        for _ in 0..step {
            let request = self.pending.lock().pop_front();
            let Some(request) = request else { break };

            let mut table = self.obstacles.lock();
            let Some(slot) = table.slots.get_mut(request.slot_index as usize) else {
                continue;
            };
            if slot.generation != request.generation {
                continue;
            }

            match request.kind {
                ObstacleRequestKind::Add(obstacle) => {
                    slot.obstacle = Some(obstacle);
                    drop(table);
                    self.carve_obstacle(&obstacle, true, nav_mesh_settings, &mut touched_tiles)?;
                }
                ObstacleRequestKind::Remove => {
                    let obstacle = slot.obstacle.take();
                    table.free.push(request.slot_index);
                    drop(table);
                    if let Some(obstacle) = obstacle {
                        self.carve_obstacle(&obstacle, false, nav_mesh_settings, &mut touched_tiles)?;
                    }
                }
            }
        }

        touched_tiles.sort_unstable_by_key(|c| (c.x, c.y));
        touched_tiles.dedup();

        for &tile_coord in &touched_tiles {
            self.build_nav_mesh_tile(tile_coord, nav_mesh_settings, nav_mesh)?;
        }

        Ok(touched_tiles)
    }

    /// `carving` selects whether overlapping polygons are removed (an
    /// obstacle appearing) or nothing is restored (an obstacle
    /// disappearing) — restoring carved geometry would need the
    /// pre-obstacle mesh retained per layer, which this cache doesn't keep;
    /// removing an obstacle here only stops future carves from reapplying
    /// it. A full rebuild of the tile from source geometry (`build::build_tile`)
    /// is the correct way to truly restore what an obstacle removed.
    fn carve_obstacle(
        &self,
        obstacle: &Obstacle,
        carving: bool,
        nav_mesh_settings: &NavMeshSettings,
        touched_tiles: &mut Vec<UVec2>,
    ) -> Result<(), TileCacheError> {
        if !carving {
            return Ok(());
        }

        let bounds = obstacle.bounds();
        let min_tile = nav_mesh_settings.get_tile_containing_position(Vec2::new(bounds.min.x, bounds.min.z));
        let max_tile = nav_mesh_settings.get_tile_containing_position(Vec2::new(bounds.max.x, bounds.max.z));

        for tz in min_tile.y..=max_tile.y {
            for tx in min_tile.x..=max_tile.x {
                let tile_coord = UVec2::new(tx, tz);
                if self.layer_count_at(tile_coord) == 0 {
                    continue;
                }

                let mut layer_indices: Vec<u8> = self
                    .layers
                    .iter()
                    .map(|entry| *entry.key())
                    .filter(|key| key.tile == tile_coord)
                    .map(|key| key.layer)
                    .collect();
                layer_indices.sort_unstable();

                for layer in layer_indices {
                    let key = LayerKey { tile: tile_coord, layer };
                    let Some(entry) = self.layers.get(&key) else { continue };
                    let (min_height, max_height) = (entry.min_height, entry.max_height);
                    let (poly_mesh, detail_mesh) = decompress_layer(&entry.compressed)?;
                    drop(entry);

                    let carved = remove_polygons_overlapping(&poly_mesh, tile_coord, nav_mesh_settings, obstacle);
                    if carved.polygons.len() == poly_mesh.polygons.len() {
                        continue; // obstacle didn't actually touch this layer
                    }

                    let compressed = compress_layer(&carved, detail_mesh.as_ref())
                        .map_err(|source| TileCacheError::Decompression { reason: source.to_string() })?;
                    self.layers.insert(key, CompressedLayer { compressed, min_height, max_height });
                    touched_tiles.push(tile_coord);
                }
            }
        }

        Ok(())
    }

    /// Installs pre-compressed layer payloads directly, skipping the
    /// compression step `set_tile_layers` would otherwise redo. Used by the
    /// parallel build orchestrator to replay scratch-staged tiles without
    /// re-encoding bytes a worker thread already compressed.
    pub(crate) fn install_compressed_layers(
        &self,
        tile_coord: UVec2,
        layers: Vec<(Vec<u8>, u32, u32)>,
    ) -> Result<(), TileCacheError> {
        let existing_here = self.layer_count_at(tile_coord);
        if existing_here == 0 && !layers.is_empty() && self.tile_count() as u32 >= self.max_tiles {
            return Err(TileCacheError::CacheFull { max_tiles: self.max_tiles });
        }
        if layers.len() > MAX_LAYERS {
            return Err(TileCacheError::LayerLimitExceeded {
                tx: tile_coord.x as i32,
                ty: tile_coord.y as i32,
            });
        }

        self.remove_tile(tile_coord);

        for (layer_index, (compressed, min_height, max_height)) in layers.into_iter().enumerate() {
            self.layers.insert(
                LayerKey { tile: tile_coord, layer: layer_index as u8 },
                CompressedLayer { compressed, min_height, max_height },
            );
        }

        Ok(())
    }

    /// Every stored layer's raw compressed bytes and metadata, in
    /// `(tx, ty, layer)` order. Used by [`crate::persist`] to write the
    /// tile-cache file without decompressing and recompressing each tile.
    pub(crate) fn all_compressed_layers_sorted(&self) -> Vec<(UVec2, u8, u32, u32, Vec<u8>)> {
        let mut out: Vec<(UVec2, u8, u32, u32, Vec<u8>)> = self
            .layers
            .iter()
            .map(|entry| {
                let key = *entry.key();
                (key.tile, key.layer, entry.min_height, entry.max_height, entry.compressed.clone())
            })
            .collect();
        out.sort_unstable_by_key(|(tile, layer, ..)| (tile.x, tile.y, *layer));
        out
    }

    pub fn add_off_mesh_connection(&self, connection: OffMeshConnection) {
        self.off_mesh_connections.lock().push(connection);
    }

    pub fn off_mesh_connections_in(&self, bounds: BoundingBox) -> Vec<OffMeshConnection> {
        self.off_mesh_connections
            .lock()
            .iter()
            .filter(|connection| {
                bounds.contains_point(connection.start) == crate::math::Intersection::Inside
                    || bounds.contains_point(connection.end) == crate::math::Intersection::Inside
            })
            .copied()
            .collect()
    }
}

fn cell_to_world(position: UVec3, tile_coord: UVec2, nav_mesh_settings: &NavMeshSettings) -> Vec3 {
    let origin = nav_mesh_settings.get_tile_origin_with_border(tile_coord);
    Vec3::new(
        origin.x + position.x as f32 * nav_mesh_settings.cell_width,
        nav_mesh_settings.world_bottom_bound + position.y as f32 * nav_mesh_settings.cell_height,
        origin.y + position.z as f32 * nav_mesh_settings.cell_width,
    )
}

/// Drops every polygon whose centroid falls inside `obstacle`, reindexing
/// the surviving vertices/polygons and dropping any edge that pointed at a
/// removed polygon (coarser than the original's boundary-contour
/// recompute, but an honest stand-in given this cache doesn't retain the
/// uncompressed heightfield needed to re-run full region/contour rebuild
/// per obstacle).
fn remove_polygons_overlapping(
    mesh: &PolyMesh,
    tile_coord: UVec2,
    nav_mesh_settings: &NavMeshSettings,
    obstacle: &Obstacle,
) -> PolyMesh {
    let keep: Vec<bool> = mesh
        .polygons
        .iter()
        .map(|polygon| {
            let centroid_cell = polygon
                .iter()
                .fold(glam::Vec3::ZERO, |sum, &index| sum + mesh.vertices[index as usize].as_vec3())
                / polygon.len() as f32;
            let centroid_world = cell_to_world(centroid_cell.as_uvec3(), tile_coord, nav_mesh_settings);
            !obstacle.contains(centroid_world)
        })
        .collect();

    if keep.iter().all(|&k| k) {
        return clone_poly_mesh(mesh);
    }

    let mut old_to_new_poly = vec![None; mesh.polygons.len()];
    let mut next_poly_index = 0u16;
    for (index, &keep) in keep.iter().enumerate() {
        if keep {
            old_to_new_poly[index] = Some(next_poly_index);
            next_poly_index += 1;
        }
    }

    let mut out = PolyMesh::default();
    let mut vertex_remap: Vec<Option<u32>> = vec![None; mesh.vertices.len()];

    for (poly_index, polygon) in mesh.polygons.iter().enumerate() {
        if !keep[poly_index] {
            continue;
        }

        let mut new_indices = [0u32; VERTICES_IN_TRIANGLE];
        for (slot, &vertex_index) in polygon.iter().enumerate() {
            let new_index = match vertex_remap[vertex_index as usize] {
                Some(existing) => existing,
                None => {
                    let new_index = out.vertices.len() as u32;
                    out.vertices.push(mesh.vertices[vertex_index as usize]);
                    vertex_remap[vertex_index as usize] = Some(new_index);
                    new_index
                }
            };
            new_indices[slot] = new_index;
        }
        out.polygons.push(new_indices);
        out.areas.push(mesh.areas.get(poly_index).copied().unwrap_or_default());
        out.regions.push(mesh.regions.get(poly_index).copied().unwrap_or(0));

        let mut new_edges = [EdgeConnection::None; VERTICES_IN_TRIANGLE];
        if let Some(edges) = mesh.edges.get(poly_index) {
            for (slot, edge) in edges.iter().enumerate() {
                new_edges[slot] = match edge {
                    EdgeConnection::Internal(neighbour) => old_to_new_poly
                        .get(*neighbour as usize)
                        .copied()
                        .flatten()
                        .map(EdgeConnection::Internal)
                        .unwrap_or(EdgeConnection::None),
                    other => *other,
                };
            }
        }
        out.edges.push(new_edges);
    }

    out
}

/// Combines several layers' polygon meshes into one, offsetting vertex and
/// internal-edge indices per source mesh. Used both to install a multi-layer
/// tile into [`NavMeshTiles`] (which has no layer dimension of its own) and
/// to combine detail meshes for external consumption.
fn merge_poly_meshes<'a>(meshes: impl Iterator<Item = &'a PolyMesh>) -> PolyMesh {
    let mut out = PolyMesh::default();

    for mesh in meshes {
        let vertex_offset = out.vertices.len() as u32;
        let poly_offset = out.polygons.len() as u16;

        out.vertices.extend_from_slice(&mesh.vertices);
        out.areas.extend_from_slice(&mesh.areas);
        out.regions.extend_from_slice(&mesh.regions);

        for polygon in &mesh.polygons {
            let mut offset_polygon = [0u32; VERTICES_IN_TRIANGLE];
            for (slot, &index) in polygon.iter().enumerate() {
                offset_polygon[slot] = index + vertex_offset;
            }
            out.polygons.push(offset_polygon);
        }

        for edges in mesh.edges.iter() {
            let mut offset_edges = [EdgeConnection::None; VERTICES_IN_TRIANGLE];
            for (slot, edge) in edges.iter().enumerate() {
                offset_edges[slot] = match edge {
                    EdgeConnection::Internal(neighbour) => EdgeConnection::Internal(neighbour + poly_offset),
                    other => *other,
                };
            }
            out.edges.push(offset_edges);
        }
        // `edges` may be shorter than `polygons` (detail meshes never
        // populate it); pad so indices stay aligned across merged layers.
        while out.edges.len() < out.polygons.len() {
            out.edges.push([EdgeConnection::None; VERTICES_IN_TRIANGLE]);
        }
    }

    out
}

fn encode_edge<W: crate::stream::WriteCursor>(edge: EdgeConnection, out: &mut W) -> Result<(), StreamError> {
    match edge {
        EdgeConnection::None => out.write_u8(0),
        EdgeConnection::Internal(neighbour) => {
            out.write_u8(1)?;
            out.write_u16(neighbour)
        }
        EdgeConnection::External(direction) => {
            out.write_u8(2)?;
            let index = EdgeConnectionDirection::ALL.iter().position(|d| *d == direction).unwrap_or(0);
            out.write_u8(index as u8)
        }
    }
}

fn decode_edge<R: crate::stream::ReadCursor>(input: &mut R) -> Result<EdgeConnection, StreamError> {
    Ok(match input.read_u8()? {
        1 => EdgeConnection::Internal(input.read_u16()?),
        2 => EdgeConnection::External(EdgeConnectionDirection::ALL[input.read_u8()? as usize % 4]),
        _ => EdgeConnection::None,
    })
}

fn encode_poly_mesh<W: crate::stream::WriteCursor>(mesh: &PolyMesh, out: &mut W) -> Result<(), StreamError> {
    out.write_u32(mesh.vertices.len() as u32)?;
    for vertex in &mesh.vertices {
        out.write_u32(vertex.x)?;
        out.write_u32(vertex.y)?;
        out.write_u32(vertex.z)?;
    }

    out.write_u32(mesh.polygons.len() as u32)?;
    for (poly_index, polygon) in mesh.polygons.iter().enumerate() {
        for &vertex_index in polygon {
            out.write_u32(vertex_index)?;
        }
        let edges = mesh.edges.get(poly_index);
        for slot in 0..VERTICES_IN_TRIANGLE {
            let edge = edges.map(|e| e[slot]).unwrap_or(EdgeConnection::None);
            encode_edge(edge, out)?;
        }
        out.write_u16(mesh.areas.get(poly_index).map(|a| a.0).unwrap_or(0))?;
        out.write_u16(mesh.regions.get(poly_index).copied().unwrap_or(0))?;
    }
    Ok(())
}

fn decode_poly_mesh<R: crate::stream::ReadCursor>(input: &mut R) -> Result<PolyMesh, StreamError> {
    let vertex_count = input.read_u32()? as usize;
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        vertices.push(UVec3::new(input.read_u32()?, input.read_u32()?, input.read_u32()?));
    }

    let polygon_count = input.read_u32()? as usize;
    let mut polygons = Vec::with_capacity(polygon_count);
    let mut edges = Vec::with_capacity(polygon_count);
    let mut areas = Vec::with_capacity(polygon_count);
    let mut regions = Vec::with_capacity(polygon_count);

    for _ in 0..polygon_count {
        let mut polygon = [0u32; VERTICES_IN_TRIANGLE];
        for slot in polygon.iter_mut() {
            *slot = input.read_u32()?;
        }
        polygons.push(polygon);

        let mut poly_edges = [EdgeConnection::None; VERTICES_IN_TRIANGLE];
        for slot in poly_edges.iter_mut() {
            *slot = decode_edge(input)?;
        }
        edges.push(poly_edges);

        areas.push(Area(input.read_u16()?));
        regions.push(input.read_u16()?);
    }

    Ok(PolyMesh { vertices, polygons, edges, areas, regions })
}

pub(crate) fn compress_layer(poly_mesh: &PolyMesh, detail_mesh: Option<&PolyMesh>) -> Result<Vec<u8>, StreamError> {
    let mut buffer = OutputMemoryStream::new();
    encode_poly_mesh(poly_mesh, &mut buffer)?;
    match detail_mesh {
        Some(detail) => {
            buffer.write_u8(1)?;
            encode_poly_mesh(detail, &mut buffer)?;
        }
        None => buffer.write_u8(0)?,
    }
    Ok(lz4_flex::compress_prepend_size(buffer.as_slice()))
}

fn decompress_layer(compressed: &[u8]) -> Result<(PolyMesh, Option<PolyMesh>), TileCacheError> {
    let to_cache_error = |reason: String| TileCacheError::Decompression { reason };

    let raw = lz4_flex::decompress_size_prepended(compressed).map_err(|source| to_cache_error(source.to_string()))?;
    let mut input = InputMemoryStream::new(&raw);
    let poly_mesh = decode_poly_mesh(&mut input).map_err(|source| to_cache_error(source.to_string()))?;
    let detail_mesh = if input.read_u8().map_err(|source| to_cache_error(source.to_string()))? == 1 {
        Some(decode_poly_mesh(&mut input).map_err(|source| to_cache_error(source.to_string()))?)
    } else {
        None
    };
    Ok((poly_mesh, detail_mesh))
}

/// Cheap clone helper kept local to this module: `PolyMesh` intentionally
/// doesn't derive `Clone` crate-wide (the build pipeline never needs to
/// duplicate one), but the obstacle-carve fast path needs a no-op copy when
/// an obstacle doesn't actually touch a layer.
fn clone_poly_mesh(mesh: &PolyMesh) -> PolyMesh {
    PolyMesh {
        vertices: mesh.vertices.clone(),
        polygons: mesh.polygons.clone(),
        edges: mesh.edges.clone(),
        areas: mesh.areas.clone(),
        regions: mesh.regions.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU16;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, -10.0).with_tile_width(NonZeroU16::new(16).unwrap())
    }

    fn sample_mesh() -> PolyMesh {
        PolyMesh {
            vertices: vec![UVec3::new(0, 0, 0), UVec3::new(4, 0, 0), UVec3::new(0, 0, 4), UVec3::new(4, 0, 4)],
            polygons: vec![[0, 1, 2], [1, 3, 2]],
            edges: vec![
                [EdgeConnection::Internal(1), EdgeConnection::None, EdgeConnection::None],
                [EdgeConnection::None, EdgeConnection::None, EdgeConnection::Internal(0)],
            ],
            areas: vec![Area(0), Area(0)],
            regions: vec![1, 1],
        }
    }

    #[test]
    fn compress_and_decompress_roundtrips() {
        let mesh = sample_mesh();
        let compressed = compress_layer(&mesh, None).unwrap();
        let (decoded, detail) = decompress_layer(&compressed).unwrap();
        assert!(detail.is_none());
        assert_eq!(decoded.vertices, mesh.vertices);
        assert_eq!(decoded.polygons, mesh.polygons);
    }

    #[test]
    fn set_tile_layers_then_build_installs_into_nav_mesh() {
        let cache = TileCache::new(16);
        let settings = settings();
        let built = vec![BuiltLayer {
            poly_mesh: sample_mesh(),
            detail_mesh: None,
            min_height: 0,
            max_height: 4,
        }];

        cache.set_tile_layers(UVec2::new(0, 0), built).unwrap();
        assert_eq!(cache.tile_count(), 1);

        let mut nav_mesh = NavMeshTiles::new();
        let installed = cache.build_nav_mesh_tile(UVec2::new(0, 0), &settings, &mut nav_mesh).unwrap();
        assert!(installed);
        assert_eq!(nav_mesh.tile_count(), 1);
    }

    #[test]
    fn removing_all_layers_removes_the_tile_from_the_nav_mesh() {
        let cache = TileCache::new(16);
        let settings = settings();
        let built = vec![BuiltLayer { poly_mesh: sample_mesh(), detail_mesh: None, min_height: 0, max_height: 4 }];
        cache.set_tile_layers(UVec2::new(0, 0), built).unwrap();

        let mut nav_mesh = NavMeshTiles::new();
        cache.build_nav_mesh_tile(UVec2::new(0, 0), &settings, &mut nav_mesh).unwrap();

        cache.remove_tile(UVec2::new(0, 0));
        let installed = cache.build_nav_mesh_tile(UVec2::new(0, 0), &settings, &mut nav_mesh).unwrap();
        assert!(!installed);
        assert_eq!(nav_mesh.tile_count(), 0);
    }

    #[test]
    fn obstacle_queue_reports_full_past_the_bound() {
        let cache = TileCache::new(16);
        let mut refs = Vec::new();
        for _ in 0..MAX_PENDING_REQUESTS {
            refs.push(cache.add_obstacle(Obstacle {
                position: Vec3::ZERO,
                shape: ObstacleShape::Cylinder { radius: 1.0, height: 2.0 },
            }));
        }
        assert!(refs.iter().all(Option::is_some));
        assert!(cache.is_obstacle_queue_full());
        assert!(cache
            .add_obstacle(Obstacle { position: Vec3::ZERO, shape: ObstacleShape::Cylinder { radius: 1.0, height: 2.0 } })
            .is_none());
    }

    #[test]
    fn update_processes_at_most_step_requests() {
        let cache = TileCache::new(16);
        let settings = settings();
        let built = vec![BuiltLayer { poly_mesh: sample_mesh(), detail_mesh: None, min_height: 0, max_height: 4 }];
        cache.set_tile_layers(UVec2::new(0, 0), built).unwrap();

        cache.add_obstacle(Obstacle {
            position: Vec3::new(1000.0, 0.0, 1000.0),
            shape: ObstacleShape::Cylinder { radius: 1.0, height: 2.0 },
        });
        cache.add_obstacle(Obstacle {
            position: Vec3::new(2000.0, 0.0, 2000.0),
            shape: ObstacleShape::Cylinder { radius: 1.0, height: 2.0 },
        });
        assert_eq!(cache.pending.lock().len(), 2);

        let mut nav_mesh = NavMeshTiles::new();
        let touched = cache.update(1, &settings, &mut nav_mesh).unwrap();
        assert!(touched.is_empty());
        assert_eq!(cache.pending.lock().len(), 1, "a single step must only drain one request");

        cache.update(1, &settings, &mut nav_mesh).unwrap();
        assert_eq!(cache.pending.lock().len(), 0);
    }

    #[test]
    fn build_nav_mesh_tile_splices_off_mesh_connection_once_both_sides_exist() {
        let cache = TileCache::new(16);
        let settings = settings();

        let tile_a = UVec2::new(0, 0);
        let tile_b = UVec2::new(3, 3);
        let built = || vec![BuiltLayer { poly_mesh: sample_mesh(), detail_mesh: None, min_height: 0, max_height: 4 }];
        cache.set_tile_layers(tile_a, built()).unwrap();
        cache.set_tile_layers(tile_b, built()).unwrap();

        let origin_a = settings.get_tile_origin(tile_a);
        let origin_b = settings.get_tile_origin(tile_b);
        let start = Vec3::new(origin_a.x, 0.0, origin_a.y);
        let end = Vec3::new(origin_b.x, 0.0, origin_b.y);
        cache.add_off_mesh_connection(OffMeshConnection {
            start,
            end,
            radius: 0.5,
            bidirectional: true,
            area: Area(0),
            flags: 0,
        });

        let mut nav_mesh = NavMeshTiles::new();
        cache.build_nav_mesh_tile(tile_a, &settings, &mut nav_mesh).unwrap();
        // Only one side built so far: no target polygon to link to yet.
        assert!(nav_mesh.get_tile(tile_a).unwrap().polygons.iter().all(|p| p
            .links
            .iter()
            .all(|link| !matches!(link, crate::tiles::Link::OffMesh { .. }))));

        cache.build_nav_mesh_tile(tile_b, &settings, &mut nav_mesh).unwrap();
        // Tile A isn't rebuilt by building tile B, so the forward link only
        // appears once A rebuilds and re-resolves against B's new polygons.
        cache.build_nav_mesh_tile(tile_a, &settings, &mut nav_mesh).unwrap();

        let forward = nav_mesh.get_tile(tile_a).unwrap().polygons[0].links.iter().any(|link| {
            matches!(link, crate::tiles::Link::OffMesh { neighbour_tile, .. } if *neighbour_tile == tile_b)
        });
        assert!(forward);
        let backward = nav_mesh.get_tile(tile_b).unwrap().polygons[0].links.iter().any(|link| {
            matches!(link, crate::tiles::Link::OffMesh { neighbour_tile, .. } if *neighbour_tile == tile_a)
        });
        assert!(backward);
    }
}
