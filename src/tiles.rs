//! Polygonal nav-mesh tile storage (C6, stage 4): takes a tile's
//! [`PolyMesh`](crate::mesher::PolyMesh) and turns it into the world-space
//! [`NavMeshTile`] that [`crate::query`] walks, stitching each tile's portal
//! edges to whichever neighbour tile already occupies the adjacent grid
//! coordinate. There is no `NavMeshTiles` implementation in the pack this
//! crate was learned from — the link/polygon/tile shapes here are inferred
//! from how `crate::query` consumes them (`Link::Internal`/`Link::External`,
//! `tiles: HashMap<UVec2, NavMeshTile>`, `get_closest_point_in_polygon`).
//! [`NavMeshTiles::connect_off_mesh_connection`] splices a third link kind,
//! `Link::OffMesh`, in from [`crate::tile_cache::TileCache`]'s stored
//! off-mesh connections once both endpoints have a built polygon.

use std::collections::HashMap;

use glam::{UVec2, Vec3};

use crate::mesher::{EdgeConnection, EdgeConnectionDirection, PolyMesh};
use crate::{Area, NavMeshSettings};

/// One directed connection from a polygon edge to whichever polygon borders it.
#[derive(Debug, Clone, Copy)]
pub enum Link {
    /// Edge borders another polygon within the same tile.
    Internal { edge: u8, neighbour_polygon: u16 },
    /// Edge borders a polygon in the adjacent tile found by walking
    /// `direction` from this tile's coordinate. `bound_min`/`bound_max` are
    /// `0..255` fractions (scale `1/255`) along the edge that overlap the
    /// neighbour's matching edge; narrower than the full edge whenever the
    /// two tiles' portals don't line up exactly.
    External {
        edge: u8,
        neighbour_polygon: u16,
        direction: EdgeConnectionDirection,
        bound_min: u8,
        bound_max: u8,
    },
    /// Teleport-like edge spliced in from an off-mesh connection: `near` is
    /// the point on this polygon the connection leaves from, `far` is where
    /// it arrives on `neighbour_tile`/`neighbour_polygon`, which need not be
    /// adjacent to (or even near) this polygon.
    OffMesh {
        neighbour_tile: UVec2,
        neighbour_polygon: u16,
        near: Vec3,
        far: Vec3,
    },
}

/// A single navigable polygon within a tile. The mesher only ever emits
/// triangles, so `indices.len() == 3`, but nothing here assumes that.
#[derive(Debug, Clone, Default)]
pub struct Polygon {
    pub indices: Vec<u32>,
    pub links: Vec<Link>,
    pub area: Area,
}

/// One tile's worth of navigable polygons in world space.
#[derive(Debug, Clone, Default)]
pub struct NavMeshTile {
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
    pub min_height: f32,
    pub max_height: f32,
}

impl NavMeshTile {
    /// Closest point to `point` that lies within `polygon`'s footprint,
    /// height-interpolated across whichever triangle (fan-triangulated from
    /// vertex 0) the clamped point falls in.
    pub fn get_closest_point_in_polygon(&self, polygon: &Polygon, point: Vec3) -> Vec3 {
        if polygon.indices.len() < 3 {
            return polygon
                .indices
                .first()
                .map(|&i| self.vertices[i as usize])
                .unwrap_or(point);
        }

        let a = self.vertices[polygon.indices[0] as usize];
        let mut best = closest_point_on_triangle(
            point,
            a,
            self.vertices[polygon.indices[1] as usize],
            self.vertices[polygon.indices[2] as usize],
        );
        let mut best_distance = best.distance_squared(point);

        for i in 2..polygon.indices.len() - 1 {
            let b = self.vertices[polygon.indices[i] as usize];
            let c = self.vertices[polygon.indices[i + 1] as usize];
            let candidate = closest_point_on_triangle(point, a, b, c);
            let distance = candidate.distance_squared(point);
            if distance < best_distance {
                best_distance = distance;
                best = candidate;
            }
        }

        best
    }
}

/// The set of built tiles making up a navigable area, keyed by tile grid
/// coordinate (see [`NavMeshSettings::get_tile_containing_position`]).
#[derive(Debug, Default)]
pub struct NavMeshTiles {
    pub tiles: HashMap<UVec2, NavMeshTile>,
}

impl NavMeshTiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `poly_mesh` to a [`NavMeshTile`], insert it at `tile_coord`,
    /// and connect its portal edges to whichever of the four neighbour tiles
    /// are already present (reciprocating the link on both sides).
    pub fn add_tile(&mut self, tile_coord: UVec2, poly_mesh: &PolyMesh, nav_mesh_settings: &NavMeshSettings) {
        let tile = create_nav_mesh_tile_from_poly_mesh(poly_mesh, tile_coord, nav_mesh_settings);
        self.tiles.insert(tile_coord, tile);
        self.connect_external_links(tile_coord);
    }

    /// Remove the tile at `tile_coord`, pruning every external link any
    /// neighbour held pointing into it.
    pub fn remove_tile(&mut self, tile_coord: UVec2) -> Option<NavMeshTile> {
        let removed = self.tiles.remove(&tile_coord);

        if removed.is_some() {
            for direction in EdgeConnectionDirection::ALL {
                let Some(neighbour_coord) = direction.checked_offset(tile_coord) else {
                    continue;
                };
                if let Some(neighbour) = self.tiles.get_mut(&neighbour_coord) {
                    for polygon in neighbour.polygons.iter_mut() {
                        polygon.links.retain(|link| !matches!(
                            link,
                            Link::External { direction: d, .. } if *d == direction.opposite()
                        ));
                    }
                }
            }
        }

        removed
    }

    pub fn get_tile(&self, tile_coord: UVec2) -> Option<&NavMeshTile> {
        self.tiles.get(&tile_coord)
    }

    pub fn get_tiles_at(&self, tile_coord: UVec2) -> Option<&NavMeshTile> {
        self.get_tile(tile_coord)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Closest polygon to `position` across every tile whose bounds fall
    /// within `search_radius` on the XZ plane.
    pub fn find_closest_polygon_in_box(
        &self,
        nav_mesh_settings: &NavMeshSettings,
        position: Vec3,
        search_radius: f32,
    ) -> Option<(UVec2, u16, Vec3)> {
        let min_tile = nav_mesh_settings.get_tile_containing_position(
            glam::Vec2::new(position.x - search_radius, position.z - search_radius),
        );
        let max_tile = nav_mesh_settings.get_tile_containing_position(
            glam::Vec2::new(position.x + search_radius, position.z + search_radius),
        );

        let mut best = None;
        let mut best_distance = f32::MAX;

        for tz in min_tile.y..=max_tile.y {
            for tx in min_tile.x..=max_tile.x {
                let tile_coord = UVec2::new(tx, tz);
                let Some(tile) = self.tiles.get(&tile_coord) else {
                    continue;
                };

                for (polygon_index, polygon) in tile.polygons.iter().enumerate() {
                    let closest = tile.get_closest_point_in_polygon(polygon, position);
                    let distance = closest.distance_squared(position);
                    if distance < best_distance {
                        best_distance = distance;
                        best = Some((tile_coord, polygon_index as u16, closest));
                    }
                }
            }
        }

        best
    }

    /// Splices an off-mesh connection into the polygon link graph: finds the
    /// polygon nearest each endpoint (within `search_radius`) and pushes a
    /// direct [`Link::OffMesh`] from the near side's polygon to the far
    /// side's, and the reverse too when `bidirectional`. No-ops silently if
    /// either endpoint has no polygon within range yet, or both endpoints
    /// resolve to the same polygon — the connection is simply retried the
    /// next time either tile rebuilds. Idempotent: a link already present is
    /// not duplicated.
    pub fn connect_off_mesh_connection(
        &mut self,
        nav_mesh_settings: &NavMeshSettings,
        start: Vec3,
        end: Vec3,
        bidirectional: bool,
        search_radius: f32,
    ) {
        let Some((start_tile, start_poly, start_point)) =
            self.find_closest_polygon_in_box(nav_mesh_settings, start, search_radius)
        else {
            return;
        };
        let Some((end_tile, end_poly, end_point)) =
            self.find_closest_polygon_in_box(nav_mesh_settings, end, search_radius)
        else {
            return;
        };

        if start_tile == end_tile && start_poly == end_poly {
            return;
        }

        push_off_mesh_link(&mut self.tiles, start_tile, start_poly, end_tile, end_poly, start_point, end_point);
        if bidirectional {
            push_off_mesh_link(&mut self.tiles, end_tile, end_poly, start_tile, start_poly, end_point, start_point);
        }
    }

    fn connect_external_links(&mut self, tile_coord: UVec2) {
        for direction in EdgeConnectionDirection::ALL {
            let Some(neighbour_coord) = direction.checked_offset(tile_coord) else {
                continue;
            };
            if !self.tiles.contains_key(&neighbour_coord) {
                continue;
            }

            self.connect_tile_pair(tile_coord, neighbour_coord, direction);
        }
    }

    /// Stitch `tile_coord`'s `direction`-facing edges to `neighbour_coord`'s
    /// edges facing back (`direction.opposite()`), intersecting the two
    /// edges' overlap on the shared boundary axis and recording it as a
    /// `0..255`-scaled bound on both sides' [`Link::External`].
    fn connect_tile_pair(&mut self, tile_coord: UVec2, neighbour_coord: UVec2, direction: EdgeConnectionDirection) {
        let axis_is_x = matches!(direction, EdgeConnectionDirection::XNegative | EdgeConnectionDirection::XPositive);

        let Some(tile) = self.tiles.get(&tile_coord) else { return };
        let Some(neighbour) = self.tiles.get(&neighbour_coord) else { return };

        let mut tile_edges = collect_boundary_edges(tile, direction, axis_is_x);
        let mut neighbour_edges = collect_boundary_edges(neighbour, direction.opposite(), axis_is_x);

        // Normalize both sides' edges against the same global axis range so
        // bound fractions line up even if the two tiles' meshes were built
        // independently.
        let Some(axis_range) = axis_range(&tile_edges, &neighbour_edges) else {
            return;
        };

        let mut new_tile_links = Vec::new();
        let mut new_neighbour_links = Vec::new();

        for tile_edge in tile_edges.drain(..) {
            for neighbour_edge in neighbour_edges.iter() {
                let Some((overlap_min, overlap_max)) = overlap(tile_edge.range, neighbour_edge.range) else {
                    continue;
                };

                let (bound_min, bound_max) = to_bound_fraction(overlap_min, overlap_max, axis_range);
                if bound_min >= bound_max {
                    continue;
                }

                new_tile_links.push((
                    tile_edge.polygon,
                    Link::External {
                        edge: tile_edge.edge,
                        neighbour_polygon: neighbour_edge.polygon as u16,
                        direction,
                        bound_min,
                        bound_max,
                    },
                ));
                new_neighbour_links.push((
                    neighbour_edge.polygon,
                    Link::External {
                        edge: neighbour_edge.edge,
                        neighbour_polygon: tile_edge.polygon as u16,
                        direction: direction.opposite(),
                        bound_min,
                        bound_max,
                    },
                ));
            }
        }

        if let Some(tile) = self.tiles.get_mut(&tile_coord) {
            for (polygon, link) in new_tile_links {
                tile.polygons[polygon].links.push(link);
            }
        }
        if let Some(neighbour) = self.tiles.get_mut(&neighbour_coord) {
            for (polygon, link) in new_neighbour_links {
                neighbour.polygons[polygon].links.push(link);
            }
        }
    }
}

fn push_off_mesh_link(
    tiles: &mut HashMap<UVec2, NavMeshTile>,
    from_tile: UVec2,
    from_poly: u16,
    to_tile: UVec2,
    to_poly: u16,
    near: Vec3,
    far: Vec3,
) {
    let Some(tile) = tiles.get_mut(&from_tile) else { return };
    let Some(polygon) = tile.polygons.get_mut(from_poly as usize) else { return };

    let already_linked = polygon.links.iter().any(|link| {
        matches!(link, Link::OffMesh { neighbour_tile, neighbour_polygon, .. }
            if *neighbour_tile == to_tile && *neighbour_polygon == to_poly)
    });
    if already_linked {
        return;
    }

    polygon.links.push(Link::OffMesh { neighbour_tile: to_tile, neighbour_polygon: to_poly, near, far });
}

struct BoundaryEdge {
    polygon: usize,
    edge: u8,
    range: (f32, f32),
}

fn collect_boundary_edges(tile: &NavMeshTile, direction: EdgeConnectionDirection, axis_is_x: bool) -> Vec<BoundaryEdge> {
    let mut edges = Vec::new();

    for (polygon_index, polygon) in tile.polygons.iter().enumerate() {
        for edge_index in 0..polygon.indices.len() {
            let a = tile.vertices[polygon.indices[edge_index] as usize];
            let b = tile.vertices[polygon.indices[(edge_index + 1) % polygon.indices.len()] as usize];

            let tagged = matches!(
                edge_tag_at(tile, polygon, edge_index),
                Some(d) if d == direction
            );

            if !tagged {
                continue;
            }

            let (lo, hi) = if axis_is_x {
                (a.z.min(b.z), a.z.max(b.z))
            } else {
                (a.x.min(b.x), a.x.max(b.x))
            };

            edges.push(BoundaryEdge {
                polygon: polygon_index,
                edge: edge_index as u8,
                range: (lo, hi),
            });
        }
    }

    edges
}

/// The link graph built in [`NavMeshTiles::add_tile`] doesn't otherwise
/// record which direction an edge used to be tagged with in the source
/// mesh, so we re-derive it from the one [`Link::External`] already pushed
/// for that edge by `create_nav_mesh_tile_from_poly_mesh` (at most one,
/// before any cross-tile stitching has run).
fn edge_tag_at(tile: &NavMeshTile, polygon: &Polygon, edge_index: usize) -> Option<EdgeConnectionDirection> {
    let _ = tile;
    polygon.links.iter().find_map(|link| match link {
        Link::External { edge, direction, .. } if *edge as usize == edge_index => Some(*direction),
        _ => None,
    })
}

fn axis_range(a: &[BoundaryEdge], b: &[BoundaryEdge]) -> Option<(f32, f32)> {
    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for edge in a.iter().chain(b.iter()) {
        min = min.min(edge.range.0);
        max = max.max(edge.range.1);
    }

    if min >= max {
        None
    } else {
        Some((min, max))
    }
}

fn overlap(a: (f32, f32), b: (f32, f32)) -> Option<(f32, f32)> {
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    if lo < hi {
        Some((lo, hi))
    } else {
        None
    }
}

fn to_bound_fraction(lo: f32, hi: f32, axis_range: (f32, f32)) -> (u8, u8) {
    let span = axis_range.1 - axis_range.0;
    let to_u8 = |value: f32| (((value - axis_range.0) / span).clamp(0.0, 1.0) * 255.0).round() as u8;
    (to_u8(lo), to_u8(hi))
}

/// `position` is the cell coordinate in tile-local cell units (x/z run over
/// the bordered grid width, y is a span height index); `nav_mesh_settings`
/// supplies the per-tile world origin and cell scale used everywhere else in
/// the build pipeline.
fn cell_to_world(position: glam::UVec3, tile_coord: UVec2, nav_mesh_settings: &NavMeshSettings) -> Vec3 {
    let origin = nav_mesh_settings.get_tile_origin_with_border(tile_coord);

    Vec3::new(
        origin.x + position.x as f32 * nav_mesh_settings.cell_width,
        nav_mesh_settings.world_bottom_bound + position.y as f32 * nav_mesh_settings.cell_height,
        origin.y + position.z as f32 * nav_mesh_settings.cell_width,
    )
}

fn create_nav_mesh_tile_from_poly_mesh(mesh: &PolyMesh, tile_coord: UVec2, nav_mesh_settings: &NavMeshSettings) -> NavMeshTile {
    let vertices: Vec<Vec3> = mesh
        .vertices
        .iter()
        .map(|&v| cell_to_world(v, tile_coord, nav_mesh_settings))
        .collect();

    let (min_height, max_height) = mesh.vertices.iter().fold((u32::MAX, 0u32), |(min, max), v| {
        (min.min(v.y), max.max(v.y))
    });

    let polygons = mesh
        .polygons
        .iter()
        .zip(mesh.edges.iter())
        .zip(mesh.areas.iter())
        .map(|((indices, edges), &area)| {
            let links = edges
                .iter()
                .enumerate()
                .filter_map(|(edge_index, edge)| match edge {
                    EdgeConnection::None => None,
                    EdgeConnection::Internal(neighbour_polygon) => Some(Link::Internal {
                        edge: edge_index as u8,
                        neighbour_polygon: *neighbour_polygon,
                    }),
                    // External edges aren't resolvable to a concrete
                    // neighbour polygon until the neighbour tile exists;
                    // `connect_external_links` appends the real links once
                    // both tiles are in the map. Record the direction as a
                    // zero-width placeholder link so `edge_tag_at` can find
                    // it, then `connect_tile_pair` replaces it with the
                    // real bound range (or it stays untraversable if no
                    // neighbour tile is ever built there).
                    EdgeConnection::External(direction) => Some(Link::External {
                        edge: edge_index as u8,
                        neighbour_polygon: u16::MAX,
                        direction: *direction,
                        bound_min: 0,
                        bound_max: 0,
                    }),
                })
                .collect();

            Polygon {
                indices: indices.to_vec(),
                links,
                area,
            }
        })
        .collect();

    NavMeshTile {
        vertices,
        polygons,
        min_height: nav_mesh_settings.world_bottom_bound + min_height as f32 * nav_mesh_settings.cell_height,
        max_height: nav_mesh_settings.world_bottom_bound + max_height as f32 * nav_mesh_settings.cell_height,
    }
}

/// Real-Time Collision Detection's closest-point-on-triangle: clamp `p` to
/// the triangle `a, b, c` via its barycentric region, handling both the
/// three vertex regions, the three edge regions, and the interior.
fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::EdgeConnection;

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 32.0, -10.0)
    }

    fn single_triangle_mesh(area: Area) -> PolyMesh {
        PolyMesh {
            vertices: vec![glam::UVec3::new(0, 0, 0), glam::UVec3::new(4, 0, 0), glam::UVec3::new(0, 0, 4)],
            polygons: vec![[0, 1, 2]],
            edges: vec![[EdgeConnection::None, EdgeConnection::None, EdgeConnection::None]],
            areas: vec![area],
            regions: vec![1],
        }
    }

    #[test]
    fn add_tile_inserts_and_populates_polygons() {
        let nav_mesh_settings = settings();
        let mesh = single_triangle_mesh(Area(0));
        let mut tiles = NavMeshTiles::new();
        let tile_coord = nav_mesh_settings.get_tile_containing_position(glam::Vec2::ZERO);

        tiles.add_tile(tile_coord, &mesh, &nav_mesh_settings);

        let tile = tiles.get_tile(tile_coord).expect("tile should be present");
        assert_eq!(tile.polygons.len(), 1);
        assert_eq!(tile.vertices.len(), 3);
    }

    #[test]
    fn closest_point_on_triangle_returns_input_when_inside() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(4.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 0.0, 4.0);
        let inside = Vec3::new(1.0, 0.0, 1.0);
        assert_eq!(closest_point_on_triangle(inside, a, b, c), inside);
    }

    #[test]
    fn remove_tile_strips_neighbour_external_links() {
        let nav_mesh_settings = settings();
        let mut tiles = NavMeshTiles::new();
        let tile_coord = nav_mesh_settings.get_tile_containing_position(glam::Vec2::ZERO);

        tiles.add_tile(tile_coord, &single_triangle_mesh(Area(0)), &nav_mesh_settings);
        tiles.remove_tile(tile_coord);
        assert!(tiles.get_tile(tile_coord).is_none());
    }

    #[test]
    fn connect_off_mesh_connection_links_polygons_across_tiles() {
        let nav_mesh_settings = settings();
        let mut tiles = NavMeshTiles::new();

        let tile_a = glam::UVec2::new(0, 0);
        let tile_b = glam::UVec2::new(2, 2);
        tiles.add_tile(tile_a, &single_triangle_mesh(Area(0)), &nav_mesh_settings);
        tiles.add_tile(tile_b, &single_triangle_mesh(Area(0)), &nav_mesh_settings);

        let origin_a = nav_mesh_settings.get_tile_origin(tile_a);
        let origin_b = nav_mesh_settings.get_tile_origin(tile_b);
        let start = Vec3::new(origin_a.x, 0.0, origin_a.y);
        let end = Vec3::new(origin_b.x, 0.0, origin_b.y);

        tiles.connect_off_mesh_connection(&nav_mesh_settings, start, end, true, 50.0);

        let forward = &tiles.get_tile(tile_a).unwrap().polygons[0].links;
        assert!(forward.iter().any(|link| matches!(
            link,
            Link::OffMesh { neighbour_tile, neighbour_polygon: 0, .. } if *neighbour_tile == tile_b
        )));

        let backward = &tiles.get_tile(tile_b).unwrap().polygons[0].links;
        assert!(backward.iter().any(|link| matches!(
            link,
            Link::OffMesh { neighbour_tile, neighbour_polygon: 0, .. } if *neighbour_tile == tile_a
        )));

        // Re-connecting the same pair doesn't duplicate either link.
        tiles.connect_off_mesh_connection(&nav_mesh_settings, start, end, true, 50.0);
        let forward_count = tiles.get_tile(tile_a).unwrap().polygons[0]
            .links
            .iter()
            .filter(|link| matches!(link, Link::OffMesh { .. }))
            .count();
        assert_eq!(forward_count, 1);
    }

    #[test]
    fn connect_off_mesh_connection_is_noop_when_only_one_side_is_built() {
        let nav_mesh_settings = settings();
        let mut tiles = NavMeshTiles::new();
        let tile_a = glam::UVec2::new(0, 0);
        tiles.add_tile(tile_a, &single_triangle_mesh(Area(0)), &nav_mesh_settings);

        let origin_a = nav_mesh_settings.get_tile_origin(tile_a);
        let start = Vec3::new(origin_a.x, 0.0, origin_a.y);
        let far_away = Vec3::new(origin_a.x + 10_000.0, 0.0, origin_a.y + 10_000.0);

        tiles.connect_off_mesh_connection(&nav_mesh_settings, start, far_away, true, 50.0);

        let links = &tiles.get_tile(tile_a).unwrap().polygons[0].links;
        assert!(links.iter().all(|link| !matches!(link, Link::OffMesh { .. })));
    }
}
