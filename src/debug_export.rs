//! Offline navmesh inspection dump to Wavefront OBJ (C12). Writing the OBJ
//! file to disk is an external-collaborator concern this crate only needs
//! to feed geometry to; gated behind the `debug-export` feature so it never
//! adds weight to a default build.
//!
//! Grounded on `original_source/utils/DebugMesh.{h,cpp}`'s `Dump`: a flat
//! `.obj` writer that interleaves indexed `v`/`f` triangle data with
//! unindexed `v`/`l` line pairs (`l -1 -2` referencing the two vertices it
//! just wrote).

use std::io::Write;
use std::path::Path;

use glam::Vec3;

use crate::error::NavigationResult;
use crate::math::BoundingBox;
use crate::tiles::NavMeshTiles;

/// Accumulates triangles and free-standing line segments for a single OBJ
/// dump. Lines are written as their own vertex pairs rather than indexed
/// against the shared vertex list, matching the original writer.
#[derive(Debug, Default)]
pub struct DebugMesh {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    lines: Vec<(Vec3, Vec3)>,
}

impl DebugMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, pos: Vec3) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices.push(pos);
        index
    }

    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) {
        let ia = self.add_vertex(a);
        let ib = self.add_vertex(b);
        let ic = self.add_vertex(c);
        self.indices.extend_from_slice(&[ia, ib, ic]);
    }

    pub fn add_line(&mut self, start: Vec3, end: Vec3) {
        self.lines.push((start, end));
    }

    /// Triangle soup this mesh has accumulated so far, as `(a, b, c)` triples.
    pub fn triangle_list(&self) -> Vec<Vec3> {
        self.indices.iter().map(|&i| self.vertices[i as usize]).collect()
    }

    pub fn dump(&self, path: &Path) -> NavigationResult<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "# worldassistant_navmesh")?;

        for vertex in &self.vertices {
            writeln!(file, "v {} {} {}", vertex.x, vertex.y, vertex.z)?;
        }

        for face in self.indices.chunks_exact(3) {
            writeln!(file, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1)?;
        }

        for (start, end) in &self.lines {
            writeln!(file, "v {} {} {}", start.x, start.y, start.z)?;
            writeln!(file, "v {} {} {}", end.x, end.y, end.z)?;
            writeln!(file, "l -1 -2")?;
        }

        Ok(())
    }
}

/// Writes `nav_mesh` to `path` as a Wavefront OBJ. Enumerates every tile,
/// or only tiles whose vertex bounds overlap `bounds` when given one, and
/// emits each polygon as a fan-triangulated face (`triangulated = true`) or
/// as its boundary edges, one line pair per edge (`triangulated = false`) —
/// matching the dump operation's "detail triangles or polygon edges as
/// line pairs" split.
pub fn dump_obj(
    path: &Path,
    nav_mesh: &NavMeshTiles,
    triangulated: bool,
    bounds: Option<BoundingBox>,
) -> NavigationResult<()> {
    let mut mesh = DebugMesh::new();

    for tile in nav_mesh.tiles.values() {
        if let Some(bounds) = bounds {
            let mut tile_bounds = BoundingBox::undefined();
            for &vertex in &tile.vertices {
                tile_bounds.merge_point(vertex);
            }
            if !tile_bounds.overlaps(&bounds) {
                continue;
            }
        }

        for polygon in &tile.polygons {
            if polygon.indices.len() < 3 {
                continue;
            }
            let points: Vec<Vec3> = polygon.indices.iter().map(|&i| tile.vertices[i as usize]).collect();

            if triangulated {
                let a = points[0];
                for i in 1..points.len() - 1 {
                    mesh.add_triangle(a, points[i], points[i + 1]);
                }
            } else {
                for i in 0..points.len() {
                    mesh.add_line(points[i], points[(i + 1) % points.len()]);
                }
            }
        }
    }

    mesh.dump(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::NavMeshTile;
    use glam::UVec2;

    fn one_triangle_tile() -> NavMeshTiles {
        let mut nav_mesh = NavMeshTiles::new();
        nav_mesh.tiles.insert(
            UVec2::ZERO,
            NavMeshTile {
                vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Z],
                polygons: vec![crate::tiles::Polygon {
                    indices: vec![0, 1, 2],
                    links: Vec::new(),
                    area: crate::Area::default(),
                }],
                min_height: 0.0,
                max_height: 0.0,
            },
        );
        nav_mesh
    }

    #[test]
    fn triangulated_dump_writes_one_face() {
        let nav_mesh = one_triangle_tile();
        let path = std::env::temp_dir().join("worldassistant_navmesh_debug_export_test.obj");
        dump_obj(&path, &nav_mesh, true, None).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with("v ")).count(), 3);
        assert_eq!(contents.lines().filter(|l| l.starts_with("f ")).count(), 1);
    }

    #[test]
    fn wireframe_dump_writes_one_line_per_edge() {
        let nav_mesh = one_triangle_tile();
        let path = std::env::temp_dir().join("worldassistant_navmesh_debug_export_wireframe_test.obj");
        dump_obj(&path, &nav_mesh, false, None).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with("l ")).count(), 3);
    }

    #[test]
    fn bounds_filter_drops_tiles_outside() {
        let nav_mesh = one_triangle_tile();
        let path = std::env::temp_dir().join("worldassistant_navmesh_debug_export_bounds_test.obj");
        let far_away = BoundingBox::new(Vec3::splat(1000.0), Vec3::splat(1001.0));
        dump_obj(&path, &nav_mesh, true, Some(far_away)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with("v ")).count(), 0);
    }
}
