//! Contour extraction (C6, stage 2): trace the boundary of each region in
//! an [`OpenTile`] into a polyline, simplify it within
//! `max_contour_simplification_error`, and merge hole contours into their
//! enclosing outline. The geometry predicates this shares with the mesher
//! (`left`/`left_on`/`intersect`/`in_cone`) live in [`crate::math`] instead
//! of being duplicated.

use std::cmp::Ordering;

use glam::{IVec2, UVec2, UVec4};

use crate::heightfields::{OpenSpan, OpenTile};
use crate::math::{in_cone, intersect};
use crate::{get_neighbour_index, Area, NavMeshSettings};

/// A vertex is `(x, y, z, region-or-flags)` in tile-local cell units; `w`
/// packs the bordering region id in its low 16 bits and
/// [`FLAG_BORDER_VERTEX`] in bit 16 once simplified.
const FLAG_BORDER_VERTEX: u32 = 0x10000;
const MASK_CONTOUR_REGION: u32 = 0xffff;

#[derive(Default, Clone, Debug)]
pub struct Contour {
    pub vertices: Vec<UVec4>,
    pub region: u16,
    /// Unlike [`OpenSpan`], this can't be `None` — `None`-area spans are
    /// skipped entirely when tracing contours.
    pub area: Area,
}

#[derive(Default)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
}

#[derive(Default, Clone)]
struct ContourHole {
    contour: Contour,
    min_x: u32,
    min_z: u32,
    left_most_vertex: u32,
}

#[derive(Default, Clone)]
struct ContourRegion {
    outline: Option<Contour>,
    holes: Vec<ContourHole>,
}

pub(crate) fn build_contours(open_tile: &OpenTile, nav_mesh_settings: &NavMeshSettings) -> ContourSet {
    let max_contours = open_tile.max_regions.max(8);
    let mut contour_set = ContourSet {
        contours: Vec::with_capacity(max_contours.into()),
    };
    let tile_side = nav_mesh_settings.get_tile_side_with_border();

    let mut boundary_flags = vec![0u8; open_tile.span_count];
    for (cell_index, cell) in open_tile.cells.iter().enumerate() {
        for span in cell.spans.iter() {
            let mut res = 0;

            for dir in 0..4 {
                let mut other_region = 0;
                if let Some(span_index) = span.neighbours[dir] {
                    let other_span = &open_tile.cells[get_neighbour_index(tile_side, cell_index, dir)]
                        .spans[span_index as usize];
                    other_region = other_span.region;
                }

                if span.region == other_region {
                    res |= 1 << dir;
                }
            }

            boundary_flags[span.tile_index] = res ^ 0b1111;
        }
    }

    let mut vertices = Vec::with_capacity(256);
    let mut simplified_vertices = Vec::with_capacity(64);

    for (cell_index, cell) in open_tile.cells.iter().enumerate() {
        for (span_index, span) in cell.spans.iter().enumerate() {
            if boundary_flags[span.tile_index] == 0 || boundary_flags[span.tile_index] == 0b1111 {
                boundary_flags[span.tile_index] = 0;
                continue;
            }
            if span.region == 0 {
                continue;
            }
            let Some(area) = open_tile.areas[span.tile_index] else {
                continue;
            };

            vertices.clear();
            simplified_vertices.clear();

            walk_contour(
                cell_index,
                span_index,
                open_tile,
                nav_mesh_settings,
                &mut boundary_flags,
                &mut vertices,
            );

            simplify_contour(
                &vertices,
                &mut simplified_vertices,
                nav_mesh_settings.max_contour_simplification_error,
                nav_mesh_settings.max_edge_length,
            );

            remove_degenerate_segments(&mut simplified_vertices);

            if simplified_vertices.len() >= 3 {
                contour_set.contours.push(Contour {
                    vertices: simplified_vertices.clone(),
                    region: span.region,
                    area,
                });
            }
        }
    }

    if !contour_set.contours.is_empty() {
        enum Winding {
            Outline,
            Hole,
        }

        let mut winding = Vec::with_capacity(contour_set.contours.len());
        let mut num_holes = 0;
        for contour in contour_set.contours.iter() {
            if calc_area_of_polygon_2d(&contour.vertices) < 0 {
                num_holes += 1;
                winding.push(Winding::Hole);
            } else {
                winding.push(Winding::Outline);
            }
        }

        if num_holes > 0 {
            let num_regions = open_tile.max_regions + 1;
            let mut regions: Vec<ContourRegion> = (0..num_regions).map(|_| ContourRegion::default()).collect();

            for (contour, winding) in contour_set.contours.iter().zip(winding) {
                match winding {
                    Winding::Outline => {
                        regions[contour.region as usize].outline = Some(contour.clone());
                    }
                    Winding::Hole => {
                        regions[contour.region as usize].holes.push(ContourHole {
                            contour: contour.clone(),
                            min_x: contour.vertices[0].x,
                            min_z: contour.vertices[0].z,
                            left_most_vertex: 0,
                        });
                    }
                }
            }

            for region in regions
                .iter_mut()
                .filter(|region| !region.holes.is_empty() && region.outline.is_some())
            {
                merge_region_holes(region);
            }

            // Re-flatten: the merged outline per region replaces the
            // original outline+hole contours in the final set.
            let mut merged = Vec::with_capacity(contour_set.contours.len());
            for region in regions {
                if let Some(outline) = region.outline {
                    merged.push(outline);
                }
            }
            if !merged.is_empty() {
                contour_set.contours = merged;
            }
        }
    }

    contour_set
}

#[derive(Default, Clone, Copy)]
struct PotentialDiagonal {
    vertex: u32,
    distance: u32,
}

fn merge_region_holes(region: &mut ContourRegion) {
    for hole in region.holes.iter_mut() {
        for (i, vertex) in hole.contour.vertices.iter().enumerate() {
            if vertex.x < hole.min_x || (vertex.x == hole.min_x && vertex.z < hole.min_z) {
                hole.min_x = vertex.x;
                hole.min_z = vertex.z;
                hole.left_most_vertex = i as u32;
            }
        }
    }

    region.holes.sort_by(|a, b| match a.min_x.cmp(&b.min_x) {
        Ordering::Equal => a.min_z.cmp(&b.min_z),
        other => other,
    });

    let max_vertices = region.outline.as_ref().map_or(0, |outline| outline.vertices.len())
        + region.holes.iter().fold(0, |value, hole| value + hole.contour.vertices.len());

    let mut diagonals = Vec::with_capacity(max_vertices);
    let outline = region.outline.as_mut().unwrap();

    for (hole_i, hole) in region.holes.iter().enumerate() {
        let mut index = None;
        let mut best_vertex = hole.left_most_vertex;

        for _ in 0..hole.contour.vertices.len() {
            diagonals.clear();
            let corner_vertex = hole.contour.vertices[best_vertex as usize];
            for i in 0..outline.vertices.len() {
                if in_cone(i, &outline.vertices, corner_vertex) {
                    let delta_x = outline.vertices[i].x.abs_diff(corner_vertex.x);
                    let delta_z = outline.vertices[i].z.abs_diff(corner_vertex.z);
                    let distance = delta_x * delta_x + delta_z * delta_z;
                    diagonals.push(PotentialDiagonal { vertex: i as u32, distance });
                }
            }

            diagonals.sort_by(|a, b| a.distance.cmp(&b.distance));

            index = None;
            for potential_diagonal in diagonals.iter() {
                let vertex = outline.vertices[potential_diagonal.vertex as usize];
                let mut intersects =
                    intersect_segment_contour(vertex, corner_vertex, potential_diagonal.vertex as usize, &outline.vertices);

                for other_hole in region.holes.iter().skip(hole_i) {
                    intersects |= intersect_segment_contour_no_vertex(vertex, corner_vertex, &other_hole.contour.vertices);
                    if intersects {
                        break;
                    }
                }

                if !intersects {
                    index = Some(potential_diagonal.vertex);
                    break;
                }
            }

            if index.is_some() {
                break;
            }

            best_vertex = (best_vertex + 1) % hole.contour.vertices.len() as u32;
        }

        let Some(index) = index else {
            continue;
        };

        merge_contours(outline, &hole.contour, index as usize, best_vertex as usize);
    }
}

fn merge_contours(target_contour: &mut Contour, source_contour: &Contour, index_a: usize, index_b: usize) {
    let mut vertices = Vec::with_capacity(target_contour.vertices.len() + source_contour.vertices.len());

    for i in 0..target_contour.vertices.len() {
        vertices.push(target_contour.vertices[(index_a + i) % target_contour.vertices.len()]);
    }
    for i in 0..source_contour.vertices.len() {
        vertices.push(source_contour.vertices[(index_b + i) % source_contour.vertices.len()]);
    }

    target_contour.vertices = vertices;
}

fn calc_area_of_polygon_2d(vertices: &[UVec4]) -> i32 {
    let mut area = 0;
    for i in 0..vertices.len() {
        let previous = vertices[i].as_ivec4();
        let next = vertices[(i + 1) % vertices.len()].as_ivec4();
        area += next.x * previous.z - previous.x * next.z;
    }
    (area + 1) / 2
}

fn intersect_segment_contour(point: UVec4, corner: UVec4, diagonal_vertex: usize, outline_vertices: &[UVec4]) -> bool {
    for i in 0..outline_vertices.len() {
        let next = (i + 1) % outline_vertices.len();
        if i == diagonal_vertex || next == diagonal_vertex {
            continue;
        }

        let point_i = outline_vertices[i];
        let point_next = outline_vertices[next];

        if (point.x == point_i.x && point.z == point_i.z)
            || (point_next.x == point_i.x && point_next.z == point_i.z)
            || (point_next.x == point.x && point_next.z == point.z)
        {
            continue;
        }

        if intersect(point.as_ivec4(), corner.as_ivec4(), point_i.as_ivec4(), point_next.as_ivec4()) {
            return true;
        }
    }
    false
}

fn intersect_segment_contour_no_vertex(point: UVec4, corner: UVec4, outline_vertices: &[UVec4]) -> bool {
    for i in 0..outline_vertices.len() {
        let next = (i + 1) % outline_vertices.len();
        let point_i = outline_vertices[i];
        let point_next = outline_vertices[next];

        if (point.x == point_i.x && point.z == point_i.z)
            || (point_next.x == point_i.x && point_next.z == point_i.z)
            || (point_next.x == point.x && point_next.z == point.z)
        {
            continue;
        }

        if intersect(point.as_ivec4(), corner.as_ivec4(), point_i.as_ivec4(), point_next.as_ivec4()) {
            return true;
        }
    }
    false
}

fn walk_contour(
    mut cell_index: usize,
    mut span_index: usize,
    tile: &OpenTile,
    nav_mesh_settings: &NavMeshSettings,
    boundary_flags: &mut [u8],
    contour: &mut Vec<u32>,
) {
    let mut dir = 0u8;
    while (boundary_flags[tile.cells[cell_index].spans[span_index].tile_index] & (1 << dir)) == 0 {
        dir += 1;
    }
    let start_direction = dir;
    let start_cell = cell_index;
    let start_span = span_index;
    let tile_side = nav_mesh_settings.get_tile_side_with_border();

    loop {
        let row = cell_index / tile_side;
        let column = cell_index % tile_side;

        let span = &tile.cells[cell_index].spans[span_index];
        if boundary_flags[span.tile_index] & (1 << dir) > 0 {
            let height = get_corner_height(cell_index, span, tile, nav_mesh_settings, dir);

            let mut bordering_region = 0u32;
            if let Some(span_index) = span.neighbours[dir as usize] {
                let other_span = &tile.cells[get_neighbour_index(tile_side, cell_index, dir.into())].spans[span_index as usize];
                bordering_region = other_span.region.into();
            }

            let px = match dir {
                1 | 2 => column + 1,
                _ => column,
            } as u32;
            let py = height as u32;
            let pz = match dir {
                0 | 1 => row + 1,
                _ => row,
            } as u32;
            contour.extend_from_slice(&[px, py, pz, bordering_region]);

            boundary_flags[span.tile_index] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            if let Some(index) = span.neighbours[dir as usize] {
                span_index = index.into();
            } else {
                panic!("incorrectly flagged boundary span during contour walk");
            }

            cell_index = get_neighbour_index(tile_side, cell_index, dir.into());
            dir = (dir + 3) & 0x3;
        }

        if start_cell == cell_index && start_span == span_index && start_direction == dir {
            break;
        }
    }
}

fn get_corner_height(cell_index: usize, span: &OpenSpan, tile: &OpenTile, nav_mesh_settings: &NavMeshSettings, dir: u8) -> u16 {
    let tile_side = nav_mesh_settings.get_tile_side_with_border();
    let next_dir = (dir + 1) & 0x3;

    let mut height = span.min;

    if let Some(span_index) = span.neighbours[dir as usize] {
        let other_cell_index = get_neighbour_index(tile_side, cell_index, dir.into());
        let other_span = &tile.cells[other_cell_index].spans[span_index as usize];
        height = height.max(other_span.min);

        if let Some(span_index) = other_span.neighbours[next_dir as usize] {
            let other_cell_index = get_neighbour_index(tile_side, other_cell_index, next_dir.into());
            let other_span = &tile.cells[other_cell_index].spans[span_index as usize];
            height = height.max(other_span.min);
        }
    }

    if let Some(span_index) = span.neighbours[next_dir as usize] {
        let other_cell_index = get_neighbour_index(tile_side, cell_index, next_dir.into());
        let other_span = &tile.cells[other_cell_index].spans[span_index as usize];
        height = height.max(other_span.min);

        if let Some(span_index) = other_span.neighbours[dir as usize] {
            let other_cell_index = get_neighbour_index(tile_side, other_cell_index, dir.into());
            let other_span = &tile.cells[other_cell_index].spans[span_index as usize];
            height = height.max(other_span.min);
        }
    }

    height
}

fn simplify_contour(points: &[u32], simplified: &mut Vec<UVec4>, max_error: f32, max_edge_len: u16) {
    let has_connections = {
        let mut has_connections = false;
        let mut i = 0;
        while i < points.len() {
            if (points[i + 3] & MASK_CONTOUR_REGION) != 0 {
                has_connections = true;
                break;
            }
            i += 4;
        }
        has_connections
    };

    if has_connections {
        let length = points.len() / 4;
        for i in 0..length {
            let next = ((i + 1) % length) * 4;
            let i_pre_mul = i * 4;

            if (points[i_pre_mul + 3] & MASK_CONTOUR_REGION) != (points[next + 3] & MASK_CONTOUR_REGION) {
                simplified.push(UVec4 {
                    x: points[i_pre_mul],
                    y: points[i_pre_mul + 1],
                    z: points[i_pre_mul + 2],
                    w: i as u32,
                });
            }
        }
    } else {
        let mut lower_left = (points[0], points[1], points[2], 0u32);
        let mut upper_right = lower_left;

        let length = points.len() / 4;
        for i in 0..length {
            let i_pre_mul = i * 4;
            let x = points[i_pre_mul];
            let y = points[i_pre_mul + 1];
            let z = points[i_pre_mul + 2];
            if x < lower_left.0 || (x == lower_left.0 && z < lower_left.2) {
                lower_left = (x, y, z, i as u32);
            }
            if x > upper_right.0 || (x == upper_right.0 && z > upper_right.2) {
                upper_right = (x, y, z, i as u32);
            }
        }

        simplified.push(UVec4::new(lower_left.0, lower_left.1, lower_left.2, lower_left.3));
        simplified.push(UVec4::new(upper_right.0, upper_right.1, upper_right.2, upper_right.3));
    }

    let point_count = points.len() / 4;
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();

        let mut a = simplified[i];
        let mut b = simplified[next];

        let (mut c_i, c_increments, end_i) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            let c_increments = 1;
            let c_i = (a.w + c_increments) % point_count as u32;
            (c_i, c_increments, b.w)
        } else {
            let c_increments = (point_count - 1) as u32;
            let c_i = (b.w + c_increments) % point_count as u32;
            let end_i = a.w;

            std::mem::swap(&mut a.x, &mut b.x);
            std::mem::swap(&mut a.z, &mut b.z);
            (c_i, c_increments, end_i)
        };

        let mut max_deviation = 0.0;
        let mut max_i = None;

        if (points[(c_i * 4 + 3) as usize] & MASK_CONTOUR_REGION) == 0 {
            while c_i != end_i {
                let deviation = point_distance_from_segment(
                    UVec2::new(points[(c_i * 4) as usize], points[(c_i * 4 + 2) as usize]).as_ivec2(),
                    UVec2::new(a.x, a.z).as_ivec2(),
                    UVec2::new(b.x, b.z).as_ivec2(),
                );
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_i = Some(c_i);
                }
                c_i = (c_i + c_increments) % point_count as u32;
            }
        }

        if let (Some(max_i), true) = (max_i, max_deviation > (max_error * max_error)) {
            simplified.insert(
                i + 1,
                UVec4 {
                    x: points[(max_i * 4) as usize],
                    y: points[(max_i * 4 + 1) as usize],
                    z: points[(max_i * 4 + 2) as usize],
                    w: max_i,
                },
            );
        } else {
            i += 1;
        }
    }

    // Split long edges that run along a region boundary.
    {
        let mut i = 0;
        while i < simplified.len() {
            let a = simplified[i];
            let b = simplified[(i + 1) % simplified.len()];

            let next_original_point_index = (a.w + 1) as usize % point_count;
            let should_tessellate = points[next_original_point_index * 4 + 3] & MASK_CONTOUR_REGION == 0;

            let mut max_i = None;
            if should_tessellate {
                let delta_x = b.x.abs_diff(a.x);
                let delta_z = b.z.abs_diff(a.z);

                if delta_x * delta_x + delta_z * delta_z > max_edge_len as u32 * max_edge_len as u32 {
                    let n = if b.w < a.w {
                        b.w as isize + point_count as isize - a.w as isize
                    } else {
                        b.w as isize - a.w as isize
                    };

                    if n > 1 {
                        max_i = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (a.w as usize + (n / 2) as usize) % point_count
                        } else {
                            (a.w as usize + ((n + 1) / 2) as usize) % point_count
                        });
                    }
                }
            }

            if let Some(max_i) = max_i {
                simplified.insert(
                    i + 1,
                    UVec4::new(points[max_i * 4], points[max_i * 4 + 1], points[max_i * 4 + 2], max_i as u32),
                );
            } else {
                i += 1;
            }
        }
    }

    for point in simplified.iter_mut() {
        let next = (point.w + 1) % point_count as u32;
        let current = point.w;
        point.w = (points[(next * 4 + 3) as usize] & MASK_CONTOUR_REGION) | (points[(current * 4 + 3) as usize] & FLAG_BORDER_VERTEX);
    }
}

pub(crate) fn point_distance_from_segment(point: IVec2, seg_a: IVec2, seg_b: IVec2) -> f32 {
    let segment_delta = (seg_b - seg_a).as_vec2();
    let point_delta = (point - seg_a).as_vec2();

    let d = segment_delta.x * segment_delta.x + segment_delta.y * segment_delta.y;
    let mut t = segment_delta.x * point_delta.x + segment_delta.y * point_delta.y;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    let delta_x = seg_a.x as f32 + t * segment_delta.x - point.x as f32;
    let delta_y = seg_a.y as f32 + t * segment_delta.y - point.y as f32;

    delta_x * delta_x + delta_y * delta_y
}

fn remove_degenerate_segments(simplified: &mut Vec<UVec4>) {
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();
        let a = simplified[i];
        let b = simplified[next];

        if a.x == b.x && a.z == b.z {
            simplified.remove(i);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfields::{build_heightfield_tile, build_open_heightfield_tile, calculate_distance_field, erode_walkable_area, TriangleCollection};
    use crate::regions::build_regions;
    use glam::{Mat4, Vec3};

    fn settings() -> NavMeshSettings {
        NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 32.0, -10.0)
    }

    #[test]
    fn flat_quad_produces_at_least_one_contour() {
        let nav_mesh_settings = settings();
        let vertices = [
            Vec3::new(-5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(-5.0, 0.0, 5.0),
        ];
        let indices = [0u32, 1, 2, 0, 2, 3];
        let collections = [TriangleCollection {
            transform: Mat4::IDENTITY,
            vertices: &vertices,
            indices: &indices,
            area: Some(Area(0)),
        }];

        let tile_coord = nav_mesh_settings.get_tile_containing_position(glam::Vec2::ZERO);
        let voxelized = build_heightfield_tile(tile_coord, &collections, &nav_mesh_settings);
        let mut open_tile = build_open_heightfield_tile(voxelized, &nav_mesh_settings);
        erode_walkable_area(&mut open_tile, &nav_mesh_settings);
        calculate_distance_field(&mut open_tile, &nav_mesh_settings);
        build_regions(&mut open_tile, &nav_mesh_settings);

        let contour_set = build_contours(&open_tile, &nav_mesh_settings);
        assert!(!contour_set.contours.is_empty());
        for contour in &contour_set.contours {
            assert!(contour.vertices.len() >= 3);
        }
    }
}
