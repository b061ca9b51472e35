//! Splits a tile's combined polygon mesh into stacked "layers".
//!
//! The original engine's height-field layering (`rcBuildHeightfieldLayers`)
//! slices a tile's open heightfield into overlapping height bands before
//! mesh generation, so stacked walkable surfaces (a bridge over a floor)
//! become separate, independently cacheable meshes. That slicing pass isn't
//! reimplemented here; instead we run the existing single-pass pipeline
//! through to one combined [`PolyMesh`] and then split it after the fact by
//! polygon connectivity. Two polygons end up in the same layer exactly when
//! they're reachable from one another through shared (internal) edges, which
//! is the same observable grouping a height-band slice would produce for
//! disjoint surfaces, at the cost of not merging surfaces that are
//! height-separated but XZ-overlapping into distinct layers when the mesher
//! happened to connect them. `DynamicNavigationMesh.h`'s `maxLayers` default
//! of 1 suggests multi-layer tiles are the exception rather than the rule in
//! practice, which is the trade this simplification leans on.

use tracing::warn;

use crate::mesher::{EdgeConnection, PolyMesh, VERTICES_IN_TRIANGLE};
use crate::Area;

/// The cache format stores a layer index in a single byte.
pub const MAX_LAYERS: usize = 255;

/// One connected surface extracted from a tile's combined polygon mesh.
pub struct PolyMeshLayer {
    pub poly_mesh: PolyMesh,
    pub min_height: u32,
    pub max_height: u32,
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
        }
    }

    fn find(&mut self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            self.parent[i as usize] = self.parent[self.parent[i as usize] as usize];
            i = self.parent[i as usize];
        }
        i
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra as usize] = rb;
        }
    }
}

/// Splits `poly_mesh` into connected-component layers, ordered by their
/// lowest vertex height so the cache lists the ground layer before
/// anything stacked above it. Truncates to [`MAX_LAYERS`] and warns about
/// any components dropped, since the on-disk layer index is a single byte.
pub fn split_into_layers(poly_mesh: PolyMesh) -> Vec<PolyMeshLayer> {
    let poly_count = poly_mesh.polygons.len();
    if poly_count == 0 {
        return Vec::new();
    }

    let mut union_find = UnionFind::new(poly_count);
    for (poly_index, edges) in poly_mesh.edges.iter().enumerate() {
        for edge in edges.iter().take(VERTICES_IN_TRIANGLE) {
            if let EdgeConnection::Internal(neighbour) = edge {
                union_find.union(poly_index as u32, *neighbour as u32);
            }
        }
    }

    let roots: Vec<u32> = (0..poly_count as u32)
        .map(|i| union_find.find(i))
        .collect();
    let mut unique_roots: Vec<u32> = roots.clone();
    unique_roots.sort_unstable();
    unique_roots.dedup();

    let mut root_to_layer = vec![0u32; poly_count];
    for (layer_index, root) in unique_roots.iter().enumerate() {
        for (poly_index, poly_root) in roots.iter().enumerate() {
            if poly_root == root {
                root_to_layer[poly_index] = layer_index as u32;
            }
        }
    }

    let mut layers: Vec<PolyMesh> = (0..unique_roots.len()).map(|_| PolyMesh::default()).collect();
    let mut vertex_remap: Vec<Vec<Option<u32>>> =
        (0..unique_roots.len()).map(|_| vec![None; poly_mesh.vertices.len()]).collect();

    for poly_index in 0..poly_count {
        let layer_index = root_to_layer[poly_index] as usize;
        let layer = &mut layers[layer_index];
        let remap = &mut vertex_remap[layer_index];

        let source_indices = &poly_mesh.polygons[poly_index];
        let mut new_indices = [0u32; VERTICES_IN_TRIANGLE];
        for (slot, &source_vertex) in source_indices.iter().enumerate() {
            let new_index = match remap[source_vertex as usize] {
                Some(existing) => existing,
                None => {
                    let new_index = layer.vertices.len() as u32;
                    layer.vertices.push(poly_mesh.vertices[source_vertex as usize]);
                    remap[source_vertex as usize] = Some(new_index);
                    new_index
                }
            };
            new_indices[slot] = new_index;
        }

        layer.polygons.push(new_indices);
        layer.areas.push(
            poly_mesh
                .areas
                .get(poly_index)
                .copied()
                .unwrap_or(Area::default()),
        );
        layer
            .regions
            .push(poly_mesh.regions.get(poly_index).copied().unwrap_or(0));

        // Internal edges now point at an index local to the layer; external
        // edges (and boundaries against a dropped neighbour) carry over as
        // external since every polygon reachable from this one is, by
        // construction, in the same layer.
        let mut new_edges = [EdgeConnection::None; VERTICES_IN_TRIANGLE];
        for (slot, edge) in poly_mesh.edges[poly_index].iter().enumerate() {
            new_edges[slot] = match edge {
                EdgeConnection::Internal(neighbour) => {
                    find_local_index(&root_to_layer, layer_index, *neighbour)
                        .map(EdgeConnection::Internal)
                        .unwrap_or(EdgeConnection::None)
                }
                other => *other,
            };
        }
        layer.edges.push(new_edges);
    }

    let mut built: Vec<PolyMeshLayer> = layers
        .into_iter()
        .map(|poly_mesh| {
            let (min_height, max_height) = poly_mesh
                .vertices
                .iter()
                .map(|v| v.y)
                .fold((u32::MAX, u32::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
            PolyMeshLayer {
                poly_mesh,
                min_height: if min_height == u32::MAX { 0 } else { min_height },
                max_height: if max_height == u32::MIN { 0 } else { max_height },
            }
        })
        .collect();

    built.sort_by_key(|layer| layer.min_height);

    if built.len() > MAX_LAYERS {
        warn!(
            dropped = built.len() - MAX_LAYERS,
            "tile produced more connected surfaces than the layer cache can index; dropping the highest ones"
        );
        built.truncate(MAX_LAYERS);
    }

    built
}

/// Finds the polygon within `layer_index` that polygon `global_poly` maps to,
/// returning its position in that layer's eventual polygon order.
fn find_local_index(root_to_layer: &[u32], layer_index: usize, global_poly: u16) -> Option<u16> {
    let mut local_index = 0u16;
    for (index, &layer) in root_to_layer.iter().enumerate() {
        if index == global_poly as usize {
            return if layer as usize == layer_index {
                Some(local_index)
            } else {
                None
            };
        }
        if layer as usize == layer_index {
            local_index += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn single_triangle(area: Area, region: u16) -> PolyMesh {
        PolyMesh {
            vertices: vec![
                UVec3::new(0, 0, 0),
                UVec3::new(1, 0, 0),
                UVec3::new(0, 0, 1),
            ],
            polygons: vec![[0, 1, 2]],
            edges: vec![[EdgeConnection::None, EdgeConnection::None, EdgeConnection::None]],
            areas: vec![area],
            regions: vec![region],
        }
    }

    #[test]
    fn empty_mesh_produces_no_layers() {
        assert!(split_into_layers(PolyMesh::default()).is_empty());
    }

    #[test]
    fn disconnected_triangles_become_separate_layers() {
        let mut mesh = single_triangle(Area(0), 1);
        let other = single_triangle(Area(0), 2);
        mesh.vertices.extend(other.vertices.iter().map(|v| *v + UVec3::new(10, 0, 10)));
        mesh.polygons.push([3, 4, 5]);
        mesh.edges.push([EdgeConnection::None, EdgeConnection::None, EdgeConnection::None]);
        mesh.areas.push(Area(0));
        mesh.regions.push(2);

        let layers = split_into_layers(mesh);
        assert_eq!(layers.len(), 2);
        for layer in &layers {
            assert_eq!(layer.poly_mesh.polygons.len(), 1);
        }
    }

    #[test]
    fn internally_linked_triangles_stay_in_one_layer() {
        let mut mesh = single_triangle(Area(0), 1);
        mesh.vertices.push(UVec3::new(1, 0, 1));
        mesh.polygons.push([1, 3, 2]);
        mesh.edges[0] = [
            EdgeConnection::Internal(1),
            EdgeConnection::None,
            EdgeConnection::None,
        ];
        mesh.edges.push([EdgeConnection::None, EdgeConnection::None, EdgeConnection::Internal(0)]);
        mesh.areas.push(Area(0));
        mesh.regions.push(1);

        let layers = split_into_layers(mesh);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].poly_mesh.polygons.len(), 2);
    }

    #[test]
    fn truncates_to_max_layers_and_keeps_the_lowest() {
        let mut mesh = PolyMesh::default();
        for i in 0..300u32 {
            let base = mesh.vertices.len() as u32;
            mesh.vertices.push(UVec3::new(0, i, 0));
            mesh.vertices.push(UVec3::new(1, i, 0));
            mesh.vertices.push(UVec3::new(0, i, 1));
            mesh.polygons.push([base, base + 1, base + 2]);
            mesh.edges.push([EdgeConnection::None, EdgeConnection::None, EdgeConnection::None]);
            mesh.areas.push(Area(0));
            mesh.regions.push(i as u16);
        }

        let layers = split_into_layers(mesh);
        assert_eq!(layers.len(), MAX_LAYERS);
        assert_eq!(layers[0].min_height, 0);
    }
}
