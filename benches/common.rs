//! Shared fixture builder for the benches in this directory. Not a real
//! module path for the crate's consumers — just bench-local code factored
//! out so `simple_geometry.rs` and `simple_navigation.rs` don't each
//! hand-assemble the same COL3 byte stream.

use glam::Vec3;
use worldassistant_navmesh::collision::CollisionFile;
use worldassistant_navmesh::scene::Scene;
use worldassistant_navmesh::stream::{InputMemoryStream, OutputMemoryStream, WriteExt};

/// Encodes a single box-primitive COL3 block (one model, no loose vertices,
/// tessellated into 12 triangles by the loader) at load time. `half_extents`
/// must be symmetric in Y and Z: the loader's Y/Z axis swap is applied to
/// both the box corners and the stored AABB, so an asymmetric box would come
/// out a different shape than it went in.
fn box_model_bytes(name: &str, half_extents: Vec3) -> Vec<u8> {
    let min = -half_extents;
    let max = half_extents;

    let mut out = OutputMemoryStream::new();
    out.write_file_id(b"COL3").unwrap();
    out.write_u32(0).unwrap(); // block size, unchecked by the loader

    out.write_fixed_string(name, 22).unwrap();
    out.write_u32(0).unwrap(); // model id

    out.write_vec3(min).unwrap();
    out.write_vec3(max).unwrap();
    out.write_vec3(Vec3::ZERO).unwrap();
    out.write_f32(min.distance(max) / 2.0).unwrap();

    out.write_u32(0).unwrap(); // spheres

    out.write_u32(1).unwrap(); // boxes
    out.write_vec3(min).unwrap();
    out.write_vec3(max).unwrap();
    out.write_u8(0).unwrap(); // material
    out.write_u8(0).unwrap(); // flag
    out.write_u8(0).unwrap(); // unknown
    out.write_u8(0).unwrap(); // light

    out.write_u32(0).unwrap(); // loose vertices
    out.write_u32(0).unwrap(); // loose faces

    out.into_inner()
}

/// A scene with `count` box placements spread out along the X axis, each
/// wide and flat enough to read as one walkable platform once voxelized,
/// plus the collision library backing them.
pub fn scene_with_platforms(count: usize) -> (Scene, CollisionFile) {
    let mut collisions = CollisionFile::new();
    let mut bytes = Vec::new();
    for i in 0..count {
        bytes.extend(box_model_bytes(&format!("platform{i}"), Vec3::new(5.0, 1.0, 1.0)));
    }
    let mut input = InputMemoryStream::new(&bytes);
    collisions.load(&mut input).unwrap();

    let mut scene = Scene::new();
    for i in 0..count {
        let x = i as f32 * 15.0;
        scene
            .add_node(&collisions, i as u32, &format!("platform{i}"), Vec3::new(x, 0.0, 0.0), glam::Quat::IDENTITY, -1, 0)
            .unwrap();
    }

    (scene, collisions)
}
