//! Collision library (C4): maps model name → indexed triangle mesh +
//! bounding volume. Grounded on `original_source/game/Collision.{h,cpp}`.
//! Only `COL2`/`COL3` blocks are accepted; `COLL` is the oldest on-disk
//! version and is rejected outright, matching the original loader.

use std::collections::BTreeMap;
use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::error::CollisionError;
use crate::math::{BoundingBox, PackedVertex};
use crate::stream::{ReadCursor, ReadExt, WriteCursor, WriteExt};

const NAME_FIELD_LEN: usize = 22;

const TAG_COL2: [u8; 4] = *b"COL2";
const TAG_COL3: [u8; 4] = *b"COL3";
const TAG_COLL: [u8; 4] = *b"COLL";

/// One indexed triangle face: three vertex indices, a material byte, and a
/// light byte, matching the 8-byte on-disk `ColFace` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub a: u16,
    pub b: u16,
    pub c: u16,
    pub material: u8,
    pub light: u8,
}

/// Bounding volume pair stored alongside every collision mesh: an AABB plus
/// a bounding sphere (center + radius).
#[derive(Debug, Clone, Copy)]
pub struct CollisionBounds {
    pub aabb: BoundingBox,
    pub center: Vec3,
    pub radius: f32,
}

/// A single model's collision mesh: packed vertices, indexed faces, and
/// bounds. Box primitives are tessellated into 12 triangles (2 per face) at
/// load time and appended directly into these arrays — there is no
/// separate "box" representation downstream.
#[derive(Debug, Clone)]
pub struct Collision {
    name: String,
    vertices: Vec<PackedVertex>,
    faces: Vec<Face>,
    bounds: CollisionBounds,
}

impl Collision {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[PackedVertex] {
        &self.vertices
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn bounds(&self) -> &CollisionBounds {
        &self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Construct directly from parts, bypassing the on-disk loader. Used by
    /// other modules' tests to build fixture collision meshes without
    /// hand-assembling a COL3 byte stream.
    #[cfg(test)]
    pub(crate) fn from_parts(
        name: String,
        vertices: Vec<PackedVertex>,
        faces: Vec<Face>,
        bounds: CollisionBounds,
    ) -> Self {
        Self { name, vertices, faces, bounds }
    }

    /// Read one model block. `stream` is positioned at the start of the
    /// four-byte version tag.
    pub fn load<S: ReadCursor>(stream: &mut S) -> Result<Self, CollisionError> {
        let tag = stream.read_file_id()?;
        if tag == TAG_COLL {
            return Err(CollisionError::UnsupportedVersion { tag });
        }
        if tag != TAG_COL2 && tag != TAG_COL3 {
            return Err(CollisionError::UnsupportedVersion { tag });
        }

        // Total block size in bytes, as written after the version tag by
        // both COL2 and COL3 headers; used only to validate framing here,
        // since this loader reads fields directly rather than chunking.
        let _block_size = stream.read_u32()?;

        let name = stream.read_fixed_string(NAME_FIELD_LEN)?;

        // Model id / geometry flags; not consumed by this crate beyond
        // positioning the cursor correctly.
        let _model_id = stream.read_u32()?;

        let aabb_min = stream.read_vec3()?;
        let aabb_max = stream.read_vec3()?;
        let center = stream.read_vec3()?;
        let radius = stream.read_f32()?;

        let num_spheres = stream.read_u32()? as usize;
        for _ in 0..num_spheres {
            let _center = stream.read_vec3()?;
            let _radius = stream.read_f32()?;
            let _material = stream.read_u8()?;
            let _light = stream.read_u8()?;
        }

        let num_boxes = stream.read_u32()? as usize;
        let mut box_vertices = Vec::with_capacity(num_boxes * 8);
        let mut box_faces = Vec::with_capacity(num_boxes * 12);
        for _ in 0..num_boxes {
            let min = stream.read_vec3()?;
            let max = stream.read_vec3()?;
            let material = stream.read_u8()?;
            let _flag = stream.read_u8()?;
            let _unknown = stream.read_u8()?;
            let light = stream.read_u8()?;

            tessellate_box(min, max, material, light, &mut box_vertices, &mut box_faces);
        }

        let num_vertices = stream.read_u32()? as usize;
        let mut vertices = Vec::with_capacity(num_vertices);
        for _ in 0..num_vertices {
            let v = stream.read_vec3()?;
            vertices.push(PackedVertex::pack(v).yz_swapped());
        }

        // The faces section is unconditionally present; there is no
        // flag-gated optional section.
        let num_faces = stream.read_u32()? as usize;
        let mut faces = Vec::with_capacity(num_faces);
        for _ in 0..num_faces {
            let a = stream.read_u16()?;
            let b = stream.read_u16()?;
            let c = stream.read_u16()?;
            let material = stream.read_u8()?;
            let light = stream.read_u8()?;
            faces.push(Face { a, b, c, material, light });
        }

        let vertex_base = vertices.len() as u16;
        vertices.extend(box_vertices);
        faces.extend(box_faces.into_iter().map(|mut f| {
            f.a += vertex_base;
            f.b += vertex_base;
            f.c += vertex_base;
            f
        }));

        for face in &faces {
            let vertex_count = vertices.len();
            if face.a as usize >= vertex_count || face.b as usize >= vertex_count || face.c as usize >= vertex_count {
                return Err(CollisionError::BadFaceIndex {
                    index: face.a.max(face.b).max(face.c),
                    vertex_count,
                });
            }
        }

        let swapped_min = Vec3::new(aabb_min.x, aabb_min.z, aabb_min.y);
        let swapped_max = Vec3::new(aabb_max.x, aabb_max.z, aabb_max.y);
        let aabb = BoundingBox::new(swapped_min.min(swapped_max), swapped_min.max(swapped_max));

        Ok(Self {
            name,
            vertices,
            faces,
            bounds: CollisionBounds {
                aabb,
                center: Vec3::new(center.x, center.z, center.y),
                radius,
            },
        })
    }

    pub fn save<S: WriteCursor>(&self, stream: &mut S) -> Result<(), CollisionError> {
        stream.write_file_id(&TAG_COL3)?;

        let mut body = crate::stream::OutputMemoryStream::new();
        body.write_fixed_string(&self.name, NAME_FIELD_LEN)?;
        body.write_u32(0)?; // model id, not tracked by this crate

        let unswapped_min = Vec3::new(self.bounds.aabb.min.x, self.bounds.aabb.min.z, self.bounds.aabb.min.y);
        let unswapped_max = Vec3::new(self.bounds.aabb.max.x, self.bounds.aabb.max.z, self.bounds.aabb.max.y);
        body.write_vec3(unswapped_min)?;
        body.write_vec3(unswapped_max)?;
        body.write_vec3(Vec3::new(self.bounds.center.x, self.bounds.center.z, self.bounds.center.y))?;
        body.write_f32(self.bounds.radius)?;

        body.write_u32(0)?; // spheres
        body.write_u32(0)?; // boxes (already tessellated into faces/vertices)

        body.write_u32(self.vertices.len() as u32)?;
        for v in &self.vertices {
            body.write_vec3(v.yz_swapped().unpack())?;
        }

        body.write_u32(self.faces.len() as u32)?;
        for f in &self.faces {
            body.write_u16(f.a)?;
            body.write_u16(f.b)?;
            body.write_u16(f.c)?;
            body.write_u8(f.material)?;
            body.write_u8(f.light)?;
        }

        let bytes = body.into_inner();
        stream.write_u32(bytes.len() as u32)?;
        stream.write_bytes(&bytes)?;
        Ok(())
    }

    /// Remove faces whose material byte is in `ignored_materials`. Returns
    /// the number of faces removed. Idempotent: a second call with the same
    /// set removes zero faces.
    pub fn apply_modifier(&mut self, ignored_materials: &HashSet<u8>) -> usize {
        let before = self.faces.len();
        self.faces.retain(|f| !ignored_materials.contains(&f.material));
        before - self.faces.len()
    }

    /// Decode packed vertices, apply `transform`, and append world-space
    /// vertices/indices to `dest_vertices`/`dest_indices`. Indices are
    /// offset by `start_index`; if `clear` is set the destination arrays
    /// are emptied first.
    pub fn unpack(
        &self,
        dest_vertices: &mut Vec<Vec3>,
        dest_indices: &mut Vec<u32>,
        transform: &Mat4,
        start_index: u32,
        clear: bool,
    ) {
        if clear {
            dest_vertices.clear();
            dest_indices.clear();
        }

        let base = dest_vertices.len() as u32;
        dest_vertices.extend(
            self.vertices
                .iter()
                .map(|v| transform.transform_point3(v.unpack())),
        );

        for face in &self.faces {
            dest_indices.push(start_index + base + face.a as u32);
            dest_indices.push(start_index + base + face.b as u32);
            dest_indices.push(start_index + base + face.c as u32);
        }
    }
}

fn tessellate_box(
    min: Vec3,
    max: Vec3,
    material: u8,
    light: u8,
    vertices: &mut Vec<PackedVertex>,
    faces: &mut Vec<Face>,
) {
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

    let base = vertices.len() as u16;
    vertices.extend(corners.iter().map(|&c| PackedVertex::pack(c).yz_swapped()));

    // 6 faces × 2 triangles, CCW winding viewed from outside the box.
    const QUADS: [[u16; 4]; 6] = [
        [0, 1, 2, 3], // -Z
        [5, 4, 7, 6], // +Z
        [4, 0, 3, 7], // -X
        [1, 5, 6, 2], // +X
        [4, 5, 1, 0], // -Y
        [3, 2, 6, 7], // +Y
    ];

    for quad in QUADS {
        faces.push(Face {
            a: base + quad[0],
            b: base + quad[1],
            c: base + quad[2],
            material,
            light,
        });
        faces.push(Face {
            a: base + quad[0],
            b: base + quad[2],
            c: base + quad[3],
            material,
            light,
        });
    }
}

/// An indexed collection of named collision meshes, mirroring
/// `CollisionFile`'s `std::map<std::string, shared_ptr<Collision>>`.
#[derive(Debug, Clone, Default)]
pub struct CollisionFile {
    collisions: BTreeMap<String, Collision>,
}

impl CollisionFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<S: ReadCursor>(&mut self, stream: &mut S) -> Result<(), CollisionError> {
        while !stream.eof() {
            let collision = Collision::load(stream)?;
            self.collisions.insert(collision.name.clone(), collision);
        }
        Ok(())
    }

    pub fn save<S: WriteCursor>(&self, stream: &mut S) -> Result<(), CollisionError> {
        for collision in self.collisions.values() {
            collision.save(stream)?;
        }
        Ok(())
    }

    /// Merge another file's entries into this one, overwriting on name
    /// collision.
    pub fn insert(&mut self, other: CollisionFile) {
        self.collisions.extend(other.collisions);
    }

    /// Insert a single already-constructed entry, keyed by its own name.
    /// Test-only fixture helper, mirrored across modules via `#[cfg(test)]`.
    #[cfg(test)]
    pub(crate) fn insert_direct(&mut self, collision: Collision) {
        self.collisions.insert(collision.name.clone(), collision);
    }

    /// Apply the material modifier to every contained mesh, dropping
    /// meshes that become empty. Returns the total number of faces removed.
    pub fn apply_modifier(&mut self, ignored_materials: &HashSet<u8>) -> usize {
        let mut removed = 0;
        self.collisions.retain(|_, collision| {
            removed += collision.apply_modifier(ignored_materials);
            !collision.is_empty()
        });
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Collision> {
        self.collisions.get(name)
    }

    pub fn len(&self) -> usize {
        self.collisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::OutputMemoryStream;

    fn sample_collision() -> Collision {
        Collision {
            name: "quad".into(),
            vertices: vec![
                PackedVertex::pack(Vec3::new(0.0, 0.0, 0.0)),
                PackedVertex::pack(Vec3::new(1.0, 0.0, 0.0)),
                PackedVertex::pack(Vec3::new(1.0, 0.0, 1.0)),
                PackedVertex::pack(Vec3::new(0.0, 0.0, 1.0)),
            ],
            faces: vec![
                Face { a: 0, b: 1, c: 2, material: 0, light: 0 },
                Face { a: 0, b: 2, c: 3, material: 1, light: 0 },
            ],
            bounds: CollisionBounds {
                aabb: BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0)),
                center: Vec3::new(0.5, 0.0, 0.5),
                radius: 1.0,
            },
        }
    }

    #[test]
    fn rejects_coll_version_tag() {
        let mut out = OutputMemoryStream::new();
        out.write_file_id(&TAG_COLL).unwrap();
        let bytes = out.into_inner();
        let mut input = crate::stream::InputMemoryStream::new(&bytes);
        let err = Collision::load(&mut input).unwrap_err();
        assert!(matches!(err, CollisionError::UnsupportedVersion { tag } if tag == TAG_COLL));
    }

    #[test]
    fn apply_modifier_removes_matching_material_and_is_idempotent() {
        let mut collision = sample_collision();
        let ignored: HashSet<u8> = [1].into_iter().collect();

        let removed_first = collision.apply_modifier(&ignored);
        assert_eq!(removed_first, 1);
        assert_eq!(collision.faces().len(), 1);

        let removed_second = collision.apply_modifier(&ignored);
        assert_eq!(removed_second, 0);
    }

    #[test]
    fn unpack_produces_index_triples_within_bounds() {
        let collision = sample_collision();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        collision.unpack(&mut vertices, &mut indices, &Mat4::IDENTITY, 0, true);

        assert_eq!(indices.len() % 3, 0);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn unpack_offsets_indices_by_start_index() {
        let collision = sample_collision();
        let mut vertices = vec![Vec3::ZERO; 5];
        let mut indices = Vec::new();
        collision.unpack(&mut vertices, &mut indices, &Mat4::IDENTITY, 5, false);

        assert!(indices.iter().all(|&i| i >= 5));
    }

    #[test]
    fn collision_file_apply_modifier_drops_emptied_meshes() {
        let mut file = CollisionFile::new();
        file.collisions.insert("quad".into(), sample_collision());

        let ignored: HashSet<u8> = [0, 1].into_iter().collect();
        let removed = file.apply_modifier(&ignored);

        assert_eq!(removed, 2);
        assert!(file.is_empty());
    }
}
