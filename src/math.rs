//! Geometry primitives shared by every component: axis-aligned boxes, 2D
//! rects, quantized-vertex packing, and the intersection tests the quadtree
//! and tile builder both rely on.

use glam::{IVec3, IVec4, UVec4, Vec2, Vec3};

/// Result of a box/box or box/point containment test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    Outside,
    Intersects,
    Inside,
}

/// An axis-aligned rectangle on the XZ plane, used by the quadtree and for
/// scene/tile footprints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_corners(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            min: Vec2::new(left, top),
            max: Vec2::new(right, bottom),
        }
    }

    /// An undefined rect: any `merge` with a real point replaces it entirely.
    pub fn undefined() -> Self {
        Self {
            min: Vec2::splat(f32::INFINITY),
            max: Vec2::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_origin_and_size(origin: Vec2, size: Vec2) -> Self {
        Self::new(origin, origin + size)
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn half_size(&self) -> Vec2 {
        self.size() * 0.5
    }

    pub fn contains_point(&self, point: Vec2) -> Intersection {
        if point.x < self.min.x || point.y < self.min.y || point.x > self.max.x || point.y > self.max.y {
            Intersection::Outside
        } else {
            Intersection::Inside
        }
    }

    /// Classify `other` relative to `self`: outside, partially overlapping,
    /// or fully contained.
    pub fn classify(&self, other: &Rect) -> Intersection {
        if other.max.x < self.min.x
            || other.min.x > self.max.x
            || other.max.y < self.min.y
            || other.min.y > self.max.y
        {
            Intersection::Outside
        } else if other.min.x < self.min.x
            || other.max.x > self.max.x
            || other.min.y < self.min.y
            || other.max.y > self.max.y
        {
            Intersection::Intersects
        } else {
            Intersection::Inside
        }
    }

    pub fn merge_point(&mut self, point: Vec2) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(&mut self, other: &Rect) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// An axis-aligned 3D bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn undefined() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::undefined();
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn merge_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn contains_point(&self, point: Vec3) -> Intersection {
        if point.x < self.min.x
            || point.x > self.max.x
            || point.y < self.min.y
            || point.y > self.max.y
            || point.z < self.min.z
            || point.z > self.max.z
        {
            Intersection::Outside
        } else {
            Intersection::Inside
        }
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Project onto the XZ plane, matching `Scene::Query`'s use of indices
    /// (0, 2) and (3, 5) of a flattened 6-float AABB.
    pub fn xz_footprint(&self) -> Rect {
        Rect::new(
            Vec2::new(self.min.x, self.min.z),
            Vec2::new(self.max.x, self.max.z),
        )
    }

    /// Transform all eight corners by `transform` and return the resulting
    /// world-space AABB. Mirrors `ApplyTransform` in the original scene code.
    pub fn transformed(&self, transform: &glam::Mat4) -> BoundingBox {
        let corners = [
            self.min,
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            self.max,
        ];

        let mut result = BoundingBox::undefined();
        for corner in corners {
            let transformed = transform.transform_point3(corner);
            result.merge_point(transformed);
        }
        result
    }
}

/// A packed int16 vertex with an implicit 1/128 scale, matching the COL
/// format's on-disk vertex representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PackedVertex {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl PackedVertex {
    pub const SCALE: f32 = 128.0;

    pub fn pack(v: Vec3) -> Self {
        Self {
            x: (v.x * Self::SCALE).round() as i16,
            y: (v.y * Self::SCALE).round() as i16,
            z: (v.z * Self::SCALE).round() as i16,
        }
    }

    pub fn unpack(self) -> Vec3 {
        Vec3::new(
            self.x as f32 / Self::SCALE,
            self.y as f32 / Self::SCALE,
            self.z as f32 / Self::SCALE,
        )
    }

    /// Swap Y and Z, used once at the collision-loader ingest boundary to
    /// convert the on-disk Y-up convention into this crate's Z-up world.
    pub fn yz_swapped(self) -> Self {
        Self {
            x: self.x,
            y: self.z,
            z: self.y,
        }
    }
}

/// Round up to the next power of two.
pub fn next_power_of_two(value: u32) -> u32 {
    value.next_power_of_two()
}

/// log2 floor of a value, used to derive `max_polys_per_tile` from `max_tiles`.
pub fn log_base_two(value: u32) -> u32 {
    31 - value.leading_zeros()
}

/// Integer cell coordinate, used for tile-grid addressing.
pub type TileCoord = IVec3;

/// Signed twice-area of the triangle `a, b, c` projected onto the XZ plane,
/// in integer cell-grid units. Shared by the contour simplifier and the
/// polygon mesher for all of their collinearity/orientation tests.
fn area_sqr(a: IVec4, b: IVec4, c: IVec4) -> i32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

pub fn collinear(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area_sqr(a, b, c) == 0
}

/// `true` if `c` is strictly left of the directed line `a -> b`.
pub fn left(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area_sqr(a, b, c) < 0
}

/// `true` if `c` is left of or on the directed line `a -> b`.
pub fn left_on(a: IVec4, b: IVec4, c: IVec4) -> bool {
    area_sqr(a, b, c) <= 0
}

/// `true` if `c` lies on the segment `a-b` (only valid when `a`, `b`, `c` are collinear).
fn between(a: IVec4, b: IVec4, c: IVec4) -> bool {
    if !collinear(a, b, c) {
        return false;
    }

    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// Proper segment intersection: `a-b` and `c-d` cross at a point interior to both.
pub fn intersect_prop(a: IVec4, b: IVec4, c: IVec4, d: IVec4) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }

    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Segment intersection including touching endpoints.
pub fn intersect(a: IVec4, b: IVec4, c: IVec4, d: IVec4) -> bool {
    intersect_prop(a, b, c, d) || between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

/// `true` if `point` lies within the interior cone at outline vertex `i`,
/// i.e. a diagonal from vertex `i` to `point` would stay inside the polygon
/// at that corner. Used by polygon triangulation and contour hole-merging.
pub fn in_cone(i: usize, outline_vertices: &[UVec4], point: UVec4) -> bool {
    let point_i = outline_vertices[i];
    let point_next = outline_vertices[(i + 1) % outline_vertices.len()];
    let point_previous = outline_vertices[(outline_vertices.len() + i - 1) % outline_vertices.len()];

    if left_on(point_i.as_ivec4(), point.as_ivec4(), point_next.as_ivec4()) {
        return left(point_i.as_ivec4(), point.as_ivec4(), point_previous.as_ivec4())
            && left(point.as_ivec4(), point_i.as_ivec4(), point_next.as_ivec4());
    }

    !left_on(point_i.as_ivec4(), point.as_ivec4(), point_next.as_ivec4())
        && left_on(point.as_ivec4(), point_i.as_ivec4(), point_previous.as_ivec4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_classify_outside() {
        let a = Rect::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = Rect::from_corners(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.classify(&b), Intersection::Outside);
    }

    #[test]
    fn rect_classify_inside() {
        let a = Rect::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = Rect::from_corners(2.0, 2.0, 5.0, 5.0);
        assert_eq!(a.classify(&b), Intersection::Inside);
    }

    #[test]
    fn left_is_strict_and_left_on_admits_collinear() {
        let a = IVec4::new(0, 0, 0, 0);
        let b = IVec4::new(10, 0, 0, 0);
        let on_line = IVec4::new(5, 0, 0, 0);
        let above = IVec4::new(5, 0, -5, 0);
        assert!(!left(a, b, on_line));
        assert!(left_on(a, b, on_line));
        assert!(left(a, b, above));
    }

    #[test]
    fn intersect_detects_crossing_segments() {
        let a = IVec4::new(0, 0, 0, 0);
        let b = IVec4::new(10, 0, 10, 0);
        let c = IVec4::new(0, 0, 10, 0);
        let d = IVec4::new(10, 0, 0, 0);
        assert!(intersect(a, b, c, d));
        assert!(intersect_prop(a, b, c, d));
    }

    #[test]
    fn intersect_rejects_parallel_segments() {
        let a = IVec4::new(0, 0, 0, 0);
        let b = IVec4::new(10, 0, 0, 0);
        let c = IVec4::new(0, 0, 5, 0);
        let d = IVec4::new(10, 0, 5, 0);
        assert!(!intersect(a, b, c, d));
    }

    #[test]
    fn packed_vertex_roundtrips_within_quantization() {
        let v = Vec3::new(1.5, -2.25, 3.75);
        let packed = PackedVertex::pack(v);
        let unpacked = packed.unpack();
        assert!((unpacked - v).length() < 1.0 / PackedVertex::SCALE);
    }

    #[test]
    fn yz_swap_is_involution() {
        let packed = PackedVertex { x: 1, y: 2, z: 3 };
        assert_eq!(packed.yz_swapped().yz_swapped(), packed);
    }

    #[test]
    fn log_base_two_matches_power_of_two_inputs() {
        assert_eq!(log_base_two(1), 0);
        assert_eq!(log_base_two(2), 1);
        assert_eq!(log_base_two(1024), 10);
    }

    #[test]
    fn bounding_box_transformed_matches_merge_of_corners() {
        let bb = BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let transform = glam::Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let transformed = bb.transformed(&transform);
        assert_eq!(transformed.min, Vec3::new(4.0, -1.0, -1.0));
        assert_eq!(transformed.max, Vec3::new(6.0, 1.0, 1.0));
    }
}
