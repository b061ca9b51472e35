//! Scene store (C3): the placement list the tile builder voxelizes against.
//! Grounded on `original_source/scene/Scene.{h,cpp}`. Nodes are held in a
//! slot map so the quadtree can index them by plain `usize` handle rather
//! than a raw pointer, per the crate's quadtree re-architecture.

use glam::{Mat4, Quat, Vec3};

use crate::collision::CollisionFile;
use crate::math::{BoundingBox, Rect};
use crate::quadtree::Quadtree;

/// World extent the original hardcodes as `Rect(-5000, -5000, 5000, 5000)`.
const WORLD_HALF_EXTENT: f32 = 5000.0;

/// Bit in [`SceneNode::flags`] marking a placement as an LOD stand-in rather
/// than the primary model. Set in the placement's `flags` MSB, matching the
/// original's placement record layout.
pub const LOD_FLAG: u32 = 1 << 31;

/// A placed instance of a named collision model.
#[derive(Debug, Clone)]
pub struct SceneNode {
    model_id: u32,
    model: String,
    position: Vec3,
    rotation: Quat,
    /// Local-space bounds of the model's collision mesh, cached at insert
    /// time so `set_position`/`set_rotation` can recompute world bounds
    /// without re-touching the collision library.
    local_bounds: BoundingBox,
    world_bounds: BoundingBox,
    /// Interior/cell id the placement belongs to, or a negative value for
    /// placements that aren't scoped to an interior.
    interior: i32,
    /// Placement flag bits; bit 31 ([`LOD_FLAG`]) marks an LOD stand-in.
    flags: u32,
}

impl SceneNode {
    pub fn model_id(&self) -> u32 {
        self.model_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn world_bounds(&self) -> BoundingBox {
        self.world_bounds
    }

    pub fn interior(&self) -> i32 {
        self.interior
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_lod(&self) -> bool {
        self.flags & LOD_FLAG != 0
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    fn recompute_world_bounds(&mut self) {
        self.world_bounds = self.local_bounds.transformed(&self.transform());
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.recompute_world_bounds();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.recompute_world_bounds();
    }
}

/// Opaque handle to a node inserted into a [`Scene`]. Stable across
/// insertions and removals of other nodes (slot reuse is keyed by
/// generation, not index reuse alone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// The reason a node could not be added, mirroring the original's
/// log-and-reject behavior on a missing collision model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddNodeError {
    #[error("no collision model named {0:?} is registered")]
    UnknownModel(String),
}

/// The placed-object index for one world: a slot map of [`SceneNode`]s plus
/// a quadtree over their XZ footprints.
pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
    tree: Quadtree<NodeHandle>,
    bounds: BoundingBox,
    len: usize,
}

impl Scene {
    pub fn new() -> Self {
        let world_box = Rect::from_corners(
            -WORLD_HALF_EXTENT,
            -WORLD_HALF_EXTENT,
            WORLD_HALF_EXTENT,
            WORLD_HALF_EXTENT,
        );
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            tree: Quadtree::new(world_box),
            bounds: BoundingBox::undefined(),
            len: 0,
        }
    }

    /// True only once every node has been removed, unlike the original's
    /// `Empty()` which always returned `false` regardless of content.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Look up `model` in `collisions`, compute its transformed world
    /// bounds, and insert into the slot map and quadtree. Returns
    /// `AddNodeError::UnknownModel` (logged by the caller) if the model
    /// does not exist, matching the original's reject-and-log behavior
    /// rather than panicking.
    #[allow(clippy::too_many_arguments)]
    pub fn add_node(
        &mut self,
        collisions: &CollisionFile,
        model_id: u32,
        model: &str,
        position: Vec3,
        rotation: Quat,
        interior: i32,
        flags: u32,
    ) -> Result<NodeHandle, AddNodeError> {
        let collision = collisions
            .get(model)
            .ok_or_else(|| AddNodeError::UnknownModel(model.to_string()))?;

        let mut node = SceneNode {
            model_id,
            model: model.to_string(),
            position,
            rotation,
            local_bounds: collision.bounds().aabb,
            world_bounds: BoundingBox::undefined(),
            interior,
            flags,
        };
        node.recompute_world_bounds();

        let world_bounds = node.world_bounds;
        let handle = self.insert_slot(node);

        self.tree.add(handle, world_bounds.xz_footprint());
        self.bounds.merge(&world_bounds);
        self.len += 1;

        Ok(handle)
    }

    fn insert_slot(&mut self, node: SceneNode) -> NodeHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeHandle { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, node: Some(node) });
            NodeHandle { index, generation: 0 }
        }
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&SceneNode> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    /// Remove a previously added node. The original's `RemoveNode` was an
    /// empty stub; this implementation actually removes the node from both
    /// the slot map and the quadtree, and bumps the slot's generation so
    /// stale handles fail `get` rather than aliasing a reused slot.
    pub fn remove_node(&mut self, handle: NodeHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation {
            return false;
        }
        let Some(node) = slot.node.take() else {
            return false;
        };

        self.tree.remove(handle, node.world_bounds.xz_footprint());
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;

        self.recompute_bounds();
        true
    }

    fn recompute_bounds(&mut self) {
        let mut bounds = BoundingBox::undefined();
        for slot in &self.slots {
            if let Some(node) = &slot.node {
                bounds.merge(&node.world_bounds);
            }
        }
        self.bounds = bounds;
    }

    /// Reposition or re-rotate a node in place, updating the quadtree entry
    /// for its new footprint.
    pub fn update_transform(&mut self, handle: NodeHandle, position: Vec3, rotation: Quat) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation {
            return false;
        }
        let Some(node) = slot.node.as_mut() else {
            return false;
        };

        let old_footprint = node.world_bounds.xz_footprint();
        node.set_position(position);
        node.set_rotation(rotation);
        let new_footprint = node.world_bounds.xz_footprint();

        self.tree.remove(handle, old_footprint);
        self.tree.add(handle, new_footprint);
        self.recompute_bounds();
        true
    }

    /// All nodes whose XZ footprint is not entirely outside `query_box`.
    pub fn query(&self, query_box: BoundingBox) -> Vec<NodeHandle> {
        self.tree.query(query_box.xz_footprint())
    }

    /// Drop every node matching any of three predicates: its `model_id` is
    /// in `ignored_models`, its `interior` is in `excluded_interiors`, or
    /// `exclude_lods` is set and the node's `flags` carries [`LOD_FLAG`].
    /// Unlike the original's commented-out, effectively dead `exclude_lods`
    /// branch, this filter actually runs. Returns the number of nodes removed.
    pub fn apply_placement_modifier(
        &mut self,
        ignored_models: &[u32],
        excluded_interiors: &[i32],
        exclude_lods: bool,
    ) -> usize {
        if ignored_models.is_empty() && excluded_interiors.is_empty() && !exclude_lods {
            return 0;
        }

        let to_remove: Vec<NodeHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let node = slot.node.as_ref()?;
                let matches = ignored_models.contains(&node.model_id)
                    || excluded_interiors.contains(&node.interior)
                    || (exclude_lods && node.is_lod());
                if matches {
                    Some(NodeHandle { index: index as u32, generation: slot.generation })
                } else {
                    None
                }
            })
            .collect();

        let removed = to_remove.len();
        for handle in to_remove {
            self.remove_node(handle);
        }
        removed
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{CollisionBounds, Face};

    fn collisions_with_unit_cube(name: &str) -> CollisionFile {
        use crate::math::PackedVertex;
        let collision = crate::collision::Collision::from_parts(
            name.to_string(),
            vec![
                PackedVertex::pack(Vec3::new(-0.5, -0.5, -0.5)),
                PackedVertex::pack(Vec3::new(0.5, 0.5, 0.5)),
            ],
            vec![Face { a: 0, b: 0, c: 0, material: 0, light: 0 }],
            CollisionBounds {
                aabb: BoundingBox::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
                center: Vec3::ZERO,
                radius: 0.5,
            },
        );

        let mut file = CollisionFile::new();
        file.insert_direct(collision);
        file
    }

    #[test]
    fn add_node_rejects_unknown_model() {
        let collisions = CollisionFile::new();
        let mut scene = Scene::new();
        let err = scene
            .add_node(&collisions, 1, "missing", Vec3::ZERO, Quat::IDENTITY, -1, 0)
            .unwrap_err();
        assert!(matches!(err, AddNodeError::UnknownModel(name) if name == "missing"));
    }

    #[test]
    fn add_then_query_finds_node_at_its_position() {
        let collisions = collisions_with_unit_cube("cube");
        let mut scene = Scene::new();
        scene
            .add_node(&collisions, 1, "cube", Vec3::new(10.0, 0.0, 10.0), Quat::IDENTITY, -1, 0)
            .unwrap();

        let found = scene.query(BoundingBox::new(
            Vec3::new(5.0, -5.0, 5.0),
            Vec3::new(15.0, 5.0, 15.0),
        ));
        assert_eq!(found.len(), 1);
        assert!(!scene.is_empty());
    }

    #[test]
    fn remove_node_drops_it_from_query_and_empties_scene() {
        let collisions = collisions_with_unit_cube("cube");
        let mut scene = Scene::new();
        let handle = scene
            .add_node(&collisions, 1, "cube", Vec3::ZERO, Quat::IDENTITY, -1, 0)
            .unwrap();

        assert!(scene.remove_node(handle));
        assert!(scene.is_empty());
        assert!(scene.query(BoundingBox::new(Vec3::splat(-100.0), Vec3::splat(100.0))).is_empty());
    }

    #[test]
    fn removed_handle_is_not_reused_by_get() {
        let collisions = collisions_with_unit_cube("cube");
        let mut scene = Scene::new();
        let handle = scene
            .add_node(&collisions, 1, "cube", Vec3::ZERO, Quat::IDENTITY, -1, 0)
            .unwrap();
        scene.remove_node(handle);

        assert!(scene.get(handle).is_none());
    }

    #[test]
    fn apply_placement_modifier_removes_excluded_lod() {
        let collisions = collisions_with_unit_cube("rock_lod2");
        let mut scene = Scene::new();
        scene
            .add_node(&collisions, 1, "rock_lod2", Vec3::ZERO, Quat::IDENTITY, -1, LOD_FLAG)
            .unwrap();

        let removed = scene.apply_placement_modifier(&[], &[], true);
        assert_eq!(removed, 1);
        assert!(scene.is_empty());
    }

    #[test]
    fn apply_placement_modifier_removes_ignored_model_and_excluded_interior() {
        let collisions = collisions_with_unit_cube("cube");
        let mut scene = Scene::new();
        scene
            .add_node(&collisions, 7, "cube", Vec3::ZERO, Quat::IDENTITY, -1, 0)
            .unwrap();
        scene
            .add_node(&collisions, 8, "cube", Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, 3, 0)
            .unwrap();
        scene
            .add_node(&collisions, 9, "cube", Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, -1, 0)
            .unwrap();

        let removed = scene.apply_placement_modifier(&[7], &[3], false);
        assert_eq!(removed, 2);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn apply_placement_modifier_is_idempotent() {
        let collisions = collisions_with_unit_cube("rock_lod2");
        let mut scene = Scene::new();
        scene
            .add_node(&collisions, 1, "rock_lod2", Vec3::ZERO, Quat::IDENTITY, -1, LOD_FLAG)
            .unwrap();

        assert_eq!(scene.apply_placement_modifier(&[], &[], true), 1);
        assert_eq!(scene.apply_placement_modifier(&[], &[], true), 0);
    }
}
