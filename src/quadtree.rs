//! Fixed-depth XZ quadtree over a configured world rect, keyed on
//! axis-aligned footprint rects. Ported from the original `Quadtree`, which
//! stores raw pointers to externally-owned values; this crate stores
//! `usize` handles into the caller's own slot map instead (the "raw pointer
//! arrays with side-channel sizes" re-architecture strategy applied to the
//! quadtree's own value storage).

use glam::Vec2;

use crate::math::{Intersection, Rect};

const QUADTREE_THRESHOLD: usize = 16;
const QUADTREE_MAX_DEPTH: usize = 8;

/// A handle plus the footprint it was inserted with. The quadtree never
/// dereferences `handle`; it is opaque to this module and round-tripped
/// back to the caller on `query`.
#[derive(Debug, Clone, Copy)]
struct Entry<H> {
    handle: H,
    footprint: Rect,
}

#[derive(Default)]
struct Node<H> {
    children: Option<Box<[Node<H>; 4]>>,
    values: Vec<Entry<H>>,
}

impl<H> Node<H> {
    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Quadrant indices, matching the original's NW/NE/SW/SE split order.
const NORTH_WEST: usize = 0;
const NORTH_EAST: usize = 1;
const SOUTH_WEST: usize = 2;
const SOUTH_EAST: usize = 3;

pub struct Quadtree<H> {
    world_box: Rect,
    root: Node<H>,
}

impl<H: Copy + PartialEq> Quadtree<H> {
    pub fn new(world_box: Rect) -> Self {
        Self {
            world_box,
            root: Node::default(),
        }
    }

    pub fn add(&mut self, handle: H, footprint: Rect) {
        let world_box = self.world_box;
        Self::add_to(&mut self.root, 0, world_box, Entry { handle, footprint });
    }

    pub fn remove(&mut self, handle: H, footprint: Rect) {
        let world_box = self.world_box;
        Self::remove_from(&mut self.root, world_box, handle, footprint);
    }

    /// All values whose footprint is not entirely outside `query_box`.
    pub fn query(&self, query_box: Rect) -> Vec<H> {
        let mut out = Vec::new();
        Self::query_node(&self.root, self.world_box, query_box, &mut out);
        out
    }

    fn compute_child_box(box_: Rect, quadrant: usize) -> Rect {
        let origin = box_.min;
        let child_size = box_.half_size();

        match quadrant {
            NORTH_WEST => Rect::from_origin_and_size(
                Vec2::new(origin.x, origin.y + child_size.y),
                child_size,
            ),
            NORTH_EAST => Rect::from_origin_and_size(origin + child_size, child_size),
            SOUTH_WEST => Rect::from_origin_and_size(origin, child_size),
            SOUTH_EAST => Rect::from_origin_and_size(
                Vec2::new(origin.x + child_size.x, origin.y),
                child_size,
            ),
            _ => unreachable!("invalid quadrant index"),
        }
    }

    /// -1 (as `None`) if `value_box` straddles the center split.
    fn quadrant_of(node_box: Rect, value_box: Rect) -> Option<usize> {
        let center = node_box.center();

        if value_box.max.x < center.x {
            if value_box.min.y > center.y {
                Some(NORTH_WEST)
            } else if value_box.max.y <= center.y {
                Some(SOUTH_WEST)
            } else {
                None
            }
        } else if value_box.min.x >= center.x {
            if value_box.min.y > center.y {
                Some(NORTH_EAST)
            } else if value_box.max.y <= center.y {
                Some(SOUTH_EAST)
            } else {
                None
            }
        } else {
            None
        }
    }

    fn add_to(node: &mut Node<H>, depth: usize, box_: Rect, entry: Entry<H>) {
        if node.is_leaf() {
            if depth >= QUADTREE_MAX_DEPTH || node.values.len() < QUADTREE_THRESHOLD {
                node.values.push(entry);
            } else {
                Self::split(node, box_);
                Self::add_to(node, depth, box_, entry);
            }
        } else {
            match Self::quadrant_of(box_, entry.footprint) {
                Some(i) => {
                    let child_box = Self::compute_child_box(box_, i);
                    let children = node.children.as_mut().expect("non-leaf has children");
                    Self::add_to(&mut children[i], depth + 1, child_box, entry);
                }
                None => node.values.push(entry),
            }
        }
    }

    fn split(node: &mut Node<H>, box_: Rect) {
        let mut children: [Node<H>; 4] = Default::default();

        let mut remaining = Vec::new();
        for entry in node.values.drain(..) {
            match Self::quadrant_of(box_, entry.footprint) {
                Some(i) => children[i].values.push(entry),
                None => remaining.push(entry),
            }
        }

        node.values = remaining;
        node.children = Some(Box::new(children));
    }

    /// Returns true if `node`'s subtree should be considered for merging by
    /// its parent (mirrors the original's `Remove` returning whether to try
    /// `TryMerge`).
    fn remove_from(node: &mut Node<H>, box_: Rect, handle: H, footprint: Rect) -> bool {
        if node.is_leaf() {
            Self::remove_value(node, handle);
            true
        } else {
            match Self::quadrant_of(box_, footprint) {
                Some(i) => {
                    let child_box = Self::compute_child_box(box_, i);
                    let children = node.children.as_mut().expect("non-leaf has children");
                    if Self::remove_from(&mut children[i], child_box, handle, footprint) {
                        Self::try_merge(node)
                    } else {
                        false
                    }
                }
                None => {
                    Self::remove_value(node, handle);
                    false
                }
            }
        }
    }

    fn remove_value(node: &mut Node<H>, handle: H) {
        if let Some(pos) = node.values.iter().position(|e| e.handle == handle) {
            node.values.swap_remove(pos);
        }
    }

    fn try_merge(node: &mut Node<H>) -> bool {
        let Some(children) = &node.children else {
            return false;
        };

        let mut total = node.values.len();
        for child in children.iter() {
            if !child.is_leaf() {
                return false;
            }
            total += child.values.len();
        }

        if total <= QUADTREE_THRESHOLD {
            let children = node.children.take().expect("checked above");
            node.values.reserve(total - node.values.len());
            for child in children.into_iter() {
                node.values.extend(child.values);
            }
            true
        } else {
            false
        }
    }

    fn query_node(node: &Node<H>, box_: Rect, query_box: Rect, out: &mut Vec<H>) {
        for entry in &node.values {
            if query_box.classify(&entry.footprint) != Intersection::Outside {
                out.push(entry.handle);
            }
        }

        if let Some(children) = &node.children {
            for (i, child) in children.iter().enumerate() {
                let child_box = Self::compute_child_box(box_, i);
                if query_box.classify(&child_box) != Intersection::Outside {
                    Self::query_node(child, child_box, query_box, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Quadtree<u32> {
        Quadtree::new(Rect::from_corners(-1000.0, -1000.0, 1000.0, 1000.0))
    }

    #[test]
    fn query_returns_all_admitted_values_over_world_rect() {
        let mut tree = world();
        for i in 0..64u32 {
            let x = (i as f32) * 5.0 - 100.0;
            tree.add(i, Rect::from_corners(x, x, x + 1.0, x + 1.0));
        }

        let mut found = tree.query(Rect::from_corners(-1000.0, -1000.0, 1000.0, 1000.0));
        found.sort_unstable();
        assert_eq!(found, (0..64u32).collect::<Vec<_>>());
    }

    #[test]
    fn query_excludes_non_overlapping_footprints() {
        let mut tree = world();
        tree.add(1, Rect::from_corners(0.0, 0.0, 1.0, 1.0));
        tree.add(2, Rect::from_corners(500.0, 500.0, 501.0, 501.0));

        let found = tree.query(Rect::from_corners(-10.0, -10.0, 10.0, 10.0));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn splits_past_threshold_and_still_finds_values() {
        let mut tree = world();
        for i in 0..64u32 {
            tree.add(i, Rect::from_corners(1.0, 1.0, 2.0, 2.0));
        }

        let found = tree.query(Rect::from_corners(0.0, 0.0, 3.0, 3.0));
        assert_eq!(found.len(), 64);
    }

    #[test]
    fn remove_then_query_drops_the_value() {
        let mut tree = world();
        let footprint = Rect::from_corners(0.0, 0.0, 1.0, 1.0);
        tree.add(7, footprint);
        tree.remove(7, footprint);

        let found = tree.query(Rect::from_corners(-1000.0, -1000.0, 1000.0, 1000.0));
        assert!(found.is_empty());
    }

    #[test]
    fn merge_reassembles_after_removals_drop_below_threshold() {
        let mut tree = world();
        let footprints: Vec<Rect> = (0..40u32)
            .map(|i| {
                let x = 1.0 + (i as f32) * 0.01;
                Rect::from_corners(x, x, x + 0.01, x + 0.01)
            })
            .collect();

        for (i, footprint) in footprints.iter().enumerate() {
            tree.add(i as u32, *footprint);
        }

        for (i, footprint) in footprints.iter().enumerate().skip(5) {
            tree.remove(i as u32, *footprint);
        }

        let found = tree.query(Rect::from_corners(-1000.0, -1000.0, 1000.0, 1000.0));
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn straddling_footprint_is_still_queryable() {
        let mut tree = world();
        // Straddles the root's center split (0, 0).
        let footprint = Rect::from_corners(-1.0, -1.0, 1.0, 1.0);
        tree.add(99, footprint);

        let found = tree.query(Rect::from_corners(-2.0, -2.0, 2.0, 2.0));
        assert_eq!(found, vec![99]);
    }
}
