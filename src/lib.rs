//! Tiled, layered navigation mesh construction, caching, and query runtime.
//!
//! This crate voxelizes placed collision geometry tile-by-tile, derives a
//! Recast/Detour-style watershed navmesh per tile, compresses the result
//! into a layered tile cache that supports dynamic obstacles, and exposes
//! an A*/string-pulling query runtime over the cached tiles. It has no
//! engine or ECS dependency: callers own the [`Scene`](scene::Scene) and
//! drive [`WorldNavigation`] directly.
//!
//! ## Quick-start
//! 1. Build a [`crate::collision::CollisionFile`] and a [`crate::scene::Scene`] describing the world.
//! 2. Construct [`NavMeshSettings`] with [`NavMeshSettings::from_agent_and_bounds`].
//! 3. Create a [`WorldNavigation`] with [`WorldNavigation::new`] and call
//!    [`WorldNavigation::build_tiles`] for the tile range you need.
//! 4. Query with [`WorldNavigation::find_path`].

use std::num::{NonZeroU16, NonZeroU8};

use glam::{Vec2, Vec3};

mod build;
pub mod collision;
mod contour;
mod detail_mesh;
pub mod embed;
pub mod error;
mod heightfields;
mod layers;
pub mod math;
mod mesher;
pub mod orchestrator;
pub mod persist;
mod quadtree;
pub mod query;
mod regions;
pub mod scene;
pub mod stream;
pub mod tile_cache;
pub mod tiles;

#[cfg(feature = "debug-export")]
pub mod debug_export;

pub use error::{NavigationError, NavigationResult};
pub use heightfields::NavArea;

/// Walkable area tag. `0` is the default walkable area; higher numbers win
/// when two placements overlap the same span (see [`crate::heightfields`]).
/// There is no area value representing "unwalkable" — that's `None` at the
/// call sites that tag geometry, matching the original engine's area-stub
/// model (`NavArea` only ever describes walkable regions).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Area(pub u16);

/*
*   Neighbours:
*   0: (-1, 0),
*   1: (0, 1),
*   2: (1, 0),
*   3: (0, -1)
*/
pub(crate) fn get_neighbour_index(tile_side: usize, index: usize, dir: usize) -> usize {
    match dir {
        0 => index - 1,
        1 => index + tile_side,
        2 => index + 1,
        3 => index - tile_side,
        _ => panic!("not a valid direction"),
    }
}

/// Settings for height-corrected detail mesh generation.
#[derive(Debug, Clone)]
pub struct DetailMeshSettings {
    /// Maximum acceptable error in height between nav-mesh polygons and the
    /// true world surface, in cells.
    pub max_height_error: NonZeroU16,
    /// How often (in cells) to sample height when generating the
    /// height-corrected nav-mesh. Lower values cost more to generate.
    pub sample_step: NonZeroU8,
}

/// Validated settings for tile generation. Constructed through
/// [`NavMeshSettings::from_agent_and_bounds`] or [`NavMeshSettingsBuilder`]
/// so a caller can never reach the build pipeline with a degenerate
/// configuration (zero cell size, inverted region thresholds, and so on).
#[derive(Debug, Clone)]
pub struct NavMeshSettings {
    /// Horizontal resolution of the voxelized tile. Suggested: half the
    /// agent radius.
    pub cell_width: f32,
    /// Vertical resolution of the voxelized tile. Suggested: half of `cell_width`.
    pub cell_height: f32,
    /// Length of a tile's side in cells.
    pub tile_width: NonZeroU16,
    /// Extents of the world as measured from the origin on the XZ plane.
    pub world_half_extents: f32,
    /// Bottom extent of the world on the Y axis. The top extent is capped
    /// by `world_bottom_bound + cell_height * u16::MAX`.
    pub world_bottom_bound: f32,
    /// Maximum traversable slope, in radians.
    pub max_traversable_slope_radians: f32,
    /// Minimum open height for an area to be walkable, in `cell_height`s.
    pub walkable_height: u16,
    /// Pull the nav-mesh back from edges so any point on it is walkable for
    /// a character of this radius (in `cell_width`s).
    pub walkable_radius: u16,
    /// Maximum height difference still considered traversable (step/stair
    /// smoothing), in `cell_height`s.
    pub step_height: u16,
    /// Minimum region size in cells; smaller regions are discarded.
    pub min_region_area: u32,
    /// Maximum region size we will merge other regions into.
    pub max_region_area_to_merge_into: u32,
    /// Maximum edge length before it is split.
    pub max_edge_length: u16,
    /// Maximum contour simplification error on the XZ plane, in `cell_width`s.
    pub max_contour_simplification_error: f32,
    /// Partitioning strategy used by the region builder.
    pub partition_type: NavMeshPartitionType,
    /// Optional height-corrected detail mesh generation.
    pub detail_mesh: Option<DetailMeshSettings>,
    /// LOD suffixes to exclude from the scene before voxelization, e.g. `[1, 2]`
    /// drops any placement whose model name ends in `_lod1`/`_lod2`.
    pub excluded_lods: Vec<u32>,
}

/// Region-building strategy. `Watershed` produces higher-quality regions via
/// a distance-field flood; `Monotone` is a cheaper single-pass row sweep that
/// trades region quality for speed and skips the distance-field step
/// entirely. See `regions::build_regions` and `regions::build_regions_monotone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavMeshPartitionType {
    #[default]
    Watershed,
    Monotone,
}

impl NavMeshSettings {
    /// Reasonable defaults derived from agent size and world bounds.
    pub fn from_agent_and_bounds(
        agent_radius: f32,
        agent_height: f32,
        world_half_extents: f32,
        world_bottom_bound: f32,
    ) -> Self {
        let cell_width = agent_radius / 2.0;
        let cell_height = agent_radius / 4.0;
        let walkable_height = (agent_height / cell_height) as u16;

        Self {
            cell_width,
            cell_height,
            tile_width: NonZeroU16::new(120).unwrap(),
            world_half_extents: world_half_extents.abs(),
            world_bottom_bound,
            max_traversable_slope_radians: 45.0_f32.to_radians(),
            walkable_height,
            walkable_radius: 2,
            step_height: 3,
            min_region_area: 100,
            max_region_area_to_merge_into: 500,
            max_edge_length: 80,
            max_contour_simplification_error: 1.3,
            partition_type: NavMeshPartitionType::Watershed,
            detail_mesh: None,
            excluded_lods: Vec::new(),
        }
    }

    /// Reject settings that would make the pipeline divide by zero, loop
    /// forever, or silently produce an empty navmesh.
    pub fn validate(&self) -> Result<(), NavigationError> {
        if self.cell_width <= 0.0 || self.cell_height <= 0.0 {
            return Err(NavigationError::InvalidSettings(
                "cell_width and cell_height must be positive".into(),
            ));
        }
        if self.max_traversable_slope_radians <= 0.0
            || self.max_traversable_slope_radians >= std::f32::consts::FRAC_PI_2
        {
            return Err(NavigationError::InvalidSettings(
                "max_traversable_slope_radians must be in (0, pi/2)".into(),
            ));
        }
        if self.min_region_area > self.max_region_area_to_merge_into {
            return Err(NavigationError::InvalidSettings(
                "min_region_area must not exceed max_region_area_to_merge_into".into(),
            ));
        }
        Ok(())
    }

    pub fn with_walkable_radius(mut self, walkable_radius: u16) -> Self {
        self.walkable_radius = walkable_radius;
        self
    }
    pub fn with_tile_width(mut self, tile_width: NonZeroU16) -> Self {
        self.tile_width = tile_width;
        self
    }
    pub fn with_traversable_slope(mut self, traversable_slope: f32) -> Self {
        self.max_traversable_slope_radians = traversable_slope;
        self
    }
    pub fn with_step_height(mut self, step_height: u16) -> Self {
        self.step_height = step_height;
        self
    }
    pub fn with_region_area(mut self, min_region_area: u32, max_region_area_to_merge_into: u32) -> Self {
        self.min_region_area = min_region_area;
        self.max_region_area_to_merge_into = max_region_area_to_merge_into;
        self
    }
    pub fn with_max_contour_simplification_error(mut self, value: f32) -> Self {
        self.max_contour_simplification_error = value;
        self
    }
    pub fn with_max_edge_length(mut self, max_edge_length: u16) -> Self {
        self.max_edge_length = max_edge_length;
        self
    }
    pub fn with_detail_mesh(mut self, detail_mesh: DetailMeshSettings) -> Self {
        self.detail_mesh = Some(detail_mesh);
        self
    }
    pub fn with_excluded_lods(mut self, excluded_lods: Vec<u32>) -> Self {
        self.excluded_lods = excluded_lods;
        self
    }

    #[inline]
    pub fn get_tile_size(&self) -> f32 {
        self.cell_width * f32::from(self.tile_width.get())
    }
    #[inline]
    pub fn get_border_size(&self) -> f32 {
        f32::from(self.walkable_radius) * self.cell_width
    }
    #[inline]
    pub fn get_tile_containing_position(&self, world_position: Vec2) -> glam::UVec2 {
        let offset_world = world_position + self.world_half_extents;
        (offset_world / self.get_tile_size()).as_uvec2()
    }
    #[inline]
    pub fn get_tile_origin(&self, tile: glam::UVec2) -> Vec2 {
        tile.as_vec2() * self.get_tile_size() - self.world_half_extents
    }
    #[inline]
    pub fn get_tile_origin_with_border(&self, tile: glam::UVec2) -> Vec2 {
        self.get_tile_origin(tile) - self.get_border_size()
    }
    #[inline]
    pub fn get_tile_side_with_border(&self) -> usize {
        usize::from(self.tile_width.get()) + usize::from(self.walkable_radius) * 2
    }
    #[inline]
    pub fn get_tile_bounds(&self, tile: glam::UVec2) -> (Vec2, Vec2) {
        let tile_size = self.get_tile_size();
        let min_bound = tile.as_vec2() * tile_size - self.world_half_extents;
        let max_bound = min_bound + tile_size;
        (min_bound, max_bound)
    }

    /// 3D bounding box of a tile, spanning the configured Y range.
    pub fn get_tile_bounding_box(&self, tile: glam::UVec2) -> math::BoundingBox {
        let (min_xz, max_xz) = self.get_tile_bounds(tile);
        let top = self.world_bottom_bound + self.cell_height * f32::from(u16::MAX);
        math::BoundingBox::new(
            Vec3::new(min_xz.x, self.world_bottom_bound, min_xz.y),
            Vec3::new(max_xz.x, top, max_xz.y),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_cell_width() {
        let mut settings = NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, 0.0);
        settings.cell_width = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_region_thresholds() {
        let settings = NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, 0.0)
            .with_region_area(500, 100);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        let settings = NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, 0.0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn tile_containing_origin_maps_to_the_central_tile() {
        let settings = NavMeshSettings::from_agent_and_bounds(0.5, 2.0, 64.0, 0.0);
        let tile = settings.get_tile_containing_position(Vec2::ZERO);
        let (min, max) = settings.get_tile_bounds(tile);
        assert!(min.x <= 0.0 && max.x >= 0.0);
        assert!(min.y <= 0.0 && max.y >= 0.0);
    }
}
