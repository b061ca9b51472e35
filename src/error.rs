//! Typed error model, one enum per fallible subsystem. Mirrors the
//! propagation policy in the error-handling design: unit-skip failures are
//! logged and swallowed at the call site, while state-invalidating failures
//! are returned up through `?` as one of these variants.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("io error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected end of stream: wanted {wanted} bytes, had {available}")]
    UnexpectedEof { wanted: usize, available: usize },
    #[error("string field of {len} bytes is not valid UTF-8")]
    InvalidString { len: usize },
}

#[derive(Debug, Error)]
pub enum CollisionError {
    #[error("unsupported collision version tag {tag:?}")]
    UnsupportedVersion { tag: [u8; 4] },
    #[error("collision block truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("face references vertex {index} but mesh has {vertex_count} vertices")]
    BadFaceIndex { index: u16, vertex_count: usize },
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to allocate heightfield for tile ({x}, {z}): {reason}")]
    HeightfieldAllocation { x: i32, z: i32, reason: &'static str },
    #[error("region build failed for tile ({x}, {z}): {reason}")]
    RegionBuild { x: i32, z: i32, reason: &'static str },
    #[error("scratch file io error at {path:?}: {source}")]
    ScratchIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("contour simplification failed for tile ({x}, {z})")]
    ContourSimplification { x: i32, z: i32 },
    #[error("polygon mesh build failed for tile ({x}, {z}): {reason}")]
    PolyMesh { x: i32, z: i32, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum TileCacheError {
    #[error("no tile at ({tx}, {ty}, layer {layer})")]
    TileNotFound { tx: i32, ty: i32, layer: u8 },
    #[error("tile coordinate ({tx}, {ty}) already holds the maximum of 255 layers")]
    LayerLimitExceeded { tx: i32, ty: i32 },
    #[error("obstacle queue is full")]
    ObstacleQueueFull,
    #[error("failed to decompress layer payload: {reason}")]
    Decompression { reason: String },
    #[error("tile cache is full (max_tiles = {max_tiles})")]
    CacheFull { max_tiles: u32 },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("navmesh has not been built or loaded yet")]
    NavMeshNotBuilt,
    #[error("path exceeded the {limit}-point working-set bound")]
    PathTooLong { limit: usize },
}

/// Top-level error embedding hosts observe. `#[from]`-converts each
/// subsystem error so internal code can propagate with `?` uniformly.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error(transparent)]
    Collision(#[from] CollisionError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    TileCache(#[from] TileCacheError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("partial rebuild requested before an initial full build")]
    NoPriorBuild,
    #[error("invalid build settings: {0}")]
    InvalidSettings(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NavigationResult<T> = Result<T, NavigationError>;
