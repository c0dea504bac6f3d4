//! Grid partition type definitions

use crate::coord::{CoordError, GeoBbox, MercatorBbox};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest and largest supported grid sizes.
pub const MIN_GRID: u32 = 1;
pub const MAX_GRID: u32 = 64;

/// Largest supported overlap fraction (exclusive).
pub const MAX_OVERLAP: f64 = 0.49;

/// Errors that can occur while partitioning an AOI.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    /// Grid size outside 1..=64.
    #[error("invalid grid size: {0} (must be in {MIN_GRID}..={MAX_GRID})")]
    InvalidGrid(u32),

    /// Overlap fraction outside [0, 0.49).
    #[error("invalid overlap fraction: {0} (must be in [0, {MAX_OVERLAP}))")]
    InvalidOverlap(f64),

    /// Scale fraction outside (0, 1].
    #[error("invalid scale fraction: {0} (must be in (0, 1])")]
    InvalidScale(f64),

    /// Projected AOI has non-positive width or height.
    #[error("degenerate bbox: projected size {width}m x {height}m")]
    DegenerateBbox { width: f64, height: f64 },

    /// Coordinate conversion failed.
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// One cell of an overlapping grid partition.
///
/// The core bbox is the non-overlapping portion; core boxes of all tiles
/// exactly tile the AOI. The context bbox is the core expanded outward by
/// `overlap_fraction x tile_size` on every side - the region actually
/// rendered per tile, so that adjacent tiles share pixels along seams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// Zoom level; fixed at 0 for this pipeline
    pub zoom: u8,
    /// Column, 0 at the west edge
    pub x: u32,
    /// Row, 0 at the north edge
    pub y: u32,
    /// Core bbox in WGS84 degrees
    pub core_geo: GeoBbox,
    /// Core bbox in Web-Mercator meters
    pub core_merc: MercatorBbox,
    /// Context bbox in WGS84 degrees
    pub context_geo: GeoBbox,
    /// Context bbox in Web-Mercator meters
    pub context_merc: MercatorBbox,
}

/// A complete grid partition of an AOI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPartition {
    /// The AOI bbox the grid was derived from
    pub bbox: GeoBbox,
    /// Grid size N (the partition is N x N)
    pub n: u32,
    /// Overlap fraction used for context expansion
    pub overlap: f64,
    /// Tiles in row-major order (row 0 first, west to east within a row)
    pub tiles: Vec<TileGeometry>,
}

impl GridPartition {
    /// Looks up the tile at column `x`, row `y`.
    pub fn tile(&self, x: u32, y: u32) -> Option<&TileGeometry> {
        if x >= self.n || y >= self.n {
            return None;
        }
        self.tiles.get((y * self.n + x) as usize)
    }

    /// Total number of tiles (N x N).
    #[inline]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Iterates tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &TileGeometry> {
        self.tiles.iter()
    }
}
