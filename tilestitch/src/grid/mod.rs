//! Overlap-aware AOI grid partitioner.
//!
//! Splits an AOI bounding box into an N x N set of tile geometries. Tiling
//! happens in Web-Mercator meters so cells are square-ish on the map; both
//! the core and the context (core + overlap margin) box of every tile are
//! converted back to WGS84 for the external render stages.
//!
//! Partitioning is deterministic: re-running with the same inputs yields
//! byte-identical geometries, which is what makes a crashed run resumable
//! without re-rendering tiles.

mod types;

pub use types::{GridError, GridPartition, TileGeometry, MAX_GRID, MAX_OVERLAP, MIN_GRID};

use crate::coord::{geo_bbox_to_mercator, mercator_bbox_to_geo, GeoBbox, LonLat, MercatorBbox};

/// Partitions an AOI bbox into an N x N overlapping grid.
///
/// Row 0 is the northernmost row; column 0 is the westernmost column.
///
/// # Arguments
///
/// * `bbox` - AOI bounding box in WGS84 degrees
/// * `n` - Grid size, 1..=64
/// * `overlap` - Fractional context margin per side, [0, 0.49)
///
/// # Errors
///
/// `GridError::InvalidGrid` / `GridError::InvalidOverlap` on out-of-range
/// parameters, `GridError::DegenerateBbox` when the projected AOI has
/// non-positive extent.
pub fn partition(bbox: &GeoBbox, n: u32, overlap: f64) -> Result<GridPartition, GridError> {
    if !(MIN_GRID..=MAX_GRID).contains(&n) {
        return Err(GridError::InvalidGrid(n));
    }
    if !overlap.is_finite() || !(0.0..MAX_OVERLAP).contains(&overlap) {
        return Err(GridError::InvalidOverlap(overlap));
    }

    let merc = geo_bbox_to_mercator(bbox)?;
    let (w, h) = (merc.width(), merc.height());
    if w <= 0.0 || h <= 0.0 {
        return Err(GridError::DegenerateBbox {
            width: w,
            height: h,
        });
    }

    let dx = w / n as f64;
    let dy = h / n as f64;
    let ox = dx * overlap;
    let oy = dy * overlap;

    let mut tiles = Vec::with_capacity((n * n) as usize);
    for y in 0..n {
        for x in 0..n {
            // North-row-first: row y spans [y1 - dy*(y+1), y1 - dy*y].
            let core_merc = MercatorBbox {
                x0: merc.x0 + dx * x as f64,
                y0: merc.y1 - dy * (y + 1) as f64,
                x1: merc.x0 + dx * (x + 1) as f64,
                y1: merc.y1 - dy * y as f64,
            };
            let context_merc = MercatorBbox {
                x0: core_merc.x0 - ox,
                y0: core_merc.y0 - oy,
                x1: core_merc.x1 + ox,
                y1: core_merc.y1 + oy,
            };

            tiles.push(TileGeometry {
                zoom: 0,
                x,
                y,
                core_geo: mercator_bbox_to_geo(&core_merc)?,
                core_merc,
                context_geo: mercator_bbox_to_geo(&context_merc)?,
                context_merc,
            });
        }
    }

    Ok(GridPartition {
        bbox: *bbox,
        n,
        overlap,
        tiles,
    })
}

/// Scales a bbox around a center point by a fraction in (0, 1].
///
/// The result is clamped so it never exceeds the original bbox; `center`
/// defaults to the bbox center. Used to let later stages focus on a
/// sub-region without recomputing the grid topology.
pub fn scale_bbox(
    bbox: &GeoBbox,
    fraction: f64,
    center: Option<LonLat>,
) -> Result<GeoBbox, GridError> {
    if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
        return Err(GridError::InvalidScale(fraction));
    }

    let c = center.unwrap_or_else(|| bbox.center());
    let half_w = bbox.width() * fraction / 2.0;
    let half_h = bbox.height() * fraction / 2.0;

    let west = (c.lon - half_w).max(bbox.west);
    let east = (c.lon + half_w).min(bbox.east);
    let south = (c.lat - half_h).max(bbox.south);
    let north = (c.lat + half_h).min(bbox.north);

    Ok(GeoBbox::new(west, south, east, north)?)
}
