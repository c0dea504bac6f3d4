//! Coordinate type definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Spherical Web-Mercator earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator valid latitude range; values beyond this have no finite
/// Mercator y and are clamped before projection.
pub const MAX_LAT: f64 = 85.051_128_78;
pub const MIN_LAT: f64 = -85.051_128_78;

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// A longitude, latitude, x or y value was NaN or infinite.
    #[error("invalid coordinate: {axis} = {value}")]
    InvalidCoordinate { axis: &'static str, value: f64 },

    /// A bounding box was not well-formed (west >= east or south >= north).
    #[error("malformed bbox: [{west}, {south}, {east}, {north}]")]
    MalformedBbox {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

/// A geographic position in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    /// Longitude in degrees (east-positive)
    pub lon: f64,
    /// Latitude in degrees (north-positive)
    pub lat: f64,
}

/// A position in spherical Web-Mercator meters (EPSG:3857).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorPoint {
    pub x: f64,
    pub y: f64,
}

/// An axis-aligned bounding box in WGS84 degrees.
///
/// Serialized as `[west, south, east, north]` to match the AOI descriptor
/// and ledger document formats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct GeoBbox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoBbox {
    /// Creates a well-formed bbox.
    ///
    /// # Errors
    ///
    /// `CoordError::MalformedBbox` when west >= east or south >= north,
    /// `CoordError::InvalidCoordinate` when any corner is non-finite.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, CoordError> {
        for (axis, value) in [
            ("west", west),
            ("south", south),
            ("east", east),
            ("north", north),
        ] {
            if !value.is_finite() {
                return Err(CoordError::InvalidCoordinate { axis, value });
            }
        }
        if west >= east || south >= north {
            return Err(CoordError::MalformedBbox {
                west,
                south,
                east,
                north,
            });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// Width in degrees.
    #[inline]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees.
    #[inline]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Center point of the bbox.
    #[inline]
    pub fn center(&self) -> LonLat {
        LonLat {
            lon: (self.west + self.east) / 2.0,
            lat: (self.south + self.north) / 2.0,
        }
    }

    /// Returns true if `other` lies entirely within this bbox.
    pub fn contains(&self, other: &GeoBbox) -> bool {
        self.west <= other.west
            && self.south <= other.south
            && self.east >= other.east
            && self.north >= other.north
    }
}

impl TryFrom<[f64; 4]> for GeoBbox {
    type Error = CoordError;

    fn try_from(v: [f64; 4]) -> Result<Self, Self::Error> {
        GeoBbox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<GeoBbox> for [f64; 4] {
    fn from(b: GeoBbox) -> Self {
        [b.west, b.south, b.east, b.north]
    }
}

/// An axis-aligned bounding box in Web-Mercator meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MercatorBbox {
    /// West edge (minimum x) in meters
    pub x0: f64,
    /// South edge (minimum y) in meters
    pub y0: f64,
    /// East edge (maximum x) in meters
    pub x1: f64,
    /// North edge (maximum y) in meters
    pub y1: f64,
}

impl MercatorBbox {
    #[inline]
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}
