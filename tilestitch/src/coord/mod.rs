//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (longitude/latitude,
//! WGS84) and spherical Web-Mercator meters (EPSG:3857), the projection the
//! grid partitioner tiles in.

mod types;

pub use types::{CoordError, GeoBbox, LonLat, MercatorBbox, MercatorPoint, EARTH_RADIUS_M, MAX_LAT, MIN_LAT};

use std::f64::consts::PI;

/// Converts a longitude/latitude pair to Web-Mercator meters.
///
/// Latitude is clamped to ±85.05112878° before projecting; values outside
/// that range have no finite Mercator y.
///
/// # Errors
///
/// `CoordError::InvalidCoordinate` when either input is NaN or infinite.
#[inline]
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> Result<MercatorPoint, CoordError> {
    if !lon.is_finite() {
        return Err(CoordError::InvalidCoordinate {
            axis: "lon",
            value: lon,
        });
    }
    if !lat.is_finite() {
        return Err(CoordError::InvalidCoordinate {
            axis: "lat",
            value: lat,
        });
    }

    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    Ok(MercatorPoint { x, y })
}

/// Converts Web-Mercator meters back to a longitude/latitude pair.
///
/// # Errors
///
/// `CoordError::InvalidCoordinate` when either input is NaN or infinite.
#[inline]
pub fn mercator_to_lonlat(x: f64, y: f64) -> Result<LonLat, CoordError> {
    if !x.is_finite() {
        return Err(CoordError::InvalidCoordinate { axis: "x", value: x });
    }
    if !y.is_finite() {
        return Err(CoordError::InvalidCoordinate { axis: "y", value: y });
    }

    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Ok(LonLat { lon, lat })
}

/// Projects a geographic bbox to Web-Mercator meters.
///
/// Applies the pointwise conversion to the two corners: west/east are taken
/// at the equator and south/north at longitude 0. This is intentionally
/// approximate for large boxes but exact for axis-aligned Web-Mercator
/// tiling, which is the only use in this pipeline.
pub fn geo_bbox_to_mercator(bbox: &GeoBbox) -> Result<MercatorBbox, CoordError> {
    let sw = lonlat_to_mercator(bbox.west, bbox.south)?;
    let ne = lonlat_to_mercator(bbox.east, bbox.north)?;
    Ok(MercatorBbox {
        x0: sw.x,
        y0: sw.y,
        x1: ne.x,
        y1: ne.y,
    })
}

/// Converts a Web-Mercator bbox back to WGS84 degrees.
pub fn mercator_bbox_to_geo(bbox: &MercatorBbox) -> Result<GeoBbox, CoordError> {
    let sw = mercator_to_lonlat(bbox.x0, bbox.y0)?;
    let ne = mercator_to_lonlat(bbox.x1, bbox.y1)?;
    GeoBbox::new(sw.lon, sw.lat, ne.lon, ne.lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equator_prime_meridian_is_origin() {
        let p = lonlat_to_mercator(0.0, 0.0).unwrap();
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
    }

    #[test]
    fn test_known_point_tashkent() {
        // Tashkent: 69.25°E, 41.3°N
        let p = lonlat_to_mercator(69.25, 41.3).unwrap();
        assert!((p.x - 7_708_880.0).abs() < 2_000.0, "x was {}", p.x);
        assert!((p.y - 5_056_590.0).abs() < 2_000.0, "y was {}", p.y);
    }

    #[test]
    fn test_roundtrip_conversion() {
        let lon = -74.0060;
        let lat = 40.7128;

        let p = lonlat_to_mercator(lon, lat).unwrap();
        let back = mercator_to_lonlat(p.x, p.y).unwrap();

        assert!((back.lon - lon).abs() < 1e-9);
        assert!((back.lat - lat).abs() < 1e-9);
    }

    #[test]
    fn test_latitude_is_clamped_at_poles() {
        let near_pole = lonlat_to_mercator(0.0, 89.9).unwrap();
        let clamped = lonlat_to_mercator(0.0, MAX_LAT).unwrap();
        assert_eq!(near_pole.y, clamped.y, "y should saturate at the clamp");
        assert!(near_pole.y.is_finite());
    }

    #[test]
    fn test_non_finite_input_rejected() {
        assert!(matches!(
            lonlat_to_mercator(f64::NAN, 0.0),
            Err(CoordError::InvalidCoordinate { axis: "lon", .. })
        ));
        assert!(matches!(
            lonlat_to_mercator(0.0, f64::INFINITY),
            Err(CoordError::InvalidCoordinate { axis: "lat", .. })
        ));
        assert!(matches!(
            mercator_to_lonlat(f64::NAN, 0.0),
            Err(CoordError::InvalidCoordinate { axis: "x", .. })
        ));
    }

    #[test]
    fn test_bbox_roundtrip() {
        let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
        let merc = geo_bbox_to_mercator(&bbox).unwrap();
        assert!(merc.width() > 0.0);
        assert!(merc.height() > 0.0);

        let back = mercator_bbox_to_geo(&merc).unwrap();
        assert!((back.west - bbox.west).abs() < 1e-9);
        assert!((back.south - bbox.south).abs() < 1e-9);
        assert!((back.east - bbox.east).abs() < 1e-9);
        assert!((back.north - bbox.north).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_bbox_rejected() {
        assert!(matches!(
            GeoBbox::new(10.0, 0.0, 5.0, 1.0),
            Err(CoordError::MalformedBbox { .. })
        ));
        assert!(matches!(
            GeoBbox::new(0.0, 5.0, 1.0, 5.0),
            Err(CoordError::MalformedBbox { .. })
        ));
    }

    #[test]
    fn test_bbox_serde_array_form() {
        let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, "[69.103,41.168,69.397,41.434]");

        let back: GeoBbox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bbox);

        let bad: Result<GeoBbox, _> = serde_json::from_str("[5.0,0.0,1.0,1.0]");
        assert!(bad.is_err(), "malformed array must not deserialize");
    }

    #[test]
    fn test_bbox_contains_and_center() {
        let outer = GeoBbox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let inner = GeoBbox::new(2.0, 2.0, 8.0, 8.0).unwrap();
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));

        let c = outer.center();
        assert_eq!(c.lon, 5.0);
        assert_eq!(c.lat, 5.0);
    }
}
