//! Geographic and pixel coordinates, and the per-zoom resolution algebra.
//!
//! Two coordinate systems are supported:
//!
//!   * [`CoordinateSystem::Geodetic`]: longitude/latitude in degrees (`EPSG:4326`).
//!     Zoom `0` is made of two `tile_size` wide columns and one row.
//!   * [`CoordinateSystem::Mercator`]: spherical-mercator meters (`EPSG:3857`).
//!     Zoom `0` is a single tile.
//!
//! Pixel coordinates produced here count rows from the *bottom* of the world
//! (the TMS convention); flipping to top-origin numbering happens on
//! [`Number`](crate::Number)s.

use std::fmt::{self, Display, Formatter};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use geo_types::Coord;

use crate::area::Size;
use crate::errors::{Result, TilesError};

/// WGS 84 equatorial radius, in meters.
pub const EQUATOR_RADIUS: f64 = 6_378_137.0;

/// Half of the spherical-mercator world circumference, in meters.
pub const ORIGIN_SHIFT: f64 = std::f64::consts::PI * EQUATOR_RADIUS;

/// Deepest zoom level the tile-number algebra can address with `u32` columns.
pub const MAX_ZOOM: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    Geodetic,
    Mercator,
}

impl CoordinateSystem {
    pub fn epsg(self) -> u32 {
        match self {
            CoordinateSystem::Geodetic => 4326,
            CoordinateSystem::Mercator => 3857,
        }
    }

    /// Map an authority code onto one of the supported systems.
    ///
    /// The legacy web-mercator codes are accepted as aliases of `EPSG:3857`.
    pub fn from_epsg(code: i32) -> Result<Self> {
        match code {
            4326 => Ok(CoordinateSystem::Geodetic),
            3857 | 900913 | 3785 | 102100 | 102113 => Ok(CoordinateSystem::Mercator),
            other => Err(TilesError::UnsupportedCoordinateSystem(format!(
                "EPSG:{other}"
            ))),
        }
    }

    /// The `SRS` string written to the tile-set metadata document.
    pub fn srs(self) -> &'static str {
        match self {
            CoordinateSystem::Geodetic => "EPSG:4326",
            CoordinateSystem::Mercator => "EPSG:3857",
        }
    }

    /// The TMS profile name of this system.
    pub fn profile(self) -> &'static str {
        match self {
            CoordinateSystem::Geodetic => "geodetic",
            CoordinateSystem::Mercator => "mercator",
        }
    }

    /// Half of the world extent along (x, y), in native units.
    pub(crate) fn half_extent(self) -> (f64, f64) {
        match self {
            CoordinateSystem::Geodetic => (180.0, 90.0),
            CoordinateSystem::Mercator => (ORIGIN_SHIFT, ORIGIN_SHIFT),
        }
    }

    /// Number of (columns, rows) of tiles covering the world at `zoom`.
    pub fn tiles_at_zoom(self, zoom: u32) -> Result<(u32, u32)> {
        check_zoom(zoom)?;
        let rows = 1u32 << zoom;
        match self {
            CoordinateSystem::Geodetic => Ok((rows << 1, rows)),
            CoordinateSystem::Mercator => Ok((rows, rows)),
        }
    }

    /// Ground units covered by one pixel at `zoom`.
    ///
    /// Each zoom level halves the resolution of the previous one.
    pub fn resolution(self, zoom: u32, tile_size: Size) -> Result<f64> {
        check_zoom(zoom)?;
        let scale = f64::from(tile_size.width()) * f64::from(1u32 << zoom);
        match self {
            CoordinateSystem::Geodetic => Ok(180.0 / scale),
            CoordinateSystem::Mercator => Ok(2.0 * ORIGIN_SHIFT / scale),
        }
    }
}

impl Display for CoordinateSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.srs())
    }
}

impl FromStr for CoordinateSystem {
    type Err = TilesError;

    /// Parses `EPSG:xxxx` codes, bare codes and profile names.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "geodetic" => return Ok(CoordinateSystem::Geodetic),
            "mercator" => return Ok(CoordinateSystem::Mercator),
            _ => {}
        }
        let code = lower.strip_prefix("epsg:").unwrap_or(&lower);
        code.parse::<i32>()
            .map_err(|_| TilesError::UnsupportedCoordinateSystem(trimmed.to_string()))
            .and_then(CoordinateSystem::from_epsg)
    }
}

pub(crate) fn check_zoom(zoom: u32) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(TilesError::InvalidArgument(format!(
            "zoom {zoom} is deeper than the supported maximum of {MAX_ZOOM}"
        )));
    }
    Ok(())
}

/// A point in a geographic coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    system: CoordinateSystem,
    coord: Coord<f64>,
}

impl GeoCoordinate {
    pub fn new(system: CoordinateSystem, x: f64, y: f64) -> Self {
        GeoCoordinate {
            system,
            coord: Coord { x, y },
        }
    }

    pub fn geodetic(longitude: f64, latitude: f64) -> Self {
        Self::new(CoordinateSystem::Geodetic, longitude, latitude)
    }

    pub fn mercator(x: f64, y: f64) -> Self {
        Self::new(CoordinateSystem::Mercator, x, y)
    }

    pub fn x(&self) -> f64 {
        self.coord.x
    }

    pub fn y(&self) -> f64 {
        self.coord.y
    }

    pub fn system(&self) -> CoordinateSystem {
        self.system
    }

    pub fn coord(&self) -> Coord<f64> {
        self.coord
    }

    /// Position of this coordinate in the world pixel grid at `zoom`.
    pub fn to_pixel(&self, zoom: u32, tile_size: Size) -> Result<PixelCoordinate> {
        let resolution = self.system.resolution(zoom, tile_size)?;
        let (half_x, half_y) = self.system.half_extent();
        Ok(PixelCoordinate::new(
            (self.coord.x + half_x) / resolution,
            (self.coord.y + half_y) / resolution,
        ))
    }

    /// Inverse of [`to_pixel`](Self::to_pixel).
    pub fn from_pixel(
        pixel: PixelCoordinate,
        zoom: u32,
        tile_size: Size,
        system: CoordinateSystem,
    ) -> Result<Self> {
        let resolution = system.resolution(zoom, tile_size)?;
        let (half_x, half_y) = system.half_extent();
        Ok(GeoCoordinate::new(
            system,
            pixel.x() * resolution - half_x,
            pixel.y() * resolution - half_y,
        ))
    }

    /// Project onto spherical mercator. A no-op for mercator coordinates.
    pub fn to_mercator(&self) -> GeoCoordinate {
        match self.system {
            CoordinateSystem::Mercator => *self,
            CoordinateSystem::Geodetic => {
                let x = self.coord.x * ORIGIN_SHIFT / 180.0;
                let y = ((90.0 + self.coord.y) * std::f64::consts::PI / 360.0)
                    .tan()
                    .ln()
                    * EQUATOR_RADIUS;
                GeoCoordinate::mercator(x, y)
            }
        }
    }

    /// Unproject onto geodetic degrees. A no-op for geodetic coordinates.
    pub fn to_geodetic(&self) -> GeoCoordinate {
        match self.system {
            CoordinateSystem::Geodetic => *self,
            CoordinateSystem::Mercator => {
                let longitude = self.coord.x / ORIGIN_SHIFT * 180.0;
                let latitude = (2.0 * (self.coord.y / EQUATOR_RADIUS).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                GeoCoordinate::geodetic(longitude, latitude)
            }
        }
    }

    /// Component-wise minimum and maximum of two corners.
    pub fn order(a: GeoCoordinate, b: GeoCoordinate) -> (GeoCoordinate, GeoCoordinate) {
        assert_same_system(a.system, b.system);
        (
            GeoCoordinate::new(a.system, a.x().min(b.x()), a.y().min(b.y())),
            GeoCoordinate::new(a.system, a.x().max(b.x()), a.y().max(b.y())),
        )
    }
}

impl From<GeoCoordinate> for Coord<f64> {
    fn from(value: GeoCoordinate) -> Self {
        value.coord
    }
}

fn assert_same_system(left: CoordinateSystem, right: CoordinateSystem) {
    assert_eq!(
        left, right,
        "cannot combine coordinates of different coordinate systems"
    );
}

macro_rules! geo_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for GeoCoordinate {
            type Output = GeoCoordinate;

            fn $method(self, rhs: GeoCoordinate) -> GeoCoordinate {
                assert_same_system(self.system, rhs.system);
                GeoCoordinate::new(
                    self.system,
                    self.coord.x $op rhs.coord.x,
                    self.coord.y $op rhs.coord.y,
                )
            }
        }
    };
}

geo_op!(Add, add, +);
geo_op!(Sub, sub, -);
geo_op!(Mul, mul, *);
geo_op!(Div, div, /);

/// A position in pixel space, either in the world pixel grid of a zoom level
/// or inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelCoordinate {
    coord: Coord<f64>,
}

impl PixelCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        PixelCoordinate {
            coord: Coord { x, y },
        }
    }

    pub fn x(&self) -> f64 {
        self.coord.x
    }

    pub fn y(&self) -> f64 {
        self.coord.y
    }

    pub fn to_geo(
        &self,
        zoom: u32,
        tile_size: Size,
        system: CoordinateSystem,
    ) -> Result<GeoCoordinate> {
        GeoCoordinate::from_pixel(*self, zoom, tile_size, system)
    }
}

macro_rules! pixel_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for PixelCoordinate {
            type Output = PixelCoordinate;

            fn $method(self, rhs: PixelCoordinate) -> PixelCoordinate {
                PixelCoordinate::new(self.coord.x $op rhs.coord.x, self.coord.y $op rhs.coord.y)
            }
        }
    };
}

pixel_op!(Add, add, +);
pixel_op!(Sub, sub, -);
pixel_op!(Mul, mul, *);
pixel_op!(Div, div, /);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_near;

    fn tile_256() -> Size {
        Size::new(256, 256).unwrap()
    }

    #[test]
    fn resolution_halves_with_each_zoom() {
        for system in [CoordinateSystem::Geodetic, CoordinateSystem::Mercator] {
            for zoom in 0..MAX_ZOOM {
                let coarse = system.resolution(zoom, tile_256()).unwrap();
                let fine = system.resolution(zoom + 1, tile_256()).unwrap();
                assert_near!(coarse, fine * 2.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn known_resolutions() {
        let geodetic = CoordinateSystem::Geodetic.resolution(0, tile_256()).unwrap();
        assert_near!(geodetic, 0.703125);
        let mercator = CoordinateSystem::Mercator.resolution(0, tile_256()).unwrap();
        assert_near!(mercator, 156_543.033_928_041, epsilon = 1e-6);
    }

    #[test]
    fn zoom_too_deep() {
        let err = CoordinateSystem::Geodetic
            .resolution(MAX_ZOOM + 1, tile_256())
            .unwrap_err();
        assert!(matches!(err, TilesError::InvalidArgument(_)));
    }

    #[test]
    fn geodetic_pixel_round_trip() {
        let coord = GeoCoordinate::geodetic(139.746, 35.508);
        let pixel = coord.to_pixel(10, tile_256()).unwrap();
        assert_near!(pixel.x() / 256.0, 319.746 * 1024.0 / 180.0, epsilon = 1e-9);
        let back = pixel.to_geo(10, tile_256(), CoordinateSystem::Geodetic).unwrap();
        assert_near!(back.x(), coord.x(), epsilon = 1e-9);
        assert_near!(back.y(), coord.y(), epsilon = 1e-9);
    }

    #[test]
    fn mercator_world_corners() {
        let min = GeoCoordinate::mercator(-ORIGIN_SHIFT, -ORIGIN_SHIFT);
        let max = GeoCoordinate::mercator(ORIGIN_SHIFT, ORIGIN_SHIFT);
        let min_px = min.to_pixel(2, tile_256()).unwrap();
        let max_px = max.to_pixel(2, tile_256()).unwrap();
        assert_near!(min_px.x(), 0.0);
        assert_near!(min_px.y(), 0.0);
        assert_near!(max_px.x(), 1024.0, epsilon = 1e-9);
        assert_near!(max_px.y(), 1024.0, epsilon = 1e-9);
    }

    #[test]
    fn projection_round_trip() {
        let tokyo = GeoCoordinate::geodetic(139.7671, 35.6812);
        let projected = tokyo.to_mercator();
        assert_eq!(projected.system(), CoordinateSystem::Mercator);
        assert_near!(projected.x(), 15_558_802.0, epsilon = 1.0);
        let back = projected.to_geodetic();
        assert_near!(back.x(), tokyo.x(), epsilon = 1e-9);
        assert_near!(back.y(), tokyo.y(), epsilon = 1e-9);
    }

    #[test]
    fn arithmetic_is_component_wise() {
        let a = GeoCoordinate::geodetic(10.0, 20.0);
        let b = GeoCoordinate::geodetic(2.0, 4.0);
        assert_eq!(a + b, GeoCoordinate::geodetic(12.0, 24.0));
        assert_eq!(a - b, GeoCoordinate::geodetic(8.0, 16.0));
        assert_eq!(a * b, GeoCoordinate::geodetic(20.0, 80.0));
        assert_eq!(a / b, GeoCoordinate::geodetic(5.0, 5.0));
    }

    #[test]
    #[should_panic(expected = "different coordinate systems")]
    fn mixing_systems_is_a_bug() {
        let _ = GeoCoordinate::geodetic(0.0, 0.0) + GeoCoordinate::mercator(0.0, 0.0);
    }

    #[test]
    fn parse_coordinate_systems() {
        assert_eq!(
            "EPSG:4326".parse::<CoordinateSystem>().unwrap(),
            CoordinateSystem::Geodetic
        );
        assert_eq!(
            "mercator".parse::<CoordinateSystem>().unwrap(),
            CoordinateSystem::Mercator
        );
        assert_eq!(
            "900913".parse::<CoordinateSystem>().unwrap(),
            CoordinateSystem::Mercator
        );
        assert!(matches!(
            "EPSG:32654".parse::<CoordinateSystem>(),
            Err(TilesError::UnsupportedCoordinateSystem(_))
        ));
    }
}
