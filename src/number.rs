//! Tile numbers: the `(x, y, z)` address of a tile, and the algebra relating
//! numbers to geographic footprints, to each other, and to tile counts.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use crate::area::Size;
use crate::coordinate::{check_zoom, CoordinateSystem, GeoCoordinate, PixelCoordinate};
use crate::errors::{Result, TilesError};

/// Fractional tile positions closer than this to a tile edge are treated as
/// lying on it.
const EDGE_EPSILON: f64 = 1e-9;

/// Address of a tile in a pyramid.
///
/// `y` counts rows either from the south (TMS) or from the north (XYZ); the
/// convention is carried by the caller, and [`flip`](Number::flip) converts
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Number {
    x: u32,
    y: u32,
    z: u32,
}

impl Number {
    /// Create a tile number, rejecting negative components and positions
    /// beyond the widest grid of zoom `z` (`2^(z+1)` columns, `2^z` rows).
    pub fn new(x: i64, y: i64, z: i64) -> Result<Self> {
        if x < 0 || y < 0 || z < 0 {
            return Err(TilesError::NegativeNumber { x, y, z });
        }
        let zoom = u32::try_from(z).map_err(|_| TilesError::NumberOutOfRange { x, y, z })?;
        check_zoom(zoom)?;
        let rows = 1i64 << zoom;
        if x >= rows * 2 || y >= rows {
            return Err(TilesError::NumberOutOfRange { x, y, z });
        }
        Ok(Number {
            x: x as u32,
            y: y as u32,
            z: zoom,
        })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn z(&self) -> u32 {
        self.z
    }

    /// Switch between bottom-origin (TMS) and top-origin (XYZ) row numbering.
    pub fn flip(&self) -> Number {
        Number {
            x: self.x,
            y: (1u32 << self.z) - self.y - 1,
            z: self.z,
        }
    }

    /// Check that this number addresses a tile of `system`'s grid.
    pub fn validate(&self, system: CoordinateSystem) -> Result<()> {
        let (columns, rows) = system.tiles_at_zoom(self.z)?;
        if self.x >= columns || self.y >= rows {
            return Err(TilesError::NumberOutOfRange {
                x: self.x.into(),
                y: self.y.into(),
                z: self.z.into(),
            });
        }
        Ok(())
    }

    /// The `(min, max)` tile numbers covering the rectangle spanned by two
    /// corner coordinates at `zoom`, clamped to the world grid.
    pub fn from_geo_coordinates(
        min: GeoCoordinate,
        max: GeoCoordinate,
        zoom: u32,
        tile_size: Size,
        tms_compatible: bool,
    ) -> Result<(Number, Number)> {
        let system = min.system();
        let (min, max) = GeoCoordinate::order(min, max);
        let (columns, rows) = system.tiles_at_zoom(zoom)?;
        let min_px = min.to_pixel(zoom, tile_size)?;
        let max_px = max.to_pixel(zoom, tile_size)?;
        let tile_width = f64::from(tile_size.width());
        let tile_height = f64::from(tile_size.height());

        let mut first = Number {
            x: tile_index(snap(min_px.x() / tile_width).floor(), columns),
            y: tile_index(snap(min_px.y() / tile_height).floor(), rows),
            z: zoom,
        };
        let mut last = Number {
            x: tile_index(snap(max_px.x() / tile_width).ceil() - 1.0, columns),
            y: tile_index(snap(max_px.y() / tile_height).ceil() - 1.0, rows),
            z: zoom,
        };
        if !tms_compatible {
            first = first.flip();
            last = last.flip();
        }

        Ok((
            Number {
                x: first.x.min(last.x),
                y: first.y.min(last.y),
                z: zoom,
            },
            Number {
                x: first.x.max(last.x),
                y: first.y.max(last.y),
                z: zoom,
            },
        ))
    }

    /// Geographic `(min, max)` corners of this tile's footprint.
    ///
    /// When `tms_compatible` is false the number is read as top-origin and
    /// flipped before the rows are mapped onto coordinates.
    pub fn to_geo_coordinates(
        &self,
        tile_size: Size,
        system: CoordinateSystem,
        tms_compatible: bool,
    ) -> Result<(GeoCoordinate, GeoCoordinate)> {
        let number = if tms_compatible { *self } else { self.flip() };
        number.validate(system)?;

        let tile_width = f64::from(tile_size.width());
        let tile_height = f64::from(tile_size.height());
        let min_px = PixelCoordinate::new(
            f64::from(number.x) * tile_width,
            f64::from(number.y) * tile_height,
        );
        let max_px = PixelCoordinate::new(
            f64::from(number.x + 1) * tile_width,
            f64::from(number.y + 1) * tile_height,
        );
        Ok((
            min_px.to_geo(number.z, tile_size, system)?,
            max_px.to_geo(number.z, tile_size, system)?,
        ))
    }

    /// The `(min, max)` numbers at `target_zoom` covering this tile.
    ///
    /// Holds for both row conventions since flipping maps whole blocks of
    /// descendants onto each other.
    pub fn get_lower_numbers(&self, target_zoom: u32) -> Result<(Number, Number)> {
        if target_zoom <= self.z {
            return Err(TilesError::InvalidZoomRange {
                min: self.z + 1,
                max: target_zoom,
            });
        }
        check_zoom(target_zoom)?;
        let factor = 1u32 << (target_zoom - self.z);
        Ok((
            Number {
                x: self.x * factor,
                y: self.y * factor,
                z: target_zoom,
            },
            Number {
                x: (self.x + 1) * factor - 1,
                y: (self.y + 1) * factor - 1,
                z: target_zoom,
            },
        ))
    }

    /// The four tiles one zoom level deeper.
    pub fn children(&self) -> Result<[Number; 4]> {
        let (min, max) = self.get_lower_numbers(self.z + 1)?;
        Ok([
            min,
            Number { x: max.x, ..min },
            Number { y: max.y, ..min },
            max,
        ])
    }

    /// The tile one zoom level up, or `None` at zoom `0`.
    pub fn parent(&self) -> Option<Number> {
        (self.z > 0).then(|| Number {
            x: self.x / 2,
            y: self.y / 2,
            z: self.z - 1,
        })
    }

    /// Every number in the rectangle spanned by `min` and `max`, row by row.
    pub fn range(min: Number, max: Number) -> impl Iterator<Item = Number> {
        let z = min.z;
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| Number { x, y, z }))
    }

    /// Number of tiles in the rectangle spanned by `min` and `max`.
    pub fn range_len(min: Number, max: Number) -> u64 {
        u64::from(max.x - min.x + 1) * u64::from(max.y - min.y + 1)
    }

    /// Total count of tiles covering the rectangle between `min` and `max`
    /// over every zoom of `min_zoom..=max_zoom`.
    pub fn get_count(
        min: GeoCoordinate,
        max: GeoCoordinate,
        min_zoom: u32,
        max_zoom: u32,
        tms_compatible: bool,
        tile_size: Size,
    ) -> Result<u64> {
        if min_zoom > max_zoom {
            return Err(TilesError::InvalidZoomRange {
                min: min_zoom,
                max: max_zoom,
            });
        }
        (min_zoom..=max_zoom).try_fold(0u64, |count, zoom| {
            let (first, last) =
                Number::from_geo_coordinates(min, max, zoom, tile_size, tms_compatible)?;
            Ok(count + Number::range_len(first, last))
        })
    }

    /// Relative output path: `{z}/{x}/{y}.{extension}`.
    pub fn path(&self, extension: &str) -> PathBuf {
        let mut path = PathBuf::from(self.z.to_string());
        path.push(self.x.to_string());
        path.push(format!("{}.{}", self.y, extension));
        path
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

fn tile_index(value: f64, count: u32) -> u32 {
    value.clamp(0.0, f64::from(count - 1)) as u32
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < EDGE_EPSILON {
        rounded
    } else {
        value
    }
}
