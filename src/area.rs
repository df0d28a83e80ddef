//! Pixel sizes, pixel windows, and the mapping of a tile's geographic
//! footprint onto a read window in the source raster and a write window in
//! the tile buffer.

use std::fmt::{self, Display, Formatter};

use crate::coordinate::{GeoCoordinate, PixelCoordinate};
use crate::errors::{Result, TilesError};

/// Fractional pixel positions closer than this to an integer are snapped to it
/// before being widened to whole pixels.
const PIXEL_EPSILON: f64 = 1e-6;

/// A strictly positive `(width, height)` pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    width: u32,
    height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TilesError::InvalidArgument(format!(
                "size must be positive, got {width}x{height}"
            )));
        }
        Ok(Size { width, height })
    }

    /// Build a size from the `usize` pairs GDAL reports.
    pub fn from_usize((width, height): (usize, usize)) -> Result<Self> {
        let width = u32::try_from(width)
            .map_err(|_| TilesError::InvalidArgument(format!("width {width} is too large")))?;
        let height = u32::try_from(height)
            .map_err(|_| TilesError::InvalidArgument(format!("height {height} is too large")))?;
        Size::new(width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// `(width, height)` as GDAL expects window sizes.
    pub fn as_usize(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Size {
    fn default() -> Self {
        Size {
            width: 256,
            height: 256,
        }
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A pixel window: a whole-pixel origin and a positive size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Area {
    x: u32,
    y: u32,
    size: Size,
}

impl Area {
    pub fn new(x: u32, y: u32, size: Size) -> Self {
        Area { x, y, size }
    }

    pub fn origin(&self) -> PixelCoordinate {
        PixelCoordinate::new(f64::from(self.x), f64::from(self.y))
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Origin as the `(column, row)` offset GDAL windows take.
    pub fn window(&self) -> (isize, isize) {
        (self.x as isize, self.y as isize)
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Exclusive bottom-right corner.
    pub fn end(&self) -> (u32, u32) {
        (self.x + self.size.width(), self.y + self.size.height())
    }

    /// Compute the read window in the source image and the write window in
    /// the destination tile for the part of the tile covered by the image.
    ///
    /// Image rows and tile rows both count from the north edge. Windows are
    /// widened to whole pixels and clipped to `image_size` and `tile_size`.
    ///
    /// Fails with [`TilesError::DegenerateArea`] when either footprint or
    /// their intersection has no area: callers must skip tiles lying outside
    /// the image before asking for windows.
    pub fn get_areas(
        image_min: GeoCoordinate,
        image_max: GeoCoordinate,
        image_size: Size,
        tile_min: GeoCoordinate,
        tile_max: GeoCoordinate,
        tile_size: Size,
    ) -> Result<(Area, Area)> {
        check_footprint("image", image_min, image_max)?;
        check_footprint("tile", tile_min, tile_max)?;

        let min_x = image_min.x().max(tile_min.x());
        let max_x = image_max.x().min(tile_max.x());
        let min_y = image_min.y().max(tile_min.y());
        let max_y = image_max.y().min(tile_max.y());
        if max_x <= min_x || max_y <= min_y {
            return Err(TilesError::DegenerateArea(format!(
                "tile ({}, {})-({}, {}) does not overlap image ({}, {})-({}, {})",
                tile_min.x(),
                tile_min.y(),
                tile_max.x(),
                tile_max.y(),
                image_min.x(),
                image_min.y(),
                image_max.x(),
                image_max.y(),
            )));
        }

        let read = project_window(
            (min_x, min_y, max_x, max_y),
            (image_min, image_max),
            image_size,
        );
        let write = project_window(
            (min_x, min_y, max_x, max_y),
            (tile_min, tile_max),
            tile_size,
        );
        Ok((read, write))
    }
}

impl Display for Area {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}", self.x, self.y, self.size)
    }
}

fn check_footprint(what: &str, min: GeoCoordinate, max: GeoCoordinate) -> Result<()> {
    if !(max.x() > min.x() && max.y() > min.y()) {
        return Err(TilesError::DegenerateArea(format!(
            "{what} footprint ({}, {})-({}, {}) has no area",
            min.x(),
            min.y(),
            max.x(),
            max.y()
        )));
    }
    Ok(())
}

/// Map a geographic rectangle onto the pixel grid of `frame`, north up.
fn project_window(
    (min_x, min_y, max_x, max_y): (f64, f64, f64, f64),
    (frame_min, frame_max): (GeoCoordinate, GeoCoordinate),
    frame_size: Size,
) -> Area {
    let width = f64::from(frame_size.width());
    let height = f64::from(frame_size.height());
    let span_x = frame_max.x() - frame_min.x();
    let span_y = frame_max.y() - frame_min.y();

    let left = width * (min_x - frame_min.x()) / span_x;
    let right = width * (max_x - frame_min.x()) / span_x;
    let top = height * (frame_max.y() - max_y) / span_y;
    let bottom = height * (frame_max.y() - min_y) / span_y;

    let (x, w) = whole_pixels(left, right, frame_size.width());
    let (y, h) = whole_pixels(top, bottom, frame_size.height());
    // Both spans are at least one pixel wide.
    Area::new(x, y, Size { width: w, height: h })
}

/// Widen `[start, end)` to whole pixels inside `[0, limit]`, keeping at
/// least one pixel.
fn whole_pixels(start: f64, end: f64, limit: u32) -> (u32, u32) {
    let limit_f = f64::from(limit);
    let start = snap(start).floor().clamp(0.0, limit_f - 1.0);
    let end = snap(end).ceil().clamp(start + 1.0, limit_f);
    (start as u32, (end - start) as u32)
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < PIXEL_EPSILON {
        rounded
    } else {
        value
    }
}
