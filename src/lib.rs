//! Cut a georeferenced raster into a pyramid of map tiles.
//!
//! `gtiff2tiles` reads an 8-bit GeoTIFF (or anything else GDAL opens) in
//! either geodetic (`EPSG:4326`) or spherical-mercator (`EPSG:3857`)
//! coordinates and writes `{z}/{x}/{y}.{png,jpg,webp}` tiles for a range of
//! zoom levels, plus a `tilemapresource.xml` document describing them. Rows
//! are numbered either from the south (TMS) or from the north (XYZ).
//!
//! ## Use
//!
//! ```no_run
//! use gtiff2tiles::{
//!     Algorithm, Environment, EnvironmentOptions, PyramidGenerator, Raster, RasterOptions,
//!     TileExtension, TilingOptions,
//! };
//!
//! let env = Environment::init(EnvironmentOptions::default())?;
//! let raster = Raster::open(&env, "fixtures/tokyo.tif", RasterOptions::default())?;
//! let options = TilingOptions::default()
//!     .with_zoom_range(8, 12)
//!     .with_tms_compatible(false)
//!     .with_extension(TileExtension::Webp);
//! let summary = PyramidGenerator::new(&raster, "tiles", options)?.run(Algorithm::Crop)?;
//! println!("{} tiles in {:?}", summary.tiles_written, summary.elapsed);
//! # Ok::<_, gtiff2tiles::errors::TilesError>(())
//! ```
//!
//! Tile geometry is available without touching any file:
//!
//! ```
//! use gtiff2tiles::{GeoCoordinate, Number, Size};
//!
//! let min = GeoCoordinate::geodetic(139.746, 35.508);
//! let max = GeoCoordinate::geodetic(139.922, 35.684);
//! let (first, last) = Number::from_geo_coordinates(min, max, 10, Size::default(), true)?;
//! assert_eq!((first.x(), first.y()), (1818, 714));
//! assert_eq!(last.flip().y(), 1023 - last.y());
//! # Ok::<_, gtiff2tiles::errors::TilesError>(())
//! ```

pub mod area;
pub mod config;
pub mod coordinate;
pub mod errors;
pub mod number;
pub mod pyramid;
pub mod raster;
pub mod tile;
pub mod tilemap;
mod xml;

#[cfg(test)]
mod test_utils;

pub use area::{Area, Size};
pub use config::{
    BandCount, Environment, EnvironmentOptions, Interpolation, TileExtension, TilingOptions,
    DEFAULT_CACHE_BYTES,
};
pub use coordinate::{CoordinateSystem, GeoCoordinate, PixelCoordinate};
pub use number::Number;
pub use pyramid::{
    Algorithm, CancellationToken, GenerationState, GenerationSummary, PyramidGenerator,
};
pub use raster::{CacheStats, Raster, RasterOptions};
pub use tile::{Tile, TileFormat};
pub use tilemap::{TileSetEntry, TileSetMetadata};
