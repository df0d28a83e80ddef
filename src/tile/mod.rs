//! Raster tiles: extraction from the source, composition from children,
//! encoding and persistence.

mod codec;
mod compose;

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array3, ArrayView3, Axis};

use crate::area::Size;
use crate::config::{Interpolation, TileExtension, TilingOptions};
use crate::errors::{Result, TilesError};
use crate::number::Number;
use crate::raster::Raster;

pub use compose::Quadrants;

/// Value of synthesized alpha and color bands inside the covered window.
const OPAQUE: u8 = 255;

/// Pixel layout and encoding shared by every tile of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFormat {
    pub size: Size,
    pub bands: usize,
    pub extension: TileExtension,
    pub interpolation: Interpolation,
    pub quality: u8,
}

impl TileFormat {
    /// Resolve the run options against the band count of the source.
    ///
    /// The band count is adjusted to what the encoder can store, see
    /// [`TileExtension::supported_bands`].
    pub fn new(options: &TilingOptions, source_bands: usize) -> Self {
        let bands = options
            .extension
            .supported_bands(options.bands.resolve(source_bands));
        TileFormat {
            size: options.tile_size,
            bands,
            extension: options.extension,
            interpolation: options.interpolation,
            quality: options.quality,
        }
    }

    /// Shape of a tile buffer: `(bands, rows, columns)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        let (width, height) = self.size.as_usize();
        (self.bands, height, width)
    }
}

/// A tile's pixels, band-major, tagged with its number.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    number: Number,
    format: TileFormat,
    pixels: Array3<u8>,
}

impl Tile {
    pub fn from_pixels(number: Number, format: TileFormat, pixels: Array3<u8>) -> Result<Tile> {
        if pixels.dim() != format.shape() {
            return Err(TilesError::InvalidArgument(format!(
                "tile {number} buffer has shape {:?}, expected {:?}",
                pixels.dim(),
                format.shape()
            )));
        }
        Ok(Tile {
            number,
            format,
            pixels,
        })
    }

    /// Extract the tile `number` from the source raster.
    ///
    /// Only the part of the tile covered by the raster is filled; everything
    /// else stays transparent. Fails with
    /// [`TilesError::DegenerateArea`] for tiles outside the raster.
    pub fn from_raster(
        raster: &Raster,
        number: Number,
        format: TileFormat,
        tms_compatible: bool,
    ) -> Result<Tile> {
        let (read, write) = raster.get_areas(number, format.size, tms_compatible)?;
        let region = raster.read_region(read, write.size(), format.interpolation)?;
        tracing::trace!(tile = %number, %read, %write, "extracting tile");

        let source_bands = region.len_of(Axis(0));
        let (x, y) = (write.x() as usize, write.y() as usize);
        let (width, height) = write.size().as_usize();

        let mut pixels = Array3::<u8>::zeros(format.shape());
        for band in 0..format.bands {
            let mut window = pixels.slice_mut(s![band, y..y + height, x..x + width]);
            match source_band(band, format.bands, source_bands) {
                Some(source) => window.assign(&region.index_axis(Axis(0), source)),
                None => window.fill(OPAQUE),
            }
        }
        Tile::from_pixels(number, format, pixels)
    }

    /// Build a tile by downsampling its (up to four) children one zoom
    /// deeper. Returns `None` when none of the children exist.
    pub fn from_children<'a, F>(
        number: Number,
        format: TileFormat,
        tms_compatible: bool,
        lookup: F,
    ) -> Result<Option<Tile>>
    where
        F: Fn(&Number) -> Option<&'a Tile>,
    {
        compose::compose(number, format, tms_compatible, lookup)
    }

    /// Load the tile `number` stored below `root` by [`Tile::write`].
    /// Returns `None` when no file was written for it.
    pub fn read(root: &Path, number: Number, format: TileFormat) -> Result<Option<Tile>> {
        let path = root.join(number.path(format.extension.extension()));
        if !path.is_file() {
            return Ok(None);
        }
        let pixels = codec::decode(&path, &format)?;
        tracing::trace!(tile = %number, path = %path.display(), "loaded tile");
        Tile::from_pixels(number, format, pixels).map(Some)
    }

    pub fn number(&self) -> Number {
        self.number
    }

    pub fn format(&self) -> &TileFormat {
        &self.format
    }

    pub fn pixels(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    /// Encode with the format's codec.
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self.pixels.view(), &self.format)
    }

    /// Encode and store the tile at `root/{z}/{x}/{y}.{ext}`.
    ///
    /// Tiles encoding to fewer than `min_bytes` bytes are considered empty
    /// and skipped; `None` is returned for them.
    pub fn write(&self, root: &Path, min_bytes: usize) -> Result<Option<PathBuf>> {
        let bytes = self.encode()?;
        if bytes.len() < min_bytes {
            tracing::trace!(tile = %self.number, bytes = bytes.len(), "skipping empty tile");
            return Ok(None);
        }

        let path = root.join(self.number.path(self.format.extension.extension()));
        if let Some(parent) = path.parent() {
            // concurrent workers may race on the same directory
            fs::create_dir_all(parent).map_err(|source| TilesError::io(parent, source))?;
        }
        fs::write(&path, &bytes).map_err(|source| TilesError::io(&path, source))?;
        tracing::trace!(tile = %self.number, path = %path.display(), bytes = bytes.len(), "wrote tile");
        Ok(Some(path))
    }
}

/// Index of the source band feeding `output`, or `None` for a band that is
/// synthesized as opaque.
///
/// Gray sources are replicated into every color band; alpha comes from the
/// last band of gray+alpha and RGBA sources.
fn source_band(output: usize, output_bands: usize, source_bands: usize) -> Option<usize> {
    let source_color = if source_bands >= 3 { 3 } else { 1 };
    let output_color = if output_bands >= 3 { 3 } else { 1 };
    if output < output_color {
        if source_color == 1 || output_color == 1 {
            Some(0)
        } else {
            Some(output)
        }
    } else if source_bands == 2 || source_bands >= 4 {
        Some(source_color)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandCount;
    use crate::raster::RasterOptions;
    use crate::test_utils::{environment, RasterFixture};

    fn format(bands: usize, extension: TileExtension) -> TileFormat {
        TileFormat {
            size: Size::default(),
            bands,
            extension,
            interpolation: Interpolation::Nearest,
            quality: 90,
        }
    }

    #[test]
    fn format_respects_the_encoder() {
        let options = TilingOptions::default();
        assert_eq!(TileFormat::new(&options, 3).bands, 4);

        let jpeg = TilingOptions::default().with_extension(TileExtension::Jpg);
        assert_eq!(TileFormat::new(&jpeg, 3).bands, 3);
        let gray_jpeg = jpeg.with_bands(BandCount::Auto);
        assert_eq!(TileFormat::new(&gray_jpeg, 2).bands, 1);
        assert_eq!(TileFormat::new(&gray_jpeg, 1).bands, 1);

        let auto = TilingOptions::default().with_bands(BandCount::Auto);
        assert_eq!(TileFormat::new(&auto, 2).bands, 2);

        let webp = auto.with_extension(TileExtension::Webp);
        assert_eq!(TileFormat::new(&webp, 1).bands, 3);
        assert_eq!(TileFormat::new(&webp, 2).bands, 4);
        assert_eq!(TileFormat::new(&webp, 3).bands, 3);
        let gray_webp = webp.with_bands(BandCount::Fixed(1));
        assert_eq!(TileFormat::new(&gray_webp, 4).bands, 3);
    }

    #[test]
    fn band_mapping() {
        // RGB source into RGBA
        assert_eq!(source_band(0, 4, 3), Some(0));
        assert_eq!(source_band(2, 4, 3), Some(2));
        assert_eq!(source_band(3, 4, 3), None);
        // gray source expanded
        assert_eq!(source_band(1, 4, 1), Some(0));
        assert_eq!(source_band(3, 4, 1), None);
        assert_eq!(source_band(2, 3, 1), Some(0));
        // gray+alpha keeps its alpha
        assert_eq!(source_band(2, 4, 2), Some(0));
        assert_eq!(source_band(3, 4, 2), Some(1));
        // RGBA into gray+alpha
        assert_eq!(source_band(0, 2, 4), Some(0));
        assert_eq!(source_band(1, 2, 4), Some(3));
    }

    #[test]
    fn extraction_fills_only_the_covered_window() {
        let env = environment();
        // north-east quarter of geodetic tile 0/1/0, one pixel per degree
        let fixture = RasterFixture::geodetic("extract.tif", (90, 45), 3, (90.0, 90.0), 1.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let number = Number::new(1, 0, 0).unwrap();
        let tile = Tile::from_raster(&raster, number, format(4, TileExtension::Png), true).unwrap();

        let pixels = tile.pixels();
        assert_eq!(pixels.dim(), (4, 256, 256));
        // covered window is (128, 0) 128x64
        assert_eq!(pixels[[3, 0, 128]], OPAQUE);
        assert_eq!(pixels[[3, 63, 255]], OPAQUE);
        assert_eq!(pixels[[3, 64, 128]], 0);
        assert_eq!(pixels[[3, 0, 127]], 0);
        assert_eq!(pixels[[0, 100, 10]], 0);
        assert_eq!(pixels[[1, 0, 128]], RasterFixture::pattern(1, 0, 0));
    }

    #[test]
    fn gray_sources_encode_as_webp() {
        let env = environment();
        let fixture = RasterFixture::geodetic("gray-webp.tif", (90, 45), 1, (90.0, 90.0), 1.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let options = TilingOptions::default()
            .with_bands(BandCount::Auto)
            .with_extension(TileExtension::Webp);
        let format = TileFormat::new(&options, raster.band_count());
        let number = Number::new(1, 0, 0).unwrap();
        let tile = Tile::from_raster(&raster, number, format, true).unwrap();

        let pixels = tile.pixels();
        assert_eq!(pixels.dim(), (3, 256, 256));
        // gray is replicated into every color band
        assert_eq!(pixels.index_axis(Axis(0), 0), pixels.index_axis(Axis(0), 2));
        let bytes = tile.encode().unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn tiles_outside_the_raster_are_degenerate() {
        let env = environment();
        let fixture = RasterFixture::geodetic("outside.tif", (90, 45), 1, (90.0, 90.0), 1.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let number = Number::new(0, 0, 0).unwrap();
        let err = Tile::from_raster(&raster, number, format(4, TileExtension::Png), true)
            .unwrap_err();
        assert!(matches!(err, TilesError::DegenerateArea(_)));
    }

    #[test]
    fn from_pixels_checks_the_shape() {
        let number = Number::new(0, 0, 0).unwrap();
        let err = Tile::from_pixels(
            number,
            format(4, TileExtension::Png),
            Array3::zeros((3, 256, 256)),
        )
        .unwrap_err();
        assert!(matches!(err, TilesError::InvalidArgument(_)));
    }

    #[test]
    fn write_stores_the_tile_under_its_number() {
        let _env = environment();
        let dir = tempfile::tempdir().unwrap();
        let number = Number::new(3, 2, 2).unwrap();
        let mut pixels = Array3::zeros((4, 256, 256));
        pixels.fill(200);
        let tile = Tile::from_pixels(number, format(4, TileExtension::Png), pixels).unwrap();

        let path = tile.write(dir.path(), 0).unwrap().unwrap();
        assert_eq!(path, dir.path().join("2").join("3").join("2.png"));
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");

        // writing again over an existing directory tree is fine
        assert!(tile.write(dir.path(), 0).unwrap().is_some());
    }

    #[test]
    fn stored_tiles_read_back() {
        let _env = environment();
        let dir = tempfile::tempdir().unwrap();
        let number = Number::new(5, 1, 3).unwrap();
        let format = format(3, TileExtension::Png);
        let pixels = Array3::from_shape_fn(format.shape(), |(band, row, column)| {
            (band * 40 + row + column) as u8
        });
        let tile = Tile::from_pixels(number, format, pixels).unwrap();
        tile.write(dir.path(), 0).unwrap();

        assert_eq!(Tile::read(dir.path(), number, format).unwrap(), Some(tile));
        let absent = Number::new(4, 1, 3).unwrap();
        assert!(Tile::read(dir.path(), absent, format).unwrap().is_none());
    }

    #[test]
    fn small_tiles_are_skipped() {
        let _env = environment();
        let dir = tempfile::tempdir().unwrap();
        let number = Number::new(0, 0, 1).unwrap();
        let tile = Tile::from_pixels(
            number,
            format(4, TileExtension::Png),
            Array3::zeros((4, 256, 256)),
        )
        .unwrap();
        assert!(tile.write(dir.path(), usize::MAX).unwrap().is_none());
        assert!(!dir.path().join("1").exists());
    }
}
