//! Run configuration and one-time GDAL setup.
//!
//! GDAL keeps process-wide state (driver registry, block cache, error
//! handler, config options). [`Environment::init`] performs that setup once
//! and hands back a capability that [`Raster::open`](crate::Raster::open)
//! requires, so nothing in the engine touches GDAL before it is configured.
//!
//! ```no_run
//! use gtiff2tiles::{Environment, EnvironmentOptions, TilingOptions, TileExtension};
//!
//! let env = Environment::init(EnvironmentOptions::default())?;
//! let options = TilingOptions::default()
//!     .with_zoom_range(0, 12)
//!     .with_extension(TileExtension::Webp)
//!     .with_threads(4);
//! options.validate()?;
//! # Ok::<_, gtiff2tiles::errors::TilesError>(())
//! ```

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use gdal::config::{set_config_option, set_error_handler};
use gdal::errors::CplErrType;
use gdal::raster::ResampleAlg;
use gdal::DriverManager;

use crate::area::Size;
use crate::coordinate::MAX_ZOOM;
use crate::errors::{Result, TilesError};

/// Default byte budget of a raster's region cache.
pub const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Settings applied to the GDAL library by [`Environment::init`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentOptions {
    /// Size of GDAL's own block cache. `None` keeps GDAL's default.
    pub gdal_cache_bytes: Option<usize>,
    /// Drop GDAL's diagnostic messages instead of forwarding them to `tracing`.
    pub quiet_gdal: bool,
}

/// Proof that GDAL has been configured for tiling.
#[derive(Debug)]
pub struct Environment {
    options: EnvironmentOptions,
}

impl Environment {
    pub fn init(options: EnvironmentOptions) -> Result<Environment> {
        DriverManager::register_all();
        for driver in ["MEM", "PNG", "JPEG", "WEBP"] {
            if DriverManager::get_driver_by_name(driver).is_err() {
                tracing::warn!(driver, "GDAL driver is not available");
            }
        }

        if let Some(bytes) = options.gdal_cache_bytes {
            let bytes = i64::try_from(bytes).map_err(|_| {
                TilesError::InvalidArgument(format!("GDAL cache size {bytes} is too large"))
            })?;
            unsafe { gdal_sys::GDALSetCacheMax64(bytes) };
        }
        // Encoded tiles must not leave `.aux.xml` side-car files behind.
        set_config_option("GDAL_PAM_ENABLED", "NO")?;

        if options.quiet_gdal {
            set_error_handler(|_, _, _| {});
        } else {
            set_error_handler(forward_to_tracing);
        }

        tracing::debug!(?options, "GDAL environment initialized");
        Ok(Environment { options })
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }
}

fn forward_to_tracing(class: CplErrType, number: i32, message: &str) {
    match class {
        CplErrType::None | CplErrType::Debug => {
            tracing::trace!(target: "gdal", number, "{message}")
        }
        CplErrType::Warning => tracing::warn!(target: "gdal", number, "{message}"),
        CplErrType::Failure | CplErrType::Fatal => {
            tracing::error!(target: "gdal", number, "{message}")
        }
    }
}

/// Output encoding of the tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileExtension {
    /// Lossless.
    #[default]
    Png,
    /// Lossy, honours [`TilingOptions::quality`]. Carries no alpha band.
    Jpg,
    /// Lossy or lossless depending on [`TilingOptions::quality`].
    Webp,
}

impl TileExtension {
    pub fn extension(self) -> &'static str {
        match self {
            TileExtension::Png => "png",
            TileExtension::Jpg => "jpg",
            TileExtension::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TileExtension::Png => "image/png",
            TileExtension::Jpg => "image/jpeg",
            TileExtension::Webp => "image/webp",
        }
    }

    pub fn from_mime_type(mime: &str) -> Result<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Ok(TileExtension::Png),
            "image/jpeg" | "image/jpg" => Ok(TileExtension::Jpg),
            "image/webp" => Ok(TileExtension::Webp),
            other => Err(TilesError::UnsupportedExtension(other.to_string())),
        }
    }

    /// Short name of the GDAL driver producing this format.
    pub(crate) fn driver_name(self) -> &'static str {
        match self {
            TileExtension::Png => "PNG",
            TileExtension::Jpg => "JPEG",
            TileExtension::Webp => "WEBP",
        }
    }

    /// Band count the encoder can store for a requested count of `1..=4`.
    ///
    /// JPEG has no alpha channel, so gray+alpha becomes gray and RGBA becomes
    /// RGB. WEBP only stores color, so gray becomes RGB and gray+alpha RGBA.
    pub fn supported_bands(self, bands: usize) -> usize {
        match (self, bands) {
            (TileExtension::Jpg, 2) => 1,
            (TileExtension::Jpg, 4) => 3,
            (TileExtension::Webp, 1 | 2) => bands + 2,
            _ => bands,
        }
    }
}

impl Display for TileExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileExtension {
    type Err = TilesError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match lower.as_str() {
            "png" => Ok(TileExtension::Png),
            "jpg" | "jpeg" => Ok(TileExtension::Jpg),
            "webp" => Ok(TileExtension::Webp),
            _ => Err(TilesError::UnsupportedExtension(s.to_string())),
        }
    }
}

/// Resampling kernel used when source pixels are scaled into tiles and when
/// child tiles are downsampled into their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl Interpolation {
    pub(crate) fn resample_alg(self) -> ResampleAlg {
        match self {
            Interpolation::Nearest => ResampleAlg::NearestNeighbour,
            Interpolation::Bilinear => ResampleAlg::Bilinear,
            Interpolation::Cubic => ResampleAlg::Cubic,
            Interpolation::CubicSpline => ResampleAlg::CubicSpline,
            Interpolation::Lanczos => ResampleAlg::Lanczos,
            Interpolation::Average => ResampleAlg::Average,
            Interpolation::Mode => ResampleAlg::Mode,
        }
    }
}

impl FromStr for Interpolation {
    type Err = TilesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" | "near" => Ok(Interpolation::Nearest),
            "bilinear" | "linear" => Ok(Interpolation::Bilinear),
            "cubic" => Ok(Interpolation::Cubic),
            "cubicspline" => Ok(Interpolation::CubicSpline),
            "lanczos" => Ok(Interpolation::Lanczos),
            "average" => Ok(Interpolation::Average),
            "mode" => Ok(Interpolation::Mode),
            other => Err(TilesError::InvalidArgument(format!(
                "unknown interpolation '{other}'"
            ))),
        }
    }
}

/// Number of bands written into each tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandCount {
    /// Match the source raster.
    Auto,
    Fixed(u8),
}

impl Default for BandCount {
    fn default() -> Self {
        BandCount::Fixed(4)
    }
}

impl BandCount {
    /// Resolve against the band count of the source raster.
    pub fn resolve(self, source_bands: usize) -> usize {
        match self {
            BandCount::Auto => source_bands.clamp(1, 4),
            BandCount::Fixed(bands) => usize::from(bands),
        }
    }
}

/// Tunable parameters of a tiling run.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingOptions {
    pub min_zoom: u32,
    pub max_zoom: u32,
    /// Number rows from the south (TMS) rather than from the north (XYZ).
    pub tms_compatible: bool,
    pub tile_size: Size,
    pub bands: BandCount,
    pub extension: TileExtension,
    /// Encoder quality in `1..=100`. `100` makes WEBP lossless.
    pub quality: u8,
    pub interpolation: Interpolation,
    /// Worker threads. `0` picks one per available CPU.
    pub threads: usize,
    /// Byte budget applied to the raster's region cache when the run starts.
    /// `None` keeps the budget the raster was opened with, `Some(0)` disables
    /// caching.
    pub cache_bytes: Option<usize>,
    /// Encoded tiles smaller than this are considered empty and not written.
    /// `0` writes every tile.
    pub min_tile_bytes: usize,
}

impl Default for TilingOptions {
    fn default() -> Self {
        TilingOptions {
            min_zoom: 0,
            max_zoom: 0,
            tms_compatible: true,
            tile_size: Size::default(),
            bands: BandCount::default(),
            extension: TileExtension::default(),
            quality: 90,
            interpolation: Interpolation::default(),
            threads: 0,
            cache_bytes: None,
            min_tile_bytes: 0,
        }
    }
}

impl TilingOptions {
    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_tms_compatible(mut self, tms_compatible: bool) -> Self {
        self.tms_compatible = tms_compatible;
        self
    }

    pub fn with_tile_size(mut self, tile_size: Size) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_bands(mut self, bands: BandCount) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_extension(mut self, extension: TileExtension) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = Some(cache_bytes);
        self
    }

    pub fn with_min_tile_bytes(mut self, min_tile_bytes: usize) -> Self {
        self.min_tile_bytes = min_tile_bytes;
        self
    }

    /// Worker count after resolving `0` to the available parallelism.
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }

    /// Check every parameter without touching the file system.
    pub fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom {
            return Err(TilesError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(TilesError::InvalidArgument(format!(
                "max zoom {} is deeper than the supported maximum of {MAX_ZOOM}",
                self.max_zoom
            )));
        }
        if !self.tile_size.is_square() {
            return Err(TilesError::InvalidArgument(format!(
                "tiles must be square, got {}",
                self.tile_size
            )));
        }
        if let BandCount::Fixed(bands) = self.bands {
            if !(1..=4).contains(&bands) {
                return Err(TilesError::InvalidArgument(format!(
                    "band count must be within 1..=4, got {bands}"
                )));
            }
        }
        if !(1..=100).contains(&self.quality) {
            return Err(TilesError::InvalidArgument(format!(
                "quality must be within 1..=100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}
