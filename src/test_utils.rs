use std::path::{Path, PathBuf};

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;

use crate::config::{Environment, EnvironmentOptions};

/// GDAL configured the way the engine expects, with diagnostics dropped.
pub(crate) fn environment() -> Environment {
    Environment::init(EnvironmentOptions {
        quiet_gdal: true,
        ..EnvironmentOptions::default()
    })
    .unwrap()
}

/// A temporary directory holding one synthetic north-up GeoTIFF.
///
/// Pixel values follow [`RasterFixture::pattern`] so that tests can check
/// what was read back without storing reference images.
pub(crate) struct RasterFixture {
    _temp_dir: tempfile::TempDir,
    path: PathBuf,
}

impl RasterFixture {
    pub(crate) fn geodetic(
        name: &str,
        size: (usize, usize),
        bands: usize,
        origin: (f64, f64),
        resolution: f64,
    ) -> Self {
        Self::with_epsg(name, size, bands, 4326, origin, resolution)
    }

    pub(crate) fn with_epsg(
        name: &str,
        (width, height): (usize, usize),
        bands: usize,
        epsg: u32,
        (origin_x, origin_y): (f64, f64),
        resolution: f64,
    ) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let path = _temp_dir.path().join(name);

        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut dataset = driver
            .create_with_band_type::<u8, _>(&path, width, height, bands)
            .unwrap();
        dataset
            .set_geo_transform(&[origin_x, resolution, 0.0, origin_y, 0.0, -resolution])
            .unwrap();
        dataset
            .set_spatial_ref(&SpatialRef::from_epsg(epsg).unwrap())
            .unwrap();
        for band_index in 0..bands {
            let data = (0..height)
                .flat_map(|y| (0..width).map(move |x| Self::pattern(band_index, x, y)))
                .collect::<Vec<_>>();
            let mut buffer = Buffer::new((width, height), data);
            dataset
                .rasterband(band_index + 1)
                .unwrap()
                .write((0, 0), (width, height), &mut buffer)
                .unwrap();
        }
        dataset.flush_cache().unwrap();

        RasterFixture { _temp_dir, path }
    }

    /// Value of the pixel at column `x`, row `y` of the 0-based `band`.
    pub(crate) fn pattern(band: usize, x: usize, y: usize) -> u8 {
        ((x * 7 + y * 13 + band * 50) % 251) as u8
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Assert numerical difference between two expressions is less than
/// 64-bit machine epsilon or a specified epsilon.
#[macro_export]
macro_rules! assert_near {
    ($left:expr, $right:expr) => {
        $crate::assert_near!($left, $right, epsilon = f64::EPSILON)
    };
    ($left:expr, $right:expr, epsilon = $ep:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "|{} - {}| = {} is greater than epsilon {:.4e}",
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
}
