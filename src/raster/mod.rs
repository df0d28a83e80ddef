//! The source raster: a GDAL dataset plus its georeferencing and a cache of
//! decoded regions.

mod cache;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gdal::raster::GdalDataType;
use gdal::Dataset;
use ndarray::Array3;

use crate::area::{Area, Size};
use crate::config::{Environment, Interpolation, DEFAULT_CACHE_BYTES};
use crate::coordinate::{CoordinateSystem, GeoCoordinate};
use crate::errors::{Result, TilesError};
use crate::number::Number;

pub use cache::{CacheStats, RegionCache, RegionKey};

/// How a raster is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    /// Use this coordinate system instead of the one declared by the file.
    pub coordinate_system: Option<CoordinateSystem>,
    /// Byte budget of the region cache. `0` disables it.
    pub cache_bytes: usize,
}

impl Default for RasterOptions {
    fn default() -> Self {
        RasterOptions {
            coordinate_system: None,
            cache_bytes: DEFAULT_CACHE_BYTES,
        }
    }
}

/// A georeferenced, 8-bit source image.
///
/// The raster exclusively owns its GDAL handles and its region cache; both
/// are released when it is dropped. Reads may be issued from any number of
/// threads: every read checks a dataset handle out of a pool, so reads of
/// disjoint windows never share a handle.
pub struct Raster {
    path: PathBuf,
    coordinate_system: CoordinateSystem,
    size: Size,
    band_count: usize,
    min: GeoCoordinate,
    max: GeoCoordinate,
    handles: DatasetPool,
    cache: RegionCache,
}

impl Raster {
    pub fn open<P: AsRef<Path>>(
        _environment: &Environment,
        path: P,
        options: RasterOptions,
    ) -> Result<Raster> {
        let path = path.as_ref();
        if !is_virtual(path) {
            if path.is_dir() {
                return Err(TilesError::io(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "input raster is a directory",
                    ),
                ));
            }
            // missing or unreadable files are file-system errors, not GDAL ones
            File::open(path).map_err(|source| TilesError::io(path, source))?;
        }
        let dataset = Dataset::open(path)?;

        let size = Size::from_usize(dataset.raster_size())?;
        let band_count = dataset.raster_count();
        if band_count == 0 {
            return Err(TilesError::UnsupportedRaster(format!(
                "'{}' has no raster bands",
                path.display()
            )));
        }
        for index in 1..=band_count {
            let band_type = dataset.rasterband(index)?.band_type();
            if band_type != GdalDataType::UInt8 {
                return Err(TilesError::UnsupportedRaster(format!(
                    "band {index} of '{}' is {band_type:?}, only 8-bit bands are supported",
                    path.display()
                )));
            }
        }

        let coordinate_system = match options.coordinate_system {
            Some(system) => system,
            None => detect_coordinate_system(&dataset)?,
        };
        let (min, max) = footprint(&dataset.geo_transform()?, size, coordinate_system)?;

        tracing::info!(
            path = %path.display(),
            %size,
            bands = band_count,
            srs = coordinate_system.srs(),
            min_x = min.x(),
            min_y = min.y(),
            max_x = max.x(),
            max_y = max.y(),
            "opened raster"
        );

        Ok(Raster {
            path: path.to_path_buf(),
            coordinate_system,
            size,
            band_count,
            min,
            max,
            handles: DatasetPool::new(path.to_path_buf(), dataset),
            cache: RegionCache::new(options.cache_bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn coordinate_system(&self) -> CoordinateSystem {
        self.coordinate_system
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// South-west and north-east corners.
    pub fn bounds(&self) -> (GeoCoordinate, GeoCoordinate) {
        (self.min, self.max)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Change the byte budget of the region cache, evicting regions that no
    /// longer fit.
    pub fn set_cache_bytes(&self, cache_bytes: usize) {
        self.cache.set_capacity_bytes(cache_bytes);
    }

    /// Whether the footprint `min..max` overlaps this raster with a
    /// non-zero area.
    pub fn intersects(&self, min: GeoCoordinate, max: GeoCoordinate) -> bool {
        self.min.x().max(min.x()) < self.max.x().min(max.x())
            && self.min.y().max(min.y()) < self.max.y().min(max.y())
    }

    /// Read and write windows of the tile `number`.
    pub fn get_areas(
        &self,
        number: Number,
        tile_size: Size,
        tms_compatible: bool,
    ) -> Result<(Area, Area)> {
        let (tile_min, tile_max) =
            number.to_geo_coordinates(tile_size, self.coordinate_system, tms_compatible)?;
        Area::get_areas(self.min, self.max, self.size, tile_min, tile_max, tile_size)
    }

    /// Decode the `read` window of every band, resampled to `size`.
    ///
    /// The result has shape `(bands, rows, columns)`. Regions already in the
    /// cache are returned without decoding.
    pub fn read_region(
        &self,
        read: Area,
        size: Size,
        interpolation: Interpolation,
    ) -> Result<Arc<Array3<u8>>> {
        let key = RegionKey {
            read,
            size,
            interpolation,
        };
        if let Some(pixels) = self.cache.get(&key) {
            tracing::trace!(%read, %size, "region cache hit");
            return Ok(pixels);
        }

        let pixels = self.handles.with_dataset(|dataset| {
            let (columns, rows) = size.as_usize();
            let mut pixels = Array3::<u8>::zeros((self.band_count, rows, columns));
            for (index, mut plane) in pixels.outer_iter_mut().enumerate() {
                let band = dataset.rasterband(index + 1)?;
                let slice = plane.as_slice_mut().ok_or_else(|| {
                    TilesError::InvalidArgument("region buffer is not contiguous".to_string())
                })?;
                band.read_into_slice::<u8>(
                    read.window(),
                    read.size().as_usize(),
                    (columns, rows),
                    slice,
                    Some(interpolation.resample_alg()),
                )?;
            }
            Ok(pixels)
        })?;

        let pixels = Arc::new(pixels);
        self.cache.insert(key, Arc::clone(&pixels));
        Ok(pixels)
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("path", &self.path)
            .field("coordinate_system", &self.coordinate_system)
            .field("size", &self.size)
            .field("band_count", &self.band_count)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

/// GDAL virtual file systems (`/vsimem/`, `/vsicurl/`, ...) have no local path.
fn is_virtual(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.starts_with("/vsi"))
}

fn detect_coordinate_system(dataset: &Dataset) -> Result<CoordinateSystem> {
    let mut srs = dataset.spatial_ref().map_err(|_| {
        TilesError::UnsupportedCoordinateSystem("raster has no spatial reference".to_string())
    })?;
    let code = srs
        .auth_code()
        .or_else(|_| {
            srs.auto_identify_epsg()?;
            srs.auth_code()
        })
        .map_err(|_| {
            TilesError::UnsupportedCoordinateSystem(
                srs.to_wkt().unwrap_or_else(|_| "unknown".to_string()),
            )
        })?;
    CoordinateSystem::from_epsg(code)
}

/// Corners of a north-up raster from its affine transform.
fn footprint(
    transform: &[f64; 6],
    size: Size,
    system: CoordinateSystem,
) -> Result<(GeoCoordinate, GeoCoordinate)> {
    if transform[2] != 0.0 || transform[4] != 0.0 {
        return Err(TilesError::UnsupportedRaster(
            "rotated rasters must be warped before tiling".to_string(),
        ));
    }
    if transform[1] == 0.0 || transform[5] == 0.0 {
        return Err(TilesError::UnsupportedRaster(
            "raster has a zero pixel size".to_string(),
        ));
    }
    let (width, height) = (f64::from(size.width()), f64::from(size.height()));
    let origin = GeoCoordinate::new(system, transform[0], transform[3]);
    let corner = GeoCoordinate::new(
        system,
        transform[0] + width * transform[1],
        transform[3] + height * transform[5],
    );
    Ok(GeoCoordinate::order(origin, corner))
}

/// Dataset handles on one file, handed out one per concurrent reader.
struct DatasetPool {
    path: PathBuf,
    idle: Mutex<Vec<Dataset>>,
}

impl DatasetPool {
    fn new(path: PathBuf, first: Dataset) -> Self {
        DatasetPool {
            path,
            idle: Mutex::new(vec![first]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Dataset>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_dataset<R>(&self, read: impl FnOnce(&Dataset) -> Result<R>) -> Result<R> {
        let idle = self.lock().pop();
        let dataset = match idle {
            Some(dataset) => dataset,
            None => {
                tracing::trace!(path = %self.path.display(), "opening another dataset handle");
                Dataset::open(&self.path)?
            }
        };
        let result = read(&dataset);
        self.lock().push(dataset);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_near;
    use crate::test_utils::{environment, RasterFixture};

    #[test]
    fn opens_a_geodetic_raster() {
        let env = environment();
        let fixture = RasterFixture::geodetic("open.tif", (200, 100), 3, (10.0, 20.0), 0.01);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        assert_eq!(raster.coordinate_system(), CoordinateSystem::Geodetic);
        assert_eq!(raster.size(), Size::new(200, 100).unwrap());
        assert_eq!(raster.band_count(), 3);
        let (min, max) = raster.bounds();
        assert_near!(min.x(), 10.0);
        assert_near!(min.y(), 19.0, epsilon = 1e-9);
        assert_near!(max.x(), 12.0, epsilon = 1e-9);
        assert_near!(max.y(), 20.0);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let env = environment();
        let err = Raster::open(&env, "no/such/raster.tif", RasterOptions::default()).unwrap_err();
        assert!(matches!(err, TilesError::Io { .. }));
    }

    #[test]
    fn unreadable_inputs_are_io_errors() {
        let env = environment();
        let dir = tempfile::tempdir().unwrap();
        let err = Raster::open(&env, dir.path(), RasterOptions::default()).unwrap_err();
        assert!(matches!(err, TilesError::Io { .. }));

        let err = Raster::open(&env, dir.path().join("absent.tif"), RasterOptions::default())
            .unwrap_err();
        match err {
            TilesError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn permission_denied_is_an_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let env = environment();
        let fixture = RasterFixture::geodetic("locked.tif", (8, 8), 1, (0.0, 1.0), 0.125);
        std::fs::set_permissions(fixture.path(), std::fs::Permissions::from_mode(0o000)).unwrap();
        // privileged users read the file regardless of its mode
        if File::open(fixture.path()).is_ok() {
            return;
        }
        let err = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap_err();
        match err {
            TilesError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cache_budget_can_shrink() {
        let env = environment();
        let fixture = RasterFixture::geodetic("budget.tif", (64, 64), 1, (0.0, 1.0), 1.0 / 64.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let size = Size::new(16, 16).unwrap();
        for x in [0, 16, 32] {
            raster
                .read_region(Area::new(x, 0, size), size, Interpolation::Nearest)
                .unwrap();
        }
        assert_eq!(raster.cache_stats().entries, 3);

        raster.set_cache_bytes(2 * 256);
        let stats = raster.cache_stats();
        assert_eq!(stats.capacity_bytes, 512);
        assert_eq!((stats.entries, stats.bytes), (2, 512));

        raster.set_cache_bytes(0);
        raster
            .read_region(Area::new(48, 0, size), size, Interpolation::Nearest)
            .unwrap();
        assert_eq!(raster.cache_stats().entries, 0);
    }

    #[test]
    fn unsupported_coordinate_system() {
        let env = environment();
        let fixture = RasterFixture::with_epsg("utm.tif", (10, 10), 1, 32654, (500_000.0, 4_000_000.0), 10.0);
        let err = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap_err();
        assert!(matches!(err, TilesError::UnsupportedCoordinateSystem(_)));

        // a declared system overrides detection
        let raster = Raster::open(
            &env,
            fixture.path(),
            RasterOptions {
                coordinate_system: Some(CoordinateSystem::Mercator),
                ..RasterOptions::default()
            },
        )
        .unwrap();
        assert_eq!(raster.coordinate_system(), CoordinateSystem::Mercator);
    }

    #[test]
    fn regions_are_cached() {
        let env = environment();
        let fixture = RasterFixture::geodetic("cache.tif", (64, 64), 1, (0.0, 1.0), 1.0 / 64.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let read = Area::new(0, 0, Size::new(32, 32).unwrap());
        let size = Size::new(16, 16).unwrap();
        let first = raster.read_region(read, size, Interpolation::Nearest).unwrap();
        let second = raster.read_region(read, size, Interpolation::Nearest).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.dim(), (1, 16, 16));
        let stats = raster.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn nearest_read_matches_source_pixels() {
        let env = environment();
        let fixture = RasterFixture::geodetic("pixels.tif", (8, 8), 1, (0.0, 1.0), 0.125);
        let raster = Raster::open(
            &env,
            fixture.path(),
            RasterOptions {
                cache_bytes: 0,
                ..RasterOptions::default()
            },
        )
        .unwrap();
        let read = Area::new(2, 3, Size::new(4, 2).unwrap());
        let pixels = raster
            .read_region(read, read.size(), Interpolation::Nearest)
            .unwrap();
        for row in 0..2 {
            for column in 0..4 {
                assert_eq!(
                    pixels[[0, row, column]],
                    RasterFixture::pattern(0, 2 + column, 3 + row)
                );
            }
        }
    }

    #[test]
    fn concurrent_reads_share_the_raster() {
        let env = environment();
        let fixture = RasterFixture::geodetic("threads.tif", (128, 128), 3, (0.0, 1.0), 1.0 / 128.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        std::thread::scope(|scope| {
            for worker in 0..4u32 {
                let raster = &raster;
                scope.spawn(move || {
                    let read = Area::new(worker * 32, 0, Size::new(32, 128).unwrap());
                    let pixels = raster
                        .read_region(read, read.size(), Interpolation::Nearest)
                        .unwrap();
                    assert_eq!(pixels.dim(), (3, 128, 32));
                    assert_eq!(
                        pixels[[1, 5, 7]],
                        RasterFixture::pattern(1, (worker * 32 + 7) as usize, 5)
                    );
                });
            }
        });
    }

    #[test]
    fn tile_windows_from_the_raster() {
        let env = environment();
        // covers the north-east quarter of geodetic tile 0/1/0
        let fixture = RasterFixture::geodetic("quarter.tif", (90, 45), 1, (90.0, 90.0), 1.0);
        let raster = Raster::open(&env, fixture.path(), RasterOptions::default()).unwrap();
        let number = Number::new(1, 0, 0).unwrap();
        let (read, write) = raster.get_areas(number, Size::default(), true).unwrap();
        assert_eq!(read, Area::new(0, 0, Size::new(90, 45).unwrap()));
        assert_eq!(write, Area::new(128, 0, Size::new(128, 64).unwrap()));
    }
}
