#![allow(dead_code)]

use std::path::{Path, PathBuf};

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use gtiff2tiles::{Environment, EnvironmentOptions};

pub fn environment() -> Environment {
    Environment::init(EnvironmentOptions {
        quiet_gdal: true,
        ..EnvironmentOptions::default()
    })
    .unwrap()
}

/// North-up GeoTIFF parameters.
pub struct RasterLayout {
    pub size: (usize, usize),
    pub bands: usize,
    pub epsg: u32,
    pub origin: (f64, f64),
    pub resolution: (f64, f64),
}

/// A GeoTIFF written into a temporary directory, removed on drop.
pub struct TempRaster {
    _temp_dir: tempfile::TempDir,
    path: PathBuf,
}

impl TempRaster {
    pub fn new(name: &str, layout: &RasterLayout) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let path = _temp_dir.path().join(name);
        let (width, height) = layout.size;

        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut dataset = driver
            .create_with_band_type::<u8, _>(&path, width, height, layout.bands)
            .unwrap();
        dataset
            .set_geo_transform(&[
                layout.origin.0,
                layout.resolution.0,
                0.0,
                layout.origin.1,
                0.0,
                -layout.resolution.1,
            ])
            .unwrap();
        dataset
            .set_spatial_ref(&SpatialRef::from_epsg(layout.epsg).unwrap())
            .unwrap();
        for band in 0..layout.bands {
            let data = (0..height)
                .flat_map(|y| (0..width).map(move |x| pattern(band, x, y)))
                .collect::<Vec<_>>();
            let mut buffer = Buffer::new((width, height), data);
            dataset
                .rasterband(band + 1)
                .unwrap()
                .write((0, 0), (width, height), &mut buffer)
                .unwrap();
        }
        drop(dataset);

        TempRaster { _temp_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Smooth pixel values with some structure at every scale.
pub fn pattern(band: usize, x: usize, y: usize) -> u8 {
    ((x / 3 + y / 5 + band * 60) % 256) as u8
}

/// Every file below `root` with the given extension, relative to `root`.
pub fn tile_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == extension) {
                files.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    files.sort();
    files
}
