use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use gdal::cpl::CslStringList;
use gdal::raster::Buffer;
use gdal::vsi::{get_vsi_mem_file_bytes_owned, unlink_mem_file};
use gdal::{Dataset, DriverManager};
use ndarray::{Array3, ArrayView3};

use crate::config::TileExtension;
use crate::errors::{Result, TilesError};
use crate::tile::{TileFormat, OPAQUE};

/// Distinguishes the in-memory files of concurrent encoders.
static NEXT_FILE: AtomicU64 = AtomicU64::new(0);

/// Copy a `(bands, rows, columns)` buffer into a new `MEM` dataset.
pub(crate) fn mem_dataset(pixels: ArrayView3<'_, u8>) -> Result<Dataset> {
    let (bands, height, width) = pixels.dim();
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<u8, _>("", width, height, bands)?;
    for (index, plane) in pixels.outer_iter().enumerate() {
        let mut buffer = Buffer::new((width, height), plane.iter().copied().collect());
        dataset
            .rasterband(index + 1)?
            .write((0, 0), (width, height), &mut buffer)?;
    }
    Ok(dataset)
}

fn creation_options(format: &TileFormat) -> Vec<(&'static str, String)> {
    match format.extension {
        TileExtension::Png => Vec::new(),
        TileExtension::Webp if format.quality >= 100 => vec![("LOSSLESS", "YES".to_string())],
        TileExtension::Jpg | TileExtension::Webp => {
            vec![("QUALITY", format.quality.to_string())]
        }
    }
}

/// Encode a tile buffer with the driver matching the format's extension.
pub(crate) fn encode(pixels: ArrayView3<'_, u8>, format: &TileFormat) -> Result<Vec<u8>> {
    let source = mem_dataset(pixels)?;
    let driver = DriverManager::get_driver_by_name(format.extension.driver_name())?;
    let mut options = CslStringList::new();
    for (name, value) in creation_options(format) {
        options.set_name_value(name, &value)?;
    }
    let path = format!(
        "/vsimem/gtiff2tiles/{}.{}",
        NEXT_FILE.fetch_add(1, Ordering::Relaxed),
        format.extension.extension()
    );

    match source.create_copy(&driver, &path, &options) {
        // the copy must be closed before its bytes are complete
        Ok(copy) => drop(copy),
        Err(err) => {
            let _ = unlink_mem_file(&path);
            return Err(err.into());
        }
    }
    Ok(get_vsi_mem_file_bytes_owned(&path)?)
}

/// Decode a stored tile into a `(bands, rows, columns)` buffer.
///
/// Encoders may drop an alpha band that is opaque everywhere; it is restored
/// as [`OPAQUE`].
pub(crate) fn decode(path: &Path, format: &TileFormat) -> Result<Array3<u8>> {
    let dataset = Dataset::open(path)?;
    let (bands, height, width) = format.shape();
    let stored = dataset.raster_count();
    let dropped_alpha = bands % 2 == 0 && stored + 1 == bands;
    if dataset.raster_size() != (width, height) || !(stored == bands || dropped_alpha) {
        return Err(TilesError::InvalidArgument(format!(
            "'{}' is not a {} tile with {bands} bands",
            path.display(),
            format.size
        )));
    }

    let mut pixels = Array3::<u8>::zeros(format.shape());
    for (index, mut plane) in pixels.outer_iter_mut().enumerate() {
        if index >= stored {
            plane.fill(OPAQUE);
            continue;
        }
        let band = dataset.rasterband(index + 1)?;
        let slice = plane.as_slice_mut().ok_or_else(|| {
            TilesError::InvalidArgument("tile buffer is not contiguous".to_string())
        })?;
        band.read_into_slice::<u8>((0, 0), (width, height), (width, height), slice, None)?;
    }
    Ok(pixels)
}
