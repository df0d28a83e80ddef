use bitflags::bitflags;
use ndarray::{s, Array3};

use crate::errors::{Result, TilesError};
use crate::number::Number;
use crate::tile::codec::mem_dataset;
use crate::tile::{Tile, TileFormat};

bitflags! {
    /// Quadrants of a tile, as seen on a north-up map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Quadrants: u8 {
        const TOP_LEFT = 0b0001;
        const TOP_RIGHT = 0b0010;
        const BOTTOM_LEFT = 0b0100;
        const BOTTOM_RIGHT = 0b1000;
    }
}

impl Quadrants {
    /// `(column, row)` of the quadrant inside its parent, rows from the top.
    fn offset(self) -> (usize, usize) {
        if self == Quadrants::TOP_LEFT {
            (0, 0)
        } else if self == Quadrants::TOP_RIGHT {
            (1, 0)
        } else if self == Quadrants::BOTTOM_LEFT {
            (0, 1)
        } else {
            (1, 1)
        }
    }
}

/// The children of `number` paired with the quadrant each one covers.
fn children(number: Number, tms_compatible: bool) -> Result<[(Quadrants, Number); 4]> {
    let [south_west, south_east, north_west, north_east] = {
        let [min, min_max_x, min_max_y, max] = number.children()?;
        if tms_compatible {
            [min, min_max_x, min_max_y, max]
        } else {
            // rows grow southwards
            [min_max_y, max, min, min_max_x]
        }
    };
    Ok([
        (Quadrants::TOP_LEFT, north_west),
        (Quadrants::TOP_RIGHT, north_east),
        (Quadrants::BOTTOM_LEFT, south_west),
        (Quadrants::BOTTOM_RIGHT, south_east),
    ])
}

pub(crate) fn compose<'a, F>(
    number: Number,
    format: TileFormat,
    tms_compatible: bool,
    lookup: F,
) -> Result<Option<Tile>>
where
    F: Fn(&Number) -> Option<&'a Tile>,
{
    let (bands, height, width) = format.shape();
    let mut mosaic = Array3::<u8>::zeros((bands, height * 2, width * 2));
    let mut present = Quadrants::empty();

    for (quadrant, child) in children(number, tms_compatible)? {
        let Some(tile) = lookup(&child) else {
            continue;
        };
        if tile.format().shape() != format.shape() {
            return Err(TilesError::InvalidArgument(format!(
                "child {child} of {number} has a different pixel layout"
            )));
        }
        let (column, row) = quadrant.offset();
        let (x, y) = (column * width, row * height);
        mosaic
            .slice_mut(s![.., y..y + height, x..x + width])
            .assign(&tile.pixels());
        present |= quadrant;
    }

    if present.is_empty() {
        return Ok(None);
    }
    tracing::trace!(tile = %number, quadrants = ?present, "composing tile");

    let dataset = mem_dataset(mosaic.view())?;
    let mut pixels = Array3::<u8>::zeros(format.shape());
    for (index, mut plane) in pixels.outer_iter_mut().enumerate() {
        let band = dataset.rasterband(index + 1)?;
        let slice = plane.as_slice_mut().ok_or_else(|| {
            TilesError::InvalidArgument("tile buffer is not contiguous".to_string())
        })?;
        band.read_into_slice::<u8>(
            (0, 0),
            (width * 2, height * 2),
            (width, height),
            slice,
            Some(format.interpolation.resample_alg()),
        )?;
    }
    Tile::from_pixels(number, format, pixels).map(Some)
}
