//! Tile a GeoTIFF from the command line.
//!
//! ```text
//! cargo run --example tile -- input.tif output/ 0 12 [crop|join] [png|jpg|webp] [xyz]
//! RUST_LOG=gtiff2tiles=debug cargo run --example tile -- ...
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use gtiff2tiles::errors::TilesError;
use gtiff2tiles::{
    Algorithm, Environment, EnvironmentOptions, PyramidGenerator, Raster, RasterOptions,
    TilingOptions,
};
use tracing_subscriber::EnvFilter;

fn usage() -> TilesError {
    TilesError::InvalidArgument(
        "usage: tile <input> <output> <min-zoom> <max-zoom> [crop|join] [png|jpg|webp] [xyz]"
            .to_string(),
    )
}

fn parse_zoom(value: Option<String>) -> Result<u32, TilesError> {
    let value = value.ok_or_else(usage)?;
    value
        .parse()
        .map_err(|_| TilesError::InvalidArgument(format!("invalid zoom '{value}'")))
}

fn main() -> Result<(), TilesError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let input = args.next().ok_or_else(usage)?;
    let output = args.next().ok_or_else(usage)?;
    let min_zoom = parse_zoom(args.next())?;
    let max_zoom = parse_zoom(args.next())?;
    let algorithm: Algorithm = args.next().as_deref().unwrap_or("join").parse()?;
    let extension = args.next().as_deref().unwrap_or("png").parse()?;
    let tms_compatible = args.next().as_deref() != Some("xyz");

    let env = Environment::init(EnvironmentOptions::default())?;
    let raster = Raster::open(&env, &input, RasterOptions::default())?;
    let options = TilingOptions::default()
        .with_zoom_range(min_zoom, max_zoom)
        .with_extension(extension)
        .with_tms_compatible(tms_compatible);

    let last_percent = AtomicU32::new(0);
    let summary = PyramidGenerator::new(&raster, &output, options)?
        .with_progress(|fraction| {
            let percent = (fraction * 100.0) as u32;
            if percent > last_percent.swap(percent, Ordering::Relaxed) {
                tracing::info!("{percent}%");
            }
        })
        .run(algorithm)?;

    println!(
        "{} tiles written, {} empty, in {:.2?}",
        summary.tiles_written, summary.tiles_skipped_empty, summary.elapsed
    );
    Ok(())
}
