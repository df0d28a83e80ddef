//! Generation of a tile pyramid from a [`Raster`].
//!
//! Two algorithms are offered. [`Algorithm::Crop`] extracts every tile of
//! every zoom directly from the source. [`Algorithm::Join`] extracts only the
//! deepest zoom and builds each coarser zoom by downsampling the tiles of the
//! zoom below it, read back from the output tree. A zoom is therefore
//! complete before the next coarser one starts, and only the tiles being
//! worked on are held in memory.
//!
//! ```no_run
//! use gtiff2tiles::{
//!     Algorithm, Environment, EnvironmentOptions, PyramidGenerator, Raster, RasterOptions,
//!     TilingOptions,
//! };
//!
//! let env = Environment::init(EnvironmentOptions::default())?;
//! let raster = Raster::open(&env, "input.tif", RasterOptions::default())?;
//! let options = TilingOptions::default().with_zoom_range(0, 10);
//! let mut generator = PyramidGenerator::new(&raster, "tiles", options)?
//!     .with_progress(|fraction| println!("{:.1}%", fraction * 100.0));
//! let summary = generator.run(Algorithm::Join)?;
//! println!("wrote {} tiles", summary.tiles_written);
//! # Ok::<_, gtiff2tiles::errors::TilesError>(())
//! ```

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::TilingOptions;
use crate::errors::{Result, TilesError};
use crate::number::Number;
use crate::raster::Raster;
use crate::tile::{Tile, TileFormat};
use crate::tilemap::TileSetMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Every zoom straight from the source.
    Crop,
    /// Deepest zoom from the source, coarser zooms from their children.
    Join,
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Crop => "crop",
            Algorithm::Join => "join",
        })
    }
}

impl FromStr for Algorithm {
    type Err = TilesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "crop" => Ok(Algorithm::Crop),
            "join" => Ok(Algorithm::Join),
            other => Err(TilesError::InvalidArgument(format!(
                "unknown tiling algorithm '{other}'"
            ))),
        }
    }
}

/// Lifecycle of a [`PyramidGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Initialized,
    ComputingTileRanges,
    Running,
    Completed,
    Failed,
}

/// Shared flag asking a running generation to stop.
///
/// Tiles already being built are finished; no new tile is started and the
/// run fails with [`TilesError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    pub algorithm: Algorithm,
    /// Tiles covering the raster over the whole zoom range.
    pub tiles_total: u64,
    pub tiles_written: u64,
    /// Tiles whose encoding fell below the empty-tile threshold.
    pub tiles_skipped_empty: u64,
    pub elapsed: Duration,
}

type ProgressCallback<'a> = Box<dyn Fn(f64) + Send + Sync + 'a>;

/// Counts finished tiles and reports the completed fraction.
///
/// Reports are serialized so that the callback observes a non-decreasing
/// sequence ending at exactly `1.0`.
struct Progress<'a> {
    total: u64,
    done: AtomicU64,
    last_reported: Mutex<f64>,
    callback: Option<&'a ProgressCallback<'a>>,
}

impl<'a> Progress<'a> {
    fn new(total: u64, callback: Option<&'a ProgressCallback<'a>>) -> Self {
        Progress {
            total,
            done: AtomicU64::new(0),
            last_reported: Mutex::new(0.0),
            callback,
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(callback) = self.callback else {
            return;
        };
        let fraction = if self.total == 0 {
            1.0
        } else {
            (done as f64 / self.total as f64).min(1.0)
        };
        let mut last = self
            .last_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if fraction > *last {
            *last = fraction;
            callback(fraction);
        }
    }
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    skipped_empty: AtomicU64,
}

/// Writes the tiles of one raster into `output/{z}/{x}/{y}.{ext}` and the
/// tile-set metadata into `output/tilemapresource.xml`.
pub struct PyramidGenerator<'a> {
    raster: &'a Raster,
    output: PathBuf,
    options: TilingOptions,
    format: TileFormat,
    progress: Option<ProgressCallback<'a>>,
    cancellation: CancellationToken,
    state: GenerationState,
}

impl<'a> PyramidGenerator<'a> {
    /// Validate the run parameters. Nothing is read or written yet.
    pub fn new<P: AsRef<Path>>(
        raster: &'a Raster,
        output: P,
        options: TilingOptions,
    ) -> Result<Self> {
        options.validate()?;
        let output = output.as_ref();
        if output.as_os_str().is_empty() {
            return Err(TilesError::InvalidArgument(
                "output directory must not be empty".to_string(),
            ));
        }
        let format = TileFormat::new(&options, raster.band_count());
        Ok(PyramidGenerator {
            raster,
            output: output.to_path_buf(),
            options,
            format,
            progress: None,
            cancellation: CancellationToken::new(),
            state: GenerationState::Initialized,
        })
    }

    /// Report the completed fraction in `0.0..=1.0` after every tile.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'a,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Share an existing cancellation flag.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn options(&self) -> &TilingOptions {
        &self.options
    }

    pub fn format(&self) -> &TileFormat {
        &self.format
    }

    /// Tiles covering the raster over the configured zoom range.
    pub fn tile_count(&self) -> Result<u64> {
        let (min, max) = self.raster.bounds();
        Number::get_count(
            min,
            max,
            self.options.min_zoom,
            self.options.max_zoom,
            self.options.tms_compatible,
            self.options.tile_size,
        )
    }

    /// Tile numbers covering the raster at `zoom`.
    pub fn tile_range(&self, zoom: u32) -> Result<(Number, Number)> {
        let (min, max) = self.raster.bounds();
        Number::from_geo_coordinates(
            min,
            max,
            zoom,
            self.options.tile_size,
            self.options.tms_compatible,
        )
    }

    /// Generate the pyramid. A generator runs at most once.
    pub fn run(&mut self, algorithm: Algorithm) -> Result<GenerationSummary> {
        if self.state != GenerationState::Initialized {
            return Err(TilesError::InvalidArgument(format!(
                "generator cannot run from state {:?}",
                self.state
            )));
        }
        let result = self.generate(algorithm);
        self.state = match &result {
            Ok(_) => GenerationState::Completed,
            Err(err) if err.is_cancelled() => {
                tracing::info!(%algorithm, "tile generation cancelled");
                GenerationState::Failed
            }
            Err(err) => {
                tracing::error!(%algorithm, error = %err, "tile generation failed");
                GenerationState::Failed
            }
        };
        result
    }

    fn generate(&mut self, algorithm: Algorithm) -> Result<GenerationSummary> {
        let started = Instant::now();

        self.state = GenerationState::ComputingTileRanges;
        let total = self.tile_count()?;
        std::fs::create_dir_all(&self.output)
            .map_err(|source| TilesError::io(&self.output, source))?;
        let threads = self.options.resolved_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("gtiff2tiles-{index}"))
            .build()?;

        if let Some(cache_bytes) = self.options.cache_bytes {
            self.raster.set_cache_bytes(cache_bytes);
        }

        self.state = GenerationState::Running;
        tracing::info!(
            %algorithm,
            input = %self.raster.path().display(),
            output = %self.output.display(),
            min_zoom = self.options.min_zoom,
            max_zoom = self.options.max_zoom,
            tiles = total,
            threads,
            "generating tiles"
        );

        let progress = Progress::new(total, self.progress.as_ref());
        let counters = Counters::default();
        let run = Run {
            generator: self,
            progress: &progress,
            counters: &counters,
        };
        pool.install(|| match algorithm {
            Algorithm::Crop => run.crop(),
            Algorithm::Join => run.join(),
        })?;

        TileSetMetadata::new(
            self.raster.coordinate_system(),
            self.raster.bounds(),
            &self.format,
            self.options.min_zoom,
            self.options.max_zoom,
        )?
        .write(&self.output)?;

        let summary = GenerationSummary {
            algorithm,
            tiles_total: total,
            tiles_written: counters.written.load(Ordering::SeqCst),
            tiles_skipped_empty: counters.skipped_empty.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        let stats = self.raster.cache_stats();
        tracing::info!(
            tiles_written = summary.tiles_written,
            tiles_skipped_empty = summary.tiles_skipped_empty,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "tile generation completed"
        );
        Ok(summary)
    }
}

/// Borrowed state of one run, shared by the workers.
struct Run<'g, 'a> {
    generator: &'g PyramidGenerator<'a>,
    progress: &'g Progress<'g>,
    counters: &'g Counters,
}

impl Run<'_, '_> {
    fn check_cancelled(&self) -> Result<()> {
        if self.generator.cancellation.is_cancelled() {
            return Err(TilesError::Cancelled);
        }
        Ok(())
    }

    fn numbers(&self, zoom: u32) -> Result<Vec<Number>> {
        let (first, last) = self.generator.tile_range(zoom)?;
        tracing::debug!(
            zoom,
            first = %first,
            last = %last,
            tiles = Number::range_len(first, last),
            "processing zoom"
        );
        Ok(Number::range(first, last).collect())
    }

    /// Whether the tile `number` overlaps the raster.
    fn covers(&self, number: Number) -> Result<bool> {
        let generator = self.generator;
        let (min, max) = number.to_geo_coordinates(
            generator.format.size,
            generator.raster.coordinate_system(),
            generator.options.tms_compatible,
        )?;
        Ok(generator.raster.intersects(min, max))
    }

    /// Extract a tile from the source; `None` when it lies outside the raster.
    fn extract(&self, number: Number) -> Result<Option<Tile>> {
        let generator = self.generator;
        if !self.covers(number)? {
            return Ok(None);
        }
        Tile::from_raster(
            generator.raster,
            number,
            generator.format,
            generator.options.tms_compatible,
        )
        .map(Some)
    }

    fn persist(&self, tile: &Tile) -> Result<()> {
        let written = tile.write(&self.generator.output, self.generator.options.min_tile_bytes)?;
        let counter = match written {
            Some(_) => &self.counters.written,
            None => &self.counters.skipped_empty,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Build, store and count one tile.
    fn produce<F>(&self, number: Number, build: F) -> Result<Option<Tile>>
    where
        F: FnOnce(Number) -> Result<Option<Tile>>,
    {
        self.check_cancelled()?;
        let tile = build(number)?;
        if let Some(tile) = &tile {
            self.persist(tile)?;
        }
        self.progress.tick();
        Ok(tile)
    }

    fn crop(&self) -> Result<()> {
        let options = &self.generator.options;
        for zoom in (options.min_zoom..=options.max_zoom).rev() {
            self.numbers(zoom)?.into_par_iter().try_for_each(|number| {
                self.produce(number, |number| self.extract(number))
                    .map(drop)
            })?;
        }
        Ok(())
    }

    fn join(&self) -> Result<()> {
        let generator = self.generator;
        let options = &generator.options;
        self.numbers(options.max_zoom)?
            .into_par_iter()
            .try_for_each(|number| self.produce(number, |number| self.extract(number)).map(drop))?;

        for zoom in (options.min_zoom..options.max_zoom).rev() {
            // every tile of zoom + 1 is finished and persisted at this point
            self.numbers(zoom)?.into_par_iter().try_for_each(|number| {
                self.produce(number, |number| {
                    let children = self.load_children(number)?;
                    Tile::from_children(number, generator.format, options.tms_compatible, |child| {
                        children
                            .iter()
                            .find(|(number, _)| number == child)
                            .map(|(_, tile)| tile)
                    })
                })
                .map(drop)
            })?;
        }
        Ok(())
    }

    /// Children of `number` read back from the output tree. Children below
    /// the empty-tile threshold were never written; files of children
    /// outside the raster are left over from other runs and ignored.
    fn load_children(&self, number: Number) -> Result<Vec<(Number, Tile)>> {
        let generator = self.generator;
        let mut children = Vec::with_capacity(4);
        for child in number.children()? {
            if !self.covers(child)? {
                continue;
            }
            if let Some(tile) = Tile::read(&generator.output, child, generator.format)? {
                children.push((child, tile));
            }
        }
        Ok(children)
    }
}
