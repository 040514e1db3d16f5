//! Tile compilation
//!
//! A [`ZoomLevelTask`] fills one zoom level, either from the master source or
//! from an already compiled finer level, and can later strip that finer
//! level back down to its own filter. [`TiledFeatureTask`] runs a whole list
//! of levels from finest to coarsest.
//!
//! Work is spread over a fixed number of scoped worker threads that drain a
//! shared tile queue. Every worker reads through its own source handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::Receiver;
use geo::Rect;
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::combine::{CombineStrategy, DefaultCombineStrategy, FeatureCombiner};
use crate::feature::{Feature, clip_all};
use crate::filter::CompoundFilter;
use crate::geometry::contains_rect;
use crate::meta::TiledSourceMeta;
use crate::simplify::FeatureSimplifier;
use crate::store::{FeatureSource, TiledFeatureSource, TiledFeatureTarget};
use crate::tile::Tile;
use crate::{Error, Result};

/// Phase of a zoom level run, reported in [`Error::Level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Clean,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Clean => write!(f, "clean"),
        }
    }
}

/// Cooperative cancellation shared between a caller and running workers.
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

/// Runtime settings for a compilation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompileConfig {
    /// Upper bound on worker threads per level
    pub worker_count: usize,
    /// Also compile the ring of tiles just outside the area
    pub padded: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            padded: false,
        }
    }
}

/// Drain `queue` with one worker per handle.
///
/// Workers stop when the queue is empty, when `cancel` fires or when another
/// worker failed. Returns the number of tiles `process` reported as written.
fn run_workers<H, F>(
    zoom: u8,
    queue: Receiver<Tile>,
    handles: Vec<H>,
    cancel: &CancellationToken,
    process: F,
) -> Result<usize>
where
    H: Send,
    F: Fn(&mut H, &Tile) -> Result<bool> + Sync,
{
    let written = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let (queue, process, written, failed) = (&queue, &process, &written, &failed);

    let results: Vec<Result<()>> = thread::scope(|scope| {
        let mut workers = Vec::with_capacity(handles.len());
        let mut results = Vec::new();
        for (index, mut handle) in handles.into_iter().enumerate() {
            let spawned = thread::Builder::new()
                .name(format!("tiler-z{zoom}-{index}"))
                .spawn_scoped(scope, move || -> Result<()> {
                    while !cancel.is_cancelled() && !failed.load(Ordering::Relaxed) {
                        let Ok(tile) = queue.try_recv() else {
                            break;
                        };
                        match process(&mut handle, &tile) {
                            Ok(true) => {
                                written.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                failed.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                        }
                    }
                    Ok(())
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    failed.store(true, Ordering::Relaxed);
                    results.push(Err(Error::Io(e)));
                    break;
                }
            }
        }
        results.extend(
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap_or(Err(Error::WorkerPanicked))),
        );
        results
    });

    results.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(written.load(Ordering::Relaxed))
}

/// Filter, clipping, combination and simplification settings for one zoom
/// level.
#[derive(Clone)]
pub struct ZoomLevelTask {
    zoom: u8,
    filter: CompoundFilter,
    simplifier: FeatureSimplifier,
    combiner: FeatureCombiner<Arc<dyn CombineStrategy>>,
    padded: bool,
}

impl fmt::Debug for ZoomLevelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoomLevelTask")
            .field("zoom", &self.zoom)
            .field("filter", &self.filter)
            .field("simplifier", &self.simplifier)
            .field("padded", &self.padded)
            .finish_non_exhaustive()
    }
}

impl ZoomLevelTask {
    pub fn new(zoom: u8, filter: CompoundFilter, simplifier: FeatureSimplifier) -> Self {
        let strategy: Arc<dyn CombineStrategy> = Arc::new(DefaultCombineStrategy);
        Self {
            zoom,
            filter,
            simplifier,
            combiner: FeatureCombiner::with_strategy(strategy),
            padded: false,
        }
    }

    /// Decide with `strategy` which features of a tile are merged.
    pub fn with_combiner(mut self, strategy: impl CombineStrategy + 'static) -> Self {
        let strategy: Arc<dyn CombineStrategy> = Arc::new(strategy);
        self.combiner = FeatureCombiner::with_strategy(strategy);
        self
    }

    /// Include the ring of tiles bordering the area.
    pub fn with_padding(mut self, padded: bool) -> Self {
        self.padded = padded;
        self
    }

    #[inline]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    pub fn filter(&self) -> &CompoundFilter {
        &self.filter
    }

    #[inline]
    pub fn simplifier(&self) -> FeatureSimplifier {
        self.simplifier
    }

    fn queue(&self, target: &dyn TiledFeatureTarget, area: &Rect<f64>) -> Result<(Receiver<Tile>, usize)> {
        let tiles = target.tile_source().get_for_zoom(area, self.zoom, self.padded)?;
        let count = tiles.len();
        let (sender, receiver) = crossbeam_channel::unbounded();
        for tile in tiles {
            // the receiver is alive, so sending cannot fail
            let _ = sender.send(tile);
        }
        Ok((receiver, count))
    }

    /// Handles for `workers` threads, capped by the amount of work.
    fn open_handles<H>(workers: usize, tiles: usize, open: impl Fn() -> Result<H>) -> Result<Vec<H>> {
        let count = workers.clamp(1, tiles.max(1));
        (0..count)
            .map(|_| open().map_err(|e| Error::SourceOpen(e.to_string())))
            .collect()
    }

    /// Combine and simplify the features of one tile, then store them.
    fn finish(&self, target: &dyn TiledFeatureTarget, tile: &Tile, features: &[Feature]) -> Result<()> {
        let combined = self.combiner.combine(features);
        let simplified = self.simplifier.simplify(&combined, tile);
        debug!(
            "Tile {tile}: {} features, {} after combine, writing",
            features.len(),
            combined.len()
        );
        target.write(tile, &simplified)
    }

    fn complete(&self, target: &dyn TiledFeatureTarget, result: Result<usize>, cancel: &CancellationToken) -> Result<usize> {
        let written = result?;
        target.flush()?;
        if cancel.is_cancelled() {
            info!("Zoom level {} cancelled after {written} tiles", self.zoom);
            return Err(Error::Cancelled);
        }
        Ok(written)
    }

    /// Compile this level straight from the master source.
    ///
    /// `filter` replaces the level's own filter when given.
    pub fn compile_from_master(
        &self,
        master: &dyn FeatureSource,
        target: &dyn TiledFeatureTarget,
        area: &Rect<f64>,
        filter: Option<&CompoundFilter>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        #[cfg(feature = "profiling")]
        profiling::scope!("ZoomLevelTask::compile_from_master");

        let filter = filter.unwrap_or(&self.filter);
        let (queue, tiles) = self.queue(target, area)?;
        let handles = Self::open_handles(workers, tiles, || master.open())?;
        info!(
            "Compiling zoom level {} from master: {tiles} tiles, {} workers",
            self.zoom,
            handles.len()
        );

        let result = run_workers(self.zoom, queue, handles, cancel, |source, tile| {
            let bounds = tile.bounds();
            let features = source.get(&bounds)?;
            if features.is_empty() {
                return Ok(false);
            }
            let mut features = clip_all(&filter.filter(&features), &bounds);
            if !contains_rect(area, &bounds) {
                features = clip_all(&features, area);
            }
            self.finish(target, tile, &features)?;
            Ok(true)
        });

        let written = self.complete(target, result, cancel)?;
        info!("Zoom level {} compiled: {written} of {tiles} tiles written", self.zoom);
        Ok(written)
    }

    /// Compile this level from the tiles of a finer level at `source_zoom`.
    ///
    /// Each tile gathers the source tiles of `area` that lie inside it; for
    /// adjacent levels these are at most its four sub-tiles.
    #[allow(clippy::too_many_arguments)]
    pub fn compile_from_tiled(
        &self,
        source: &dyn TiledFeatureSource,
        target: &dyn TiledFeatureTarget,
        area: &Rect<f64>,
        filter: Option<&CompoundFilter>,
        source_zoom: u8,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        #[cfg(feature = "profiling")]
        profiling::scope!("ZoomLevelTask::compile_from_tiled");

        if source_zoom <= self.zoom {
            return Err(Error::InvalidArgument(format!(
                "zoom {} cannot be built from coarser or equal zoom {source_zoom}",
                self.zoom
            )));
        }

        let filter = filter.unwrap_or(&self.filter);
        let mut children: HashMap<Tile, Vec<Tile>> = HashMap::new();
        for child in source.tile_source().get_for_zoom(area, source_zoom, self.padded)? {
            if let Some(parent) = child.ancestor(self.zoom) {
                children.entry(parent).or_default().push(child);
            }
        }
        let children = &children;

        let (queue, tiles) = self.queue(target, area)?;
        let handles = Self::open_handles(workers, tiles, || source.open())?;
        info!(
            "Compiling zoom level {} from zoom {source_zoom}: {tiles} tiles, {} workers",
            self.zoom,
            handles.len()
        );

        let result = run_workers(self.zoom, queue, handles, cancel, |source, tile| {
            let Some(sources) = children.get(tile) else {
                return Ok(false);
            };
            let mut features = Vec::new();
            for child in sources {
                features.extend(source.get(child)?);
            }
            if features.is_empty() {
                return Ok(false);
            }
            self.finish(target, tile, &filter.filter(&features))?;
            Ok(true)
        });

        let written = self.complete(target, result, cancel)?;
        info!("Zoom level {} compiled: {written} of {tiles} tiles written", self.zoom);
        Ok(written)
    }

    /// Re-filter this level's tiles with its own filter, removing what only
    /// coarser levels needed. Tiles left empty are cleared.
    pub fn clean(
        &self,
        source: &dyn TiledFeatureSource,
        target: &dyn TiledFeatureTarget,
        area: &Rect<f64>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        #[cfg(feature = "profiling")]
        profiling::scope!("ZoomLevelTask::clean");

        let (queue, tiles) = self.queue(target, area)?;
        let handles = Self::open_handles(workers, tiles, || source.open())?;
        info!("Cleaning zoom level {}: {tiles} tiles", self.zoom);

        let result = run_workers(self.zoom, queue, handles, cancel, |source, tile| {
            let features = source.get(tile)?;
            if features.is_empty() {
                return Ok(false);
            }
            let kept = self.filter.filter(&features);
            debug!("Tile {tile}: kept {} of {} features", kept.len(), features.len());
            target.write(tile, &kept)?;
            Ok(true)
        });

        let written = self.complete(target, result, cancel)?;
        info!("Zoom level {} cleaned: {written} tiles rewritten", self.zoom);
        Ok(written)
    }
}

/// A full multi-level compilation.
///
/// Levels run finest first. The finest comes from the master source, every
/// other level from the one just finer than it, after which that finer level
/// is cleaned back to its own filter. A finer level is compiled with the
/// filters of every coarser level folded in, so nothing a coarse level keeps
/// is lost on the way. Metadata is written only when every level succeeded.
pub struct TiledFeatureTask<'a> {
    master: &'a dyn FeatureSource,
    target: &'a dyn TiledFeatureTarget,
    source: &'a dyn TiledFeatureSource,
    area: Rect<f64>,
    levels: Vec<ZoomLevelTask>,
    config: CompileConfig,
}

impl fmt::Debug for TiledFeatureTask<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiledFeatureTask")
            .field("area", &self.area)
            .field("levels", &self.levels)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> TiledFeatureTask<'a> {
    /// `source` must read back what `target` writes.
    pub fn new(
        master: &'a dyn FeatureSource,
        target: &'a dyn TiledFeatureTarget,
        source: &'a dyn TiledFeatureSource,
        area: Rect<f64>,
        mut levels: Vec<ZoomLevelTask>,
    ) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::InvalidArgument("no zoom levels given".to_string()));
        }

        let tile_source = target.tile_source();
        let (min, max) = (tile_source.min_zoom(), tile_source.max_zoom());
        if let Some(level) = levels.iter().find(|l| l.zoom < min || l.zoom > max) {
            return Err(Error::ZoomOutOfRange {
                zoom: level.zoom,
                min,
                max,
            });
        }

        levels.sort_by(|a, b| b.zoom.cmp(&a.zoom));
        if let Some(pair) = levels.windows(2).find(|w| w[0].zoom == w[1].zoom) {
            return Err(Error::InvalidArgument(format!(
                "zoom level {} given more than once",
                pair[0].zoom
            )));
        }

        Ok(Self {
            master,
            target,
            source,
            area,
            levels,
            config: CompileConfig::default(),
        })
    }

    pub fn with_config(mut self, config: CompileConfig) -> Self {
        self.levels = self
            .levels
            .into_iter()
            .map(|level| level.with_padding(config.padded))
            .collect();
        self.config = config;
        self
    }

    /// Levels in run order, finest first.
    pub fn levels(&self) -> &[ZoomLevelTask] {
        &self.levels
    }

    /// Filters each level is compiled with, finest first: its own, widened
    /// by everything the coarser levels built from it need.
    pub fn effective_filters(&self) -> Vec<CompoundFilter> {
        let mut effective: Vec<CompoundFilter> = Vec::with_capacity(self.levels.len());
        for level in self.levels.iter().rev() {
            let filter = match effective.last() {
                Some(coarser) => level.filter.clone() | coarser.clone(),
                None => level.filter.clone(),
            };
            effective.push(filter);
        }
        effective.reverse();
        effective
    }

    /// Run with the configured worker count.
    pub fn run(&self) -> Result<()> {
        self.start_with_cancel(self.config.worker_count, &CancellationToken::new())
    }

    pub fn start(&self, workers: usize) -> Result<()> {
        self.start_with_cancel(workers, &CancellationToken::new())
    }

    pub fn start_with_cancel(&self, workers: usize, cancel: &CancellationToken) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("TiledFeatureTask::start");

        let level_error = |zoom: u8, stage: Stage| {
            move |e: Error| Error::Level {
                zoom,
                stage,
                source: Box::new(e),
            }
        };

        let zooms: Vec<u8> = self.levels.iter().map(|l| l.zoom).collect();
        info!("Compiling zoom levels {zooms:?} with up to {workers} workers");
        // the store is incomplete until this run finishes
        self.target.clear_meta()?;

        let effective = self.effective_filters();
        let finest = &self.levels[0];
        finest
            .compile_from_master(self.master, self.target, &self.area, Some(&effective[0]), workers, cancel)
            .map_err(level_error(finest.zoom, Stage::Compile))?;

        for (i, level) in self.levels.iter().enumerate().skip(1) {
            let finer = &self.levels[i - 1];
            level
                .compile_from_tiled(
                    self.source,
                    self.target,
                    &self.area,
                    Some(&effective[i]),
                    finer.zoom,
                    workers,
                    cancel,
                )
                .map_err(level_error(level.zoom, Stage::Compile))?;
            finer
                .clean(self.source, self.target, &self.area, workers, cancel)
                .map_err(level_error(finer.zoom, Stage::Clean))?;
        }

        self.target.set_meta(TiledSourceMeta::new(self.area, zooms))?;
        self.target.flush()?;
        info!("Compilation finished");
        Ok(())
    }
}
