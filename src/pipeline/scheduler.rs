//! Pyramid scheduler: the orchestrating control loop.
//!
//! One run is `Init → (ListMode | SinglePass | PyramidPass) → Cleanup`, with
//! failure reachable from every phase. Zoom phases are strictly sequential:
//! imputation for zoom `z` reads the finalized output of zoom `z - 1`, so
//! there is never cross-zoom concurrency.

use crate::archive::TileArchive;
use crate::backend::BackendPool;
use crate::coords::BoundingBox;
use crate::error::{Error, Result};
use crate::impute::{impute, read_tile_list, write_tile_list};
use crate::pipeline::executor::{JobSource, RenderExecutor, RenderJob, RenderStats, TraversalOrder};
use crate::pipeline::Metrics;
use crate::region::{QueryGenerator, RegionFunctionManager};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Resolved settings for one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub bounds: BoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Pyramid split zoom; `None` selects a single full pass
    pub mid_zoom: Option<u8>,
    /// Explicit tile list; selects list mode
    pub tile_list: Option<PathBuf>,
    pub order: TraversalOrder,
    pub timeout: Duration,
    pub concurrency: usize,
    pub retry_budget: u32,
    /// Optional WKT region restriction
    pub region_wkt: Option<String>,
    /// Directory for audit copies of imputed tile lists
    pub list_audit_dir: Option<PathBuf>,
}

/// Aggregate outcome of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub tiles: RenderStats,
    /// Render phases executed (full passes and per-zoom list passes)
    pub phases: usize,
    /// High zooms skipped entirely because imputation pruned them
    pub zooms_pruned: usize,
    pub last_completed_zoom: Option<u8>,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} phase(s), {} zoom(s) pruned",
            self.tiles, self.phases, self.zooms_pruned
        )
    }
}

/// Drives a complete render run.
pub struct PyramidScheduler {
    pool: Arc<BackendPool>,
    archive: Arc<dyn TileArchive>,
    generator: Arc<dyn QueryGenerator>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl PyramidScheduler {
    pub fn new(
        pool: Arc<BackendPool>,
        archive: Arc<dyn TileArchive>,
        generator: Arc<dyn QueryGenerator>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            archive,
            generator,
            metrics,
            config,
        }
    }

    /// Run to completion.
    ///
    /// When a region restriction is configured, the region function is
    /// installed before any rendering and dropped again on every exit path,
    /// including executor failure. The archive is likewise finalized on every
    /// exit path, so tiles from completed zoom phases survive a failed run.
    /// A cleanup failure never masks a render failure.
    pub async fn run(&self) -> Result<RunStats> {
        let manager = RegionFunctionManager::new(self.generator.clone());

        let (function, region) = match &self.config.region_wkt {
            Some(wkt) => {
                let installed = manager.install(&self.pool, wkt).await?;
                (installed.name.clone(), Some(installed))
            }
            None => (self.generator.tile_function(), None),
        };

        let mut result = self.render_phases(&function).await;

        if let Some(function) = region {
            if let Err(cleanup_err) = manager.uninstall(&self.pool, &function).await {
                if result.is_ok() {
                    result = Err(cleanup_err);
                }
                // Otherwise the render error is the one worth reporting; the
                // drop failure was already logged by the manager.
            }
        }

        if let Err(e) = self.archive.finalize().await {
            if result.is_ok() {
                result = Err(Error::Archive(e));
            } else {
                tracing::warn!("Archive finalize failed after run error: {}", e);
            }
        }

        result
    }

    async fn render_phases(&self, function: &str) -> Result<RunStats> {
        let executor = RenderExecutor::new(
            self.pool.clone(),
            self.archive.clone(),
            function.to_string(),
            self.metrics.clone(),
        );

        let mut stats = RunStats::default();

        if let Some(list_path) = &self.config.tile_list {
            // List mode: bounds and zoom settings are ignored
            let coords = read_tile_list(list_path)?;
            tracing::info!(
                "List mode: {} tiles from {}",
                coords.len(),
                list_path.display()
            );
            stats.tiles = executor.run(self.job(JobSource::List(coords))).await?;
            stats.phases = 1;
            stats.last_completed_zoom = self.metrics.last_completed_zoom();
            return Ok(stats);
        }

        let (min_zoom, max_zoom) = (self.config.min_zoom, self.config.max_zoom);
        match self.config.mid_zoom {
            None => {
                tracing::info!("Single pass over zooms {}..={}", min_zoom, max_zoom);
                stats.tiles = executor
                    .run(self.job(self.full_source(min_zoom, max_zoom)))
                    .await?;
                stats.phases = 1;
                self.metrics.complete_zoom(max_zoom);
            }
            Some(mid_zoom) => {
                let mid_zoom = mid_zoom.min(max_zoom);
                tracing::info!(
                    "Pyramid pass: full zooms {}..={}, imputed zooms {}..={}",
                    min_zoom,
                    mid_zoom,
                    mid_zoom + 1,
                    max_zoom
                );

                stats.tiles = executor
                    .run(self.job(self.full_source(min_zoom, mid_zoom)))
                    .await?;
                stats.phases = 1;
                self.metrics.complete_zoom(mid_zoom);

                for zoom in (mid_zoom + 1)..=max_zoom {
                    let list = impute(self.archive.as_ref(), zoom).await?;

                    if let Some(dir) = &self.config.list_audit_dir {
                        let path = dir.join(format!("zoom_{:02}.list", zoom));
                        if let Err(e) = write_tile_list(&path, &list) {
                            tracing::warn!("Could not write audit list for zoom {}: {}", zoom, e);
                        }
                    }

                    if list.is_empty() {
                        // Pruning payoff: nothing at this zoom has a
                        // non-empty parent, so the whole level is skipped
                        tracing::info!("Zoom {} fully pruned, skipping", zoom);
                        stats.zooms_pruned += 1;
                        self.metrics.complete_zoom(zoom);
                        continue;
                    }

                    tracing::info!("Zoom {}: rendering {} imputed tiles", zoom, list.len());
                    let phase = executor.run(self.job(JobSource::List(list))).await?;
                    stats.tiles.merge(phase);
                    stats.phases += 1;
                    self.metrics.complete_zoom(zoom);
                }
            }
        }

        stats.last_completed_zoom = self.metrics.last_completed_zoom();
        Ok(stats)
    }

    fn full_source(&self, min_zoom: u8, max_zoom: u8) -> JobSource {
        JobSource::Full {
            bounds: self.config.bounds,
            min_zoom,
            max_zoom,
            order: self.config.order,
        }
    }

    fn job(&self, source: JobSource) -> RenderJob {
        RenderJob {
            source,
            timeout: self.config.timeout,
            concurrency: self.config.concurrency,
            retry_budget: self.config.retry_budget,
        }
    }
}
