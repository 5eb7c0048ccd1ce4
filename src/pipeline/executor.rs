//! Render executor: drives one render job to completion against the backend
//! pool.
//!
//! Tiles render with bounded concurrency and complete out of order inside a
//! job. The first tile that exhausts its retry budget aborts the job:
//! dropping the result stream cancels all in-flight renders.

use crate::archive::TileArchive;
use crate::backend::BackendPool;
use crate::coords::{BoundingBox, TileCoord};
use crate::error::{Error, Result};
use crate::pipeline::Metrics;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Intra-job traversal order for full passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    /// Zoom ascending, row-major within each zoom (deterministic)
    RowMajor,
    /// Shuffled over the whole coordinate universe
    Shuffled { seed: Option<u64> },
}

/// What a render job targets.
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Every in-bounds coordinate across a zoom range, each exactly once
    Full {
        bounds: BoundingBox,
        min_zoom: u8,
        max_zoom: u8,
        order: TraversalOrder,
    },
    /// Exactly these coordinates, in this order
    List(Vec<TileCoord>),
}

/// One unit of scheduled render work. Immutable; consumed exactly once.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: JobSource,
    pub timeout: Duration,
    pub concurrency: usize,
    /// Re-attempts allowed per tile after the first try
    pub retry_budget: u32,
}

/// Outcome counts for one completed job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: usize,
    pub empty: usize,
}

impl RenderStats {
    pub fn total(&self) -> usize {
        self.rendered + self.empty
    }

    pub fn merge(&mut self, other: RenderStats) {
        self.rendered += other.rendered;
        self.empty += other.empty;
    }
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rendered, {} empty", self.rendered, self.empty)
    }
}

enum TileOutcome {
    Rendered,
    Empty,
}

/// Executes render jobs against the pool, writing tiles into the archive as
/// they complete.
pub struct RenderExecutor {
    pool: Arc<BackendPool>,
    archive: Arc<dyn TileArchive>,
    tile_function: String,
    metrics: Arc<Metrics>,
}

impl RenderExecutor {
    pub fn new(
        pool: Arc<BackendPool>,
        archive: Arc<dyn TileArchive>,
        tile_function: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool,
            archive,
            tile_function,
            metrics,
        }
    }

    /// Enumerate the job's coordinate universe in issue order.
    fn enumerate(source: &JobSource) -> Vec<TileCoord> {
        match source {
            JobSource::Full {
                bounds,
                min_zoom,
                max_zoom,
                order,
            } => {
                let mut coords: Vec<TileCoord> = (*min_zoom..=*max_zoom)
                    .flat_map(|zoom| bounds.tile_range(zoom).iter())
                    .collect();
                if let TraversalOrder::Shuffled { seed } = order {
                    let mut rng = match seed {
                        Some(seed) => StdRng::seed_from_u64(*seed),
                        None => StdRng::from_entropy(),
                    };
                    coords.shuffle(&mut rng);
                }
                coords
            }
            JobSource::List(coords) => coords.clone(),
        }
    }

    /// Run the job to completion. Fails fast on the first tile whose retry
    /// budget is exhausted.
    pub async fn run(&self, job: RenderJob) -> Result<RenderStats> {
        let coords = Self::enumerate(&job.source);
        if coords.is_empty() {
            return Ok(RenderStats::default());
        }

        tracing::info!(
            "Rendering {} tiles ({} concurrent, retry budget {})",
            coords.len(),
            job.concurrency,
            job.retry_budget
        );

        let mut results = stream::iter(coords)
            .map(|coord| self.render_one(coord, job.timeout, job.retry_budget))
            .buffer_unordered(job.concurrency.max(1));

        let mut stats = RenderStats::default();
        while let Some(result) = results.next().await {
            match result? {
                TileOutcome::Rendered => stats.rendered += 1,
                TileOutcome::Empty => stats.empty += 1,
            }
        }

        tracing::info!("Job complete: {}", stats);
        Ok(stats)
    }

    /// Render one tile with its retry budget and persist the result.
    async fn render_one(
        &self,
        coord: TileCoord,
        timeout: Duration,
        retry_budget: u32,
    ) -> Result<TileOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = async {
                let lease = self.pool.checkout().await?;
                lease
                    .backend()
                    .render_tile(&self.tile_function, coord, timeout)
                    .await
            }
            .await;

            match result {
                Ok(content) => {
                    let data = content.unwrap_or_default();
                    self.archive
                        .put_tile(coord, &data)
                        .await
                        .map_err(Error::Archive)?;
                    return if data.is_empty() {
                        self.metrics.add_tile_empty();
                        Ok(TileOutcome::Empty)
                    } else {
                        self.metrics.add_tile_rendered();
                        self.metrics.add_bytes_written(data.len() as u64);
                        Ok(TileOutcome::Rendered)
                    };
                }
                Err(source) => {
                    if attempt > retry_budget {
                        self.metrics.add_tile_failed();
                        tracing::error!(
                            "Tile {} failed after {} attempts: {}",
                            coord,
                            attempt,
                            source
                        );
                        return Err(Error::RenderExecution {
                            coord,
                            attempts: attempt,
                            source,
                        });
                    }
                    self.metrics.add_retry();
                    tracing::warn!(
                        "Tile {} attempt {} failed: {}, retrying",
                        coord,
                        attempt,
                        source
                    );
                }
            }
        }
    }
}
