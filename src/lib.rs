//! Tile Pyramid Renderer
//!
//! Renders a vector tile pyramid out of PostGIS tile functions into an
//! MBTiles archive, scheduling work zoom by zoom across a pool of database
//! backends.
//!
//! # Architecture
//!
//! - **Backend**: connection targets, per-host concurrency limits, and
//!   round-robin checkout
//! - **Archive**: MBTiles output with queryable tile emptiness
//! - **Impute**: inferring which high-zoom tiles are worth rendering from
//!   their parents
//! - **Pipeline**: bounded-concurrency render execution and the pyramid
//!   scheduler
//!
//! # Usage
//!
//! ```no_run
//! use tilepyramid::{Config, run_render};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_render(config).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backend;
pub mod config;
pub mod coords;
pub mod error;
pub mod impute;
pub mod pipeline;
pub mod region;
pub mod tileset;

pub use archive::{ArchiveMetadata, MbtilesArchive, MemoryArchive, TileArchive, TileState};
pub use backend::{BackendPool, PgTileBackend, TileBackend};
pub use config::{Config, RenderScheme};
pub use coords::{BoundingBox, TileCoord};
pub use error::Error;
pub use pipeline::{Metrics, MetricsReporter, PyramidScheduler, RunStats, SchedulerConfig, TraversalOrder};
pub use region::{QueryGenerator, SqlGenerator};
pub use tileset::{TilesetBounds, TilesetDefinition};

use anyhow::Result;
use std::sync::Arc;

/// Run a full render with the given configuration.
pub async fn run_render(config: Config) -> Result<RunStats> {
    config.validate()?;

    tracing::info!("Starting tile pyramid render");

    let tileset = match &config.tileset {
        Some(path) => {
            tracing::info!("Loading tileset from {}", path.display());
            Some(TilesetDefinition::from_file(path)?)
        }
        None => None,
    };

    let zooms = TilesetBounds::resolve(
        tileset.as_ref(),
        config.render.min_zoom,
        config.render.max_zoom,
    )?;
    if let Some(mid) = config.render.mid_zoom {
        if mid < zooms.min_zoom {
            anyhow::bail!(
                "mid_zoom {} is below min_zoom {}",
                mid,
                zooms.min_zoom
            );
        }
    }

    let bounds = config.render.bounding_box();

    // Connect every backend target up front; a bad host fails the run before
    // any tile is scheduled
    let targets = backend::resolve_targets(&config.backend)?;
    let mut backends: Vec<Arc<dyn TileBackend>> = Vec::with_capacity(targets.len());
    for target in &targets {
        tracing::info!("Connecting to backend {}", target.host);
        let backend =
            PgTileBackend::connect(target, config.backend.connections_per_host).await?;
        backends.push(Arc::new(backend));
    }

    let pool = Arc::new(BackendPool::new(
        backends,
        config.backend.connections_per_host,
        config.backend.parallelism,
    )?);
    tracing::info!(
        "Backend pool: {} host(s), total parallelism {}",
        pool.len(),
        pool.total_parallelism()
    );

    let archive: Arc<dyn TileArchive> = match &config.archive.path {
        Some(path) => {
            tracing::info!("Writing MBTiles archive to {}", path.display());
            let metadata = ArchiveMetadata {
                name: tileset
                    .as_ref()
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| "tiles".to_string()),
                bounds,
                min_zoom: zooms.min_zoom,
                max_zoom: zooms.max_zoom,
                attribution: tileset.as_ref().and_then(|t| t.attribution.clone()),
            };
            Arc::new(MbtilesArchive::create(path, &metadata).await?)
        }
        None => {
            tracing::warn!("No archive path configured, writing to memory");
            Arc::new(MemoryArchive::new())
        }
    };

    let generator: Arc<dyn QueryGenerator> =
        Arc::new(SqlGenerator::new(tileset.as_ref(), config.generator.clone()));

    let metrics = Metrics::new();

    let order = match config.render.scheme {
        RenderScheme::Pyramid => TraversalOrder::RowMajor,
        RenderScheme::PyramidRandom => TraversalOrder::Shuffled {
            seed: config.render.shuffle_seed,
        },
    };

    let scheduler_config = SchedulerConfig {
        bounds,
        min_zoom: zooms.min_zoom,
        max_zoom: zooms.max_zoom,
        mid_zoom: config.render.mid_zoom,
        tile_list: config.render.tile_list.clone(),
        order,
        timeout: std::time::Duration::from_millis(config.render.timeout_ms),
        concurrency: config
            .processing
            .concurrency
            .unwrap_or_else(|| pool.total_parallelism()),
        retry_budget: config.render.retry.budget,
        region_wkt: config.region.clone(),
        list_audit_dir: config.render.list_audit_dir.clone(),
    };

    let scheduler = PyramidScheduler::new(
        pool,
        archive.clone(),
        generator,
        metrics.clone(),
        scheduler_config,
    );

    let reporter = if config.processing.enable_metrics {
        let reporter =
            MetricsReporter::new(metrics.clone(), config.processing.metrics_interval_secs);
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
        let handle = tokio::spawn(reporter.run(shutdown_rx));
        Some((shutdown_tx, handle))
    } else {
        None
    };

    let result = scheduler.run().await;

    if let Some((shutdown_tx, handle)) = reporter {
        let _ = shutdown_tx.send(()).await;
        let _ = handle.await;
        MetricsReporter::new(metrics.clone(), 0).print_summary();
    }

    let stats = result?;

    if let Some(path) = &config.processing.metrics_output_path {
        metrics.snapshot().save_to_file(path)?;
        tracing::info!("Saved metrics snapshot to {}", path.display());
    }

    tracing::info!("Render complete: {}", stats);
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
