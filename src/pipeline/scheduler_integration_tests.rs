//! End-to-end scheduler runs against in-memory backends and archives.

use crate::archive::{MemoryArchive, TileArchive, TileState};
use crate::backend::mock::MockBackend;
use crate::backend::{BackendPool, TileBackend};
use crate::config::GeneratorConfig;
use crate::coords::{BoundingBox, TileCoord};
use crate::error::Error;
use crate::pipeline::{Metrics, PyramidScheduler, SchedulerConfig, TraversalOrder};
use crate::region::SqlGenerator;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn scheduler_config(min_zoom: u8, max_zoom: u8, mid_zoom: Option<u8>) -> SchedulerConfig {
    SchedulerConfig {
        bounds: BoundingBox::default(),
        min_zoom,
        max_zoom,
        mid_zoom,
        tile_list: None,
        order: TraversalOrder::RowMajor,
        timeout: Duration::from_secs(5),
        concurrency: 4,
        retry_budget: 0,
        region_wkt: None,
        list_audit_dir: None,
    }
}

fn build_scheduler(
    mocks: Vec<Arc<MockBackend>>,
    config: SchedulerConfig,
) -> (Arc<MemoryArchive>, Arc<Metrics>, PyramidScheduler) {
    let backends: Vec<Arc<dyn TileBackend>> = mocks
        .into_iter()
        .map(|m| m as Arc<dyn TileBackend>)
        .collect();
    let pool = Arc::new(BackendPool::new(backends, 4, None).unwrap());
    let archive = Arc::new(MemoryArchive::new());
    let generator = Arc::new(SqlGenerator::new(None, GeneratorConfig::default()));
    let metrics = Metrics::new();
    let scheduler = PyramidScheduler::new(
        pool,
        archive.clone() as Arc<dyn TileArchive>,
        generator,
        metrics.clone(),
        config,
    );
    (archive, metrics, scheduler)
}

/// Ancestor of `coord` at zoom 1, for content functions keyed on subtrees.
fn ancestor_at_zoom_one(coord: TileCoord) -> TileCoord {
    let shift = coord.zoom - 1;
    TileCoord::new(1, coord.x >> shift, coord.y >> shift)
}

/// Content is present only inside the subtree under zoom-1 tile (1,1).
fn single_subtree_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::with_content("db0".to_string(), |coord| {
        if coord.zoom == 0 || ancestor_at_zoom_one(coord) == TileCoord::new(1, 1, 1) {
            Some(b"land".to_vec())
        } else {
            None
        }
    }))
}

#[tokio::test]
async fn test_pyramid_run_prunes_empty_subtrees() {
    let mock = single_subtree_backend();
    let (archive, _, scheduler) = build_scheduler(vec![mock.clone()], scheduler_config(0, 3, Some(1)));

    let stats = scheduler.run().await.unwrap();

    // Full pass: 1 + 4 tiles; imputed: 4 at zoom 2, 16 at zoom 3
    assert_eq!(stats.tiles.rendered, 1 + 1 + 4 + 16);
    assert_eq!(stats.tiles.empty, 3);
    assert_eq!(stats.phases, 3);
    assert_eq!(stats.zooms_pruned, 0);
    assert_eq!(stats.last_completed_zoom, Some(3));

    let log = mock.render_log();
    assert_eq!(log.iter().filter(|c| c.zoom == 2).count(), 4);
    assert_eq!(log.iter().filter(|c| c.zoom == 3).count(), 16);
    for coord in log.iter().filter(|c| c.zoom >= 2) {
        assert_eq!(ancestor_at_zoom_one(*coord), TileCoord::new(1, 1, 1));
    }

    // Empty siblings at zoom 1 are recorded, not skipped
    assert_eq!(
        archive.tile_state(TileCoord::new(1, 0, 0)).await.unwrap(),
        TileState::Empty
    );
}

#[tokio::test]
async fn test_fully_empty_zoom_skips_remaining_levels() {
    let mock = Arc::new(MockBackend::with_content("db0".to_string(), |coord| {
        if coord.zoom == 0 {
            Some(b"world".to_vec())
        } else {
            None
        }
    }));
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], scheduler_config(0, 3, Some(1)));

    let stats = scheduler.run().await.unwrap();

    assert_eq!(stats.tiles.rendered, 1);
    assert_eq!(stats.tiles.empty, 4);
    assert_eq!(stats.phases, 1);
    assert_eq!(stats.zooms_pruned, 2);
    assert_eq!(stats.last_completed_zoom, Some(3));
    assert!(mock.render_log().iter().all(|c| c.zoom <= 1));
}

#[tokio::test]
async fn test_zooms_complete_in_ascending_order() {
    let mock = single_subtree_backend();
    let mut config = scheduler_config(0, 3, Some(1));
    config.concurrency = 1;
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], config);

    scheduler.run().await.unwrap();

    let zooms: Vec<u8> = mock.render_log().iter().map(|c| c.zoom).collect();
    assert!(zooms.windows(2).all(|w| w[0] <= w[1]), "zooms: {:?}", zooms);
}

#[tokio::test]
async fn test_single_pass_when_no_mid_zoom() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    let (_, metrics, scheduler) = build_scheduler(vec![mock.clone()], scheduler_config(0, 2, None));

    let stats = scheduler.run().await.unwrap();

    assert_eq!(stats.tiles.rendered, 1 + 4 + 16);
    assert_eq!(stats.phases, 1);
    assert_eq!(metrics.last_completed_zoom(), Some(2));
}

#[tokio::test]
async fn test_failure_halts_later_phases() {
    let mock = single_subtree_backend();
    // Fail a zoom-2 tile forever; zoom 3 must never start
    mock.fail_times(TileCoord::new(2, 2, 2), u32::MAX);
    let mut config = scheduler_config(0, 3, Some(1));
    config.retry_budget = 1;
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], config);

    let err = scheduler.run().await.unwrap_err();
    match err {
        Error::RenderExecution { coord, attempts, .. } => {
            assert_eq!(coord, TileCoord::new(2, 2, 2));
            assert_eq!(attempts, 2);
        }
        other => panic!("expected RenderExecution, got {:?}", other),
    }
    assert!(mock.render_log().iter().all(|c| c.zoom <= 2));
}

#[tokio::test]
async fn test_region_function_installed_on_every_backend() {
    let mocks: Vec<Arc<MockBackend>> = (0..2)
        .map(|i| Arc::new(MockBackend::named(format!("db{}", i))))
        .collect();
    let mut config = scheduler_config(0, 1, None);
    config.region_wkt = Some("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))".to_string());
    let (_, _, scheduler) = build_scheduler(mocks.clone(), config);

    scheduler.run().await.unwrap();

    for mock in &mocks {
        let sql = mock.executed_sql();
        assert_eq!(sql.len(), 2, "install then drop on {}", mock.describe());
        assert!(sql[0].starts_with("CREATE OR REPLACE FUNCTION public.tiles_tile_"));
        assert!(sql[1].starts_with("DROP FUNCTION IF EXISTS public.tiles_tile_"));
    }
}

#[tokio::test]
async fn test_region_function_dropped_after_render_failure() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    mock.fail_times(TileCoord::new(1, 0, 0), u32::MAX);
    let mut config = scheduler_config(0, 1, None);
    config.region_wkt = Some("POINT(0 0)".to_string());
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], config);

    let err = scheduler.run().await.unwrap_err();
    assert!(matches!(err, Error::RenderExecution { .. }));

    let sql = mock.executed_sql();
    assert!(sql.iter().any(|s| s.starts_with("DROP FUNCTION IF EXISTS")));
}

#[tokio::test]
async fn test_partial_install_rolled_back_on_every_backend() {
    let db0 = Arc::new(MockBackend::named("db0".to_string()));
    let db1 = Arc::new(MockBackend::named("db1".to_string()));
    db1.fail_execute();
    let mut config = scheduler_config(0, 1, None);
    config.region_wkt = Some("POINT(0 0)".to_string());
    let (_, _, scheduler) = build_scheduler(vec![db0.clone(), db1.clone()], config);

    let err = scheduler.run().await.unwrap_err();
    match err {
        Error::Install { host, .. } => assert_eq!(host, "db1"),
        other => panic!("expected Install, got {:?}", other),
    }

    // The backend that took the create must also get the drop
    let sql = db0.executed_sql();
    assert_eq!(sql.len(), 2);
    assert!(sql[0].starts_with("CREATE OR REPLACE FUNCTION"));
    assert!(sql[1].starts_with("DROP FUNCTION IF EXISTS"));

    assert!(db0.render_log().is_empty());
    assert!(db1.render_log().is_empty());
}

#[tokio::test]
async fn test_install_failure_aborts_before_rendering() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    mock.fail_execute();
    let mut config = scheduler_config(0, 1, None);
    config.region_wkt = Some("POINT(0 0)".to_string());
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], config);

    let err = scheduler.run().await.unwrap_err();
    assert!(matches!(err, Error::Install { .. }));
    assert!(mock.render_log().is_empty());
}

#[tokio::test]
async fn test_list_mode_renders_listed_tiles_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.list");
    std::fs::write(&path, "5/10/11\n5/10/12\n2/1/1\n").unwrap();

    let mock = Arc::new(MockBackend::named("db0".to_string()));
    let mut config = scheduler_config(0, 14, Some(9));
    config.tile_list = Some(path);
    config.concurrency = 1;
    let (_, _, scheduler) = build_scheduler(vec![mock.clone()], config);

    let stats = scheduler.run().await.unwrap();

    assert_eq!(stats.tiles.total(), 3);
    assert_eq!(stats.phases, 1);
    assert_eq!(
        mock.render_log(),
        vec![
            TileCoord::new(5, 10, 11),
            TileCoord::new(5, 10, 12),
            TileCoord::new(2, 1, 1),
        ]
    );
}

#[tokio::test]
async fn test_missing_tile_list_is_a_configuration_error() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    let mut config = scheduler_config(0, 14, None);
    config.tile_list = Some(PathBuf::from("/nonexistent/tiles.list"));
    let (_, _, scheduler) = build_scheduler(vec![mock], config);

    assert!(matches!(
        scheduler.run().await,
        Err(Error::Configuration(_))
    ));
}

/// Archive wrapper counting `finalize` calls.
struct TrackingArchive {
    inner: MemoryArchive,
    finalized: AtomicUsize,
}

impl TrackingArchive {
    fn new() -> Self {
        Self {
            inner: MemoryArchive::new(),
            finalized: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TileArchive for TrackingArchive {
    async fn put_tile(&self, coord: TileCoord, data: &[u8]) -> anyhow::Result<()> {
        self.inner.put_tile(coord, data).await
    }

    async fn tile_state(&self, coord: TileCoord) -> anyhow::Result<TileState> {
        self.inner.tile_state(coord).await
    }

    async fn non_empty_tiles(&self, zoom: u8) -> anyhow::Result<Vec<TileCoord>> {
        self.inner.non_empty_tiles(zoom).await
    }

    async fn finalize(&self) -> anyhow::Result<()> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn build_scheduler_with_archive(
    mocks: Vec<Arc<MockBackend>>,
    archive: Arc<TrackingArchive>,
    config: SchedulerConfig,
) -> PyramidScheduler {
    let backends: Vec<Arc<dyn TileBackend>> = mocks
        .into_iter()
        .map(|m| m as Arc<dyn TileBackend>)
        .collect();
    let pool = Arc::new(BackendPool::new(backends, 4, None).unwrap());
    let generator = Arc::new(SqlGenerator::new(None, GeneratorConfig::default()));
    PyramidScheduler::new(
        pool,
        archive as Arc<dyn TileArchive>,
        generator,
        Metrics::new(),
        config,
    )
}

#[tokio::test]
async fn test_archive_finalized_after_successful_run() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    let archive = Arc::new(TrackingArchive::new());
    let scheduler =
        build_scheduler_with_archive(vec![mock], archive.clone(), scheduler_config(0, 1, None));

    scheduler.run().await.unwrap();
    assert_eq!(archive.finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_archive_finalized_after_render_failure() {
    let mock = Arc::new(MockBackend::named("db0".to_string()));
    mock.fail_times(TileCoord::new(1, 0, 0), u32::MAX);
    let archive = Arc::new(TrackingArchive::new());
    let scheduler =
        build_scheduler_with_archive(vec![mock], archive.clone(), scheduler_config(0, 1, None));

    let err = scheduler.run().await.unwrap_err();
    assert!(matches!(err, Error::RenderExecution { .. }));

    // Tiles from completed phases stay persisted; finalize must still run
    assert_eq!(archive.finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_audit_lists_written_per_imputed_zoom() {
    let dir = tempfile::tempdir().unwrap();
    let mock = single_subtree_backend();
    let mut config = scheduler_config(0, 3, Some(1));
    config.list_audit_dir = Some(dir.path().to_path_buf());
    let (_, _, scheduler) = build_scheduler(vec![mock], config);

    scheduler.run().await.unwrap();

    let z2 = std::fs::read_to_string(dir.path().join("zoom_02.list")).unwrap();
    assert_eq!(z2.lines().count(), 4);
    let z3 = std::fs::read_to_string(dir.path().join("zoom_03.list")).unwrap();
    assert_eq!(z3.lines().count(), 16);
}
