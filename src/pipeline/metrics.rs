//! Progress monitoring for render runs.

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Atomic counters shared by all render workers.
#[derive(Debug)]
pub struct Metrics {
    /// Tiles rendered with content
    pub tiles_rendered: AtomicU64,

    /// Tiles recorded as empty
    pub tiles_empty: AtomicU64,

    /// Tiles that exhausted their retry budget
    pub tiles_failed: AtomicU64,

    /// Recovered per-tile retries
    pub retries: AtomicU64,

    /// Tile bytes written to the archive
    pub bytes_written: AtomicU64,

    // Stored as zoom + 1 so 0 means "none completed yet"
    last_completed_zoom: AtomicU32,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tiles_rendered: AtomicU64::new(0),
            tiles_empty: AtomicU64::new(0),
            tiles_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            last_completed_zoom: AtomicU32::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn add_tile_rendered(&self) {
        self.tiles_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tile_empty(&self) {
        self.tiles_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tile_failed(&self) {
        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Advance the monotonic last-completed-zoom marker. Never moves backward.
    pub fn complete_zoom(&self, zoom: u8) {
        self.last_completed_zoom
            .fetch_max(u32::from(zoom) + 1, Ordering::Relaxed);
    }

    pub fn last_completed_zoom(&self) -> Option<u8> {
        match self.last_completed_zoom.load(Ordering::Relaxed) {
            0 => None,
            n => Some((n - 1) as u8),
        }
    }

    /// Point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let rendered = self.tiles_rendered.load(Ordering::Relaxed);
        let empty = self.tiles_empty.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        MetricsSnapshot {
            tiles_rendered: rendered,
            tiles_empty: empty,
            tiles_failed: self.tiles_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed_secs: elapsed,
            tiles_per_sec: if elapsed > 0.0 {
                (rendered + empty) as f64 / elapsed
            } else {
                0.0
            },
            last_completed_zoom: self.last_completed_zoom(),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tiles_rendered: u64,
    pub tiles_empty: u64,
    pub tiles_failed: u64,
    pub retries: u64,
    pub bytes_written: u64,
    pub elapsed_secs: f64,
    pub tiles_per_sec: f64,
    pub last_completed_zoom: Option<u8>,
}

impl MetricsSnapshot {
    /// Save the snapshot as JSON.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Periodic progress logger, shut down via a channel send.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(std::time::Duration::from_secs(self.interval_secs.max(1)));
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snap = self.metrics.snapshot();
                    tracing::info!(
                        "Progress: {} rendered, {} empty, {} retries, {:.1} tiles/s{}",
                        snap.tiles_rendered,
                        snap.tiles_empty,
                        snap.retries,
                        snap.tiles_per_sec,
                        match snap.last_completed_zoom {
                            Some(z) => format!(", last completed zoom {}", z),
                            None => String::new(),
                        }
                    );
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Log a final one-line summary.
    pub fn print_summary(&self) {
        let snap = self.metrics.snapshot();
        tracing::info!(
            "Run summary: {} rendered, {} empty, {} failed, {} retries, {} bytes in {:.1}s",
            snap.tiles_rendered,
            snap.tiles_empty,
            snap.tiles_failed,
            snap.retries,
            snap.bytes_written,
            snap.elapsed_secs
        );
    }
}
