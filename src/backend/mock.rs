//! Programmable in-memory backend for tests.

use super::TileBackend;
use crate::coords::TileCoord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type ContentFn = Box<dyn Fn(TileCoord) -> Option<Vec<u8>> + Send + Sync>;

/// Backend whose tile content is a pure function of the coordinate, with
/// injectable per-tile failures. Records every render request and every
/// executed statement.
pub struct MockBackend {
    name: String,
    content: ContentFn,
    render_log: Mutex<Vec<TileCoord>>,
    executed: Mutex<Vec<String>>,
    failures: Mutex<HashMap<TileCoord, u32>>,
    fail_execute: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    /// Backend where every tile renders non-empty.
    pub fn named(name: String) -> Self {
        Self::with_content(name, |coord| Some(coord.to_string().into_bytes()))
    }

    pub fn with_content(
        name: String,
        content: impl Fn(TileCoord) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            content: Box::new(content),
            render_log: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            fail_execute: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make the next `times` renders of `coord` fail before succeeding.
    pub fn fail_times(&self, coord: TileCoord, times: u32) {
        self.failures.lock().unwrap().insert(coord, times);
    }

    /// Make every management statement fail.
    pub fn fail_execute(&self) {
        self.fail_execute.store(true, Ordering::SeqCst);
    }

    pub fn render_log(&self) -> Vec<TileCoord> {
        self.render_log.lock().unwrap().clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Highest number of concurrently in-flight renders observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileBackend for MockBackend {
    async fn render_tile(
        &self,
        _function: &str,
        coord: TileCoord,
        _timeout: Duration,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        self.render_log.lock().unwrap().push(coord);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // Yield so overlapping renders are observable
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&coord) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            anyhow::bail!("injected failure for {}", coord);
        }

        Ok((self.content)(coord))
    }

    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        if self.fail_execute.load(Ordering::SeqCst) {
            anyhow::bail!("injected execute failure on {}", self.name);
        }
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
