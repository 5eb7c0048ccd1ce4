//! Tile archive: the shared store all render workers write into.
//!
//! The archive is keyed by tile coordinate and distinguishes empty tiles
//! (present, zero bytes) from absent ones; imputation depends on that
//! distinction.

pub mod mbtiles;
pub mod memory;

use crate::coords::TileCoord;
use async_trait::async_trait;

pub use mbtiles::{ArchiveMetadata, MbtilesArchive};
pub use memory::MemoryArchive;

/// What the archive knows about one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Never written
    Absent,
    /// Written with zero-length content (the query returned nothing)
    Empty,
    /// Written with tile bytes
    Rendered,
}

/// A tile store safe under concurrent writers.
#[async_trait]
pub trait TileArchive: Send + Sync {
    /// Insert or replace the content for a coordinate. Zero-length `data`
    /// records the tile as empty.
    async fn put_tile(&self, coord: TileCoord, data: &[u8]) -> anyhow::Result<()>;

    /// State of one coordinate.
    async fn tile_state(&self, coord: TileCoord) -> anyhow::Result<TileState>;

    /// All coordinates at `zoom` with non-empty content, in (y, x) order.
    async fn non_empty_tiles(&self, zoom: u8) -> anyhow::Result<Vec<TileCoord>>;

    /// Flush any pending state; called once when the run ends, whether it
    /// succeeded or failed.
    async fn finalize(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
