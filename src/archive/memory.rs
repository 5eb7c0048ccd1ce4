//! In-memory tile archive for tests and dry runs.

use super::{TileArchive, TileState};
use crate::coords::TileCoord;
use async_trait::async_trait;
use dashmap::DashMap;

/// Concurrent map-backed archive.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    tiles: DashMap<TileCoord, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tiles, empty ones included.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Stored content for a coordinate, if any.
    pub fn tile_data(&self, coord: &TileCoord) -> Option<Vec<u8>> {
        self.tiles.get(coord).map(|entry| entry.clone())
    }
}

#[async_trait]
impl TileArchive for MemoryArchive {
    async fn put_tile(&self, coord: TileCoord, data: &[u8]) -> anyhow::Result<()> {
        self.tiles.insert(coord, data.to_vec());
        Ok(())
    }

    async fn tile_state(&self, coord: TileCoord) -> anyhow::Result<TileState> {
        Ok(match self.tiles.get(&coord) {
            None => TileState::Absent,
            Some(data) if data.is_empty() => TileState::Empty,
            Some(_) => TileState::Rendered,
        })
    }

    async fn non_empty_tiles(&self, zoom: u8) -> anyhow::Result<Vec<TileCoord>> {
        let mut coords: Vec<TileCoord> = self
            .tiles
            .iter()
            .filter(|entry| entry.key().zoom == zoom && !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        coords.sort_by_key(|c| (c.y, c.x));
        Ok(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_state() {
        let archive = MemoryArchive::new();
        let rendered = TileCoord::new(2, 1, 1);
        let empty = TileCoord::new(2, 2, 2);
        let absent = TileCoord::new(2, 3, 3);

        archive.put_tile(rendered, b"data").await.unwrap();
        archive.put_tile(empty, b"").await.unwrap();

        assert_eq!(archive.tile_state(rendered).await.unwrap(), TileState::Rendered);
        assert_eq!(archive.tile_state(empty).await.unwrap(), TileState::Empty);
        assert_eq!(archive.tile_state(absent).await.unwrap(), TileState::Absent);
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let archive = MemoryArchive::new();
        let coord = TileCoord::new(1, 0, 0);
        archive.put_tile(coord, b"first").await.unwrap();
        archive.put_tile(coord, b"").await.unwrap();
        assert_eq!(archive.tile_state(coord).await.unwrap(), TileState::Empty);
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn test_non_empty_tiles_sorted_per_zoom() {
        let archive = MemoryArchive::new();
        archive.put_tile(TileCoord::new(3, 5, 2), b"x").await.unwrap();
        archive.put_tile(TileCoord::new(3, 1, 2), b"x").await.unwrap();
        archive.put_tile(TileCoord::new(3, 0, 7), b"x").await.unwrap();
        archive.put_tile(TileCoord::new(3, 4, 4), b"").await.unwrap();
        archive.put_tile(TileCoord::new(2, 0, 0), b"x").await.unwrap();

        let tiles = archive.non_empty_tiles(3).await.unwrap();
        assert_eq!(
            tiles,
            vec![
                TileCoord::new(3, 1, 2),
                TileCoord::new(3, 5, 2),
                TileCoord::new(3, 0, 7),
            ]
        );
    }
}
