//! MBTiles tile archive.
//!
//! MBTiles stores rows in the TMS convention (row 0 at the south edge), so
//! slippy-map `y` is flipped on the way in and out.

use super::{TileArchive, TileState};
use crate::coords::{BoundingBox, TileCoord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tiles (
    zoom_level INTEGER NOT NULL,
    tile_column INTEGER NOT NULL,
    tile_row INTEGER NOT NULL,
    tile_data BLOB NOT NULL,
    PRIMARY KEY (zoom_level, tile_column, tile_row)
)
"#;

/// Metadata written into the MBTiles `metadata` table.
#[derive(Debug, Clone)]
pub struct ArchiveMetadata {
    pub name: String,
    pub bounds: BoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub attribution: Option<String>,
}

/// SQLite-backed MBTiles writer.
pub struct MbtilesArchive {
    pool: SqlitePool,
}

impl MbtilesArchive {
    /// Create or open an MBTiles file and write its metadata.
    pub async fn create(path: &Path, metadata: &ArchiveMetadata) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let archive = Self { pool };
        archive.migrate().await?;
        archive.write_metadata(metadata).await?;
        Ok(archive)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn write_metadata(&self, metadata: &ArchiveMetadata) -> anyhow::Result<()> {
        let bounds = metadata.bounds;
        let mut rows = vec![
            ("name", metadata.name.clone()),
            ("format", "pbf".to_string()),
            (
                "bounds",
                format!(
                    "{},{},{},{}",
                    bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
                ),
            ),
            ("minzoom", metadata.min_zoom.to_string()),
            ("maxzoom", metadata.max_zoom.to_string()),
        ];
        if let Some(attribution) = &metadata.attribution {
            rows.push(("attribution", attribution.clone()));
        }

        for (name, value) in rows {
            sqlx::query("INSERT OR REPLACE INTO metadata (name, value) VALUES (?, ?)")
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    fn tms_row(coord: TileCoord) -> i64 {
        let n = 1i64 << coord.zoom;
        n - 1 - i64::from(coord.y)
    }
}

#[async_trait]
impl TileArchive for MbtilesArchive {
    async fn put_tile(&self, coord: TileCoord, data: &[u8]) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(coord.zoom))
        .bind(i64::from(coord.x))
        .bind(Self::tms_row(coord))
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tile_state(&self, coord: TileCoord) -> anyhow::Result<TileState> {
        let length: Option<i64> = sqlx::query_scalar(
            "SELECT length(tile_data) FROM tiles \
             WHERE zoom_level = ? AND tile_column = ? AND tile_row = ?",
        )
        .bind(i64::from(coord.zoom))
        .bind(i64::from(coord.x))
        .bind(Self::tms_row(coord))
        .fetch_optional(&self.pool)
        .await?;

        Ok(match length {
            None => TileState::Absent,
            Some(0) => TileState::Empty,
            Some(_) => TileState::Rendered,
        })
    }

    async fn non_empty_tiles(&self, zoom: u8) -> anyhow::Result<Vec<TileCoord>> {
        let rows = sqlx::query(
            "SELECT tile_column, tile_row FROM tiles \
             WHERE zoom_level = ? AND length(tile_data) > 0",
        )
        .bind(i64::from(zoom))
        .fetch_all(&self.pool)
        .await?;

        let n = 1i64 << zoom;
        let mut coords: Vec<TileCoord> = rows
            .into_iter()
            .map(|row| {
                let x: i64 = row.get(0);
                let tms_row: i64 = row.get(1);
                TileCoord::new(zoom, x as u32, (n - 1 - tms_row) as u32)
            })
            .collect();
        coords.sort_by_key(|c| (c.y, c.x));
        Ok(coords)
    }

    async fn finalize(&self) -> anyhow::Result<()> {
        // Fold the WAL back into the main database file
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
