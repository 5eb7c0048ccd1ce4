//! PostgreSQL tile backend.

use super::{BackendTarget, TileBackend};
use crate::coords::TileCoord;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Backend executing the tile function on one PostgreSQL host.
pub struct PgTileBackend {
    pool: PgPool,
    host: String,
}

impl PgTileBackend {
    /// Connect to one target with at most `max_connections` connections,
    /// matching the pool's per-host limit.
    pub async fn connect(target: &BackendTarget, max_connections: usize) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections as u32)
            .connect(&target.connection_url())
            .await
            .map_err(|e| anyhow::anyhow!("connect to {} failed: {}", target.host, e))?;
        Ok(Self {
            pool,
            host: target.host.clone(),
        })
    }
}

#[async_trait]
impl TileBackend for PgTileBackend {
    async fn render_tile(
        &self,
        function: &str,
        coord: TileCoord,
        timeout: Duration,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        // Function names come from the generator, never from user input
        let sql = format!("SELECT {}($1, $2, $3)", function);
        let query = sqlx::query_scalar::<_, Option<Vec<u8>>>(&sql)
            .bind(i32::from(coord.zoom))
            .bind(coord.x as i32)
            .bind(coord.y as i32)
            .fetch_optional(&self.pool);

        match tokio::time::timeout(timeout, query).await {
            Err(_) => anyhow::bail!(
                "tile {} timed out after {}ms on {}",
                coord,
                timeout.as_millis(),
                self.host
            ),
            Ok(row) => Ok(row?.flatten()),
        }
    }

    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.host.clone()
    }
}
