//! Error taxonomy for the render scheduler.
//!
//! Everything here is fatal at the scheduler level: retries happen inside the
//! render executor and are the only recovered failures. The archive is never
//! rolled back on failure.

use crate::coords::TileCoord;
use thiserror::Error;

/// Fatal errors surfaced by resolvers, the region function manager, the render
/// executor, and the imputation step.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid required settings. Pre-flight; no work is scheduled.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Region function installation failed. Aborts before any rendering.
    #[error("failed to install region function {identifier} on {host}: {source}")]
    Install {
        identifier: String,
        host: String,
        #[source]
        source: anyhow::Error,
    },

    /// A tile render exhausted its retry budget. Aborts the enclosing job.
    #[error("render failed for tile {coord} after {attempts} attempts: {source}")]
    RenderExecution {
        coord: TileCoord,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The imputation step could not produce a tile list. Aborts the pyramid pass.
    #[error("imputation failed at zoom {zoom}: {source}")]
    Imputation {
        zoom: u8,
        #[source]
        source: anyhow::Error,
    },

    /// Archive read/write failure outside the per-tile retry path.
    #[error("archive error: {0}")]
    Archive(anyhow::Error),

    /// Backend failure outside the per-tile retry path (pool checkout, DDL).
    #[error("backend error: {0}")]
    Backend(anyhow::Error),
}

impl Error {
    /// Shorthand for a configuration error with a formatted message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
