//! Imputation: inferring which high-zoom tiles are worth rendering.
//!
//! A tile's children are rendered only when the tile itself came back
//! non-empty; once a subtree is empty it is never expanded further. The
//! output is sorted so re-running against an unchanged archive yields an
//! identical list.

use crate::archive::TileArchive;
use crate::coords::TileCoord;
use crate::error::{Error, Result};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// Coordinates at `zoom` whose parent at `zoom - 1` is recorded as non-empty.
pub async fn impute(archive: &dyn TileArchive, zoom: u8) -> Result<Vec<TileCoord>> {
    if zoom == 0 {
        return Err(Error::Imputation {
            zoom,
            source: anyhow::anyhow!("zoom 0 has no parent level"),
        });
    }

    let parents = archive
        .non_empty_tiles(zoom - 1)
        .await
        .map_err(|source| Error::Imputation { zoom, source })?;

    let mut coords: Vec<TileCoord> = parents.iter().flat_map(|p| p.children()).collect();
    coords.sort_by_key(|c| (c.y, c.x));
    Ok(coords)
}

/// Read a tile list file: one `z/x/y` per line, blank lines and `#` comments
/// skipped. Order is preserved.
pub fn read_tile_list(path: &Path) -> Result<Vec<TileCoord>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("cannot read tile list {}: {}", path.display(), e)))?;

    let mut coords = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line
            .map_err(|e| Error::config(format!("cannot read tile list {}: {}", path.display(), e)))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let coord: TileCoord = trimmed.parse().map_err(|e| {
            Error::config(format!(
                "invalid tile list {} line {}: {}",
                path.display(),
                lineno + 1,
                e
            ))
        })?;
        coords.push(coord);
    }
    Ok(coords)
}

/// Write a tile list file in the same `z/x/y` line format.
pub fn write_tile_list(path: &Path, coords: &[TileCoord]) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| Error::config(format!("cannot write tile list {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    for coord in coords {
        writeln!(writer, "{}", coord)
            .map_err(|e| Error::config(format!("cannot write tile list {}: {}", path.display(), e)))?;
    }
    writer
        .flush()
        .map_err(|e| Error::config(format!("cannot write tile list {}: {}", path.display(), e)))?;
    Ok(())
}
