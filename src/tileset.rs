//! Tileset definition loading and zoom bounds resolution.
//!
//! A tileset definition is a declarative document naming the layers of a
//! vector tileset and its zoom extent. The scheduler only needs the name (to
//! derive the tile function) and the zoom bounds; layer details are passed
//! through to the SQL generator.

use crate::coords::MAX_SUPPORTED_ZOOM;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declarative tileset definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesetDefinition {
    /// Tileset name; also the stem of the generated tile function name.
    pub name: String,

    /// Minimum pyramid zoom declared by the tileset.
    #[serde(default)]
    pub minzoom: Option<u8>,

    /// Maximum pyramid zoom declared by the tileset.
    #[serde(default)]
    pub maxzoom: Option<u8>,

    /// Attribution string carried into archive metadata.
    #[serde(default)]
    pub attribution: Option<String>,

    /// Layers rendered into each tile.
    #[serde(default)]
    pub layers: Vec<LayerDefinition>,
}

/// A single layer within a tileset definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub name: String,

    /// Zoom below which the layer is omitted.
    #[serde(default)]
    pub minzoom: Option<u8>,

    /// Zoom above which the layer is omitted.
    #[serde(default)]
    pub maxzoom: Option<u8>,

    /// Geometry column in the layer's source table.
    #[serde(default)]
    pub geometry_column: Option<String>,
}

impl TilesetDefinition {
    /// Load a tileset definition from a YAML or JSON file.
    ///
    /// An operator-specified definition must be honored or rejected: any read
    /// or parse failure is a hard configuration error, never a silent
    /// fallback to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read tileset {}: {}", path.display(), e))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let tileset: TilesetDefinition = match ext {
            "json" => serde_json::from_str(&contents).map_err(|e| {
                Error::config(format!("invalid tileset {}: {}", path.display(), e))
            })?,
            // YAML is a superset of JSON, so it is also the fallback
            _ => serde_yaml::from_str(&contents).map_err(|e| {
                Error::config(format!("invalid tileset {}: {}", path.display(), e))
            })?,
        };
        Ok(tileset)
    }
}

/// Resolved zoom extent of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilesetBounds {
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl TilesetBounds {
    pub const DEFAULT_MIN_ZOOM: u8 = 0;
    pub const DEFAULT_MAX_ZOOM: u8 = 14;

    /// Resolve zoom bounds from an optional tileset definition and optional
    /// explicit overrides. Overrides always win over the definition; system
    /// defaults apply only when neither yields a value.
    pub fn resolve(
        tileset: Option<&TilesetDefinition>,
        min_override: Option<u8>,
        max_override: Option<u8>,
    ) -> Result<Self> {
        let min_zoom = min_override
            .or(tileset.and_then(|t| t.minzoom))
            .unwrap_or(Self::DEFAULT_MIN_ZOOM);
        let max_zoom = max_override
            .or(tileset.and_then(|t| t.maxzoom))
            .unwrap_or(Self::DEFAULT_MAX_ZOOM);

        if min_zoom > max_zoom {
            return Err(Error::config(format!(
                "min zoom {} exceeds max zoom {}",
                min_zoom, max_zoom
            )));
        }
        if max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(Error::config(format!(
                "max zoom {} exceeds supported maximum {}",
                max_zoom, MAX_SUPPORTED_ZOOM
            )));
        }
        Ok(Self { min_zoom, max_zoom })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_tileset() -> TilesetDefinition {
        TilesetDefinition {
            name: "shortbread".to_string(),
            minzoom: Some(2),
            maxzoom: Some(12),
            attribution: None,
            layers: vec![LayerDefinition {
                name: "water".to_string(),
                minzoom: Some(4),
                maxzoom: None,
                geometry_column: Some("way".to_string()),
            }],
        }
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let ts = sample_tileset();
        let bounds = TilesetBounds::resolve(Some(&ts), Some(5), None).unwrap();
        assert_eq!(bounds, TilesetBounds { min_zoom: 5, max_zoom: 12 });

        let bounds = TilesetBounds::resolve(Some(&ts), None, Some(10)).unwrap();
        assert_eq!(bounds, TilesetBounds { min_zoom: 2, max_zoom: 10 });
    }

    #[test]
    fn test_resolve_defaults_when_nothing_given() {
        let bounds = TilesetBounds::resolve(None, None, None).unwrap();
        assert_eq!(bounds, TilesetBounds { min_zoom: 0, max_zoom: 14 });
    }

    #[test]
    fn test_resolve_rejects_inverted_range() {
        assert!(TilesetBounds::resolve(None, Some(10), Some(4)).is_err());
    }

    #[test]
    fn test_from_file_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "name: basemap\nminzoom: 1\nmaxzoom: 8\nlayers:\n  - name: roads"
        )
        .unwrap();

        let ts = TilesetDefinition::from_file(file.path()).unwrap();
        assert_eq!(ts.name, "basemap");
        assert_eq!(ts.minzoom, Some(1));
        assert_eq!(ts.layers.len(), 1);
    }

    #[test]
    fn test_from_file_missing_is_configuration_error() {
        let err = TilesetDefinition::from_file("/nonexistent/tileset.yaml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_file_unparsable_is_configuration_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "layers: {{not a tileset").unwrap();
        let err = TilesetDefinition::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
