//! Configuration for the tile pyramid renderer.
//!
//! Constructed once at process start and passed into the scheduler; no
//! component reads ambient process state directly.

use crate::coords::BoundingBox;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a render run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database backend pool
    pub backend: BackendConfig,

    /// Tile archive output
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Render pass selection and tuning
    #[serde(default)]
    pub render: RenderConfig,

    /// Runtime and metrics tuning
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Path to the tileset definition document
    #[serde(default)]
    pub tileset: Option<PathBuf>,

    /// Optional region restriction as WKT; a region-scoped tile function is
    /// installed for the run and dropped afterwards
    #[serde(default)]
    pub region: Option<String>,

    /// Flags forwarded to the SQL generator
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Backend host pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Single backend host; mutually exclusive with `hosts`
    #[serde(default)]
    pub host: Option<String>,

    /// Explicit backend host list
    #[serde(default)]
    pub hosts: Option<Vec<String>>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Concurrent connections per backend host
    #[serde(default = "default_connections_per_host")]
    pub connections_per_host: usize,

    /// Override for the derived total parallelism
    /// (`connections_per_host × host count`)
    #[serde(default)]
    pub parallelism: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: None,
            hosts: None,
            port: default_port(),
            database: None,
            user: None,
            password: None,
            connections_per_host: default_connections_per_host(),
            parallelism: None,
        }
    }
}

/// Archive output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// MBTiles output path. When unset the run writes to an in-memory
    /// archive, which is only useful for dry runs.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Traversal strategy for full-scheme render passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderScheme {
    /// Breadth-first by zoom, row-major within each zoom (deterministic default)
    #[default]
    Pyramid,

    /// Same tile universe, shuffled order
    PyramidRandom,
}

/// Render pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub scheme: RenderScheme,

    /// Bounding box in WGS84 [min_lon, min_lat, max_lon, max_lat];
    /// default is the full Web Mercator world
    #[serde(default)]
    pub bounds: Option<[f64; 4]>,

    /// Override for the tileset's minimum zoom
    #[serde(default)]
    pub min_zoom: Option<u8>,

    /// Override for the tileset's maximum zoom
    #[serde(default)]
    pub max_zoom: Option<u8>,

    /// Split zoom for the pyramid pass: zooms up to and including this level
    /// render fully, higher zooms render only tiles with non-empty parents.
    /// Unset selects a single full pass.
    #[serde(default)]
    pub mid_zoom: Option<u8>,

    /// Explicit tile-list file (one `z/x/y` per line); selects list mode and
    /// ignores bounds and zoom settings
    #[serde(default)]
    pub tile_list: Option<PathBuf>,

    /// Per-tile query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry budget per tile
    #[serde(default)]
    pub retry: RetryConfig,

    /// Seed for the shuffled scheme, for reproducible runs
    #[serde(default)]
    pub shuffle_seed: Option<u64>,

    /// Directory receiving an audit copy of each imputed tile list
    #[serde(default)]
    pub list_audit_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scheme: RenderScheme::default(),
            bounds: None,
            min_zoom: None,
            max_zoom: None,
            mid_zoom: None,
            tile_list: None,
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
            shuffle_seed: None,
            list_audit_dir: None,
        }
    }
}

impl RenderConfig {
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds.map(BoundingBox::from_array).unwrap_or_default()
    }
}

/// Per-tile retry configuration.
///
/// The budget counts re-attempts after the first try; there is no backoff
/// between attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_budget")]
    pub budget: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_retry_budget(),
        }
    }
}

/// Runtime and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent in-flight tile renders; defaults to the pool's total
    /// parallelism
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Tokio worker threads (unset = num CPUs)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable periodic progress reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save a metrics JSON snapshot after the run
    #[serde(default)]
    pub metrics_output_path: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Feature flags forwarded to the SQL generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Gzip-compress tile payloads
    #[serde(default = "default_true")]
    pub gzip: bool,

    /// Explicit gzip level (1-9)
    #[serde(default)]
    pub gzip_level: Option<u8>,

    /// Emit stable feature ids
    #[serde(default)]
    pub feature_ids: bool,

    /// Emit the key column alongside feature properties
    #[serde(default)]
    pub key_column: bool,

    /// Run geometry validation in the tile query
    #[serde(default = "default_true")]
    pub validate_geometry: bool,

    /// Tile extent in coordinate units
    #[serde(default = "default_extent")]
    pub extent: u32,

    /// Render only these layers
    #[serde(default)]
    pub include_layers: Option<Vec<String>>,

    /// Render all layers except these
    #[serde(default)]
    pub exclude_layers: Option<Vec<String>>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            gzip: true,
            gzip_level: None,
            feature_ids: false,
            key_column: false,
            validate_geometry: true,
            extent: default_extent(),
            include_layers: None,
            exclude_layers: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read config {}: {}", path.display(), e)))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)
                .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Validate settings that must hold before any work is scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.backend.host.is_none() && self.backend.hosts.is_none() {
            return Err(Error::config("no backend host or host list configured"));
        }
        if let (Some(_), Some(_)) = (&self.backend.host, &self.backend.hosts) {
            return Err(Error::config("host and hosts are mutually exclusive"));
        }
        if matches!(&self.backend.hosts, Some(hosts) if hosts.is_empty()) {
            return Err(Error::config("backend host list is empty"));
        }
        if self.backend.database.is_none() {
            return Err(Error::config("backend database is not configured"));
        }
        if self.backend.user.is_none() || self.backend.password.is_none() {
            return Err(Error::config("backend credentials are not configured"));
        }
        if self.backend.connections_per_host == 0 {
            return Err(Error::config("connections_per_host must be > 0"));
        }
        if matches!(self.backend.parallelism, Some(0)) {
            return Err(Error::config("parallelism override must be > 0"));
        }
        if matches!(self.processing.concurrency, Some(0)) {
            return Err(Error::config("concurrency must be > 0"));
        }
        if self.render.timeout_ms == 0 {
            return Err(Error::config("timeout_ms must be > 0"));
        }
        if let Some(bounds) = self.render.bounds {
            BoundingBox::from_array(bounds)
                .validate()
                .map_err(|e| Error::config(format!("invalid bounds: {}", e)))?;
        }
        if let (Some(min), Some(max)) = (self.render.min_zoom, self.render.max_zoom) {
            if min > max {
                return Err(Error::config(format!(
                    "min_zoom {} exceeds max_zoom {}",
                    min, max
                )));
            }
        }
        if matches!(self.generator.gzip_level, Some(level) if level == 0 || level > 9) {
            return Err(Error::config("gzip_level must be 1-9"));
        }
        if self.generator.include_layers.is_some() && self.generator.exclude_layers.is_some() {
            return Err(Error::config(
                "include_layers and exclude_layers are mutually exclusive",
            ));
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_port() -> u16 {
    5432
}
fn default_connections_per_host() -> usize {
    1
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_budget() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_metrics_interval() -> u64 {
    10
}
fn default_extent() -> u32 {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config::from_yaml(
            "backend:\n  host: db1\n  database: osm\n  user: render\n  password: secret\n",
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_config_valid_with_defaults() {
        let config = minimal_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.port, 5432);
        assert_eq!(config.backend.connections_per_host, 1);
        assert_eq!(config.render.scheme, RenderScheme::Pyramid);
        assert_eq!(config.render.timeout_ms, 30_000);
        assert_eq!(config.render.retry.budget, 2);
        assert_eq!(config.generator.extent, 4096);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = Config::from_yaml("backend:\n  host: db1\n  database: osm\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration(msg)) if msg.contains("credentials")
        ));
    }

    #[test]
    fn test_missing_host_rejected() {
        let config =
            Config::from_yaml("backend:\n  database: osm\n  user: render\n  password: secret\n")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_and_hosts_mutually_exclusive() {
        let mut config = minimal_config();
        config.backend.hosts = Some(vec!["db2".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheme_parses_kebab_case() {
        let mut yaml =
            String::from("backend:\n  host: db1\n  database: osm\n  user: u\n  password: p\n");
        yaml.push_str("render:\n  scheme: pyramid-random\n");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.render.scheme, RenderScheme::PyramidRandom);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = minimal_config();
        config.render.bounds = Some([10.0, 0.0, 5.0, 1.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_zoom_override_rejected() {
        let mut config = minimal_config();
        config.render.min_zoom = Some(9);
        config.render.max_zoom = Some(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = minimal_config();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.backend.host.as_deref(), Some("db1"));
    }
}
