//! Tile Pyramid Renderer CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tilepyramid::{build_runtime, run_render, Config, TilesetBounds, TilesetDefinition};

#[derive(Parser)]
#[command(name = "tilepyramid")]
#[command(about = "Render a vector tile pyramid into an MBTiles archive", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override the minimum zoom
    #[arg(long, global = true)]
    min_zoom: Option<u8>,

    /// Override the maximum zoom
    #[arg(long, global = true)]
    max_zoom: Option<u8>,

    /// Override the pyramid split zoom
    #[arg(long, global = true)]
    mid_zoom: Option<u8>,

    /// Render only the tiles listed in this file (one z/x/y per line)
    #[arg(long, global = true)]
    tile_list: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the render (default if no command specified)
    Run,

    /// Estimate the work without rendering
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_with_overrides(&cli)?;
            run_command(config)?;
        }

        Some(Commands::Analyze) => {
            let config = load_with_overrides(&cli)?;
            analyze_command(&config)?;
        }

        Some(Commands::Validate) => {
            validate_command(&cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(&output)?;
        }
    }

    Ok(())
}

fn load_with_overrides(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_file(&cli.config)?;

    if let Some(c) = cli.concurrency {
        config.processing.concurrency = Some(c);
    }
    if let Some(z) = cli.min_zoom {
        config.render.min_zoom = Some(z);
    }
    if let Some(z) = cli.max_zoom {
        config.render.max_zoom = Some(z);
    }
    if let Some(z) = cli.mid_zoom {
        config.render.mid_zoom = Some(z);
    }
    if let Some(path) = &cli.tile_list {
        config.render.tile_list = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run_command(config: Config) -> Result<()> {
    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_render(config).await })?;
    Ok(())
}

/// Print the tile universe a run would cover, without touching any backend.
fn analyze_command(config: &Config) -> Result<()> {
    let tileset = config
        .tileset
        .as_ref()
        .map(TilesetDefinition::from_file)
        .transpose()?;
    let zooms = TilesetBounds::resolve(
        tileset.as_ref(),
        config.render.min_zoom,
        config.render.max_zoom,
    )?;
    let bounds = config.render.bounding_box();

    println!("\n=== Work Analysis ===");
    if let Some(tileset) = &tileset {
        println!("Tileset: {} ({} layers)", tileset.name, tileset.layers.len());
    }
    println!(
        "Bounds: [{:.4}, {:.4}, {:.4}, {:.4}]",
        bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
    );
    println!("Zooms: {}..={}", zooms.min_zoom, zooms.max_zoom);
    match config.render.mid_zoom {
        Some(mid) => println!(
            "Scheme: pyramid (full through zoom {}, imputed above)",
            mid.min(zooms.max_zoom)
        ),
        None => println!("Scheme: single full pass"),
    }

    let mut total: u64 = 0;
    let mut full: u64 = 0;
    println!("\nZoom   Tiles");
    for zoom in zooms.min_zoom..=zooms.max_zoom {
        let count = bounds.tile_range(zoom).count();
        total += count;
        if config.render.mid_zoom.map_or(true, |mid| zoom <= mid) {
            full += count;
        }
        println!("{:>4}   {}", zoom, count);
    }
    println!("\nTotal tile universe: {}", total);
    if config.render.mid_zoom.is_some() {
        println!("Rendered unconditionally: {}", full);
        println!("Upper bound via imputation: {}", total - full);
    }
    println!("=====================\n");

    Ok(())
}

fn validate_command(config_path: &PathBuf) -> Result<()> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: &PathBuf) -> Result<()> {
    let yaml = r#"# Tile Pyramid Renderer Configuration

# === BACKEND: PostGIS hosts serving the tile function ===
backend:
  # Option 1: a single host
  host: "localhost"

  # Option 2: a host list, one pool target per entry
  # hosts: ["db1", "db2", "db3"]

  port: 5432
  database: "osm"
  user: "render"
  password: "secret"

  # Concurrent connections per backend host
  connections_per_host: 4

  # Override the derived total parallelism (connections_per_host x hosts)
  # parallelism: 24

# === ARCHIVE: MBTiles output ===
archive:
  path: "/tmp/tiles.mbtiles"

# === RENDER: pass selection and tuning ===
render:
  # pyramid (deterministic) or pyramid-random (shuffled)
  scheme: pyramid

  # Bounding box in WGS84 [min_lon, min_lat, max_lon, max_lat]
  # Default: the full Web Mercator world
  # bounds: [5.9, 45.8, 10.5, 47.8]

  # Zoom overrides (default: tileset declaration, else 0..14)
  # min_zoom: 0
  # max_zoom: 14

  # Pyramid split: zooms through mid_zoom render fully, higher zooms render
  # only tiles whose parent came back non-empty. Omit for a single full pass.
  mid_zoom: 9

  # Render only these tiles instead (one z/x/y per line)
  # tile_list: "tiles.list"

  # Per-tile query timeout in milliseconds
  timeout_ms: 30000

  retry:
    # Re-attempts per tile after the first try
    budget: 2

  # Seed for pyramid-random, for reproducible runs
  # shuffle_seed: 42

  # Keep an audit copy of each imputed tile list
  # list_audit_dir: "/tmp/tile-lists"

# === PROCESSING: runtime and observability ===
processing:
  # In-flight tile renders (default: the pool's total parallelism)
  # concurrency: 24

  # Tokio worker threads (default: num CPUs)
  # worker_threads: 8

  enable_metrics: true
  metrics_interval_secs: 10

  # Save a metrics JSON snapshot after the run
  # metrics_output_path: "/tmp/render-metrics.json"

# === TILESET: definition document (optional) ===
# tileset: "tileset.yaml"

# === REGION: restrict rendering to a WKT geometry (optional) ===
# A region-scoped tile function is installed on every backend for the run
# and dropped afterwards.
# region: "POLYGON((7.3 46.9, 7.5 46.9, 7.5 47.0, 7.3 47.0, 7.3 46.9))"

# === GENERATOR: flags forwarded to the SQL generator ===
generator:
  gzip: true
  # gzip_level: 6
  feature_ids: false
  key_column: false
  validate_geometry: true
  extent: 4096
  # include_layers: ["roads", "buildings"]
  # exclude_layers: ["housenumbers"]
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand defaults to Run
        let cli = Cli::try_parse_from(["tilepyramid"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["tilepyramid", "-c", "other.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_zoom_overrides() {
        let cli =
            Cli::try_parse_from(["tilepyramid", "--min-zoom", "2", "--mid-zoom", "9"]).unwrap();
        assert_eq!(cli.min_zoom, Some(2));
        assert_eq!(cli.mid_zoom, Some(9));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["tilepyramid", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(&path).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.mid_zoom, Some(9));
    }
}
