//! SQL generator seam and region function lifecycle.
//!
//! The query generator is an external collaborator as far as the scheduler is
//! concerned: the scheduler only asks it for (a) the invocable tile function
//! name and (b) an installable region-scoped variant of it. The default
//! generator produces plausible PostGIS text; dialect correctness is not this
//! crate's concern.

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::tileset::TilesetDefinition;
use sha2::{Digest, Sha256};

/// Number of hex digits of the region hash used in function names.
const REGION_ID_LEN: usize = 12;

/// SQL produced by the generator for a region-scoped tile function.
#[derive(Debug, Clone)]
pub struct RegionSql {
    /// Fully qualified function name
    pub name: String,
    /// Single-statement function definition
    pub create: String,
    /// Idempotent drop statement
    pub drop: String,
}

/// Contract with the tile query generator.
pub trait QueryGenerator: Send + Sync {
    /// Name of the directly invocable tile-producing function.
    fn tile_function(&self) -> String;

    /// Installable tile function restricted to a region, namespaced by the
    /// region identifier so repeated or concurrent runs do not collide.
    fn region_function(&self, identifier: &str, wkt: &str) -> RegionSql;
}

/// Deterministic identifier for a region geometry: a hex prefix of the
/// SHA-256 of its WKT text.
pub fn region_identifier(wkt: &str) -> String {
    let digest = Sha256::digest(wkt.as_bytes());
    digest
        .iter()
        .take(REGION_ID_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Default SQL text generator for a tileset.
pub struct SqlGenerator {
    tileset_name: String,
    flags: GeneratorConfig,
}

impl SqlGenerator {
    pub fn new(tileset: Option<&TilesetDefinition>, flags: GeneratorConfig) -> Self {
        let tileset_name = tileset
            .map(|t| sanitize_identifier(&t.name))
            .unwrap_or_else(|| "tiles".to_string());
        Self {
            tileset_name,
            flags,
        }
    }

    fn options_comment(&self) -> String {
        // The feature flags only influence the generated body; recording them
        // next to the definition keeps installed functions auditable.
        let gzip = match (self.flags.gzip, self.flags.gzip_level) {
            (false, _) => "off".to_string(),
            (true, None) => "default".to_string(),
            (true, Some(level)) => level.to_string(),
        };
        format!(
            "-- gzip={} feature_ids={} key_column={} validate_geometry={} extent={}",
            gzip,
            self.flags.feature_ids,
            self.flags.key_column,
            self.flags.validate_geometry,
            self.flags.extent
        )
    }
}

impl QueryGenerator for SqlGenerator {
    fn tile_function(&self) -> String {
        format!("public.{}_tile", self.tileset_name)
    }

    fn region_function(&self, identifier: &str, wkt: &str) -> RegionSql {
        let name = format!("public.{}_tile_{}", self.tileset_name, identifier);
        let tile_function = self.tile_function();
        let create = format!(
            "CREATE OR REPLACE FUNCTION {name}(z integer, x integer, y integer)\n\
             RETURNS bytea AS $$\n\
             {comment}\n\
             SELECT {tile_function}(z, x, y)\n\
             WHERE ST_Intersects(ST_TileEnvelope(z, x, y), ST_GeomFromText('{wkt}', 3857))\n\
             $$ LANGUAGE sql STABLE PARALLEL SAFE",
            name = name,
            comment = self.options_comment(),
            tile_function = tile_function,
            wkt = wkt.replace('\'', "''"),
        );
        let drop = format!("DROP FUNCTION IF EXISTS {}(integer, integer, integer)", name);
        RegionSql { name, create, drop }
    }
}

fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        format!("t_{}", cleaned)
    } else {
        cleaned
    }
}

/// An installed region-scoped tile function.
///
/// Owned by the scheduler for the duration of one run; the scheduler must
/// attempt [`RegionFunctionManager::uninstall`] on every exit path after a
/// successful install.
#[derive(Debug, Clone)]
pub struct RegionFunction {
    pub identifier: String,
    pub name: String,
    drop_sql: String,
}

/// Installs and removes region-scoped tile functions on every backend in the
/// pool.
pub struct RegionFunctionManager {
    generator: std::sync::Arc<dyn QueryGenerator>,
}

impl RegionFunctionManager {
    pub fn new(generator: std::sync::Arc<dyn QueryGenerator>) -> Self {
        Self { generator }
    }

    /// Install the region function on every backend as one statement each.
    ///
    /// Any failure aborts the run before rendering begins; backends that
    /// already ran the create get the drop issued before the error is
    /// returned, so a partial install never outlives this call.
    pub async fn install(
        &self,
        pool: &crate::backend::BackendPool,
        wkt: &str,
    ) -> Result<RegionFunction> {
        let identifier = region_identifier(wkt);
        let sql = self.generator.region_function(&identifier, wkt);

        for backend in pool.backends() {
            if let Err(source) = backend.execute(&sql.create).await {
                let err = Error::Install {
                    identifier: identifier.clone(),
                    host: backend.describe(),
                    source,
                };
                // The drop is idempotent, so sweep every backend instead of
                // tracking which installs succeeded
                for backend in pool.backends() {
                    if let Err(e) = backend.execute(&sql.drop).await {
                        tracing::error!(
                            "Failed to roll back region function {} on {}: {}",
                            sql.name,
                            backend.describe(),
                            e
                        );
                    }
                }
                return Err(err);
            }
        }

        tracing::info!(
            "Installed region function {} on {} backend(s)",
            sql.name,
            pool.len()
        );

        Ok(RegionFunction {
            identifier,
            name: sql.name,
            drop_sql: sql.drop,
        })
    }

    /// Drop the region function from every backend. Idempotent: succeeds when
    /// the function is already absent.
    pub async fn uninstall(
        &self,
        pool: &crate::backend::BackendPool,
        function: &RegionFunction,
    ) -> Result<()> {
        let mut first_error = None;
        for backend in pool.backends() {
            if let Err(e) = backend.execute(&function.drop_sql).await {
                tracing::error!(
                    "Failed to drop region function {} on {}: {}",
                    function.name,
                    backend.describe(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => {
                tracing::info!("Dropped region function {}", function.name);
                Ok(())
            }
            Some(e) => Err(Error::Backend(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERN_WKT: &str = "POLYGON((7.3 46.9, 7.5 46.9, 7.5 47.0, 7.3 47.0, 7.3 46.9))";

    #[test]
    fn test_region_identifier_stable_and_distinct() {
        let a = region_identifier(BERN_WKT);
        let b = region_identifier(BERN_WKT);
        assert_eq!(a, b);
        assert_eq!(a.len(), REGION_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = region_identifier("POINT(0 0)");
        assert_ne!(a, other);
    }

    #[test]
    fn test_tile_function_name_from_tileset() {
        let tileset = TilesetDefinition {
            name: "Street-Map 2".to_string(),
            minzoom: None,
            maxzoom: None,
            attribution: None,
            layers: vec![],
        };
        let generator = SqlGenerator::new(Some(&tileset), GeneratorConfig::default());
        assert_eq!(generator.tile_function(), "public.street_map_2_tile");
    }

    #[test]
    fn test_region_function_sql_shape() {
        let generator = SqlGenerator::new(None, GeneratorConfig::default());
        let id = region_identifier(BERN_WKT);
        let sql = generator.region_function(&id, BERN_WKT);

        assert_eq!(sql.name, format!("public.tiles_tile_{}", id));
        assert!(sql.create.starts_with("CREATE OR REPLACE FUNCTION"));
        assert!(sql.create.contains(&sql.name));
        assert!(sql.create.contains("ST_GeomFromText"));
        assert!(sql.drop.starts_with("DROP FUNCTION IF EXISTS"));
        assert!(sql.drop.contains(&sql.name));
    }

    #[test]
    fn test_wkt_quotes_escaped() {
        let generator = SqlGenerator::new(None, GeneratorConfig::default());
        let sql = generator.region_function("abc", "POLYGON't");
        assert!(sql.create.contains("POLYGON''t"));
    }
}
