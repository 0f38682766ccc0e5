//! Correction de la géométrie d'une parcelle avant intersection
//!
//! Le correcteur retire les enclaves (parcelles voisines contenues dans
//! l'enveloppe de l'hôte) et rend les statistiques de découpe. En cas d'échec,
//! le pipeline garde la géométrie brute.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::{debug, warn};

use parcelle::geometry::{LAMBERT93_SRID, WGS84_SRID};
use parcelle::{carve_enclaves, CorrectionOutcome, ParcelShape};

use crate::geojson::geometry_from_str;
use crate::store::postgis::{parcel_ewkt, qident};

#[async_trait]
pub trait GeometryCorrector: Send + Sync {
    /// Découpe les enclaves trouvées à moins de `buffer_m` mètres de l'hôte
    async fn carve(&self, host: &ParcelShape, buffer_m: f64) -> Result<CorrectionOutcome>;
}

/// Table cadastrale servant de voisinage
#[derive(Debug, Clone)]
pub struct CadastreTable {
    pub schema: String,
    pub table: String,
    pub geometry_column: String,
}

impl CadastreTable {
    /// Parse "schema.table"
    pub fn parse(qualified: &str, geometry_column: &str) -> Result<Self> {
        let (schema, table) = qualified
            .split_once('.')
            .with_context(|| format!("Expected schema.table, got '{}'", qualified))?;
        Ok(Self {
            schema: schema.trim().to_string(),
            table: table.trim().to_string(),
            geometry_column: geometry_column.to_string(),
        })
    }

    fn neighbours_sql(&self) -> String {
        let geom = format!("c.{}", qident(&self.geometry_column));
        format!(
            "WITH h AS (SELECT ST_Transform(ST_GeomFromEWKT($1), {l93}) AS g) \
             SELECT ST_AsGeoJSON(ST_Transform({geom}, {wgs})) \
             FROM {schema}.{table} c, h \
             WHERE {geom} IS NOT NULL \
               AND ST_DWithin(ST_Transform({geom}, {l93}), h.g, $2)",
            l93 = LAMBERT93_SRID,
            wgs = WGS84_SRID,
            geom = geom,
            schema = qident(&self.schema),
            table = qident(&self.table),
        )
    }
}

/// Découpe des enclaves à partir des parcelles d'une table PostGIS
pub struct PostgisCarver {
    pool: Pool,
    cadastre: CadastreTable,
}

impl PostgisCarver {
    pub fn new(pool: Pool, cadastre: CadastreTable) -> Self {
        Self { pool, cadastre }
    }
}

#[async_trait]
impl GeometryCorrector for PostgisCarver {
    async fn carve(&self, host: &ParcelShape, buffer_m: f64) -> Result<CorrectionOutcome> {
        let ewkt = parcel_ewkt(host)?;
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;
        let rows = client
            .query(&self.cadastre.neighbours_sql(), &[&ewkt, &buffer_m])
            .await
            .context("Neighbour parcel query failed")?;

        let mut neighbours = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(gj) = row.get::<_, Option<String>>(0) else {
                continue;
            };
            match geometry_from_str(&gj) {
                Ok(g) => neighbours.push(g),
                Err(e) => warn!(parcel = host.label(), error = %e, "Skipping undecodable neighbour"),
            }
        }
        debug!(parcel = host.label(), neighbours = neighbours.len(), buffer_m, "Neighbours fetched");

        Ok(carve_enclaves(host, &neighbours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadastre_table_parse() {
        let t = CadastreTable::parse("cadastre.parcelles", "geometry").unwrap();
        assert_eq!(t.schema, "cadastre");
        assert_eq!(t.table, "parcelles");
        assert!(CadastreTable::parse("parcelles", "geometry").is_err());
    }

    #[test]
    fn test_neighbours_sql() {
        let sql = CadastreTable::parse("cadastre.parcelles", "geometry")
            .unwrap()
            .neighbours_sql();
        assert!(sql.contains("FROM \"cadastre\".\"parcelles\" c, h"));
        assert!(sql.contains("ST_DWithin(ST_Transform(c.\"geometry\", 2154), h.g, $2)"));
        assert!(sql.contains("ST_AsGeoJSON(ST_Transform(c.\"geometry\", 4326))"));
    }
}
