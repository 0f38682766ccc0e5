//! Couches thématiques stockées dans PostGIS
//!
//! Chaque requête s'exécute dans sa propre transaction avec un
//! `SET LOCAL statement_timeout` égal au budget de l'opération. La parcelle est
//! transmise en EWKT (WGS84) puis projetée dans le SRID plan côté serveur.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use geozero::wkt::WktWriter;
use geozero::GeozeroGeometry;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::trace;

use parcelle::geometry::WGS84_SRID;
use parcelle::{LayerConfig, ParcelShape};

use super::{FeatureArea, LayerAreas, SpatialStore, StoreError};

/// Accès PostGIS aux couches du catalogue
#[derive(Clone)]
pub struct PostgisStore {
    pool: Pool,
    planar_srid: u32,
}

impl PostgisStore {
    pub fn new(pool: Pool, planar_srid: u32) -> Self {
        Self { pool, planar_srid }
    }

    /// Exécute une requête sous budget dans une transaction dédiée
    async fn query_bounded(
        &self,
        operation: &'static str,
        budget: Duration,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        trace!(operation, sql, "PostGIS query");
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(&statement_timeout_sql(budget)).await?;
        let rows = tx.query(sql, params).await.map_err(|e| {
            if e.code() == Some(&SqlState::QUERY_CANCELED) {
                StoreError::Timeout { operation, budget }
            } else {
                StoreError::from(e)
            }
        })?;
        tx.commit().await?;
        Ok(rows)
    }

    fn sql_for(&self, layer: &LayerConfig) -> LayerSql {
        LayerSql::new(layer, self.planar_srid)
    }
}

/// Fragments SQL d'une couche
struct LayerSql {
    qname: String,
    raw_geom: String,
    geom: String,
    cte: String,
}

impl LayerSql {
    fn new(layer: &LayerConfig, planar_srid: u32) -> Self {
        let raw_geom = format!("t.{}", qident(&layer.geometry_attribute));
        // Sans reprojection, l'index GiST de la couche reste utilisable
        let geom = match layer.geometry_srid {
            Some(srid) if srid == planar_srid => raw_geom.clone(),
            _ => format!("ST_Transform({}, {})", raw_geom, planar_srid),
        };
        Self {
            qname: format!("{}.{}", qident(&layer.schema), qident(&layer.table)),
            raw_geom,
            geom,
            cte: format!(
                "WITH p AS (SELECT ST_Transform(ST_GeomFromEWKT($1), {}) AS g)",
                planar_srid
            ),
        }
    }

    /// Pré-filtre sur l'emprise puis test exact
    fn intersects(&self) -> String {
        format!(
            "{raw} IS NOT NULL AND {g} && ST_Envelope(p.g) AND ST_Intersects({g}, p.g)",
            raw = self.raw_geom,
            g = self.geom
        )
    }

    fn inter_area(&self) -> String {
        format!(
            "ST_Area(ST_CollectionExtract(ST_Intersection({}, p.g), 3))",
            self.geom
        )
    }

    fn count(&self) -> String {
        format!(
            "{cte} SELECT COUNT(*)::bigint FROM {q} t, p WHERE {w}",
            cte = self.cte,
            q = self.qname,
            w = self.intersects()
        )
    }

    fn distinct_values(&self, column: &str) -> String {
        let col = format!("t.{}", qident(column));
        format!(
            "{cte} SELECT DISTINCT ({col})::text AS v FROM {q} t, p \
             WHERE {w} AND {col} IS NOT NULL LIMIT $2",
            cte = self.cte,
            col = col,
            q = self.qname,
            w = self.intersects()
        )
    }

    fn feature_areas(&self, id_column: Option<&str>) -> String {
        let id_sql = match id_column {
            Some(c) => format!("(t.{})::text", qident(c)),
            None => "ROW_NUMBER() OVER ()::text".to_string(),
        };
        format!(
            "{cte} SELECT {id} AS id, {area} AS inter_area_m2, ST_Area(p.g) AS parcel_area_m2 \
             FROM {q} t, p WHERE {w}",
            cte = self.cte,
            id = id_sql,
            area = self.inter_area(),
            q = self.qname,
            w = self.intersects()
        )
    }

    fn coverage(&self, column: &str) -> String {
        let col = format!("t.{}", qident(column));
        format!(
            "{cte}, agg AS ( \
               SELECT ({col})::text AS v, SUM({area}) AS inter_area_m2 \
               FROM {q} t, p WHERE {w} AND {col} IS NOT NULL \
               GROUP BY {col} \
             ) \
             SELECT v, inter_area_m2 FROM agg WHERE inter_area_m2 > 0 \
             ORDER BY inter_area_m2 DESC",
            cte = self.cte,
            col = col,
            area = self.inter_area(),
            q = self.qname,
            w = self.intersects()
        )
    }
}

/// Quote un identifiant SQL
pub fn qident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn statement_timeout_sql(budget: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", budget.as_millis().max(1))
}

/// Encode la parcelle en EWKT WGS84
pub(crate) fn parcel_ewkt(parcel: &ParcelShape) -> Result<String, StoreError> {
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = WktWriter::new(&mut buf);
        parcel
            .to_geometry()
            .process_geom(&mut writer)
            .map_err(|e| StoreError::Geometry(e.to_string()))?;
    }
    let wkt = String::from_utf8(buf).map_err(|e| StoreError::Geometry(e.to_string()))?;
    Ok(format!("SRID={};{}", WGS84_SRID, wkt))
}

#[async_trait]
impl SpatialStore for PostgisStore {
    fn planar_srid(&self) -> u32 {
        self.planar_srid
    }

    async fn layer_columns(&self, layer: &LayerConfig) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&layer.schema, &layer.table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn count_intersecting(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        budget: Duration,
    ) -> Result<u64, StoreError> {
        let ewkt = parcel_ewkt(parcel)?;
        let sql = self.sql_for(layer).count();
        let rows = self.query_bounded("COUNT", budget, &sql, &[&ewkt]).await?;
        let n: i64 = rows.first().map(|r| r.get(0)).unwrap_or(0);
        Ok(n.max(0) as u64)
    }

    async fn distinct_values(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        limit: usize,
        budget: Duration,
    ) -> Result<Vec<String>, StoreError> {
        let ewkt = parcel_ewkt(parcel)?;
        let sql = self.sql_for(layer).distinct_values(column);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .query_bounded("VALUES", budget, &sql, &[&ewkt, &limit])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<_, Option<String>>(0))
            .collect())
    }

    async fn feature_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        id_column: Option<&str>,
        budget: Duration,
    ) -> Result<LayerAreas, StoreError> {
        let ewkt = parcel_ewkt(parcel)?;
        let sql = self.sql_for(layer).feature_areas(id_column);
        let rows = self.query_bounded("AREA", budget, &sql, &[&ewkt]).await?;

        let mut areas = LayerAreas::default();
        for row in &rows {
            if areas.parcel_area_m2.is_none() {
                areas.parcel_area_m2 = row.get::<_, Option<f64>>("parcel_area_m2");
            }
            areas.features.push(FeatureArea {
                id: row.get::<_, Option<String>>("id").unwrap_or_default(),
                inter_area_m2: row.get::<_, Option<f64>>("inter_area_m2").unwrap_or(0.0),
            });
        }
        Ok(areas)
    }

    async fn coverage_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        budget: Duration,
    ) -> Result<Vec<(Option<String>, f64)>, StoreError> {
        let ewkt = parcel_ewkt(parcel)?;
        let sql = self.sql_for(layer).coverage(column);
        let rows = self.query_bounded("COVERAGE", budget, &sql, &[&ewkt]).await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get::<_, Option<String>>("v"),
                    r.get::<_, Option<f64>>("inter_area_m2").unwrap_or(0.0),
                )
            })
            .collect())
    }
}
