//! Intersection d'une parcelle avec une couche
//!
//! Ordre des requêtes: COUNT, puis seulement si au moins une entité intersecte,
//! VALUES (attributs conservés présents dans le schéma), AREA (surfaces par
//! entité) et COVERAGE (par attribut de couverture). Chaque requête a son
//! budget; un dépassement ou une erreur écarte la couche sans toucher aux autres.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use parcelle::coverage::coverage_from_areas;
use parcelle::{IntersectionResult, LayerConfig, ParcelShape, SurfaceEntry};

use crate::config::EngineConfig;
use crate::store::{SpatialStore, StoreError};

/// Exécute une opération sous budget strict
pub async fn bounded<T, F>(operation: &'static str, budget: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout { operation, budget }),
    }
}

/// Intersecte une couche; `None` si la couche n'a aucune entité sur la parcelle.
pub async fn intersect_layer(
    store: &dyn SpatialStore,
    layer: &LayerConfig,
    parcel: &ParcelShape,
    config: &EngineConfig,
) -> Result<Option<IntersectionResult>, StoreError> {
    let t = &config.timeouts;
    let layer_id = layer.id();

    // COUNT
    let t0 = Instant::now();
    let count = bounded(
        "COUNT",
        t.count,
        store.count_intersecting(layer, parcel, t.count),
    )
    .await?;
    debug!(parcel = parcel.label(), layer = %layer_id, count, elapsed_ms = t0.elapsed().as_millis() as u64, "COUNT");
    if count == 0 {
        return Ok(None);
    }

    let columns = bounded("COLUMNS", t.count, store.layer_columns(layer)).await?;
    let has_column = |c: &str| columns.iter().any(|x| x == c);

    let mut result = IntersectionResult::for_layer(layer, count, store.planar_srid());

    // VALUES
    let t0 = Instant::now();
    for col in &layer.keep {
        if !has_column(col) {
            debug!(layer = %layer_id, column = col.as_str(), "Kept attribute absent from layer, skipped");
            continue;
        }
        let values = bounded(
            "VALUES",
            t.values,
            store.distinct_values(layer, parcel, col, config.values_limit, t.values),
        )
        .await?;
        result.values.insert(col.clone(), values);
    }
    debug!(layer = %layer_id, columns = result.values.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "VALUES");

    // AREA
    let t0 = Instant::now();
    let id_column = if has_column(&layer.id_attribute) {
        Some(layer.id_attribute.as_str())
    } else {
        warn!(
            layer = %layer_id,
            column = layer.id_attribute.as_str(),
            "Identifier column absent, using row numbers"
        );
        None
    };
    let areas = bounded(
        "AREA",
        t.area,
        store.feature_areas(layer, parcel, id_column, t.area),
    )
    .await?;
    let parcel_area = areas.parcel_area_m2;
    result.parcel_area_m2 = parcel_area;
    result.surfaces = areas
        .features
        .into_iter()
        .filter(|f| f.inter_area_m2 > 0.0)
        .map(|f| SurfaceEntry {
            pct_of_parcel: parcel_area
                .filter(|a| *a > 0.0)
                .map(|a| f.inter_area_m2 / a * 100.0),
            id: f.id,
            inter_area_m2: f.inter_area_m2,
        })
        .collect();
    debug!(
        layer = %layer_id,
        surfaces = result.surfaces.len(),
        parcel_area_m2 = parcel_area.unwrap_or(0.0),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "AREA"
    );

    // COVERAGE
    for col in &layer.coverage_by {
        if !has_column(col) {
            warn!(layer = %layer_id, column = col.as_str(), "Coverage attribute absent from layer, skipped");
            continue;
        }
        let t0 = Instant::now();
        let rows = bounded(
            "COVERAGE",
            t.coverage,
            store.coverage_areas(layer, parcel, col, t.coverage),
        )
        .await?;
        let entries = coverage_from_areas(rows, parcel_area);
        debug!(layer = %layer_id, column = col.as_str(), classes = entries.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "COVERAGE");
        result.coverage.insert(col.clone(), entries);
    }

    Ok(Some(result))
}

/// Comme [`intersect_layer`], mais une erreur est journalisée et vaut absence de résultat
pub async fn run_layer(
    store: &dyn SpatialStore,
    layer: &LayerConfig,
    parcel: &ParcelShape,
    config: &EngineConfig,
) -> Option<IntersectionResult> {
    let started = Instant::now();
    match intersect_layer(store, layer, parcel, config).await {
        Ok(Some(r)) => {
            debug!(parcel = parcel.label(), layer = %layer.id(), count = r.count, elapsed_ms = started.elapsed().as_millis() as u64, "Layer hit");
            Some(r)
        }
        Ok(None) => {
            debug!(parcel = parcel.label(), layer = %layer.id(), "No intersection, layer skipped");
            None
        }
        Err(e) => {
            warn!(parcel = parcel.label(), layer = %layer.id(), error = %e, "Layer failed, skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryFeature, MemoryStore};
    use geo::{polygon, Geometry};
    use parcelle::LayerCategory;

    fn square(lon: f64, lat: f64, size: f64) -> Geometry<f64> {
        polygon![
            (x: lon, y: lat),
            (x: lon + size, y: lat),
            (x: lon + size, y: lat + size),
            (x: lon, y: lat + size),
        ]
        .into()
    }

    fn parcel() -> ParcelShape {
        ParcelShape::from_geometry("AC 0494", &square(-0.49, 44.78, 0.002)).unwrap()
    }

    fn layer(keep: &[&str], coverage_by: &[&str]) -> LayerConfig {
        LayerConfig {
            schema: "public".into(),
            table: "zonage".into(),
            geometry_attribute: "geom".into(),
            geometry_srid: None,
            keep: keep.iter().map(|s| s.to_string()).collect(),
            coverage_by: coverage_by.iter().map(|s| s.to_string()).collect(),
            id_attribute: "gid".into(),
            category: LayerCategory::Zoning,
            name: None,
        }
    }

    fn covering_store() -> MemoryStore {
        MemoryStore::new().with_layer(
            "public.zonage",
            vec![MemoryFeature::new(&square(-0.5, 44.77, 0.05))
                .with_property("typezone", "N")
                .with_property("gid", "7")],
        )
    }

    #[tokio::test]
    async fn test_full_coverage() {
        let cfg = EngineConfig::default();
        let r = intersect_layer(&covering_store(), &layer(&["typezone"], &["typezone"]), &parcel(), &cfg)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.count, 1);
        assert_eq!(r.srid, 2154);
        assert_eq!(r.values["typezone"], vec!["N"]);
        assert_eq!(r.surfaces.len(), 1);
        assert_eq!(r.surfaces[0].id, "7");
        assert!((r.surfaces[0].pct_of_parcel.unwrap() - 100.0).abs() < 1e-6);
        let cov = &r.coverage["typezone"];
        assert_eq!(cov.len(), 1);
        assert_eq!(cov[0].value, "N");
        assert!((cov[0].pct_of_parcel - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_srid_is_the_store_one() {
        let cfg = EngineConfig {
            planar_srid: 3857,
            ..EngineConfig::default()
        };
        let r = intersect_layer(&covering_store(), &layer(&["typezone"], &["typezone"]), &parcel(), &cfg)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.srid, 2154);
    }

    #[tokio::test]
    async fn test_no_intersection_returns_none() {
        let store = MemoryStore::new().with_layer(
            "public.zonage",
            vec![MemoryFeature::new(&square(2.35, 48.85, 0.01)).with_property("typezone", "A")],
        );
        let r = intersect_layer(&store, &layer(&["typezone"], &[]), &parcel(), &EngineConfig::default())
            .await
            .unwrap();
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn test_schema_drift_and_missing_id() {
        let store = MemoryStore::new().with_layer(
            "public.zonage",
            vec![MemoryFeature::new(&square(-0.5, 44.77, 0.05)).with_property("typezone", "N")],
        );
        let r = intersect_layer(
            &store,
            &layer(&["typezone", "libelle"], &["destdomi"]),
            &parcel(),
            &EngineConfig::default(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(r.values.contains_key("typezone"));
        assert!(!r.values.contains_key("libelle"));
        assert!(r.coverage.is_empty());
        assert_eq!(r.surfaces[0].id, "1");
    }

    #[tokio::test]
    async fn test_no_coverage_attributes() {
        let r = intersect_layer(&covering_store(), &layer(&[], &[]), &parcel(), &EngineConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert!(r.coverage.is_empty());
        assert!(r.values.is_empty());
        assert_eq!(r.surfaces.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_drops_layer() {
        let store = covering_store().with_latency(Duration::from_millis(200));
        let mut cfg = EngineConfig::default();
        cfg.timeouts.count = Duration::from_millis(20);

        let err = intersect_layer(&store, &layer(&[], &[]), &parcel(), &cfg)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(run_layer(&store, &layer(&[], &[]), &parcel(), &cfg).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_layer_is_isolated() {
        let mut l = layer(&[], &[]);
        l.table = "absente".into();
        assert!(run_layer(&covering_store(), &l, &parcel(), &EngineConfig::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let ok = bounded("COUNT", Duration::from_secs(1), async { Ok::<_, StoreError>(3) }).await;
        assert_eq!(ok.unwrap(), 3);
    }
}
