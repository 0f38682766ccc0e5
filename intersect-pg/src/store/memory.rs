//! Couches en mémoire, pour les lots hors base et les tests
//!
//! Les géométries sont projetées en Lambert 93 au chargement; les surfaces sont
//! calculées avec `geo`. Une couche `schema.table` absente se comporte comme
//! une relation inexistante côté PostGIS.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use geo::{Geometry, Intersects, MultiPolygon};
use tracing::{debug, info};

use parcelle::geometry::{
    bbox_intersects, intersection_area, polygonal_parts, project_lambert93, LAMBERT93_SRID,
};
use parcelle::{LayerConfig, ParcelShape};

use super::{FeatureArea, LayerAreas, SpatialStore, StoreError};
use crate::geojson::{read_features, GeoFeature};

/// Colonne géométrique implicite des couches en mémoire
const GEOMETRY_COLUMN: &str = "geom";

/// Entité d'une couche en mémoire
#[derive(Debug, Clone)]
pub struct MemoryFeature {
    properties: HashMap<String, String>,
    planar: Geometry<f64>,
    polygons: MultiPolygon<f64>,
}

impl MemoryFeature {
    /// Entité depuis une géométrie WGS84
    pub fn new(geometry: &Geometry<f64>) -> Self {
        let planar = project_lambert93(geometry);
        let polygons = polygonal_parts(&planar);
        Self {
            properties: HashMap::new(),
            planar,
            polygons,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl From<&GeoFeature> for MemoryFeature {
    fn from(f: &GeoFeature) -> Self {
        let mut feature = Self::new(&f.geometry);
        feature.properties = f.properties.clone();
        feature
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryLayer {
    columns: Vec<String>,
    features: Vec<MemoryFeature>,
}

/// Implémentation en mémoire de [`SpatialStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    layers: HashMap<String, MemoryLayer>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une couche `schema.table`; ses colonnes sont l'union des propriétés
    pub fn insert_layer(&mut self, key: &str, features: Vec<MemoryFeature>) {
        let mut columns = vec![GEOMETRY_COLUMN.to_string()];
        for f in &features {
            for k in f.properties.keys() {
                if !columns.contains(k) {
                    columns.push(k.clone());
                }
            }
        }
        self.layers
            .insert(key.to_string(), MemoryLayer { columns, features });
    }

    pub fn with_layer(mut self, key: &str, features: Vec<MemoryFeature>) -> Self {
        self.insert_layer(key, features);
        self
    }

    /// Délai artificiel avant chaque réponse
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Charge un répertoire de fichiers `schema.table.geojson`
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        let entries = std::fs::read_dir(dir)
            .context(format!("Failed to read layer directory: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("geojson") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !key.contains('.') {
                debug!(file = %path.display(), "Skipping GeoJSON without schema.table name");
                continue;
            }
            let features: Vec<MemoryFeature> = read_features(&path)?
                .iter()
                .map(MemoryFeature::from)
                .collect();
            info!(layer = key, features = features.len(), "Loaded layer");
            store.insert_layer(key, features);
        }
        Ok(store)
    }

    async fn simulate_latency(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }

    fn layer(&self, layer: &LayerConfig) -> Result<&MemoryLayer, StoreError> {
        let key = layer.id().to_string();
        self.layers
            .get(&key)
            .ok_or_else(|| StoreError::Query(format!("relation \"{}\" does not exist", key)))
    }

    fn check_column(layer: &MemoryLayer, column: &str) -> Result<(), StoreError> {
        if layer.columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(StoreError::Query(format!(
                "column \"{}\" does not exist",
                column
            )))
        }
    }

    fn intersecting<'a>(
        &'a self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
    ) -> Result<Vec<&'a MemoryFeature>, StoreError> {
        let target = parcel.planar();
        Ok(self
            .layer(layer)?
            .features
            .iter()
            .filter(|f| bbox_intersects(&f.planar, target) && f.planar.intersects(target))
            .collect())
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    fn planar_srid(&self) -> u32 {
        LAMBERT93_SRID
    }

    async fn layer_columns(&self, layer: &LayerConfig) -> Result<Vec<String>, StoreError> {
        self.simulate_latency().await;
        // Comme information_schema: table absente → aucune colonne
        Ok(self
            .layers
            .get(&layer.id().to_string())
            .map(|l| l.columns.clone())
            .unwrap_or_default())
    }

    async fn count_intersecting(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        _budget: Duration,
    ) -> Result<u64, StoreError> {
        self.simulate_latency().await;
        Ok(self.intersecting(layer, parcel)?.len() as u64)
    }

    async fn distinct_values(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        limit: usize,
        _budget: Duration,
    ) -> Result<Vec<String>, StoreError> {
        self.simulate_latency().await;
        Self::check_column(self.layer(layer)?, column)?;

        let mut values: Vec<String> = Vec::new();
        for f in self.intersecting(layer, parcel)? {
            if values.len() >= limit {
                break;
            }
            if let Some(v) = f.property(column) {
                if !values.iter().any(|x| x == v) {
                    values.push(v.to_string());
                }
            }
        }
        Ok(values)
    }

    async fn feature_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        id_column: Option<&str>,
        _budget: Duration,
    ) -> Result<LayerAreas, StoreError> {
        self.simulate_latency().await;
        if let Some(c) = id_column {
            Self::check_column(self.layer(layer)?, c)?;
        }

        let features = self
            .intersecting(layer, parcel)?
            .into_iter()
            .enumerate()
            .map(|(row, f)| FeatureArea {
                id: id_column
                    .and_then(|c| f.property(c))
                    .map(String::from)
                    .unwrap_or_else(|| (row + 1).to_string()),
                inter_area_m2: intersection_area(&f.polygons, parcel.planar()),
            })
            .collect();

        Ok(LayerAreas {
            parcel_area_m2: Some(parcel.planar_area_m2()),
            features,
        })
    }

    async fn coverage_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        _budget: Duration,
    ) -> Result<Vec<(Option<String>, f64)>, StoreError> {
        self.simulate_latency().await;
        Self::check_column(self.layer(layer)?, column)?;

        let mut groups: Vec<(String, f64)> = Vec::new();
        for f in self.intersecting(layer, parcel)? {
            let Some(value) = f.property(column) else {
                continue;
            };
            let area = intersection_area(&f.polygons, parcel.planar());
            match groups.iter_mut().find(|(v, _)| v == value) {
                Some((_, total)) => *total += area,
                None => groups.push((value.to_string(), area)),
            }
        }

        groups.retain(|(_, area)| *area > 0.0);
        groups.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(groups.into_iter().map(|(v, a)| (Some(v), a)).collect())
    }
}
