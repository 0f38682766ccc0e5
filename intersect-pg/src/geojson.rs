//! Lecture de fichiers GeoJSON (couches et parcelles hors base)

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use geo::Geometry;
use geojson::GeoJson;
use geozero::ToGeo;
use tracing::warn;

/// Entité lue depuis un GeoJSON, propriétés converties en texte
#[derive(Debug, Clone)]
pub struct GeoFeature {
    pub properties: HashMap<String, String>,
    /// Géométrie WGS84
    pub geometry: Geometry<f64>,
}

impl GeoFeature {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Lit un fichier GeoJSON (FeatureCollection, Feature ou géométrie seule)
pub fn read_features(path: &Path) -> Result<Vec<GeoFeature>> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read GeoJSON file: {}", path.display()))?;
    parse_features(&content).context(format!("Invalid GeoJSON in {}", path.display()))
}

/// Parse un document GeoJSON; les entités sans géométrie sont ignorées
pub fn parse_features(content: &str) -> Result<Vec<GeoFeature>> {
    let gj: GeoJson = content.parse().context("Failed to parse GeoJSON")?;

    let features = match gj {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => {
            return Ok(vec![GeoFeature {
                properties: HashMap::new(),
                geometry: Geometry::try_from(g).context("Unsupported geometry")?,
            }])
        }
    };

    let mut out = Vec::with_capacity(features.len());
    for (idx, feature) in features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            warn!(index = idx, "Skipping GeoJSON feature without geometry");
            continue;
        };
        let geometry = match Geometry::try_from(geometry) {
            Ok(g) => g,
            Err(e) => {
                warn!(index = idx, error = %e, "Skipping GeoJSON feature with invalid geometry");
                continue;
            }
        };
        let properties = feature
            .properties
            .unwrap_or_default()
            .iter()
            .filter_map(|(k, v)| property_to_string(v).map(|s| (k.clone(), s)))
            .collect();
        out.push(GeoFeature {
            properties,
            geometry,
        });
    }
    Ok(out)
}

/// Décode une géométrie GeoJSON seule (sortie de `ST_AsGeoJSON`)
pub fn geometry_from_str(geojson: &str) -> Result<Geometry<f64>> {
    geozero::geojson::GeoJson(geojson)
        .to_geo()
        .context("Failed to decode GeoJSON geometry")
}

/// Valeur de propriété en texte, comme `::text` côté SQL (null → absent)
pub fn property_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
