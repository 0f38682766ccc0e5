//! Catalogue des couches thématiques
//!
//! Le catalogue est un objet JSON `"schema.table" -> description`. Il est chargé
//! une fois, puis partagé en lecture seule par toutes les parcelles d'un lot.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{LayerCategory, LayerConfig};
use crate::ParcelleError;

/// Description brute d'une couche dans le fichier de mapping
#[derive(Debug, Deserialize)]
struct RawLayerEntry {
    /// Colonne géométrique
    #[serde(default = "default_geom")]
    geom: String,

    /// SRID de la colonne géométrique
    #[serde(default)]
    srid: Option<u32>,

    /// Whitelist d'attributs échantillonnés
    #[serde(default)]
    keep: Vec<String>,

    /// Attributs de couverture: chaîne "a, b" ou liste
    #[serde(default)]
    coverage_by: Option<serde_json::Value>,

    #[serde(default = "default_id_col")]
    id_col: String,

    #[serde(default)]
    category: LayerCategory,

    #[serde(default)]
    name: Option<String>,
}

/// Attributs de couverture normalisés; toute autre forme qu'une chaîne ou une
/// liste de chaînes est ignorée avec un warning, la couche reste au catalogue.
fn coverage_attributes(entry: &str, raw: Option<serde_json::Value>) -> Vec<String> {
    use serde_json::Value;

    let items: Vec<String> = match raw {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(list)) => list
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                other => {
                    warn!(entry, item = %other, "Non-string coverage attribute ignored");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!(entry, value = %other, "Unexpected coverage_by shape, no coverage attribute kept");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_geom() -> String {
    "geom".to_string()
}

fn default_id_col() -> String {
    "id".to_string()
}

/// Catalogue immuable des couches candidates, dans l'ordre du fichier
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    layers: Vec<LayerConfig>,
}

impl LayerCatalog {
    /// Charge un catalogue depuis un fichier JSON
    pub fn load(path: &Path) -> Result<Self, ParcelleError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParcelleError::Catalog(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Charge un catalogue embarqué
    pub fn from_preset(preset: &str) -> Result<Self, ParcelleError> {
        match preset {
            "gpu" => Self::from_json_str(include_str!("presets/gpu.json")),
            _ => Err(ParcelleError::Catalog(format!(
                "unknown preset: {}. Use: gpu",
                preset
            ))),
        }
    }

    /// Parse un catalogue JSON.
    ///
    /// Seul un document illisible est fatal: une entrée sans `schema.table` ou au
    /// format inattendu est ignorée avec un warning.
    pub fn from_json_str(json: &str) -> Result<Self, ParcelleError> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| ParcelleError::Catalog(format!("failed to parse JSON: {}", e)))?;

        let mut layers = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let Some((schema, table)) = key.trim().split_once('.') else {
                debug!(entry = %key, "Catalog entry without schema delimiter, skipped");
                continue;
            };
            if schema.is_empty() || table.is_empty() {
                debug!(entry = %key, "Catalog entry with empty schema or table, skipped");
                continue;
            }

            let entry: RawLayerEntry = match serde_json::from_value(value) {
                Ok(e) => e,
                Err(e) => {
                    warn!(entry = %key, "Malformed catalog entry skipped: {}", e);
                    continue;
                }
            };

            layers.push(LayerConfig {
                schema: schema.to_string(),
                table: table.to_string(),
                geometry_attribute: entry.geom,
                geometry_srid: entry.srid,
                keep: entry
                    .keep
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
                coverage_by: coverage_attributes(&key, entry.coverage_by),
                id_attribute: entry.id_col,
                category: entry.category,
                name: entry.name,
            });
        }

        Ok(Self { layers })
    }

    /// Restreint le catalogue à une liste de schémas (liste vide: tout garder)
    pub fn restrict_to_schemas(&self, schemas: &[String]) -> Self {
        if schemas.is_empty() {
            return self.clone();
        }
        Self {
            layers: self
                .layers
                .iter()
                .filter(|l| schemas.iter().any(|s| s == &l.schema))
                .cloned()
                .collect(),
        }
    }

    pub fn layers(&self) -> &[LayerConfig] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
