//! Configuration du moteur d'intersection
//!
//! Valeurs lues depuis l'environnement (`.env` chargé par le binaire), puis
//! surchargées par les options de la ligne de commande.

use std::str::FromStr;
use std::time::Duration;

use parcelle::geometry::LAMBERT93_SRID;

/// Budgets par classe de requête
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTimeouts {
    /// Test d'existence (COUNT) et introspection du schéma
    pub count: Duration,
    /// Échantillonnage des valeurs distinctes
    pub values: Duration,
    /// Surfaces par entité
    pub area: Duration,
    /// Agrégation par attribut de couverture
    pub coverage: Duration,
    /// Localisation de la parcelle (WFS, fichier)
    pub locate: Duration,
    /// Découpe des enclaves
    pub carve: Duration,
    /// Plafond global par parcelle (aucun si absent)
    pub parcel: Option<Duration>,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            count: Duration::from_secs(30),
            values: Duration::from_secs(30),
            area: Duration::from_secs(60),
            coverage: Duration::from_secs(60),
            locate: Duration::from_secs(30),
            carve: Duration::from_secs(120),
            parcel: None,
        }
    }
}

/// Paramètres d'un lot
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Nombre maximal de valeurs distinctes par attribut conservé
    pub values_limit: usize,
    /// Découpe des enclaves avant intersection
    pub carve_enclaves: bool,
    /// Rayon de recherche des parcelles voisines (m)
    pub enclave_buffer_m: f64,
    /// Schémas autorisés (vide: tous)
    pub schema_whitelist: Vec<String>,
    /// Couches traitées en parallèle pour une parcelle
    pub layer_jobs: usize,
    /// SRID plan des calculs de surface
    pub planar_srid: u32,
    pub timeouts: QueryTimeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            values_limit: 100,
            carve_enclaves: true,
            enclave_buffer_m: 120.0,
            schema_whitelist: vec!["public".into()],
            layer_jobs: 8,
            planar_srid: LAMBERT93_SRID,
            timeouts: QueryTimeouts::default(),
        }
    }
}

impl EngineConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Charge la configuration depuis une source clé/valeur quelconque.
    ///
    /// Les valeurs illisibles sont ignorées au profit des défauts.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_var::<f64, _>(&lookup, key)
                .and_then(budget_from_secs)
                .unwrap_or(default)
        };

        let timeouts = QueryTimeouts {
            count: secs("COUNT_TIMEOUT_S", defaults.timeouts.count),
            values: secs("VALUES_TIMEOUT_S", defaults.timeouts.values),
            area: secs("AREA_TIMEOUT_S", defaults.timeouts.area),
            coverage: secs("COVERAGE_TIMEOUT_S", defaults.timeouts.coverage),
            locate: secs("LOCATE_TIMEOUT_S", defaults.timeouts.locate),
            carve: secs("CARVE_TIMEOUT_S", defaults.timeouts.carve),
            parcel: parse_var::<f64, _>(&lookup, "PARCEL_TIMEOUT_S").and_then(budget_from_secs),
        };

        Self {
            values_limit: parse_var(&lookup, "VALUES_LIMIT").unwrap_or(defaults.values_limit),
            carve_enclaves: lookup("CARVE_ENCLAVES")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.carve_enclaves),
            enclave_buffer_m: parse_var(&lookup, "ENCLAVE_BUFFER_M")
                .unwrap_or(defaults.enclave_buffer_m),
            schema_whitelist: lookup("SCHEMA_WHITELIST")
                .map(|v| parse_schema_list(&v))
                .unwrap_or(defaults.schema_whitelist),
            layer_jobs: parse_var::<usize, _>(&lookup, "LAYER_JOBS")
                .filter(|j| *j > 0)
                .unwrap_or(defaults.layer_jobs),
            planar_srid: parse_var(&lookup, "PLANAR_SRID").unwrap_or(defaults.planar_srid),
            timeouts,
        }
    }
}

/// "public, urba" → ["public", "urba"]; "*" ou vide → tous les schémas
pub fn parse_schema_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "*")
        .map(String::from)
        .collect()
}

/// Budget en secondes; `None` si nul, négatif, non fini ou hors de `Duration`
pub fn budget_from_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
