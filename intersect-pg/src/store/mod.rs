//! Accès aux couches thématiques
//!
//! [`SpatialStore`] regroupe les requêtes dont l'exécuteur a besoin pour une
//! couche: introspection du schéma, test d'existence, échantillonnage des
//! valeurs, surfaces par entité et agrégation par attribut de couverture.
//! Toutes les surfaces sont calculées dans le SRID plan du moteur.

pub mod memory;
pub mod pool;
pub mod postgis;

use std::time::Duration;

use async_trait::async_trait;
use parcelle::{LayerConfig, ParcelShape};
use thiserror::Error;

pub use memory::{MemoryFeature, MemoryStore};
pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};
pub use postgis::PostgisStore;

/// Erreurs d'accès aux couches (toujours isolées à une couche)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Budget de la requête dépassé
    #[error("{operation} timed out after {budget:?}")]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    /// Erreur SQL ou de données
    #[error("Query failed: {0}")]
    Query(String),

    /// Aucune connexion disponible
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Géométrie non encodable pour la requête
    #[error("Geometry encoding failed: {0}")]
    Geometry(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Query(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

/// Surface d'intersection d'une entité
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureArea {
    pub id: String,
    pub inter_area_m2: f64,
}

/// Surfaces d'une couche pour une parcelle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerAreas {
    /// Surface plane de la parcelle, si elle a pu être calculée
    pub parcel_area_m2: Option<f64>,
    /// Une entrée par entité intersectée, surfaces nulles comprises
    pub features: Vec<FeatureArea>,
}

/// Source des couches thématiques
///
/// Chaque méthode reçoit le budget de son opération; l'exécuteur l'impose
/// aussi de son côté.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// SRID dans lequel les surfaces sont calculées
    fn planar_srid(&self) -> u32;

    /// Colonnes réellement présentes dans la table de la couche
    async fn layer_columns(&self, layer: &LayerConfig) -> Result<Vec<String>, StoreError>;

    /// Nombre d'entités qui intersectent la parcelle
    async fn count_intersecting(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        budget: Duration,
    ) -> Result<u64, StoreError>;

    /// Valeurs distinctes non nulles d'une colonne parmi les entités intersectées
    async fn distinct_values(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        limit: usize,
        budget: Duration,
    ) -> Result<Vec<String>, StoreError>;

    /// Surface d'intersection par entité.
    ///
    /// Sans colonne identifiant, les entités sont numérotées dans l'ordre de lecture.
    async fn feature_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        id_column: Option<&str>,
        budget: Duration,
    ) -> Result<LayerAreas, StoreError>;

    /// Surface d'intersection cumulée par valeur d'une colonne
    async fn coverage_areas(
        &self,
        layer: &LayerConfig,
        parcel: &ParcelShape,
        column: &str,
        budget: Duration,
    ) -> Result<Vec<(Option<String>, f64)>, StoreError>;
}
