//! Traitement d'un lot de parcelles
//!
//! Pour chaque référence, dans l'ordre de saisie: localisation, correction
//! éventuelle des enclaves, puis intersection avec toutes les couches du
//! catalogue. Les couches d'une parcelle sont traitées en parallèle (au plus
//! `layer_jobs` à la fois) et remises dans l'ordre du catalogue. Seule
//! l'impossibilité de résoudre le code commune interrompt le lot.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};

use parcelle::types::validate_jurisdiction_code;
use parcelle::{
    BatchReport, CommuneIndex, IntersectionResult, JurisdictionContext, LayerCatalog,
    LayerConfig, ParcelInfo, ParcelReference, ParcelReport, ParcelShape, ParcelleError,
    SectionNumber,
};

use crate::config::EngineConfig;
use crate::correct::GeometryCorrector;
use crate::executor::run_layer;
use crate::locate::ParcelLocator;
use crate::store::SpatialStore;

/// Erreurs fatales d'un lot
#[derive(Debug, Error)]
pub enum BatchError {
    /// Code commune introuvable, ambigu ou mal formé
    #[error("Jurisdiction resolution failed: {0}")]
    Jurisdiction(#[source] ParcelleError),

    /// Nom de commune fourni sans référentiel pour le résoudre
    #[error("Cannot resolve commune '{0}' without a communes CSV")]
    NoResolver(String),

    #[error("No valid parcel reference in request")]
    EmptyParcelList,
}

/// Résolution nom de commune → code INSEE
pub trait JurisdictionResolver: Send + Sync {
    fn resolve(&self, commune: &str, departement: Option<&str>) -> Result<String, ParcelleError>;
}

impl JurisdictionResolver for CommuneIndex {
    fn resolve(&self, commune: &str, departement: Option<&str>) -> Result<String, ParcelleError> {
        CommuneIndex::resolve(self, commune, departement)
    }
}

/// Commune visée par le lot
#[derive(Debug, Clone)]
pub enum JurisdictionQuery {
    /// Code INSEE fourni directement
    Code(String),
    /// Nom de commune, département optionnel pour lever les homonymies
    Commune {
        name: String,
        departement: Option<String>,
    },
}

/// Demande de traitement d'un lot
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub jurisdiction: JurisdictionQuery,
    pub parcels: Vec<SectionNumber>,
}

/// Exécute les lots avec des collaborateurs injectés
pub struct BatchRunner {
    catalog: Arc<LayerCatalog>,
    store: Arc<dyn SpatialStore>,
    locator: Arc<dyn ParcelLocator>,
    corrector: Option<Arc<dyn GeometryCorrector>>,
    resolver: Option<Arc<dyn JurisdictionResolver>>,
    config: EngineConfig,
}

impl BatchRunner {
    pub fn new(
        catalog: Arc<LayerCatalog>,
        store: Arc<dyn SpatialStore>,
        locator: Arc<dyn ParcelLocator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            locator,
            corrector: None,
            resolver: None,
            config,
        }
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn GeometryCorrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn JurisdictionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Résout le contexte communal (seule étape fatale du lot)
    pub fn resolve_jurisdiction(
        &self,
        query: &JurisdictionQuery,
    ) -> Result<JurisdictionContext, BatchError> {
        match query {
            JurisdictionQuery::Code(code) => {
                let code = code.trim().to_uppercase();
                validate_jurisdiction_code(&code).map_err(BatchError::Jurisdiction)?;
                Ok(JurisdictionContext {
                    commune: None,
                    departement: None,
                    insee: code,
                })
            }
            JurisdictionQuery::Commune { name, departement } => {
                let resolver = self
                    .resolver
                    .as_ref()
                    .ok_or_else(|| BatchError::NoResolver(name.clone()))?;
                let insee = resolver
                    .resolve(name, departement.as_deref())
                    .map_err(BatchError::Jurisdiction)?;
                Ok(JurisdictionContext {
                    commune: Some(name.clone()),
                    departement: departement.clone(),
                    insee,
                })
            }
        }
    }

    /// Traite un lot complet; une entrée par référence, erreurs comprises
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport, BatchError> {
        let context = self.resolve_jurisdiction(&request.jurisdiction)?;
        if request.parcels.is_empty() {
            return Err(BatchError::EmptyParcelList);
        }

        let layers = self
            .catalog
            .restrict_to_schemas(&self.config.schema_whitelist);
        info!(
            insee = context.insee.as_str(),
            parcels = request.parcels.len(),
            layers = layers.len(),
            carve_enclaves = self.config.carve_enclaves,
            "Starting batch"
        );

        let started = Instant::now();
        let mut report = BatchReport::new(context);
        for sn in &request.parcels {
            let reference = ParcelReference::new(report.context.insee.clone(), sn.clone());
            let parcel_report = self.run_parcel(&reference, layers.layers()).await;
            if let Some(err) = parcel_report.error_message() {
                warn!(parcel = %reference, error = err, "Parcel not processed");
            }
            report.push(parcel_report);
        }

        info!(
            parcels = report.reports.len(),
            errors = report.error_count(),
            hits = report.total_hits(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(report)
    }

    /// Traite une parcelle sous le plafond global éventuel
    pub async fn run_parcel(&self, reference: &ParcelReference, layers: &[LayerConfig]) -> ParcelReport {
        match self.config.timeouts.parcel {
            Some(budget) => {
                // L'abandon du futur annule les requêtes de couches en cours
                match tokio::time::timeout(budget, self.process_parcel(reference, layers)).await {
                    Ok(r) => r,
                    Err(_) => ParcelReport::error(
                        ParcelInfo::new(reference.label()),
                        format!("Parcel processing timed out after {:?}", budget),
                    ),
                }
            }
            None => self.process_parcel(reference, layers).await,
        }
    }

    async fn process_parcel(&self, reference: &ParcelReference, layers: &[LayerConfig]) -> ParcelReport {
        let label = reference.label();
        let info = ParcelInfo::new(label.clone());

        let raw = match tokio::time::timeout(
            self.config.timeouts.locate,
            self.locator.locate(reference),
        )
        .await
        {
            Ok(Ok(Some(g))) => g,
            Ok(Ok(None)) => {
                return ParcelReport::error(
                    info,
                    format!(
                        "Parcel not found (INSEE {}, {})",
                        reference.jurisdiction_code, label
                    ),
                )
            }
            Ok(Err(e)) => return ParcelReport::error(info, format!("Parcel lookup failed: {:#}", e)),
            Err(_) => {
                return ParcelReport::error(
                    info,
                    format!(
                        "Parcel lookup timed out after {:?}",
                        self.config.timeouts.locate
                    ),
                )
            }
        };

        let shape = match ParcelShape::from_geometry(label.clone(), &raw) {
            Ok(s) => s,
            Err(e) => return ParcelReport::error(info, e.to_string()),
        };

        let (shape, info) = self.correct(shape, info).await;
        info!(parcel = %reference, area_m2 = shape.planar_area_m2(), "Parcel located");

        let results = self.intersect_all(&shape, layers).await;
        ParcelReport::with_results(info, results)
    }

    /// Découpe des enclaves; en cas d'échec la géométrie brute est conservée
    async fn correct(&self, shape: ParcelShape, info: ParcelInfo) -> (ParcelShape, ParcelInfo) {
        let Some(corrector) = self.corrector.as_ref().filter(|_| self.config.carve_enclaves) else {
            return (shape, info);
        };

        let outcome = tokio::time::timeout(
            self.config.timeouts.carve,
            corrector.carve(&shape, self.config.enclave_buffer_m),
        )
        .await;

        match outcome {
            Ok(Ok(outcome)) => {
                let stats = outcome.stats.clone();
                let holes = outcome.holes.clone();
                match outcome.into_shape(shape.label()) {
                    Ok(corrected) => (corrected, info.with_correction(stats, holes)),
                    Err(e) => {
                        warn!(parcel = shape.label(), error = %e, "Enclave correction unusable, using raw geometry");
                        (shape, info)
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(parcel = shape.label(), error = %format!("{:#}", e), "Enclave correction failed, using raw geometry");
                (shape, info)
            }
            Err(_) => {
                warn!(parcel = shape.label(), budget = ?self.config.timeouts.carve, "Enclave correction timed out, using raw geometry");
                (shape, info)
            }
        }
    }

    /// Toutes les couches, au plus `layer_jobs` en parallèle, rendues dans l'ordre du catalogue
    async fn intersect_all(&self, shape: &ParcelShape, layers: &[LayerConfig]) -> Vec<IntersectionResult> {
        let store = self.store.as_ref();
        let config = &self.config;

        let mut hits: Vec<(usize, IntersectionResult)> = stream::iter(layers.iter().enumerate())
            .map(|(idx, layer)| async move {
                run_layer(store, layer, shape, config)
                    .await
                    .map(|r| (idx, r))
            })
            .buffer_unordered(config.layer_jobs.max(1))
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        hits.sort_by_key(|(idx, _)| *idx);
        hits.into_iter().map(|(_, r)| r).collect()
    }
}
