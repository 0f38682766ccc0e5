//! Types d'erreurs pour le crate parcelle

use thiserror::Error;

/// Erreurs du modèle parcelle/couches
#[derive(Debug, Error)]
pub enum ParcelleError {
    /// Erreur d'I/O (catalogue, CSV communes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sérialisation JSON du rapport
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catalogue de couches illisible dans son ensemble
    #[error("Invalid layer catalog: {0}")]
    Catalog(String),

    /// Référence parcellaire mal formée
    #[error("Invalid parcel reference '{input}': {reason}")]
    InvalidParcelRef { input: String, reason: String },

    /// Géométrie inexploitable pour le calcul de surfaces
    #[error("Invalid geometry for {label}: {reason}")]
    InvalidGeometry { label: String, reason: String },

    /// Aucun code INSEE pour la commune demandée
    #[error("No INSEE code found for commune '{commune}'")]
    JurisdictionNotFound { commune: String },

    /// Plusieurs communes homonymes correspondent
    #[error("Ambiguous commune '{commune}': {candidates} candidates")]
    JurisdictionAmbiguous { commune: String, candidates: usize },

    /// Fichier CSV des communes au mauvais format
    #[error("Invalid communes CSV: {0}")]
    CommunesCsv(String),
}

impl ParcelleError {
    /// Crée une erreur de référence parcellaire avec contexte
    pub fn invalid_ref(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParcelRef {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            label: label.into(),
            reason: reason.into(),
        }
    }
}
