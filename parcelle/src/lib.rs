//! # parcelle
//!
//! Modèle d'intersection parcelle/couches thématiques, sans base de données.
//!
//! ## Features
//!
//! - Catalogue de couches immuable (fichier JSON ou preset embarqué)
//! - Normalisation des couvertures: dédoublonnage, plafond à 100 %, rééchelonnement
//! - Géométrie des parcelles en WGS84 et Lambert 93, découpe des enclaves
//! - Résolution du code INSEE depuis le fichier des communes
//! - Rapport JSON par lot de parcelles
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parcelle::{normalize_pairs, LayerCatalog, SectionNumber};
//!
//! let catalog = LayerCatalog::from_preset("gpu")?;
//! let sn = SectionNumber::parse("AC 494")?;
//! assert_eq!(sn.label(), "AC 0494");
//!
//! let dist = normalize_pairs([("Bleu", 70.0), ("Bleu", 45.0), ("Rouge", 10.0)]);
//! ```

pub mod catalog;
pub mod coverage;
pub mod error;
pub mod geometry;
pub mod insee;
pub mod report;
pub mod types;

pub use catalog::LayerCatalog;
pub use coverage::{coverage_from_areas, normalize_entries, normalize_pairs, CoverageEntry};
pub use error::ParcelleError;
pub use geometry::enclaves::{carve_enclaves, CorrectionOutcome, EnclaveStats, HoleStats};
pub use geometry::ParcelShape;
pub use insee::CommuneIndex;
pub use report::{
    BatchReport, IntersectionResult, JurisdictionContext, ParcelInfo, ParcelOutcome,
    ParcelReport, SurfaceEntry,
};
pub use types::{
    parse_parcel_list, LayerCategory, LayerConfig, LayerId, ParcelReference, SectionNumber,
};
