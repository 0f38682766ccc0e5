//! # intersect-pg
//!
//! Intersection de parcelles cadastrales avec les couches thématiques d'une
//! base PostGIS (zonage, servitudes, risques...), avec surfaces exactes et
//! répartition par valeur d'attribut.
//!
//! ## Features
//!
//! - Requêtes PostGIS sous budget (`statement_timeout` + timeout côté client)
//! - Couches d'une parcelle traitées en parallèle, ordre du catalogue conservé
//! - Localisation des parcelles via le WFS de l'IGN ou un fichier GeoJSON
//! - Découpe des enclaves avant calcul des surfaces
//! - Mode hors base: couches GeoJSON chargées en mémoire
//!
//! ## Usage CLI
//!
//! ```bash
//! # Parcelles d'une commune, couches du preset GPU
//! intersect-pg --commune Latresne --departement 33 --csv communes.csv --parcels "AC 0494, AC 0495"
//!
//! # Code INSEE direct, rapport JSON
//! intersect-pg --insee 33234 --parcels "AC 0494" --out rapport.json
//!
//! # Couches effectivement interrogées
//! intersect-pg layers --mapping gpu
//! ```

pub mod config;
pub mod correct;
pub mod executor;
pub mod geojson;
pub mod locate;
pub mod pipeline;
pub mod store;

pub use config::{EngineConfig, QueryTimeouts};
pub use pipeline::{BatchError, BatchRequest, BatchRunner, JurisdictionQuery, JurisdictionResolver};
pub use store::{create_pool, DatabaseConfig, MemoryStore, PostgisStore, SpatialStore, StoreError};
