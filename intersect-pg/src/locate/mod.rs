//! Localisation de la géométrie d'une parcelle
//!
//! Un localisateur renvoie la géométrie WGS84 brute d'une parcelle, ou `None`
//! si elle n'existe pas. Il n'a aucun effet de bord du point de vue du moteur.

pub mod file;
pub mod wfs;

use anyhow::Result;
use async_trait::async_trait;
use geo::Geometry;
use parcelle::ParcelReference;

pub use file::GeoJsonParcels;
pub use wfs::WfsLocator;

#[async_trait]
pub trait ParcelLocator: Send + Sync {
    async fn locate(&self, parcel: &ParcelReference) -> Result<Option<Geometry<f64>>>;
}
