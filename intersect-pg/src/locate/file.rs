//! Parcelles lues depuis un fichier GeoJSON (lots hors ligne)
//!
//! Les entités doivent porter `code_insee`, `section` et `numero`, comme le
//! Parcellaire Express. Le même ensemble sert aussi de voisinage pour la
//! découpe des enclaves.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use geo::{BoundingRect, Geometry, Rect};

use parcelle::geometry::{bbox_intersects, project_lambert93};
use parcelle::{carve_enclaves, CorrectionOutcome, ParcelReference, ParcelShape};

use super::ParcelLocator;
use crate::correct::GeometryCorrector;
use crate::geojson::{read_features, GeoFeature};

/// Index des parcelles d'un fichier GeoJSON
#[derive(Debug, Clone)]
pub struct GeoJsonParcels {
    parcels: Vec<GeoFeature>,
}

impl GeoJsonParcels {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_features(read_features(path)?))
    }

    pub fn from_features(parcels: Vec<GeoFeature>) -> Self {
        Self { parcels }
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    fn find(&self, parcel: &ParcelReference) -> Option<&GeoFeature> {
        self.parcels.iter().find(|f| {
            f.property("code_insee") == Some(parcel.jurisdiction_code.as_str())
                && f.property("section").map(str::to_uppercase).as_deref()
                    == Some(parcel.section.as_str())
                && f.property("numero").map(|n| format!("{:0>4}", n)).as_deref()
                    == Some(parcel.number.as_str())
        })
    }
}

#[async_trait]
impl ParcelLocator for GeoJsonParcels {
    async fn locate(&self, parcel: &ParcelReference) -> Result<Option<Geometry<f64>>> {
        Ok(self.find(parcel).map(|f| f.geometry.clone()))
    }
}

#[async_trait]
impl GeometryCorrector for GeoJsonParcels {
    async fn carve(&self, host: &ParcelShape, buffer_m: f64) -> Result<CorrectionOutcome> {
        let Some(area) = host.planar().bounding_rect().map(|r| grow(r, buffer_m)) else {
            return Ok(carve_enclaves(host, &[]));
        };

        let neighbours: Vec<Geometry<f64>> = self
            .parcels
            .iter()
            .filter(|f| bbox_intersects(&project_lambert93(&f.geometry), &area))
            .map(|f| f.geometry.clone())
            .collect();

        Ok(carve_enclaves(host, &neighbours))
    }
}

fn grow(r: Rect<f64>, d: f64) -> Rect<f64> {
    Rect::new(
        (r.min().x - d, r.min().y - d),
        (r.max().x + d, r.max().y + d),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::parse_features;
    use parcelle::SectionNumber;

    const PARCELS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"code_insee":"33234","section":"AC","numero":"0494"},
         "geometry":{"type":"Polygon","coordinates":[[[-0.49,44.78],[-0.488,44.78],[-0.488,44.782],[-0.49,44.782],[-0.49,44.78]]]}},
        {"type":"Feature","properties":{"code_insee":"33234","section":"AC","numero":"495"},
         "geometry":{"type":"Polygon","coordinates":[[[-0.48975,44.78075],[-0.48925,44.78075],[-0.48925,44.78125],[-0.48975,44.78125],[-0.48975,44.78075]]]}},
        {"type":"Feature","properties":{"code_insee":"33234","section":"AB","numero":"0001"},
         "geometry":{"type":"Polygon","coordinates":[[[-0.40,44.70],[-0.39,44.70],[-0.39,44.71],[-0.40,44.71],[-0.40,44.70]]]}}
    ]}"#;

    fn parcels() -> GeoJsonParcels {
        GeoJsonParcels::from_features(parse_features(PARCELS).unwrap())
    }

    fn reference(sn: &str) -> ParcelReference {
        ParcelReference::new("33234", SectionNumber::parse(sn).unwrap())
    }

    #[tokio::test]
    async fn test_locate() {
        let p = parcels();
        assert_eq!(p.len(), 3);
        assert!(p.locate(&reference("AC 494")).await.unwrap().is_some());
        // numero non complété dans le fichier
        assert!(p.locate(&reference("AC 0495")).await.unwrap().is_some());
        assert!(p.locate(&reference("ZZ 1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_carve_with_file_neighbours() {
        let p = parcels();
        let geom = p.locate(&reference("AC 494")).await.unwrap().unwrap();
        let host = ParcelShape::from_geometry("AC 0494", &geom).unwrap();

        let outcome = p.carve(&host, 120.0).await.unwrap();
        assert_eq!(outcome.stats.count, 1);
        assert!(outcome.stats.host_corrected_area_m2 < outcome.stats.host_area_m2);
    }
}
