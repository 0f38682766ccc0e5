//! Parcellaire Express de l'IGN via le service WFS de la Géoplateforme

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use geo::Geometry;
use geojson::GeoJson;
use reqwest::Url;
use tracing::debug;

use parcelle::ParcelReference;

use super::ParcelLocator;

/// Endpoint WFS de la Géoplateforme
pub const IGN_WFS_ENDPOINT: &str = "https://data.geopf.fr/wfs/ows";

/// Couche des parcelles
pub const IGN_PARCEL_LAYER: &str = "CADASTRALPARCELS.PARCELLAIRE_EXPRESS:parcelle";

/// Localisateur WFS (GetFeature filtré en CQL, sortie GeoJSON en EPSG:4326)
#[derive(Debug, Clone)]
pub struct WfsLocator {
    client: reqwest::Client,
    endpoint: String,
    type_name: String,
}

impl WfsLocator {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_endpoint(IGN_WFS_ENDPOINT, IGN_PARCEL_LAYER, timeout)
    }

    pub fn with_endpoint(endpoint: &str, type_name: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            type_name: type_name.to_string(),
        })
    }

    /// URL GetFeature pour une parcelle
    pub fn request_url(&self, parcel: &ParcelReference) -> Result<Url> {
        let cql = format!(
            "code_insee='{}' AND section='{}' AND numero='{}'",
            cql_escape(&parcel.jurisdiction_code),
            cql_escape(&parcel.section),
            cql_escape(&parcel.number)
        );
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("service", "WFS"),
                ("version", "2.0.0"),
                ("request", "GetFeature"),
                ("typeName", self.type_name.as_str()),
                ("outputFormat", "application/json"),
                ("count", "1"),
                ("cql_filter", cql.as_str()),
                ("srsName", "EPSG:4326"),
            ],
        )
        .context("Invalid WFS endpoint")
    }
}

fn cql_escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Première géométrie d'une réponse GeoJSON
fn first_geometry(body: &str) -> Result<Option<Geometry<f64>>> {
    let gj: GeoJson = body.parse().context("Invalid GeoJSON from WFS")?;
    let feature = match gj {
        GeoJson::FeatureCollection(fc) => fc.features.into_iter().next(),
        GeoJson::Feature(f) => Some(f),
        GeoJson::Geometry(_) => None,
    };
    match feature.and_then(|f| f.geometry) {
        Some(g) => Ok(Some(
            Geometry::try_from(g).context("Unsupported parcel geometry")?,
        )),
        None => Ok(None),
    }
}

#[async_trait]
impl ParcelLocator for WfsLocator {
    async fn locate(&self, parcel: &ParcelReference) -> Result<Option<Geometry<f64>>> {
        let url = self.request_url(parcel)?;
        debug!(parcel = %parcel, url = %url, "WFS GetFeature");

        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("WFS request failed")?
            .error_for_status()
            .context("WFS returned an error status")?
            .text()
            .await
            .context("Failed to read WFS response")?;

        first_geometry(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcelle::SectionNumber;

    #[test]
    fn test_request_url() {
        let locator = WfsLocator::new(Duration::from_secs(5)).unwrap();
        let parcel = ParcelReference::new("33234", SectionNumber::parse("AC 494").unwrap());
        let url = locator.request_url(&parcel).unwrap();

        assert_eq!(url.host_str(), Some("data.geopf.fr"));
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(params.contains(&("typeName".into(), IGN_PARCEL_LAYER.into())));
        assert!(params.contains(&(
            "cql_filter".into(),
            "code_insee='33234' AND section='AC' AND numero='0494'".into()
        )));
        assert!(params.contains(&("srsName".into(), "EPSG:4326".into())));
    }

    #[test]
    fn test_first_geometry() {
        let body = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"section":"AC","numero":"0494"},
             "geometry":{"type":"MultiPolygon","coordinates":[[[[-0.49,44.78],[-0.488,44.78],[-0.488,44.782],[-0.49,44.78]]]]}}
        ]}"#;
        assert!(matches!(
            first_geometry(body).unwrap(),
            Some(Geometry::MultiPolygon(_))
        ));

        let empty = r#"{"type":"FeatureCollection","features":[]}"#;
        assert!(first_geometry(empty).unwrap().is_none());
        assert!(first_geometry("<html>").is_err());
    }
}
