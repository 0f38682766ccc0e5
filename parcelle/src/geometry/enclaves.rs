//! Découpe des enclaves d'une parcelle hôte
//!
//! Une enclave est une parcelle voisine contenue dans l'enveloppe extérieure de
//! l'hôte. Les calculs se font en Lambert 93, la géométrie corrigée est rendue
//! en WGS84.

use geo::{Area, BooleanOps, Geometry, MultiPolygon, Polygon};
use serde::Serialize;
use tracing::debug;

use super::{intersection_area, polygonal_parts, project_lambert93, unproject_lambert93, ParcelShape};
use crate::ParcelleError;

/// Part minimale de la surface d'une voisine dans l'enveloppe de l'hôte
pub const ENCLAVE_CONTAINMENT_RATIO: f64 = 0.99;

/// Statistiques de la découpe
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnclaveStats {
    pub count: usize,
    pub carved_effective_area_m2: f64,
    pub host_area_m2: f64,
    pub host_corrected_area_m2: f64,
    /// Écart entre surface retirée et surface des enclaves dans l'hôte
    pub carve_consistency_delta_m2: f64,
}

/// Trous déjà présents dans la géométrie de l'hôte
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HoleStats {
    pub count: usize,
    pub area_m2: f64,
}

/// Résultat de la correction d'une parcelle
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    /// Géométrie corrigée (WGS84)
    pub corrected: MultiPolygon<f64>,
    pub stats: EnclaveStats,
    pub holes: HoleStats,
}

impl CorrectionOutcome {
    /// Forme corrigée utilisable pour les intersections
    pub fn into_shape(self, label: &str) -> Result<ParcelShape, ParcelleError> {
        if self.corrected.0.is_empty() {
            return Err(ParcelleError::invalid_geometry(
                label,
                "corrected geometry is empty",
            ));
        }
        Ok(ParcelShape::from_wgs84(label.to_string(), self.corrected))
    }
}

/// Retire de l'hôte les voisines qui y sont enclavées.
///
/// `neighbours` sont des géométries WGS84; l'hôte lui-même peut y figurer, il
/// est reconnu et ignoré.
pub fn carve_enclaves(host: &ParcelShape, neighbours: &[Geometry<f64>]) -> CorrectionOutcome {
    let host_planar = host.planar();
    let host_area = host_planar.unsigned_area();

    let shell = MultiPolygon::new(
        host_planar
            .0
            .iter()
            .map(|p| Polygon::new(p.exterior().clone(), vec![]))
            .collect(),
    );
    let holes = HoleStats {
        count: host_planar.0.iter().map(|p| p.interiors().len()).sum(),
        area_m2: (shell.unsigned_area() - host_area).max(0.0),
    };

    let mut enclaves: Vec<MultiPolygon<f64>> = Vec::new();
    for neighbour in neighbours {
        let planar = project_lambert93(&polygonal_parts(neighbour));
        let area = planar.unsigned_area();
        if area <= 0.0 {
            continue;
        }
        if is_same_parcel(&planar, area, host_planar, host_area) {
            continue;
        }
        if intersection_area(&planar, &shell) >= ENCLAVE_CONTAINMENT_RATIO * area {
            enclaves.push(planar);
        }
    }

    if enclaves.is_empty() {
        return CorrectionOutcome {
            corrected: host.wgs84().clone(),
            stats: EnclaveStats {
                count: 0,
                carved_effective_area_m2: 0.0,
                host_area_m2: host_area,
                host_corrected_area_m2: host_area,
                carve_consistency_delta_m2: 0.0,
            },
            holes,
        };
    }

    let count = enclaves.len();
    let union = enclaves
        .into_iter()
        .reduce(|acc, mp| acc.union(&mp))
        .unwrap_or_else(|| MultiPolygon::new(vec![]));

    let enclave_area_in_host = intersection_area(&union, host_planar);
    let corrected_planar = host_planar.difference(&union);
    let corrected_area = corrected_planar.unsigned_area();
    let carved = host_area - corrected_area;

    debug!(
        parcel = host.label(),
        enclaves = count,
        carved_m2 = carved,
        "Enclaves carved"
    );

    CorrectionOutcome {
        corrected: unproject_lambert93(&corrected_planar),
        stats: EnclaveStats {
            count,
            carved_effective_area_m2: carved,
            host_area_m2: host_area,
            host_corrected_area_m2: corrected_area,
            carve_consistency_delta_m2: carved - enclave_area_in_host,
        },
        holes,
    }
}

/// La voisine est l'hôte lui-même (mêmes surface et emprise, à la tolérance près)
fn is_same_parcel(
    candidate: &MultiPolygon<f64>,
    candidate_area: f64,
    host: &MultiPolygon<f64>,
    host_area: f64,
) -> bool {
    let tolerance = 1.0 - ENCLAVE_CONTAINMENT_RATIO;
    (candidate_area - host_area).abs() <= tolerance * host_area
        && intersection_area(candidate, host) >= ENCLAVE_CONTAINMENT_RATIO * host_area
}
