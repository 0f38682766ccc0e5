//! Normalisation des couvertures par valeur d'attribut
//!
//! Une même valeur peut remonter plusieurs fois (assiette et générateur d'une
//! même servitude, entités sources qui se chevauchent). On regroupe par valeur,
//! on plafonne chaque valeur à 100 %, puis on ramène la somme à 100 % si elle
//! dépasse. Le rééchelonnement suppose que le dépassement vient d'un double
//! comptage, pas de deux zones disjointes mal saisies.

use std::collections::HashMap;

use serde::Serialize;

/// Pourcentage maximal d'une valeur ou d'une distribution
pub const MAX_PERCENT: f64 = 100.0;

/// Tolérance sur la somme avant rééchelonnement
pub const SUM_TOLERANCE: f64 = 1e-4;

/// Part de la parcelle couverte par une valeur d'attribut
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    pub value: String,
    /// Surface d'intersection cumulée (m², non rééchelonnée)
    pub inter_area_m2: f64,
    /// Pourcentage normalisé de la surface de la parcelle
    pub pct_of_parcel: f64,
}

impl CoverageEntry {
    /// Pourcentage à une décimale, pour l'affichage
    pub fn pct_display(&self) -> String {
        format!("{:.1}", self.pct_of_parcel)
    }
}

/// Regroupe, plafonne, trie et rééchelonne une distribution.
///
/// Garanties en sortie: valeurs uniques, chaque pourcentage dans [0, 100],
/// somme ≤ 100 + [`SUM_TOLERANCE`]. L'ordre est décroissant par pourcentage,
/// les ex aequo gardent l'ordre de première apparition.
pub fn normalize_entries<I>(entries: I) -> Vec<CoverageEntry>
where
    I: IntoIterator<Item = CoverageEntry>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<CoverageEntry> = Vec::new();

    for entry in entries {
        let pct = sanitize(entry.pct_of_parcel);
        let area = sanitize(entry.inter_area_m2);
        match index.get(&entry.value) {
            Some(&i) => {
                groups[i].pct_of_parcel += pct;
                groups[i].inter_area_m2 += area;
            }
            None => {
                index.insert(entry.value.clone(), groups.len());
                groups.push(CoverageEntry {
                    value: entry.value,
                    inter_area_m2: area,
                    pct_of_parcel: pct,
                });
            }
        }
    }

    for g in &mut groups {
        g.pct_of_parcel = g.pct_of_parcel.min(MAX_PERCENT);
    }

    // sort_by est stable: les ex aequo restent dans l'ordre d'apparition
    groups.sort_by(|a, b| b.pct_of_parcel.total_cmp(&a.pct_of_parcel));

    let total: f64 = groups.iter().map(|g| g.pct_of_parcel).sum();
    if total > MAX_PERCENT + SUM_TOLERANCE {
        for g in &mut groups {
            g.pct_of_parcel = g.pct_of_parcel * MAX_PERCENT / total;
        }
    }

    groups
}

/// Variante sur des paires (valeur, pourcentage)
pub fn normalize_pairs<I, S>(pairs: I) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = (S, f64)>,
    S: AsRef<str>,
{
    normalize_entries(pairs.into_iter().map(|(v, pct)| CoverageEntry {
        value: v.as_ref().to_string(),
        inter_area_m2: 0.0,
        pct_of_parcel: pct,
    }))
    .into_iter()
    .map(|e| (e.value, e.pct_of_parcel))
    .collect()
}

/// Construit une distribution normalisée depuis des surfaces par valeur.
///
/// Les valeurs nulles sont regroupées sous la chaîne vide, les surfaces nulles
/// ou négatives sont ignorées. Sans surface de parcelle exploitable, la
/// distribution est vide.
pub fn coverage_from_areas<I>(rows: I, parcel_area_m2: Option<f64>) -> Vec<CoverageEntry>
where
    I: IntoIterator<Item = (Option<String>, f64)>,
{
    let Some(parcel_area) = parcel_area_m2.filter(|a| a.is_finite() && *a > 0.0) else {
        return Vec::new();
    };

    normalize_entries(
        rows.into_iter()
            .filter(|(_, area)| area.is_finite() && *area > 0.0)
            .map(|(value, area)| CoverageEntry {
                value: value.unwrap_or_default(),
                inter_area_m2: area,
                pct_of_parcel: area / parcel_area * 100.0,
            }),
    )
}

fn sanitize(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}
