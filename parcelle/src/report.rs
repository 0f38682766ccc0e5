//! Rapport d'intersection parcelle/couches
//!
//! Un [`BatchReport`] contient une entrée par référence demandée, dans l'ordre
//! de saisie: soit les couches intersectées, soit un message d'erreur.
//! Seules les couches avec au moins une entité intersectée y figurent.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::coverage::{normalize_entries, CoverageEntry};
use crate::geometry::enclaves::{EnclaveStats, HoleStats};
use crate::geometry::WGS84_SRID;
use crate::types::{LayerCategory, LayerConfig};
use crate::ParcelleError;

/// Surface d'intersection d'une entité de la couche
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceEntry {
    /// Identifiant de l'entité (ou numéro de ligne si la couche n'a pas d'identifiant)
    pub id: String,
    pub inter_area_m2: f64,
    /// Absent si la surface de la parcelle est nulle ou inconnue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_of_parcel: Option<f64>,
}

/// Résultat pour une couche intersectée
#[derive(Debug, Clone, Serialize)]
pub struct IntersectionResult {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub category: LayerCategory,
    pub geom_col: String,
    /// SRID des surfaces calculées
    pub srid: u32,
    /// Nombre d'entités intersectées (toujours > 0 dans un rapport)
    pub count: u64,
    /// Échantillon de valeurs distinctes par attribut conservé
    pub values: BTreeMap<String, Vec<String>>,
    pub surfaces: Vec<SurfaceEntry>,
    /// Répartition normalisée par attribut de couverture
    pub coverage: BTreeMap<String, Vec<CoverageEntry>>,
    pub parcel_area_m2: Option<f64>,
    /// Attributs de couverture dans l'ordre du catalogue
    #[serde(skip)]
    pub coverage_attributes: Vec<String>,
}

impl IntersectionResult {
    /// Résultat vide pour une couche, à compléter par l'exécuteur
    pub fn for_layer(layer: &LayerConfig, count: u64, srid: u32) -> Self {
        Self {
            name: layer.display_name().to_string(),
            schema: layer.schema.clone(),
            table: layer.table.clone(),
            category: layer.category,
            geom_col: layer.geometry_attribute.clone(),
            srid,
            count,
            values: BTreeMap::new(),
            surfaces: Vec::new(),
            coverage: BTreeMap::new(),
            parcel_area_m2: None,
            coverage_attributes: layer.coverage_by.clone(),
        }
    }

    /// Distribution du premier attribut de couverture non vide, dans l'ordre
    /// du catalogue
    pub fn primary_coverage(&self) -> Option<&[CoverageEntry]> {
        self.coverage_attributes
            .iter()
            .filter_map(|attr| self.coverage.get(attr))
            .chain(self.coverage.values())
            .find(|entries| !entries.is_empty())
            .map(Vec::as_slice)
    }

    /// Valeur dominante de la couverture principale, ex: "N 100.0%"
    pub fn headline(&self) -> Option<String> {
        self.primary_coverage()
            .and_then(|entries| entries.first())
            .map(|top| format!("{} {}%", top.value, top.pct_display()))
    }
}

/// Parcelle analysée
#[derive(Debug, Clone, Serialize)]
pub struct ParcelInfo {
    /// Libellé "AC 0494"
    pub label: String,
    pub srid: u32,
    /// Présent uniquement si la correction des enclaves a abouti
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclaves: Option<EnclaveStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holes_in_host: Option<HoleStats>,
}

impl ParcelInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            srid: WGS84_SRID,
            enclaves: None,
            holes_in_host: None,
        }
    }

    pub fn with_correction(mut self, enclaves: EnclaveStats, holes: HoleStats) -> Self {
        self.enclaves = Some(enclaves);
        self.holes_in_host = Some(holes);
        self
    }
}

/// Issue du traitement d'une parcelle
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ParcelOutcome {
    Hits {
        layers_with_hits: usize,
        results: Vec<IntersectionResult>,
        /// Couverture consolidée de toutes les couches d'une même catégorie
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        coverage_by_category: BTreeMap<LayerCategory, Vec<CoverageEntry>>,
    },
    Error {
        error: String,
    },
}

/// Rapport d'une parcelle (immutable une fois assemblé)
#[derive(Debug, Clone, Serialize)]
pub struct ParcelReport {
    pub parcel: ParcelInfo,
    #[serde(flatten)]
    pub outcome: ParcelOutcome,
}

impl ParcelReport {
    /// Rapport à partir des couches intersectées (les couches sans entité sont écartées)
    pub fn with_results(parcel: ParcelInfo, results: Vec<IntersectionResult>) -> Self {
        let results: Vec<_> = results.into_iter().filter(|r| r.count > 0).collect();
        let coverage_by_category = consolidate_by_category(&results);
        Self {
            parcel,
            outcome: ParcelOutcome::Hits {
                layers_with_hits: results.len(),
                results,
                coverage_by_category,
            },
        }
    }

    /// Entrée d'erreur pour une parcelle non traitée
    pub fn error(parcel: ParcelInfo, message: impl Into<String>) -> Self {
        Self {
            parcel,
            outcome: ParcelOutcome::Error {
                error: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ParcelOutcome::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ParcelOutcome::Error { error } => Some(error),
            ParcelOutcome::Hits { .. } => None,
        }
    }

    pub fn results(&self) -> &[IntersectionResult] {
        match &self.outcome {
            ParcelOutcome::Hits { results, .. } => results,
            ParcelOutcome::Error { .. } => &[],
        }
    }

    /// Couverture consolidée d'une catégorie (vide si aucune couche ne la porte)
    pub fn category_coverage(&self, category: LayerCategory) -> &[CoverageEntry] {
        match &self.outcome {
            ParcelOutcome::Hits {
                coverage_by_category,
                ..
            } => coverage_by_category
                .get(&category)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            ParcelOutcome::Error { .. } => &[],
        }
    }

    pub fn layers_with_hits(&self) -> usize {
        match &self.outcome {
            ParcelOutcome::Hits {
                layers_with_hits, ..
            } => *layers_with_hits,
            ParcelOutcome::Error { .. } => 0,
        }
    }
}

/// Regroupe, par catégorie, la couverture principale de chaque couche.
///
/// Une même valeur peut venir de plusieurs couches (assiette et générateur
/// d'une servitude): les distributions sont concaténées puis normalisées.
/// Les couches de catégorie `Other` ne sont pas consolidées.
pub fn consolidate_by_category(
    results: &[IntersectionResult],
) -> BTreeMap<LayerCategory, Vec<CoverageEntry>> {
    let mut raw: BTreeMap<LayerCategory, Vec<CoverageEntry>> = BTreeMap::new();
    for r in results {
        if r.category == LayerCategory::Other {
            continue;
        }
        if let Some(entries) = r.primary_coverage() {
            raw.entry(r.category)
                .or_default()
                .extend(entries.iter().cloned());
        }
    }
    raw.into_iter()
        .map(|(category, entries)| (category, normalize_entries(entries)))
        .collect()
}

/// Contexte communal du lot
#[derive(Debug, Clone, Default, Serialize)]
pub struct JurisdictionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commune: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departement: Option<String>,
    pub insee: String,
}

/// Rapport complet d'un lot de parcelles
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    #[serde(flatten)]
    pub context: JurisdictionContext,
    pub reports: Vec<ParcelReport>,
}

impl BatchReport {
    pub fn new(context: JurisdictionContext) -> Self {
        Self {
            context,
            reports: Vec::new(),
        }
    }

    pub fn push(&mut self, report: ParcelReport) {
        self.reports.push(report);
    }

    /// Nombre de parcelles en erreur
    pub fn error_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_error()).count()
    }

    /// Nombre total de couches intersectées, toutes parcelles confondues
    pub fn total_hits(&self) -> usize {
        self.reports.iter().map(|r| r.layers_with_hits()).sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        match &self.context.commune {
            Some(c) => println!("INTERSECTION REPORT - {} (INSEE {})", c, self.context.insee),
            None => println!("INTERSECTION REPORT - INSEE {}", self.context.insee),
        }
        println!("{}", "=".repeat(60));

        for report in &self.reports {
            println!("\n--- {} ---", report.parcel.label);
            if let Some(err) = report.error_message() {
                println!("  ERROR: {}", err);
                continue;
            }

            if let Some(e) = &report.parcel.enclaves {
                println!(
                    "  Enclaves: {} carved, {:.1} m² -> {:.1} m²",
                    e.count, e.host_area_m2, e.host_corrected_area_m2
                );
            }

            println!("  Layers with hits: {}", report.layers_with_hits());
            for r in report.results() {
                match r.headline() {
                    Some(h) => println!("  {} ({} features): {}", r.name, r.count, h),
                    None => println!("  {} ({} features)", r.name, r.count),
                }
            }
            if let ParcelOutcome::Hits {
                coverage_by_category,
                ..
            } = &report.outcome
            {
                for (category, entries) in coverage_by_category {
                    let parts: Vec<String> = entries
                        .iter()
                        .map(|e| format!("{} {}%", e.value, e.pct_display()))
                        .collect();
                    println!("  [{:?}] {}", category, parts.join(", "));
                }
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), ParcelleError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{}: {} parcels, {} layer hits, {} errors",
            self.context.insee,
            self.reports.len(),
            self.total_hits(),
            self.error_count()
        )
    }
}
