//! Types de base: références parcellaires et description des couches

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ParcelleError;

/// Section + numéro saisis par l'utilisateur (ex: "AC 0494")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionNumber {
    /// Code de section (1 ou 2 caractères, en majuscules)
    pub section: String,
    /// Numéro de parcelle sur 4 chiffres
    pub number: String,
}

impl SectionNumber {
    /// Parse une référence "SECTION NUMERO", le numéro est complété à 4 chiffres
    pub fn parse(input: &str) -> Result<Self, ParcelleError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^([0-9A-Za-z]{1,2})\s+(\d{1,4})$").expect("static regex is valid")
        });

        let trimmed = input.trim();
        let caps = re
            .captures(trimmed)
            .ok_or_else(|| ParcelleError::invalid_ref(trimmed, "expected 'SECTION NUMBER'"))?;

        Ok(Self {
            section: caps[1].to_uppercase(),
            number: format!("{:0>4}", &caps[2]),
        })
    }

    /// Libellé "AC 0494"
    pub fn label(&self) -> String {
        format!("{} {}", self.section, self.number)
    }
}

/// Parse une liste "AD 0598, AC 42" en ignorant les entrées mal formées
pub fn parse_parcel_list(input: &str) -> Vec<SectionNumber> {
    input
        .split(',')
        .filter(|raw| !raw.trim().is_empty())
        .filter_map(|raw| match SectionNumber::parse(raw) {
            Ok(sn) => Some(sn),
            Err(e) => {
                warn!("Skipping parcel reference: {}", e);
                None
            }
        })
        .collect()
}

/// Identité d'une parcelle cadastrale: code commune + section + numéro
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParcelReference {
    /// Code INSEE de la commune (5 caractères, "2A004" pour la Corse)
    pub jurisdiction_code: String,
    pub section: String,
    pub number: String,
}

impl ParcelReference {
    pub fn new(jurisdiction_code: impl Into<String>, sn: SectionNumber) -> Self {
        Self {
            jurisdiction_code: jurisdiction_code.into(),
            section: sn.section,
            number: sn.number,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.section, self.number)
    }
}

impl fmt::Display for ParcelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.jurisdiction_code, self.section, self.number)
    }
}

/// Vérifie un code INSEE commune (5 caractères, chiffres ou 2A/2B)
pub fn validate_jurisdiction_code(code: &str) -> Result<(), ParcelleError> {
    let code = code.trim();
    let valid = code.len() == 5
        && (code.chars().all(|c| c.is_ascii_digit())
            || ((code.starts_with("2A") || code.starts_with("2B"))
                && code[2..].chars().all(|c| c.is_ascii_digit())));
    if valid {
        Ok(())
    } else {
        Err(ParcelleError::invalid_ref(
            code,
            "jurisdiction code must be 5 characters (digits, or 2A/2B prefix)",
        ))
    }
}

/// Catégorie thématique d'une couche, déclarée dans le catalogue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCategory {
    /// Zonage d'urbanisme (PLU, carte communale)
    Zoning,
    /// Servitudes d'utilité publique
    Easement,
    /// Risque inondation (PPRI, AZI)
    FloodRisk,
    /// Bruit (classement sonore, PEB)
    Noise,
    /// Potentiel radon
    Radon,
    #[default]
    #[serde(other)]
    Other,
}

/// Identifiant qualifié d'une couche (schema.table)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId {
    pub schema: String,
    pub table: String,
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Description d'une couche candidate (immuable une fois chargée)
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    pub schema: String,
    pub table: String,

    /// Colonne géométrique
    pub geometry_attribute: String,

    /// SRID de la colonne géométrique s'il est connu
    pub geometry_srid: Option<u32>,

    /// Attributs échantillonnés (whitelist "keep")
    pub keep: Vec<String>,

    /// Attributs d'agrégation de couverture ("coverage_by")
    pub coverage_by: Vec<String>,

    /// Colonne identifiant des entités
    pub id_attribute: String,

    pub category: LayerCategory,

    /// Nom lisible (optionnel)
    pub name: Option<String>,
}

impl LayerConfig {
    pub fn id(&self) -> LayerId {
        LayerId {
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }

    /// Nom affiché: `name` s'il est fourni, sinon la table
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.table)
    }
}
