//! Résolution du code INSEE d'une commune depuis le fichier des communes
//!
//! Format attendu (COG INSEE): `TYPECOM,COM,REG,DEP,CTCD,ARR,TNCC,NCC,NCCENR,LIBELLE,...`.
//! Seule la colonne `COM` est obligatoire; la recherche se fait sur `LIBELLE`
//! et `NCCENR`, filtrée par `DEP` si un département est fourni.

use std::collections::HashMap;
use std::path::Path;

use crate::ParcelleError;

/// Une commune du référentiel
#[derive(Debug, Clone)]
struct Commune {
    code: String,
    departement: Option<String>,
    names: Vec<String>,
}

/// Index des communes en mémoire
#[derive(Debug, Clone, Default)]
pub struct CommuneIndex {
    communes: Vec<Commune>,
}

impl CommuneIndex {
    /// Charge le fichier CSV des communes
    pub fn load(path: &Path) -> Result<Self, ParcelleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_csv_str(&content)
    }

    /// Parse le contenu CSV (séparateur `,`, champs éventuellement entre guillemets)
    pub fn from_csv_str(content: &str) -> Result<Self, ParcelleError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| ParcelleError::CommunesCsv("empty file".into()))?;
        let header: HashMap<String, usize> = split_csv_line(header.trim_start_matches('\u{feff}'))
            .into_iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_uppercase(), i))
            .collect();

        let Some(&com_idx) = header.get("COM") else {
            return Err(ParcelleError::CommunesCsv("missing 'COM' column".into()));
        };
        let dep_idx = header.get("DEP").copied();
        let name_idx: Vec<usize> = ["LIBELLE", "NCCENR"]
            .iter()
            .filter_map(|h| header.get(*h).copied())
            .collect();

        let mut communes = Vec::new();
        for line in lines {
            let fields = split_csv_line(line);
            let Some(code) = fields.get(com_idx).map(|s| s.trim()).filter(|s| !s.is_empty())
            else {
                continue;
            };

            let mut names: Vec<String> = name_idx
                .iter()
                .filter_map(|&i| fields.get(i))
                .map(|n| normalize_name(n))
                .filter(|n| !n.is_empty())
                .collect();
            names.dedup();

            communes.push(Commune {
                code: code.to_string(),
                departement: dep_idx
                    .and_then(|i| fields.get(i))
                    .map(|d| d.trim().to_uppercase())
                    .filter(|d| !d.is_empty()),
                names,
            });
        }

        Ok(Self { communes })
    }

    pub fn len(&self) -> usize {
        self.communes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communes.is_empty()
    }

    /// Résout le code INSEE d'une commune.
    ///
    /// Erreur si aucune commune ne correspond, ou si plusieurs communes
    /// homonymes restent après filtrage par département.
    pub fn resolve(&self, commune: &str, departement: Option<&str>) -> Result<String, ParcelleError> {
        let wanted = normalize_name(commune);
        let dep = departement.map(normalize_departement).filter(|d| !d.is_empty());

        let matches: Vec<&Commune> = self
            .communes
            .iter()
            .filter(|c| c.names.iter().any(|n| n == &wanted))
            .filter(|c| match (&dep, &c.departement) {
                (Some(d), Some(cd)) => d == cd,
                _ => true,
            })
            .collect();

        match matches.as_slice() {
            [] => Err(ParcelleError::JurisdictionNotFound {
                commune: commune.to_string(),
            }),
            [one] => Ok(one.code.clone()),
            many => Err(ParcelleError::JurisdictionAmbiguous {
                commune: commune.to_string(),
                candidates: many.len(),
            }),
        }
    }
}

/// Normalise un nom de commune: minuscules, accents retirés, tirets et
/// apostrophes remplacés par des espaces, espaces compactés
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' | 'ä' => 'a',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ï' | 'î' => 'i',
            'ç' => 'c',
            'ÿ' => 'y',
            '-' | '\'' | '’' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "3" → "03", "2a" → "2A"
fn normalize_departement(dep: &str) -> String {
    let dep = dep.trim().to_uppercase();
    if dep.len() == 1 && dep.chars().all(|c| c.is_ascii_digit()) {
        format!("0{}", dep)
    } else {
        dep
    }
}

/// Découpe une ligne CSV en gérant les guillemets doubles
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\u{feff}TYPECOM,COM,REG,DEP,NCCENR,LIBELLE
COM,33234,75,33,Latresne,Latresne
COM,01001,84,01,L'Abergement-Clémenciat,L'Abergement-Clémenciat
COM,03001,84,03,Abrest,Abrest
COM,24001,75,24,Saint-Aubin,Saint-Aubin
COM,40001,75,40,Saint-Aubin,Saint-Aubin
COM,2A004,94,2A,Ajaccio,Ajaccio
COM,99999,11,75,\"Ville, avec virgule\",\"Ville, avec virgule\"
";

    #[test]
    fn test_resolve_simple() {
        let index = CommuneIndex::from_csv_str(CSV).unwrap();
        assert_eq!(index.len(), 7);
        assert_eq!(index.resolve("Latresne", Some("33")).unwrap(), "33234");
        assert_eq!(index.resolve("  LATRESNE ", None).unwrap(), "33234");
    }

    #[test]
    fn test_resolve_accents_and_punctuation() {
        let index = CommuneIndex::from_csv_str(CSV).unwrap();
        assert_eq!(
            index.resolve("l abergement clemenciat", None).unwrap(),
            "01001"
        );
    }

    #[test]
    fn test_resolve_departement_padding() {
        let index = CommuneIndex::from_csv_str(CSV).unwrap();
        assert_eq!(index.resolve("Abrest", Some("3")).unwrap(), "03001");
        assert_eq!(index.resolve("Ajaccio", Some("2a")).unwrap(), "2A004");
    }

    #[test]
    fn test_resolve_ambiguous_and_not_found() {
        let index = CommuneIndex::from_csv_str(CSV).unwrap();
        assert!(matches!(
            index.resolve("Saint-Aubin", None),
            Err(ParcelleError::JurisdictionAmbiguous { candidates: 2, .. })
        ));
        assert_eq!(index.resolve("Saint-Aubin", Some("40")).unwrap(), "40001");
        assert!(matches!(
            index.resolve("Latresne", Some("24")),
            Err(ParcelleError::JurisdictionNotFound { .. })
        ));
    }

    #[test]
    fn test_quoted_fields() {
        let index = CommuneIndex::from_csv_str(CSV).unwrap();
        assert_eq!(index.resolve("Ville, avec virgule", None).unwrap(), "99999");
    }

    #[test]
    fn test_missing_com_column() {
        assert!(CommuneIndex::from_csv_str("DEP,LIBELLE\n33,Latresne\n").is_err());
        assert!(CommuneIndex::from_csv_str("").is_err());
    }

    #[test]
    fn test_split_csv_line_escaped_quote() {
        assert_eq!(
            split_csv_line(r#"a,"b ""c""",d"#),
            vec!["a".to_string(), "b \"c\"".to_string(), "d".to_string()]
        );
    }
}
