//! Tests du pipeline complet sur des couches en mémoire
//!
//! Exécution:
//! ```bash
//! cargo test -p intersect-pg --test pipeline
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use geo::{polygon, Geometry};

use intersect_pg::correct::GeometryCorrector;
use intersect_pg::locate::ParcelLocator;
use intersect_pg::store::MemoryFeature;
use intersect_pg::{
    BatchError, BatchRequest, BatchRunner, EngineConfig, JurisdictionQuery, MemoryStore,
};
use parcelle::{
    carve_enclaves, parse_parcel_list, CommuneIndex, CorrectionOutcome, LayerCatalog,
    LayerCategory, ParcelReference, ParcelShape,
};

/// Parcelles connues du localisateur de test, par libellé "AC 0494"
struct StaticLocator {
    parcels: HashMap<String, Geometry<f64>>,
}

#[async_trait]
impl ParcelLocator for StaticLocator {
    async fn locate(&self, parcel: &ParcelReference) -> Result<Option<Geometry<f64>>> {
        Ok(self.parcels.get(&parcel.label()).cloned())
    }
}

/// Localisateur toujours en panne
struct UnreachableLocator;

#[async_trait]
impl ParcelLocator for UnreachableLocator {
    async fn locate(&self, _parcel: &ParcelReference) -> Result<Option<Geometry<f64>>> {
        anyhow::bail!("connection refused")
    }
}

/// Correcteur avec une liste fixe de voisines
struct StaticCorrector {
    neighbours: Vec<Geometry<f64>>,
}

#[async_trait]
impl GeometryCorrector for StaticCorrector {
    async fn carve(&self, host: &ParcelShape, _buffer_m: f64) -> Result<CorrectionOutcome> {
        Ok(carve_enclaves(host, &self.neighbours))
    }
}

struct FailingCorrector;

#[async_trait]
impl GeometryCorrector for FailingCorrector {
    async fn carve(&self, _host: &ParcelShape, _buffer_m: f64) -> Result<CorrectionOutcome> {
        anyhow::bail!("cadastre table unavailable")
    }
}

fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Geometry<f64> {
    polygon![
        (x: min_lon, y: min_lat),
        (x: max_lon, y: min_lat),
        (x: max_lon, y: max_lat),
        (x: min_lon, y: max_lat),
    ]
    .into()
}

const CATALOG: &str = r#"{
    "public.zonage": {
        "keep": ["typezone", "libelle"],
        "coverage_by": "typezone",
        "id_col": "gid",
        "category": "zoning"
    },
    "public.ppri": {
        "keep": ["zone"],
        "coverage_by": ["zone"],
        "category": "flood_risk"
    },
    "urba.servitudes": {
        "keep": ["nomsuplitt"],
        "coverage_by": "nomsuplitt",
        "category": "easement"
    },
    "sans_delimiteur": {"keep": ["x"]}
}"#;

fn catalog() -> Arc<LayerCatalog> {
    Arc::new(LayerCatalog::from_json_str(CATALOG).unwrap())
}

/// AC 0494: carré de ~160 m de côté près de Latresne
fn parcel_ac0494() -> Geometry<f64> {
    rect(-0.490, 44.780, -0.488, 44.782)
}

/// AC 0496: plus au nord, hors du zonage "N"
fn parcel_ac0496() -> Geometry<f64> {
    rect(-0.490, 44.790, -0.488, 44.792)
}

fn store() -> MemoryStore {
    MemoryStore::new()
        .with_layer(
            "public.zonage",
            vec![
                MemoryFeature::new(&rect(-0.495, 44.775, -0.480, 44.785))
                    .with_property("typezone", "N")
                    .with_property("gid", "12"),
                MemoryFeature::new(&rect(-0.495, 44.788, -0.480, 44.795))
                    .with_property("typezone", "U")
                    .with_property("gid", "13"),
            ],
        )
        .with_layer(
            "public.ppri",
            vec![MemoryFeature::new(&rect(-0.40, 44.70, -0.39, 44.71)).with_property("zone", "Rouge")],
        )
        .with_layer(
            "urba.servitudes",
            vec![MemoryFeature::new(&rect(-0.495, 44.775, -0.480, 44.785))
                .with_property("nomsuplitt", "AC1")],
        )
}

fn locator() -> Arc<StaticLocator> {
    Arc::new(StaticLocator {
        parcels: HashMap::from([
            ("AC 0494".to_string(), parcel_ac0494()),
            ("AC 0496".to_string(), parcel_ac0496()),
        ]),
    })
}

fn config() -> EngineConfig {
    EngineConfig {
        carve_enclaves: false,
        ..EngineConfig::default()
    }
}

fn request(insee: &str, parcels: &str) -> BatchRequest {
    BatchRequest {
        jurisdiction: JurisdictionQuery::Code(insee.to_string()),
        parcels: parse_parcel_list(parcels),
    }
}

#[tokio::test]
async fn test_end_to_end_single_zoning_hit() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), config());
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();

    assert_eq!(report.context.insee, "33234");
    assert_eq!(report.reports.len(), 1);

    let parcel = &report.reports[0];
    assert_eq!(parcel.parcel.label, "AC 0494");
    assert_eq!(parcel.parcel.srid, 4326);
    assert!(parcel.parcel.enclaves.is_none());
    assert_eq!(parcel.layers_with_hits(), 1);

    // Le PPRI n'intersecte pas, la couche "urba" est hors whitelist
    let results = parcel.results();
    assert_eq!(results.len(), 1);
    let zoning = &results[0];
    assert_eq!(zoning.table, "zonage");
    assert_eq!(zoning.count, 1);
    assert_eq!(zoning.values["typezone"], vec!["N"]);
    assert!(!zoning.values.contains_key("libelle"));

    let cov = &zoning.coverage["typezone"];
    assert_eq!(cov.len(), 1);
    assert_eq!(cov[0].value, "N");
    assert_eq!(cov[0].pct_display(), "100.0");
    assert_eq!(zoning.surfaces[0].id, "12");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["reports"][0]["layers_with_hits"], 1);
    assert_eq!(json["reports"][0]["results"][0]["coverage"]["typezone"][0]["value"], "N");
}

#[tokio::test]
async fn test_batch_isolation_missing_parcel() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), config());
    let report = runner
        .run(&request("33234", "AC 0494, AC 0495, AC 0496"))
        .await
        .unwrap();

    assert_eq!(report.reports.len(), 3);
    assert!(!report.reports[0].is_error());
    assert!(report.reports[1].is_error());
    assert!(!report.reports[2].is_error());
    assert_eq!(report.error_count(), 1);

    assert_eq!(report.reports[1].parcel.label, "AC 0495");
    assert_eq!(
        report.reports[1].error_message(),
        Some("Parcel not found (INSEE 33234, AC 0495)")
    );
    assert_eq!(report.reports[2].results()[0].values["typezone"], vec!["U"]);
}

#[tokio::test]
async fn test_locator_failure_is_parcel_level() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), Arc::new(UnreachableLocator), config());
    let report = runner.run(&request("33234", "AC 0494, AC 0496")).await.unwrap();
    assert_eq!(report.reports.len(), 2);
    assert_eq!(report.error_count(), 2);
    assert!(report.reports[0]
        .error_message()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_all_schemas_keep_catalog_order() {
    let cfg = EngineConfig {
        schema_whitelist: vec![],
        layer_jobs: 3,
        ..config()
    };
    let runner = BatchRunner::new(
        catalog(),
        Arc::new(store().with_latency(Duration::from_millis(5))),
        locator(),
        cfg,
    );
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();

    let tables: Vec<&str> = report.reports[0]
        .results()
        .iter()
        .map(|r| r.table.as_str())
        .collect();
    assert_eq!(tables, vec!["zonage", "servitudes"]);
    assert_eq!(report.reports[0].layers_with_hits(), 2);
}

#[tokio::test]
async fn test_easement_coverage_merged_across_layers() {
    let catalog = LayerCatalog::from_json_str(
        r#"{
            "servitudes.sup_assiette": {"coverage_by": "suptype", "category": "easement"},
            "servitudes.sup_generateur": {"coverage_by": "suptype", "category": "easement"},
            "public.zonage": {"coverage_by": "typezone", "category": "zoning"}
        }"#,
    )
    .unwrap();
    let store = store()
        .with_layer(
            "servitudes.sup_assiette",
            vec![MemoryFeature::new(&rect(-0.495, 44.775, -0.480, 44.785))
                .with_property("suptype", "AC1")],
        )
        .with_layer(
            "servitudes.sup_generateur",
            vec![MemoryFeature::new(&rect(-0.495, 44.775, -0.480, 44.785))
                .with_property("suptype", "AC1")],
        );
    let cfg = EngineConfig {
        schema_whitelist: vec!["servitudes".to_string(), "public".to_string()],
        ..config()
    };
    let runner = BatchRunner::new(Arc::new(catalog), Arc::new(store), locator(), cfg);
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();

    let parcel = &report.reports[0];
    assert_eq!(parcel.layers_with_hits(), 3);

    // Deux couches à 100 % sur AC1: ramenées à 100 % une fois fusionnées
    let easement = parcel.category_coverage(LayerCategory::Easement);
    assert_eq!(easement.len(), 1);
    assert_eq!(easement[0].value, "AC1");
    assert!((easement[0].pct_of_parcel - 100.0).abs() < 1e-6);

    let zoning = parcel.category_coverage(LayerCategory::Zoning);
    assert_eq!(zoning[0].value, "N");
    assert!(parcel.category_coverage(LayerCategory::FloodRisk).is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json["reports"][0]["coverage_by_category"]["easement"][0]["value"],
        "AC1"
    );
}

#[tokio::test]
async fn test_layer_timeout_dropped_not_fatal() {
    let mut cfg = config();
    cfg.timeouts.count = Duration::from_millis(10);
    let runner = BatchRunner::new(
        catalog(),
        Arc::new(store().with_latency(Duration::from_millis(100))),
        locator(),
        cfg,
    );
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();
    assert_eq!(report.reports.len(), 1);
    assert!(!report.reports[0].is_error());
    assert_eq!(report.reports[0].layers_with_hits(), 0);
}

#[tokio::test]
async fn test_parcel_timeout_becomes_error_entry() {
    let mut cfg = config();
    cfg.timeouts.parcel = Some(Duration::from_millis(20));
    let runner = BatchRunner::new(
        catalog(),
        Arc::new(store().with_latency(Duration::from_millis(200))),
        locator(),
        cfg,
    );
    let report = runner.run(&request("33234", "AC 0494, AC 0496")).await.unwrap();
    assert_eq!(report.reports.len(), 2);
    assert!(report.reports[0]
        .error_message()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn test_enclave_correction_stats() {
    let cfg = EngineConfig {
        carve_enclaves: true,
        ..config()
    };
    // Voisine enclavée au centre de AC 0494 (1/16 de la surface)
    let corrector = Arc::new(StaticCorrector {
        neighbours: vec![rect(-0.48975, 44.78075, -0.48925, 44.78125)],
    });
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), cfg)
        .with_corrector(corrector);
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();

    let parcel = &report.reports[0];
    let enclaves = parcel.parcel.enclaves.as_ref().unwrap();
    assert_eq!(enclaves.count, 1);
    assert!(enclaves.host_corrected_area_m2 < enclaves.host_area_m2);
    assert_eq!(parcel.parcel.holes_in_host.as_ref().unwrap().count, 0);

    // La zone "N" couvre toute la parcelle corrigée
    let zoning = &parcel.results()[0];
    assert!((zoning.coverage["typezone"][0].pct_of_parcel - 100.0).abs() < 1e-3);
    let area = zoning.parcel_area_m2.unwrap();
    assert!((area - enclaves.host_corrected_area_m2).abs() < 1e-4 * area);
}

#[tokio::test]
async fn test_correction_failure_falls_back_to_raw() {
    let cfg = EngineConfig {
        carve_enclaves: true,
        ..config()
    };
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), cfg)
        .with_corrector(Arc::new(FailingCorrector));
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();

    let parcel = &report.reports[0];
    assert!(!parcel.is_error());
    assert!(parcel.parcel.enclaves.is_none());
    assert_eq!(parcel.layers_with_hits(), 1);
}

#[tokio::test]
async fn test_correction_disabled_ignores_corrector() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), config())
        .with_corrector(Arc::new(FailingCorrector));
    let report = runner.run(&request("33234", "AC 0494")).await.unwrap();
    assert!(report.reports[0].parcel.enclaves.is_none());
}

#[tokio::test]
async fn test_jurisdiction_failures_are_fatal() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), config());

    let bad_code = runner.run(&request("3323", "AC 0494")).await;
    assert!(matches!(bad_code, Err(BatchError::Jurisdiction(_))));

    let commune = BatchRequest {
        jurisdiction: JurisdictionQuery::Commune {
            name: "Latresne".into(),
            departement: None,
        },
        parcels: parse_parcel_list("AC 0494"),
    };
    assert!(matches!(
        runner.run(&commune).await,
        Err(BatchError::NoResolver(_))
    ));

    let csv = "COM,DEP,LIBELLE\n24001,24,Saint-Aubin\n40001,40,Saint-Aubin\n33234,33,Latresne\n";
    let runner = runner.with_resolver(Arc::new(CommuneIndex::from_csv_str(csv).unwrap()));
    let ambiguous = BatchRequest {
        jurisdiction: JurisdictionQuery::Commune {
            name: "Saint-Aubin".into(),
            departement: None,
        },
        parcels: parse_parcel_list("AC 0494"),
    };
    assert!(matches!(
        runner.run(&ambiguous).await,
        Err(BatchError::Jurisdiction(_))
    ));

    let report = runner.run(&commune).await.unwrap();
    assert_eq!(report.context.insee, "33234");
    assert_eq!(report.context.commune.as_deref(), Some("Latresne"));
}

#[tokio::test]
async fn test_empty_parcel_list_is_fatal() {
    let runner = BatchRunner::new(catalog(), Arc::new(store()), locator(), config());
    let res = runner.run(&request("33234", "bogus, , AC")).await;
    assert!(matches!(res, Err(BatchError::EmptyParcelList)));
}
