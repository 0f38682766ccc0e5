//! Définition et implémentation des commandes CLI
//!
//! - commande par défaut: intersection d'un lot de parcelles
//! - `layers`: liste des couches retenues après filtrage par schéma

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use intersect_pg::config::{budget_from_secs, parse_schema_list};
use intersect_pg::correct::{CadastreTable, GeometryCorrector, PostgisCarver};
use intersect_pg::locate::{GeoJsonParcels, ParcelLocator, WfsLocator};
use intersect_pg::store::{test_connection, SslMode};
use intersect_pg::{
    create_pool, BatchRequest, BatchRunner, DatabaseConfig, EngineConfig, JurisdictionQuery,
    MemoryStore, PostgisStore, SpatialStore,
};
use parcelle::geometry::LAMBERT93_SRID;
use parcelle::{parse_parcel_list, CommuneIndex, LayerCatalog};

#[derive(Subcommand)]
pub enum Commands {
    /// List the layers that a run would query
    Layers {
        /// Layer mapping preset name (gpu) or path to a JSON mapping
        #[arg(long, default_value = "gpu")]
        mapping: String,

        /// Comma-separated schema allow-list ("*" for all; défaut : env SCHEMA_WHITELIST / public)
        #[arg(long)]
        schema_whitelist: Option<String>,
    },
}

/// Arguments de l'intersection (commande par défaut)
#[derive(Args)]
pub struct RunArgs {
    /// INSEE code of the commune (ex: 33234, 2A004)
    #[arg(long, conflicts_with = "commune")]
    pub insee: Option<String>,

    /// Commune name, resolved through --csv
    #[arg(long)]
    pub commune: Option<String>,

    /// Departement code to disambiguate the commune name (ex: 33, 2A)
    #[arg(long)]
    pub departement: Option<String>,

    /// INSEE communes CSV (COG format)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Parcel references, comma-separated (ex: "AC 0494, AD 598")
    #[arg(long)]
    pub parcels: String,

    /// Layer mapping preset name (gpu) or path to a JSON mapping
    #[arg(long, default_value = "gpu")]
    pub mapping: String,

    /// Comma-separated schema allow-list ("*" for all; défaut : env SCHEMA_WHITELIST / public)
    #[arg(long)]
    pub schema_whitelist: Option<String>,

    /// Maximum distinct values sampled per kept attribute
    #[arg(long)]
    pub values_limit: Option<usize>,

    /// Carve enclaves before intersecting (défaut : env CARVE_ENCLAVES / true)
    #[arg(long, conflicts_with = "no_carve_enclaves")]
    pub carve_enclaves: bool,

    /// Intersect the raw parcel geometry
    #[arg(long)]
    pub no_carve_enclaves: bool,

    /// Neighbour search distance for enclaves, in meters
    #[arg(long)]
    pub enclave_buffer_m: Option<f64>,

    /// Maximum number of layers queried concurrently for one parcel
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Overall time budget per parcel, in seconds
    #[arg(long)]
    pub parcel_timeout: Option<f64>,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Read parcel geometries from a GeoJSON file instead of the IGN WFS
    #[arg(long)]
    pub parcels_geojson: Option<PathBuf>,

    /// Read layers from a directory of schema.table.geojson files instead of PostGIS
    #[arg(long)]
    pub layers_dir: Option<PathBuf>,

    /// Cadastral parcel table used to find enclaves
    #[arg(long, default_value = "cadastre.parcelles")]
    pub cadastre_table: String,

    /// Geometry column of the cadastral parcel table
    #[arg(long, default_value = "geometry")]
    pub cadastre_geom: String,

    #[command(flatten)]
    pub db: DatabaseArgs,
}

/// Surcharges de la connexion PostgreSQL
#[derive(Args, Default)]
pub struct DatabaseArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / postgres)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Exécute l'intersection d'un lot
pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut engine = EngineConfig::from_env();
    apply_engine_overrides(&mut engine, &args);

    let catalog = Arc::new(load_catalog(&args.mapping)?);
    let parcels = parse_parcel_list(&args.parcels);

    let jurisdiction = match (&args.insee, &args.commune) {
        (Some(code), _) => JurisdictionQuery::Code(code.clone()),
        (None, Some(name)) => JurisdictionQuery::Commune {
            name: name.clone(),
            departement: args.departement.clone(),
        },
        (None, None) => anyhow::bail!("Either --insee or --commune is required"),
    };

    println!("=== Intersections ===");
    println!("Parcels: {}", parcels.len());
    println!("Mapping: {} ({} layers)", args.mapping, catalog.len());
    println!(
        "Schemas: {}",
        if engine.schema_whitelist.is_empty() {
            "*".to_string()
        } else {
            engine.schema_whitelist.join(", ")
        }
    );
    println!("Enclaves: {}", if engine.carve_enclaves { "ON" } else { "OFF" });
    println!("Jobs: {}", engine.layer_jobs);

    // Couches: répertoire GeoJSON ou PostGIS
    let pool = match &args.layers_dir {
        Some(_) => None,
        None => {
            let mut db_config = DatabaseConfig::from_env();
            apply_database_overrides(&mut db_config, &args.db);
            println!("Database: {}", db_config.describe());
            let pool = create_pool(&db_config).await?;
            test_connection(&pool).await?;
            println!("Connected to PostgreSQL");
            Some(pool)
        }
    };

    let store: Arc<dyn SpatialStore> = match (&args.layers_dir, &pool) {
        (Some(dir), _) => {
            if engine.planar_srid != LAMBERT93_SRID {
                warn!(
                    planar_srid = engine.planar_srid,
                    "GeoJSON layers are measured in Lambert-93, PLANAR_SRID ignored"
                );
            }
            let store = MemoryStore::load_dir(dir)?;
            println!("Layers: {} loaded from {}", store.layer_count(), dir.display());
            Arc::new(store)
        }
        (None, Some(pool)) => Arc::new(PostgisStore::new(pool.clone(), engine.planar_srid)),
        (None, None) => anyhow::bail!("No layer source configured"),
    };

    // Parcelles: fichier GeoJSON (qui sert aussi de voisinage) ou WFS + table cadastrale
    let (locator, corrector): (Arc<dyn ParcelLocator>, Option<Arc<dyn GeometryCorrector>>) =
        match (&args.parcels_geojson, &pool) {
            (Some(path), _) => {
                let file = Arc::new(GeoJsonParcels::load(path)?);
                println!("Parcel file: {} ({} parcels)", path.display(), file.len());
                let locator: Arc<dyn ParcelLocator> = file.clone();
                let corrector: Arc<dyn GeometryCorrector> = file;
                (locator, Some(corrector))
            }
            (None, Some(pool)) => {
                let cadastre = CadastreTable::parse(&args.cadastre_table, &args.cadastre_geom)?;
                let corrector: Arc<dyn GeometryCorrector> =
                    Arc::new(PostgisCarver::new(pool.clone(), cadastre));
                let locator: Arc<dyn ParcelLocator> =
                    Arc::new(WfsLocator::new(engine.timeouts.locate)?);
                (locator, Some(corrector))
            }
            (None, None) => {
                if engine.carve_enclaves {
                    warn!("No cadastral source for enclave detection, using raw geometries");
                }
                let locator: Arc<dyn ParcelLocator> =
                    Arc::new(WfsLocator::new(engine.timeouts.locate)?);
                (locator, None)
            }
        };

    let mut runner = BatchRunner::new(catalog, store, locator, engine);
    if let Some(corrector) = corrector {
        runner = runner.with_corrector(corrector);
    }
    if let Some(csv) = &args.csv {
        let index = CommuneIndex::load(csv)
            .with_context(|| format!("Failed to load communes CSV {}", csv.display()))?;
        info!(communes = index.len(), "Communes CSV loaded");
        runner = runner.with_resolver(Arc::new(index));
    }

    let request = BatchRequest {
        jurisdiction,
        parcels,
    };
    let report = runner.run(&request).await?;

    report.display();
    if let Some(out) = &args.out {
        report
            .save_to_file(out)
            .with_context(|| format!("Failed to write report to {}", out.display()))?;
        println!("Report written to {}", out.display());
    }
    println!("{}", report.summary());

    Ok(())
}

/// Liste les couches retenues
pub fn cmd_layers(mapping: &str, schema_whitelist: Option<&str>) -> Result<()> {
    let engine = EngineConfig::from_env();
    let schemas = schema_whitelist
        .map(parse_schema_list)
        .unwrap_or(engine.schema_whitelist);

    let catalog = load_catalog(mapping)?;
    let layers = catalog.restrict_to_schemas(&schemas);

    println!(
        "=== Layers ({}/{} after schema filter) ===",
        layers.len(),
        catalog.len()
    );
    for (idx, layer) in layers.layers().iter().enumerate() {
        println!(
            "{:>3}. {} [{:?}] geom={}{}",
            idx + 1,
            layer.id(),
            layer.category,
            layer.geometry_attribute,
            layer
                .geometry_srid
                .map(|s| format!(" srid={}", s))
                .unwrap_or_default()
        );
        if !layer.keep.is_empty() {
            println!("     keep: {}", layer.keep.join(", "));
        }
        if !layer.coverage_by.is_empty() {
            println!("     coverage_by: {}", layer.coverage_by.join(", "));
        }
    }
    Ok(())
}

fn load_catalog(mapping: &str) -> Result<LayerCatalog> {
    let catalog = match mapping {
        "gpu" => LayerCatalog::from_preset(mapping)?,
        _ => LayerCatalog::load(Path::new(mapping))
            .with_context(|| format!("Failed to load layer mapping {}", mapping))?,
    };
    Ok(catalog)
}

fn apply_engine_overrides(config: &mut EngineConfig, args: &RunArgs) {
    if let Some(s) = &args.schema_whitelist {
        config.schema_whitelist = parse_schema_list(s);
    }
    if let Some(limit) = args.values_limit {
        config.values_limit = limit;
    }
    if args.carve_enclaves {
        config.carve_enclaves = true;
    }
    if args.no_carve_enclaves {
        config.carve_enclaves = false;
    }
    if let Some(buffer) = args.enclave_buffer_m {
        config.enclave_buffer_m = buffer;
    }
    if let Some(jobs) = args.jobs.filter(|j| *j > 0) {
        config.layer_jobs = jobs;
    }
    if let Some(budget) = args.parcel_timeout.and_then(budget_from_secs) {
        config.timeouts.parcel = Some(budget);
    }
}

fn apply_database_overrides(config: &mut DatabaseConfig, db: &DatabaseArgs) {
    if let Some(host) = &db.host {
        config.host = host.clone();
    }
    if let Some(database) = &db.database {
        config.dbname = database.clone();
    }
    if let Some(user) = &db.user {
        config.user = user.clone();
    }
    if let Some(password) = &db.password {
        config.password = Some(password.clone());
    }
    if let Some(port) = db.port {
        config.port = port;
    }
    if let Some(ssl) = &db.ssl {
        match ssl.parse::<SslMode>() {
            Ok(mode) => config.ssl_mode = mode,
            Err(e) => warn!("{}", e),
        }
    }
}
