//! Point d'entrée CLI pour intersect-pg

use anyhow::Result;
use clap::Parser;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::{Commands, RunArgs};

/// Intersecter des parcelles cadastrales avec les couches thématiques PostGIS
#[derive(Parser)]
#[command(name = "intersect-pg")]
#[command(author, version)]
#[command(about = "Intersecter des parcelles cadastrales avec les couches thématiques PostGIS")]
#[command(long_about = "Calcule, pour chaque parcelle, les couches intersectées, les surfaces exactes et la répartition par valeur d'attribut.\n\nPar défaut, traite un lot de parcelles. Utilisez 'layers' pour lister les couches interrogées.")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Sous-commande (défaut: intersection d'un lot)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments de l'intersection (commande par défaut)
    #[command(flatten)]
    run: Option<RunArgs>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    // Configurer le logging
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Layers {
            mapping,
            schema_whitelist,
        }) => {
            debug!(mapping = %mapping, "Listing layers");
            cli::cmd_layers(&mapping, schema_whitelist.as_deref())?;
        }
        None => {
            // Commande par défaut: intersections
            let Some(args) = cli.run else {
                anyhow::bail!("Missing arguments: --parcels and --insee or --commune are required");
            };
            cli::cmd_run(args).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
