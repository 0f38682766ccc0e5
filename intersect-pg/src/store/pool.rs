//! Pool de connexions PostgreSQL

use anyhow::{Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// Pas de SSL (défaut)
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    /// SSL requis
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {}. Use: disable, prefer, require", s)),
        }
    }
}

/// Configuration de la base de données
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// URL complète (`postgres://...`), prioritaire sur les champs séparés
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            dbname: "postgres".into(),
            user: "postgres".into(),
            password: None,
            pool_size: 8,
            ssl_mode: SslMode::Disable,
        }
    }
}

impl DatabaseConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Variables PG* standard, plus `DATABASE_URL` et `POOL_SIZE`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            url: var("DATABASE_URL"),
            host: var("PGHOST").unwrap_or(defaults.host),
            port: var("PGPORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            dbname: var("PGDATABASE").unwrap_or(defaults.dbname),
            user: var("PGUSER").unwrap_or(defaults.user),
            password: lookup("PGPASSWORD"),
            pool_size: var("POOL_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool_size),
            ssl_mode: var("PGSSLMODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Description sans mot de passe, pour les logs
    pub fn describe(&self) -> String {
        match &self.url {
            Some(_) => format!("DATABASE_URL (SSL: {:?})", self.ssl_mode),
            None => format!(
                "{}@{}:{}/{} (SSL: {:?})",
                self.user, self.host, self.port, self.dbname, self.ssl_mode
            ),
        }
    }
}

/// Crée la configuration TLS pour rustls
fn make_tls_connector() -> MakeRustlsConnect {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    MakeRustlsConnect::new(config)
}

/// Crée un pool de connexions.
///
/// En mode `prefer`, une première connexion TLS est tentée; si elle échoue, le
/// pool est recréé sans TLS.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let cfg = pool_config(config);
    match config.ssl_mode {
        SslMode::Disable => cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create database pool"),
        SslMode::Require => cfg
            .create_pool(Some(Runtime::Tokio1), make_tls_connector())
            .context("Failed to create database pool with TLS"),
        SslMode::Prefer => {
            let pool = cfg
                .create_pool(Some(Runtime::Tokio1), make_tls_connector())
                .context("Failed to create database pool with TLS")?;
            match pool.get().await {
                Ok(_) => Ok(pool),
                Err(e) => {
                    warn!(error = %e, "TLS connection failed, falling back to plain connection");
                    pool_config(config)
                        .create_pool(Some(Runtime::Tokio1), NoTls)
                        .context("Failed to create database pool")
                }
            }
        }
    }
}

fn pool_config(config: &DatabaseConfig) -> Config {
    let mut cfg = Config::new();
    match &config.url {
        Some(url) => cfg.url = Some(url.clone()),
        None => {
            cfg.host = Some(config.host.clone());
            cfg.port = Some(config.port);
            cfg.dbname = Some(config.dbname.clone());
            cfg.user = Some(config.user.clone());
            cfg.password = config.password.clone();
        }
    }
    cfg.pool = Some(PoolConfig {
        max_size: config.pool_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });
    cfg
}

/// Teste la connexion et la présence de PostGIS
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;
    client
        .query_one("SELECT postgis_version()", &[])
        .await
        .context("Connection test failed (is PostGIS installed?)")?;
    Ok(())
}
