//! Wiring shared by the commands that talk to the venue.

use anyhow::{Context, Result};
use autotrader_advisory::AdvisoryClient;
use autotrader_binance::{BinanceClient, BinanceClientConfig};
use autotrader_core::config_loader::DEFAULT_CONFIG_PATH;
use autotrader_core::{AppConfig, ConfigLoader, DatabaseConfig, IndicatorSource, VenueClient};
use autotrader_orchestrator::{indicators, CycleDatabase, CycleEngine};
use clap::Args;
use std::path::Path;
use std::sync::Arc;

/// Config file selection, shared by every command that needs configuration.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Profile overlay (`Config.{profile}.toml` next to the config file)
    #[arg(long, env = "APP_PROFILE")]
    pub profile: Option<String>,
}

impl ConfigArgs {
    /// # Errors
    /// Returns an error if the configuration cannot be read or parsed.
    pub fn load(&self) -> Result<AppConfig> {
        ConfigLoader::load_from(&self.config, self.profile.as_deref())
            .with_context(|| format!("failed to load config from {}", self.config))
    }
}

pub struct App {
    pub engine: Arc<CycleEngine>,
    pub database: CycleDatabase,
}

/// Opens the cycle database, creating the SQLite file's directory if needed.
///
/// # Errors
/// Returns an error if the directory cannot be created or the database cannot be opened.
pub async fn open_database(config: &DatabaseConfig) -> Result<CycleDatabase> {
    if let Some(parent) = sqlite_parent_dir(&config.url) {
        tracing::info!("Creating directory for SQLite database: {}", parent.display());
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create database directory {}", parent.display()))?;
    }

    tracing::info!("Opening cycle database at: {}", config.url);
    CycleDatabase::connect(&config.url, config.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.url))
}

fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let file = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let file = file.split('?').next().unwrap_or(file);
    if file.is_empty() || file.starts_with(":memory:") {
        return None;
    }
    Path::new(file)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

/// Builds the venue, advisory and indicator clients and the cycle engine.
///
/// # Errors
/// Returns an error if the database cannot be opened or a client cannot be built.
pub async fn build(config: &AppConfig) -> Result<App> {
    let database = open_database(&config.database).await?;

    let client = BinanceClient::new(BinanceClientConfig::from(&config.venue))
        .context("failed to create venue client")?;
    if !config.venue.has_credentials() {
        tracing::warn!("Venue credentials missing; account reads and orders will be rejected");
    }
    match client.sync_time().await {
        Ok(offset) => tracing::info!(offset_ms = offset, "Venue clock synchronised"),
        Err(e) => tracing::warn!("Venue clock sync failed, using local time: {e}"),
    }
    let venue: Arc<dyn VenueClient> = Arc::new(client);

    let advisory =
        AdvisoryClient::from_config(&config.advisory).context("failed to create advisory client")?;
    tracing::info!(providers = ?advisory.provider_names(), "Advisory providers configured");

    let indicators: Arc<dyn IndicatorSource> =
        Arc::from(indicators::from_config(&config.indicators)?);

    let engine = CycleEngine::new(venue, advisory, indicators, database.clone(), config.trading.clone())
        .with_sampling(config.advisory.temperature, config.advisory.max_tokens);

    Ok(App {
        engine: Arc::new(engine),
        database,
    })
}
