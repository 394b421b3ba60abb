//! PheWeb Server - read-side API for a PheWAS browser
//!
//! Loads the phenotype, gene, and autocomplete stores at startup and
//! serves plot, lookup, and download endpoints over the pre-computed
//! on-disk data.

mod api;
mod autocomplete;
mod config;
mod download;
mod error;
mod fields;
mod genes;
mod genome;
mod gwas_missing;
mod manhattan;
mod models;
mod phenotype;
mod phewas;
mod pq;
mod region;
mod response;
mod stores;
mod tsv;
mod variants;

use crate::api::AppState;
use crate::autocomplete::Autocomplete;
use crate::config::Config;
use crate::stores::{GeneStore, PhenoStore, TophitsStore};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "pheweb-server", about = "Read-side API for a PheWAS browser")]
struct Cli {
    /// Path to a TOML configuration file (or set PHEWEB_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the API server (the default).
    Serve,
    /// Build the autocomplete database and exit.
    BuildAutocomplete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PHEWEB_CONFIG").ok().map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;

    let default_level = if config.enable_debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("pheweb_server={}", default_level).parse()?),
        )
        .init();

    let data_dir = config.data_dir();
    if !data_dir.is_dir() {
        anyhow::bail!("data directory {} is not readable", data_dir.display());
    }

    info!("Starting PheWeb server...");
    info!(
        "hg{} / dbSNP {} / min MAF {} / min imputation quality {} / stratifications {}",
        config.hg_build_number,
        config.dbsnp_version.as_deref().unwrap_or("unset"),
        config.assoc_min_maf,
        config.min_imp_quality,
        if config.enable_stratifications { "on" } else { "off" },
    );
    info!("Loading phenotypes from {}", data_dir.display());
    let phenos = PhenoStore::load(&data_dir)?;
    let tophits = TophitsStore::load(&data_dir)?;
    let genes = GeneStore::load(&config.gene_bed_path(), &config.best_phenos_db_path()).await?;

    // startup-blocking: the replica must be complete before serving
    info!("Preparing autocomplete database...");
    let autocomplete = Autocomplete::open_or_build(&data_dir, &genes, &phenos).await?;

    if matches!(cli.command, Some(Command::BuildAutocomplete)) {
        info!("Autocomplete database ready.");
        return Ok(());
    }

    let state = Arc::new(AppState::new(config, phenos, tophits, genes, autocomplete));
    let app = api::build_router(Arc::clone(&state))?;

    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid host/port: {}", e))?;
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
