//! Application state and router assembly

use crate::autocomplete::Autocomplete;
use crate::config::Config;
use crate::error::AppError;
use crate::stores::{GeneStore, PhenoStore, TophitsStore};
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use moka::future::Cache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers. Everything here is
/// built before serving starts and read-only afterwards.
pub struct AppState {
    pub config: Config,
    pub phenos: PhenoStore,
    pub tophits: TophitsStore,
    pub genes: GeneStore,
    pub autocomplete: Autocomplete,
    /// Pass-through plot payloads (manhattan/qq JSON), cached briefly.
    pub plot_cache: Cache<PathBuf, Bytes>,
}

impl AppState {
    pub fn new(
        config: Config,
        phenos: PhenoStore,
        tophits: TophitsStore,
        genes: GeneStore,
        autocomplete: Autocomplete,
    ) -> Self {
        Self {
            config,
            phenos,
            tophits,
            genes,
            autocomplete,
            plot_cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    /// Serve a pass-through JSON file, memoized through the plot cache.
    pub async fn cached_json_file(&self, path: PathBuf) -> Result<Response, AppError> {
        let bytes = self
            .plot_cache
            .try_get_with(path.clone(), async {
                match tokio::fs::read(&path).await {
                    Ok(raw) => Ok(Bytes::from(raw)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                        AppError::NotFound(format!("no data at {}", path.display())),
                    ),
                    Err(e) => Err(AppError::Io(e)),
                }
            })
            .await
            .map_err(|e: Arc<AppError>| match e.as_ref() {
                AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
                other => AppError::IndexRead(other.to_string()),
            })?;
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .map_err(|e| AppError::Config(format!("failed to build response: {}", e)))
    }
}

/// Assemble the full route table under `/api`.
pub fn build_router(state: Arc<AppState>) -> Result<Router, AppError> {
    let phenotypes = Router::new()
        .route("/", get(crate::phenotype::routes::list_all))
        .route("/phenotypes_list", get(crate::phenotype::routes::list_all))
        .route(
            "/:phenocode/phenotypes_list",
            get(crate::phenotype::routes::list_one),
        )
        .route("/tophits", get(crate::phenotype::routes::tophits))
        .route(
            "/interaction",
            get(crate::phenotype::routes::interaction_list_all),
        )
        .route(
            "/interaction_list",
            get(crate::phenotype::routes::interaction_list_all),
        )
        .route(
            "/:phenocode/interaction_list",
            get(crate::phenotype::routes::interaction_list_one),
        )
        .route(
            "/:phenocode/:stratification/manhattan",
            get(crate::phenotype::routes::manhattan),
        )
        .route(
            "/:phenocode/:stratification/qq",
            get(crate::phenotype::routes::qq),
        )
        .route(
            "/:phenocode/region/:region_code",
            get(crate::phenotype::routes::region_unstratified),
        )
        .route(
            "/:phenocode/:stratification/region/:region_code",
            get(crate::phenotype::routes::region),
        )
        .route(
            "/:phenocode/:stratification/filter",
            get(crate::phenotype::routes::filter),
        )
        .route(
            "/:phenocode/:stratification/download",
            get(crate::phenotype::routes::download),
        )
        .route("/variants", post(crate::phenotype::routes::gwas_missing));

    let variants = Router::new()
        .route(
            "/stratification_list",
            get(crate::variants::routes::stratification_list),
        )
        .route("/category_list", get(crate::variants::routes::category_list))
        .route("/rsid/:variant_code", get(crate::variants::routes::rsid))
        .route(
            "/nearest_genes/:variant_code",
            get(crate::variants::routes::nearest_genes),
        )
        .route(
            "/:variant_code/:stratification",
            get(crate::variants::routes::phewas),
        );

    let genes = Router::new()
        .route("/", get(crate::genes::routes::gene_names))
        .route("/:gene", get(crate::genes::routes::gene_table))
        .route(
            "/:gene/gene_position",
            get(crate::genes::routes::gene_position),
        );

    let autocomplete = Router::new().route("/", get(crate::autocomplete::routes::autocomplete));

    let cors = cors_layer(&state.config)?;
    Ok(Router::new()
        .nest(
            "/api",
            Router::new()
                .nest("/phenotypes", phenotypes)
                .nest("/variant", variants)
                .nest("/gene", genes)
                .nest("/autocomplete", autocomplete),
        )
        .layer(cors)
        .layer(CompressionLayer::new())
        .with_state(state))
}

fn cors_layer(config: &Config) -> Result<CorsLayer, AppError> {
    if config.cors_origins.is_empty() {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }
    let origins = config
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| AppError::Config(format!("invalid CORS origin {:?}", origin)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}
