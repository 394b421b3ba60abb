//! Gene route handlers
//!
//! Provides endpoints for the gene-name listing, the per-gene best
//! phenotypes table, and gene coordinate lookups.

use crate::api::AppState;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// GET /api/gene/
///
/// All gene names known to the best-phenos table.
pub async fn gene_names(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    debug!("listing gene names");
    let names = state.genes.gene_names().await?;
    Ok(Json(names))
}

/// GET /api/gene/:gene
///
/// The strongest phenotype associations for one gene.
pub async fn gene_table(
    State(state): State<Arc<AppState>>,
    Path(gene): Path<String>,
) -> Result<Json<Value>, AppError> {
    debug!("best-phenos table for {}", gene);
    match state.genes.best_phenos_table(&gene).await? {
        Some(data) => Ok(Json(json!({ "gene": gene, "data": data }))),
        None => Err(AppError::NotFound(
            "No data found for this gene".to_string(),
        )),
    }
}

/// GET /api/gene/:gene/gene_position
///
/// (chrom, start, end) of a gene, for jumping the region view.
pub async fn gene_position(
    State(state): State<Arc<AppState>>,
    Path(gene): Path<String>,
) -> Result<Json<(String, u64, u64)>, AppError> {
    match state.genes.gene_position(&gene) {
        Some(position) => Ok(Json(position.clone())),
        None => Err(AppError::NotFound(
            "Could not find this gene within our data".to_string(),
        )),
    }
}
