//! Variant route handlers

use crate::api::AppState;
use crate::error::AppError;
use crate::genome;
use crate::phewas::PhewasMatrixReader;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// GET /api/variant/:variant_code/:stratification
///
/// The PheWAS row for one variant: every phenotype of the given
/// stratification, with sentinel records for phenotypes absent from the
/// matrix.
pub async fn phewas(
    State(state): State<Arc<AppState>>,
    Path((variant_code, stratification)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let coord = genome::parse_variant_id(&variant_code)?;
    debug!("phewas lookup for {} ({})", coord.id(), stratification);

    let row = tokio::task::spawn_blocking(move || {
        let mut reader = PhewasMatrixReader::open(&state.config.matrix_dir(), &stratification)
            .map_err(|e| match e {
                AppError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                    AppError::NotFound(format!(
                        "no PheWAS matrix for stratification {:?}",
                        stratification
                    ))
                }
                other => other,
            })?;
        reader.find_matching_row(
            &coord,
            state.phenos.index(),
            state.phenos.all_phenos(),
            state.phenos.stratification_categories(),
        )
    })
    .await??;

    match row {
        Some(row) => Ok(Json(row)),
        None => Err(AppError::NotFound(format!(
            "Variant '{}' not found.",
            variant_code
        ))),
    }
}

/// GET /api/variant/stratification_list
pub async fn stratification_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let stratifications = state.phenos.stratifications().to_vec();
    if stratifications.is_empty() {
        return Err(AppError::NotFound(
            "Stratification list not found.".to_string(),
        ));
    }
    Ok(Json(stratifications))
}

/// GET /api/variant/category_list
pub async fn category_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let categories = state.phenos.categories().to_vec();
    if categories.is_empty() {
        return Err(AppError::NotFound("Category list not found.".to_string()));
    }
    Ok(Json(categories))
}

/// GET /api/variant/rsid/:variant_code
pub async fn rsid(
    State(state): State<Arc<AppState>>,
    Path(variant_code): Path<String>,
) -> Result<Json<Value>, AppError> {
    let rsid = state.autocomplete.rsid_for_variant(&variant_code).await?;
    Ok(Json(json!({ "rsid": rsid })))
}

/// GET /api/variant/nearest_genes/:variant_code
pub async fn nearest_genes(
    State(state): State<Arc<AppState>>,
    Path(variant_code): Path<String>,
) -> Result<Json<Value>, AppError> {
    let genes = state
        .autocomplete
        .nearest_genes_for_variant(&variant_code)
        .await?;
    Ok(Json(json!({ "nearest_genes": genes })))
}
