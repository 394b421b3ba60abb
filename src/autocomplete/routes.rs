//! Autocomplete route handler

use crate::api::AppState;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AutocompleteQuery {
    #[serde(default)]
    pub query: String,
}

/// GET /api/autocomplete/?query=...
///
/// Unified suggestions over phenotypes, genes, and variants.
pub async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AutocompleteQuery>,
) -> Result<Json<Value>, AppError> {
    match state.autocomplete.aggregate(&params.query).await? {
        Some(results) => Ok(Json(results)),
        None => Err(AppError::NotFound(
            "Could not find any results".to_string(),
        )),
    }
}
