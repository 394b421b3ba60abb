//! Phenotype route handlers
//!
//! List/lookup endpoints serve the startup-loaded stores; plot payloads
//! pass through from disk; region, filter, and download endpoints open
//! per-request readers over the indexed sumstats files.

use crate::api::AppState;
use crate::config::pheno_file_id;
use crate::download::{extract_variants, sumstats_response, FilterOptions};
use crate::error::AppError;
use crate::genome;
use crate::gwas_missing::SnpFetcher;
use crate::models::{ManhattanResult, PhenotypeDescriptor};
use crate::region::IndexedVariantReader;
use crate::response::MessageEnvelope;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// GET /api/phenotypes/phenotypes_list
pub async fn list_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PhenotypeDescriptor>>, AppError> {
    descriptor_list(state.phenos.list(None), "phenotypes")
}

/// GET /api/phenotypes/:phenocode/phenotypes_list
pub async fn list_one(
    State(state): State<Arc<AppState>>,
    Path(phenocode): Path<String>,
) -> Result<Json<Vec<PhenotypeDescriptor>>, AppError> {
    descriptor_list(state.phenos.list(Some(&phenocode)), "phenotypes")
}

/// GET /api/phenotypes/interaction_list
pub async fn interaction_list_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PhenotypeDescriptor>>, AppError> {
    descriptor_list(state.phenos.interaction_list(None), "interaction results")
}

/// GET /api/phenotypes/:phenocode/interaction_list
pub async fn interaction_list_one(
    State(state): State<Arc<AppState>>,
    Path(phenocode): Path<String>,
) -> Result<Json<Vec<PhenotypeDescriptor>>, AppError> {
    descriptor_list(
        state.phenos.interaction_list(Some(&phenocode)),
        "interaction results",
    )
}

fn descriptor_list(
    descriptors: Vec<&PhenotypeDescriptor>,
    what: &str,
) -> Result<Json<Vec<PhenotypeDescriptor>>, AppError> {
    if descriptors.is_empty() {
        return Err(AppError::NotFound(format!(
            "Unsuccessfully retrieved list of {}.",
            what
        )));
    }
    Ok(Json(descriptors.into_iter().cloned().collect()))
}

/// GET /api/phenotypes/tophits
pub async fn tophits(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.tophits.tophits().clone())
}

/// GET /api/phenotypes/:phenocode/:stratification/manhattan
///
/// Pass-through of the pre-computed Manhattan payload.
pub async fn manhattan(
    State(state): State<Arc<AppState>>,
    Path((phenocode, stratification)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let file_id = pheno_file_id(&phenocode, Some(&stratification));
    debug!("serving manhattan payload for {}", file_id);
    state
        .cached_json_file(state.config.manhattan_dir().join(format!("{}.json", file_id)))
        .await
}

/// GET /api/phenotypes/:phenocode/:stratification/qq
pub async fn qq(
    State(state): State<Arc<AppState>>,
    Path((phenocode, stratification)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let file_id = pheno_file_id(&phenocode, Some(&stratification));
    debug!("serving qq payload for {}", file_id);
    state
        .cached_json_file(state.config.qq_dir().join(format!("{}.json", file_id)))
        .await
}

/// GET /api/phenotypes/:phenocode/region/:region_code
pub async fn region_unstratified(
    State(state): State<Arc<AppState>>,
    Path((phenocode, region_code)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    region_payload(state, phenocode, None, region_code).await
}

/// GET /api/phenotypes/:phenocode/:stratification/region/:region_code
pub async fn region(
    State(state): State<Arc<AppState>>,
    Path((phenocode, stratification, region_code)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    region_payload(state, phenocode, Some(stratification), region_code).await
}

/// LocusZoom slice: variants of [start, end] reshaped column-major with
/// the plotting field names and the region's max -log10(p).
async fn region_payload(
    state: Arc<AppState>,
    phenocode: String,
    stratification: Option<String>,
    region_code: String,
) -> Result<Json<Value>, AppError> {
    let (chrom, start, end) = genome::parse_region(&region_code)?;
    debug!("region {}:{}-{} for {}", chrom, start, end, phenocode);

    let records = tokio::task::spawn_blocking(move || {
        let path = state
            .config
            .sumstats_path(&phenocode, stratification.as_deref());
        let mut reader = IndexedVariantReader::open(
            &path,
            &state.config.alias_map(),
            state.config.field_parser(),
        )
        .map_err(|e| match e {
            AppError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("no sumstats for phenocode {:?}", phenocode))
            }
            other => other,
        })?;
        reader.get_region(&chrom, start, end + 1)
    })
    .await??;

    if records.is_empty() {
        return Err(AppError::NotFound(
            "Could not find region data for this phenotype.".to_string(),
        ));
    }

    let mut min_pval = f64::INFINITY;
    let mut rows: Vec<Map<String, Value>> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(pval) = record.pval() {
            min_pval = min_pval.min(pval);
        }
        let mut row = record.fields.clone();
        row.insert(
            "id".to_string(),
            json!(format!(
                "{}:{}_{}/{}",
                record.chrom, record.pos, record.ref_allele, record.alt
            )),
        );
        row.insert("end".to_string(), json!(record.pos));
        for (old, new) in [
            ("chrom", "chr"),
            ("pos", "position"),
            ("rsids", "rsid"),
            ("pval", "pvalue"),
        ] {
            if let Some(value) = row.remove(old) {
                row.insert(new.to_string(), value);
            }
        }
        rows.push(row);
    }

    let mut data = dataframify(rows);
    data.insert("max_log10p".to_string(), json!(-min_pval.log10()));

    Ok(Json(json!({ "data": data, "lastpage": null })))
}

/// [{a: 1, b: 2}, {a: 11, b: 12}] -> {a: [1, 11], b: [2, 12]}
fn dataframify(rows: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mut columns: Map<String, Value> = Map::new();
    for row in &rows {
        for key in row.keys() {
            columns
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
        }
    }
    for row in rows {
        for (key, column) in columns.iter_mut() {
            if let Value::Array(values) = column {
                values.push(row.get(key).cloned().unwrap_or(Value::Null));
            }
        }
    }
    columns
}

/// GET /api/phenotypes/:phenocode/:stratification/filter
///
/// Manhattan payload recomputed from the best-of file under the given
/// MAF/indel filter.
pub async fn filter(
    State(state): State<Arc<AppState>>,
    Path((phenocode, stratification)): Path<(String, String)>,
    Query(options): Query<FilterOptions>,
) -> Result<Json<ManhattanResult>, AppError> {
    debug!(
        "filtering {} ({}) with {:?}",
        phenocode, stratification, options
    );
    let result = tokio::task::spawn_blocking(move || {
        let file_id = pheno_file_id(&phenocode, Some(&stratification));
        let path = state.config.best_of_pheno_dir().join(file_id);
        extract_variants(
            &path,
            options,
            state.config.binner_config(),
            &state.config.alias_map(),
            state.config.field_parser(),
        )
    })
    .await??;
    Ok(Json(result))
}

/// GET /api/phenotypes/:phenocode/:stratification/download
///
/// Chunked sumstats download with the maf column appended.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((phenocode, stratification)): Path<(String, String)>,
    Query(options): Query<FilterOptions>,
) -> Result<Response, AppError> {
    let path = state.config.sumstats_path(&phenocode, Some(&stratification));
    let filename_base = pheno_file_id(&phenocode, Some(&stratification));
    debug!("streaming {} with {:?}", filename_base, options);
    sumstats_response(&path, options, &filename_base).await
}

/// POST /api/phenotypes/variants
///
/// Fetch per-stratification records for variants the UI found missing.
pub async fn gwas_missing(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<BTreeMap<String, Vec<String>>>>,
) -> Result<Json<MessageEnvelope<Map<String, Value>>>, AppError> {
    let Some(Json(payload)) = payload else {
        return Err(AppError::BadRequest("No data provided".to_string()));
    };
    if payload.is_empty() {
        return Err(AppError::BadRequest("No data provided".to_string()));
    }

    let results = tokio::task::spawn_blocking(move || {
        let fetcher = SnpFetcher::new(
            state.config.pheno_gz_dir(),
            state.config.alias_map(),
            state.config.field_parser(),
        );
        fetcher.process_keys(&payload)
    })
    .await?;
    Ok(Json(MessageEnvelope::success(results)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dataframify_unions_keys() {
        let rows = vec![
            serde_json::from_value(json!({"a": 1, "b": 2})).unwrap(),
            serde_json::from_value(json!({"a": 11})).unwrap(),
        ];
        let columns = dataframify(rows);
        assert_eq!(columns["a"], json!([1, 11]));
        assert_eq!(columns["b"], json!([2, null]));
    }
}
