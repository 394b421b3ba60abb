//! Custom error handling for the PheWeb server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown chromosome {0:?}")]
    UnknownChromosome(String),

    #[error("Variants arrived out of order: {next} came after {prev}")]
    InputOrderViolation { prev: String, next: String },

    #[error("A row in {file} has {got} values but the header has {expected}")]
    MalformedRow {
        file: String,
        got: usize,
        expected: usize,
    },

    #[error("Failed to parse {value:?} for field {field:?} in {file} (row {row})")]
    FieldParse {
        field: String,
        value: String,
        file: String,
        row: u64,
    },

    #[error("Cannot parse header line {0:?}")]
    MalformedHeader(String),

    #[error(
        "Required fields {missing:?} could not be mapped from the header {header:?} (aliases: {aliases:?})"
    )]
    MissingRequiredField {
        missing: Vec<String>,
        header: Vec<String>,
        aliases: Vec<String>,
    },

    #[error("Failed to fetch region {chrom}:{start}-{end} from {file}")]
    RegionRead {
        chrom: String,
        start: u64,
        end: u64,
        file: String,
    },

    #[error("Failed to read index: {0}")]
    IndexRead(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Internal task error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::NotFound(message) => {
                let body = Json(json!({ "data": [], "message": message }));
                (StatusCode::NOT_FOUND, body).into_response()
            }
            AppError::BadRequest(message) => {
                let body = Json(json!({ "message": message }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            // Data and I/O errors carry internal context (paths, raw values);
            // log it and keep the response body opaque.
            _ => {
                tracing::error!("request failed: {}", self);
                let body = Json(json!({ "message": "Internal server error." }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
