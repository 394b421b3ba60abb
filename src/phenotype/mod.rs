//! Phenotype-specific route handlers
//!
//! Provides endpoints for phenotype lists, plot payloads, region slices,
//! filtered Manhattan recomputation, and sumstats downloads.

pub mod routes;
