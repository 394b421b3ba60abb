//! Variant query route handlers
//!
//! Provides endpoints for per-variant PheWAS rows and the small variant
//! metadata lookups (rsid, nearest genes, stratifications).

pub mod routes;
