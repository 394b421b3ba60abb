//! Gene-centric route handlers
//!
//! Provides endpoints for cross-phenotype gene queries including
//! PheWAS, top associations, and gene symbol search.

pub mod routes;
