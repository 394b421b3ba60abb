//! Data models shared across the API
//!
//! Phenotype descriptors are deserialized from `phenotypes.json` as-is;
//! unknown keys ride along in `extra` so the list endpoints echo whatever
//! the loading pipeline recorded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One phenotype as described by `phenotypes.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenotypeDescriptor {
    pub phenocode: String,
    #[serde(default)]
    pub phenostring: String,
    #[serde(default)]
    pub category: String,
    /// Labelled sample subset, e.g. {"ancestry": "european", "sex": "male"}.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stratification: Option<BTreeMap<String, String>>,
    /// Non-empty for interaction results (e.g. the interacting exposure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cases: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_controls: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhenotypeDescriptor {
    /// Interaction records carry a non-empty interaction marker.
    pub fn is_interaction(&self) -> bool {
        self.interaction.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Dot-joined stratification values, e.g. "european.male".
    pub fn stratification_key(&self) -> Option<String> {
        self.stratification
            .as_ref()
            .map(|strat| strat.values().cloned().collect::<Vec<_>>().join("."))
    }
}

/// The deduplicated {phenocode, category, phenostring} universe used to
/// pad PheWAS responses with unseen phenotypes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhenoSummary {
    pub phenocode: String,
    pub category: String,
    pub phenostring: String,
}

/// Density summary of weak variants within one 3 Mb window.
#[derive(Debug, Clone, Serialize)]
pub struct Bin {
    pub chrom: String,
    /// Window midpoint.
    pub pos: u64,
    pub qvals: Vec<f64>,
    pub qval_extents: Vec<(f64, f64)>,
}

/// Plot-ready Manhattan payload: dense bins plus a bounded set of
/// individually drawn variants.
#[derive(Debug, Clone, Serialize)]
pub struct ManhattanResult {
    pub variant_bins: Vec<Bin>,
    pub unbinned_variants: Vec<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weakest_pval: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_interaction_split() {
        let regular: PhenotypeDescriptor = serde_json::from_value(serde_json::json!({
            "phenocode": "E4_DM2",
            "phenostring": "Type 2 diabetes",
            "category": "Endocrine",
        }))
        .unwrap();
        assert!(!regular.is_interaction());

        let empty_marker: PhenotypeDescriptor = serde_json::from_value(serde_json::json!({
            "phenocode": "E4_DM2",
            "interaction": "",
        }))
        .unwrap();
        assert!(!empty_marker.is_interaction());

        let interaction: PhenotypeDescriptor = serde_json::from_value(serde_json::json!({
            "phenocode": "E4_DM2",
            "interaction": "BMI",
        }))
        .unwrap();
        assert!(interaction.is_interaction());
    }

    #[test]
    fn test_stratification_key_joins_values() {
        let pheno: PhenotypeDescriptor = serde_json::from_value(serde_json::json!({
            "phenocode": "E4_DM2",
            "stratification": {"ancestry": "european", "sex": "male"},
        }))
        .unwrap();
        assert_eq!(pheno.stratification_key().unwrap(), "european.male");
    }

    #[test]
    fn test_descriptor_keeps_unknown_keys() {
        let pheno: PhenotypeDescriptor = serde_json::from_value(serde_json::json!({
            "phenocode": "E4_DM2",
            "gc_lambda": {"0.5": 1.02},
        }))
        .unwrap();
        assert!(pheno.extra.contains_key("gc_lambda"));
    }
}
