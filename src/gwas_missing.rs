//! Missing-SNP fetch for the UI's cross-GWAS comparison view
//!
//! The front end posts `{stratKey: [variantId, ...]}` for variants it did
//! not receive in a pre-computed payload. Variants are grouped into
//! nearby clusters so each cluster costs one indexed region read against
//! `pheno_gz/{stratKey}.gz`.

use crate::error::AppError;
use crate::fields::{AliasMap, FieldParser};
use crate::genome::{self, VariantCoord};
use crate::region::IndexedVariantReader;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

const DEFAULT_WINDOW_SIZE: u64 = 200;

/// Group variant ids into clusters of nearby positions. Consecutive
/// variants within `window` bp of the previous member chain into one
/// cluster; the cluster is keyed by its last member's (chrom, pos).
pub fn group_snps_by_region(
    snp_list: &[String],
    window: u64,
) -> Result<Vec<((String, u64), Vec<VariantCoord>)>, AppError> {
    let mut coords: Vec<VariantCoord> = snp_list
        .iter()
        .map(|id| genome::parse_variant_id(id))
        .collect::<Result<_, _>>()?;
    coords.sort_by_key(|c| (genome::chrom_index(&c.chrom).unwrap_or(usize::MAX), c.pos));

    let mut groups: Vec<((String, u64), Vec<VariantCoord>)> = Vec::new();
    let mut current: Vec<VariantCoord> = Vec::new();
    let mut anchor: Option<(String, u64)> = None;

    for coord in coords {
        let chained = match &anchor {
            None => true,
            Some((chrom, pos)) => *chrom == coord.chrom && coord.pos.saturating_sub(*pos) <= window,
        };
        if chained {
            anchor = Some((coord.chrom.clone(), coord.pos));
            current.push(coord);
        } else {
            if let Some(key) = anchor.take() {
                groups.push((key, std::mem::take(&mut current)));
            }
            anchor = Some((coord.chrom.clone(), coord.pos));
            current.push(coord);
        }
    }
    if let Some(key) = anchor {
        if !current.is_empty() {
            groups.push((key, current));
        }
    }
    Ok(groups)
}

/// Fetches missing SNP records from per-stratification sumstats files.
pub struct SnpFetcher {
    pheno_gz_dir: PathBuf,
    window_size: u64,
    aliases: AliasMap,
    parser: FieldParser,
}

impl SnpFetcher {
    pub fn new(pheno_gz_dir: PathBuf, aliases: AliasMap, parser: FieldParser) -> Self {
        Self {
            pheno_gz_dir,
            window_size: DEFAULT_WINDOW_SIZE,
            aliases,
            parser,
        }
    }

    fn fetch_for_key(&self, key: &str, snp_list: &[String]) -> Result<Vec<Value>, AppError> {
        let path = self.pheno_gz_dir.join(format!("{}.gz", key));
        if !path.exists() {
            return Err(AppError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        }
        let mut reader = IndexedVariantReader::open(&path, &self.aliases, self.parser)?;

        let mut results = Vec::new();
        for ((chrom, anchor_pos), snps) in group_snps_by_region(snp_list, self.window_size)? {
            let margin = 100 * self.window_size;
            let start = anchor_pos.saturating_sub(margin).max(1);
            let end = anchor_pos + margin;
            for record in reader.get_region(&chrom, start, end)? {
                let matched = snps.iter().any(|snp| {
                    snp.pos == record.pos
                        && snp.ref_allele == record.ref_allele
                        && snp.alt == record.alt
                });
                if !matched {
                    continue;
                }
                let field = |name: &str| record.fields.get(name).cloned().unwrap_or(Value::Null);
                results.push(json!({
                    "chrom": record.chrom,
                    "pos": record.pos,
                    "ref": record.ref_allele,
                    "alt": record.alt,
                    "rsids": field("rsids"),
                    "nearest_genes": field("nearest_genes"),
                    "pval": field("pval"),
                    "beta": field("beta"),
                    "sebeta": field("sebeta"),
                    "af": field("af"),
                }));
            }
        }
        Ok(results)
    }

    /// Process the posted map. Failures are reported per key so one bad
    /// stratification does not sink the rest.
    pub fn process_keys(&self, payload: &BTreeMap<String, Vec<String>>) -> Map<String, Value> {
        let mut results = Map::new();
        for (key, snp_list) in payload {
            match self.fetch_for_key(key, snp_list) {
                Ok(records) => {
                    results.insert(key.clone(), Value::Array(records));
                }
                Err(e) => {
                    tracing::warn!("missing-SNP fetch failed for {}: {}", key, e);
                    results.insert(key.clone(), json!({ "error": e.to_string() }));
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nearby_snps_group_together() {
        let snps = vec!["1-1000-A-T".to_string(), "1-1050-A-T".to_string()];
        let groups = group_snps_by_region(&snps, 200).unwrap();
        assert_eq!(groups.len(), 1);
        let ((chrom, anchor), members) = &groups[0];
        assert_eq!(chrom, "1");
        assert_eq!(*anchor, 1050);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_window_chains_consecutive_members() {
        // each member is within 200 of the previous, so one long cluster
        let snps = vec![
            "1-1000-A-T".to_string(),
            "1-1150-A-T".to_string(),
            "1-1300-A-T".to_string(),
        ];
        let groups = group_snps_by_region(&snps, 200).unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_distant_or_cross_chrom_snps_split() {
        let snps = vec![
            "1-1000-A-T".to_string(),
            "1-9000-A-T".to_string(),
            "2-1000-A-T".to_string(),
        ];
        let groups = group_snps_by_region(&snps, 200).unwrap();
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_groups_follow_chromosome_order() {
        let snps = vec!["X-500-A-T".to_string(), "2-500-A-T".to_string()];
        let groups = group_snps_by_region(&snps, 200).unwrap();
        assert_eq!(groups[0].0 .0, "2");
        assert_eq!(groups[1].0 .0, "X");
    }

    #[test]
    fn test_bad_variant_id_is_rejected() {
        let snps = vec!["not-a-variant".to_string()];
        assert!(group_snps_by_region(&snps, 200).is_err());
    }
}
