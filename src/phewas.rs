//! PheWAS matrix reader
//!
//! The per-stratification matrix is a wide TSV: coordinate columns plus
//! one `field@phenocode` column per (statistic, phenotype) pair. Given a
//! variant coordinate, the reader fetches the matching row through the
//! block index and decodes it into one record per phenotype, padding the
//! response with sentinel records so every known phenotype appears.

use crate::error::AppError;
use crate::genome::VariantCoord;
use crate::models::{PhenoSummary, PhenotypeDescriptor};
use crate::region::TabixLineReader;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Phenotype descriptors keyed by (phenocode, ancestry, sex).
pub type PhenotypeIndex = BTreeMap<(String, String, String), PhenotypeDescriptor>;

/// Parsed matrix header: coordinate columns by name, and per-phenocode
/// statistic columns in header encounter order (the response lists
/// phenotypes in the order the matrix carries them).
#[derive(Debug, Clone)]
pub struct MatrixHeader {
    colidx: BTreeMap<String, usize>,
    pheno_fields: Vec<(String, BTreeMap<String, usize>)>,
}

const COORDINATE_FIELDS: [&str; 6] = ["chrom", "pos", "ref", "alt", "rsids", "nearest_genes"];

impl MatrixHeader {
    /// Parse the header line. The first column carries a '#' marker which
    /// is stripped; names containing '@' split as `field@phenocode`.
    pub fn parse(header_line: &str, file: &str) -> Result<Self, AppError> {
        let mut colnames: Vec<String> = header_line
            .trim_end_matches(['\n', '\r'])
            .split('\t')
            .map(str::to_string)
            .collect();
        match colnames.first_mut() {
            Some(first) if first.starts_with('#') => *first = first[1..].to_string(),
            _ => {
                return Err(AppError::MalformedHeader(format!(
                    "matrix header of {} does not start with '#'",
                    file
                )))
            }
        }

        let colidx: BTreeMap<String, usize> = colnames
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let mut pheno_fields: Vec<(String, BTreeMap<String, usize>)> = Vec::new();
        let mut slot_by_phenocode: BTreeMap<String, usize> = BTreeMap::new();
        for (idx, colname) in colnames.iter().enumerate() {
            if let Some((field, phenocode)) = colname.split_once('@') {
                let slot = *slot_by_phenocode
                    .entry(phenocode.to_string())
                    .or_insert_with(|| {
                        pheno_fields.push((phenocode.to_string(), BTreeMap::new()));
                        pheno_fields.len() - 1
                    });
                pheno_fields[slot].1.insert(field.to_string(), idx);
            }
        }

        let missing: Vec<String> = COORDINATE_FIELDS
            .iter()
            .filter(|name| !colidx.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::MissingRequiredField {
                missing,
                header: colnames,
                aliases: Vec::new(),
            });
        }

        Ok(Self {
            colidx,
            pheno_fields,
        })
    }

    fn coordinate<'a>(&self, values: &'a [&str], field: &str) -> &'a str {
        self.colidx
            .get(field)
            .and_then(|idx| values.get(*idx))
            .copied()
            .unwrap_or_default()
    }
}

/// Statistic values decode as floats where possible; a non-numeric pval
/// becomes the -1 sentinel, any other non-numeric value stays a string.
fn decode_stat(field: &str, raw: &str) -> Value {
    match raw.parse::<f64>() {
        Ok(x) => serde_json::Number::from_f64(x)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Err(_) if field == "pval" => json!(-1),
        Err(_) => Value::String(raw.to_string()),
    }
}

const DEFAULT_STRAT_CATEGORIES: [&str; 2] = ["ancestry", "sex"];

/// Build the per-phenotype record list for a matched row. The
/// stratification components of each `phenocode.ancestry.sex`-style
/// column are labelled with `strat_categories` (ancestry/sex unless the
/// phenotype list says otherwise).
fn decode_row(
    header: &MatrixHeader,
    values: &[&str],
    pheno_index: &PhenotypeIndex,
    all_phenos: &[PhenoSummary],
    strat_categories: &[String],
) -> Vec<Value> {
    let categories: Vec<&str> = if strat_categories.is_empty() {
        DEFAULT_STRAT_CATEGORIES.to_vec()
    } else {
        strat_categories.iter().map(String::as_str).collect()
    };

    let mut seen: Vec<&PhenoSummary> = Vec::new();
    let mut phenos: Vec<Value> = Vec::new();

    for (phenocode, fields) in &header.pheno_fields {
        let parts: Vec<&str> = phenocode.split('.').collect();
        let key = (
            parts.first().copied().unwrap_or_default().to_string(),
            parts.get(1).copied().unwrap_or_default().to_string(),
            parts.get(2).copied().unwrap_or_default().to_string(),
        );
        let descriptor = pheno_index.get(&key);

        let mut stratification = Map::new();
        for (offset, category) in categories.iter().enumerate() {
            stratification.insert(
                category.to_string(),
                parts.get(offset + 1).map_or(Value::Null, |v| json!(v)),
            );
        }

        let mut record = Map::new();
        record.insert("phenocode".to_string(), json!(parts[0]));
        record.insert(
            "stratification".to_string(),
            Value::Object(stratification),
        );
        record.insert(
            "category".to_string(),
            descriptor.map_or(Value::Null, |d| json!(d.category)),
        );
        record.insert(
            "phenostring".to_string(),
            descriptor.map_or(Value::Null, |d| json!(d.phenostring)),
        );
        record.insert(
            "num_samples".to_string(),
            descriptor.map_or(Value::Null, |d| json!(d.num_samples)),
        );
        record.insert(
            "num_controls".to_string(),
            descriptor.map_or(Value::Null, |d| json!(d.num_controls)),
        );
        record.insert(
            "num_cases".to_string(),
            descriptor.map_or(Value::Null, |d| json!(d.num_cases)),
        );
        for (field, idx) in fields {
            let raw = values.get(*idx).copied().unwrap_or_default();
            record.insert(field.clone(), decode_stat(field, raw));
        }

        if let Some(summary) = all_phenos.iter().find(|p| {
            p.phenocode == parts[0]
                && descriptor.is_some_and(|d| d.category == p.category && d.phenostring == p.phenostring)
        }) {
            seen.push(summary);
        }
        phenos.push(Value::Object(record));
    }

    // every phenotype the browser knows shows up, matched or not
    let default_stratification = phenos
        .first()
        .and_then(|p| p.get("stratification").cloned())
        .unwrap_or(Value::Null);
    for unseen in all_phenos
        .iter()
        .filter(|p| !seen.iter().any(|s| s == p))
    {
        phenos.push(json!({
            "phenocode": unseen.phenocode,
            "stratification": default_stratification,
            "category": unseen.category,
            "phenostring": unseen.phenostring,
            "num_samples": 0,
            "num_controls": "",
            "num_cases": "",
            "test": "",
            "pval": -1,
            "beta": "",
            "sebeta": "",
            "af": null,
        }));
    }

    phenos
}

/// Reader over `matrix.{stratification}.tsv.gz`.
pub struct PhewasMatrixReader {
    lines: TabixLineReader,
    header: MatrixHeader,
}

impl PhewasMatrixReader {
    pub fn open(matrix_dir: &Path, stratification: &str) -> Result<Self, AppError> {
        let path = matrix_dir.join(format!("matrix.{}.tsv.gz", stratification));
        let mut lines = TabixLineReader::open(&path)?;
        let header_line = lines.read_header_line()?;
        let header = MatrixHeader::parse(&header_line, &path.display().to_string())?;
        Ok(Self { lines, header })
    }

    /// Fetch the row matching all four coordinates and decode it.
    /// Returns `None` when the variant is not in the matrix.
    pub fn find_matching_row(
        &mut self,
        coord: &VariantCoord,
        pheno_index: &PhenotypeIndex,
        all_phenos: &[PhenoSummary],
        strat_categories: &[String],
    ) -> Result<Option<Value>, AppError> {
        let rows = self
            .lines
            .region_lines(&coord.chrom, coord.pos, coord.pos + 1)?;
        for line in rows {
            let values: Vec<&str> = line.split('\t').collect();
            let chrom = self.header.coordinate(&values, "chrom");
            let pos: u64 = self
                .header
                .coordinate(&values, "pos")
                .parse()
                .unwrap_or(0);
            let ref_allele = self.header.coordinate(&values, "ref");
            let alt = self.header.coordinate(&values, "alt");
            if chrom != coord.chrom
                || pos != coord.pos
                || ref_allele != coord.ref_allele
                || alt != coord.alt
            {
                continue;
            }

            let phenos =
                decode_row(&self.header, &values, pheno_index, all_phenos, strat_categories);
            return Ok(Some(json!({
                "chrom": coord.chrom,
                "pos": coord.pos,
                "ref": coord.ref_allele,
                "alt": coord.alt,
                "rsids": self.header.coordinate(&values, "rsids"),
                "nearest_genes": self.header.coordinate(&values, "nearest_genes"),
                "phenos": phenos,
            })));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "#chrom\tpos\tref\talt\trsids\tnearest_genes\tpval@A.eur.both\tbeta@A.eur.both\tpval@B.eur.both";

    fn descriptor(phenocode: &str, phenostring: &str) -> PhenotypeDescriptor {
        serde_json::from_value(json!({
            "phenocode": phenocode,
            "phenostring": phenostring,
            "category": "Test",
            "num_samples": 1000,
            "stratification": {"ancestry": "eur", "sex": "both"},
        }))
        .unwrap()
    }

    fn index() -> PhenotypeIndex {
        let mut index = PhenotypeIndex::new();
        for (code, name) in [("A", "Asthma"), ("B", "Bronchitis")] {
            index.insert(
                (code.to_string(), "eur".to_string(), "both".to_string()),
                descriptor(code, name),
            );
        }
        index
    }

    fn universe() -> Vec<PhenoSummary> {
        [("A", "Asthma"), ("B", "Bronchitis"), ("C", "Cataract")]
            .iter()
            .map(|(code, name)| PhenoSummary {
                phenocode: code.to_string(),
                category: "Test".to_string(),
                phenostring: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_header_splits_field_at_phenocode() {
        let header = MatrixHeader::parse(HEADER, "matrix.tsv.gz").unwrap();
        assert_eq!(header.pheno_fields.len(), 2);
        let (phenocode, fields) = &header.pheno_fields[0];
        assert_eq!(phenocode, "A.eur.both");
        assert_eq!(fields["pval"], 6);
        assert_eq!(fields["beta"], 7);
        let (phenocode, fields) = &header.pheno_fields[1];
        assert_eq!(phenocode, "B.eur.both");
        assert_eq!(fields["pval"], 8);
    }

    #[test]
    fn test_pheno_records_follow_header_order() {
        let header = MatrixHeader::parse(
            "#chrom\tpos\tref\talt\trsids\tnearest_genes\tpval@Z.eur.both\tbeta@Z.eur.both\tpval@A.eur.both",
            "matrix.tsv.gz",
        )
        .unwrap();
        let codes: Vec<&str> = header
            .pheno_fields
            .iter()
            .map(|(code, _)| code.as_str())
            .collect();
        assert_eq!(codes, vec!["Z.eur.both", "A.eur.both"]);

        let row = "1\t1000\tA\tT\trs1\tBRCA2\t1e-8\t0.4\t1e-3";
        let values: Vec<&str> = row.split('\t').collect();
        let phenos = decode_row(&header, &values, &index(), &[], &[]);
        assert_eq!(phenos[0]["phenocode"], json!("Z"));
        assert_eq!(phenos[1]["phenocode"], json!("A"));
    }

    #[test]
    fn test_header_requires_comment_marker() {
        assert!(MatrixHeader::parse("chrom\tpos\tref\talt", "m.tsv.gz").is_err());
    }

    #[test]
    fn test_decode_row_merges_descriptor_and_pads_unseen() {
        let header = MatrixHeader::parse(HEADER, "matrix.tsv.gz").unwrap();
        let row = "1\t1000\tA\tT\trs1\tBRCA2\t1e-8\t0.4\tNA";
        let values: Vec<&str> = row.split('\t').collect();
        let phenos = decode_row(&header, &values, &index(), &universe(), &[]);

        assert_eq!(phenos.len(), 3);
        assert_eq!(phenos[0]["phenocode"], json!("A"));
        assert_eq!(phenos[0]["phenostring"], json!("Asthma"));
        assert_eq!(phenos[0]["pval"], json!(1e-8));
        assert_eq!(phenos[0]["beta"], json!(0.4));
        assert_eq!(phenos[0]["stratification"]["ancestry"], json!("eur"));

        // non-numeric pval decodes to the sentinel
        assert_eq!(phenos[1]["phenocode"], json!("B"));
        assert_eq!(phenos[1]["pval"], json!(-1));

        // phenotype missing from the matrix appears as a sentinel record
        let sentinel = &phenos[2];
        assert_eq!(sentinel["phenocode"], json!("C"));
        assert_eq!(sentinel["pval"], json!(-1));
        assert_eq!(sentinel["num_samples"], json!(0));
        assert_eq!(sentinel["beta"], json!(""));
    }
}
