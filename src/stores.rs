//! Startup-loaded lookup stores
//!
//! All three stores are built once from on-disk inputs before serving
//! starts and are immutable afterwards, so handlers read them without
//! locking.

use crate::error::AppError;
use crate::genome;
use crate::models::{PhenoSummary, PhenotypeDescriptor};
use crate::phewas::PhenotypeIndex;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Phenotype descriptors from `phenotypes.json`, split into regular and
/// interaction lists, plus the derived lookup surfaces.
pub struct PhenoStore {
    phenotypes: Vec<PhenotypeDescriptor>,
    interactions: Vec<PhenotypeDescriptor>,
    all_phenos: Vec<PhenoSummary>,
    stratifications: Vec<String>,
    stratification_categories: Vec<String>,
    categories: Vec<String>,
    index: PhenotypeIndex,
}

impl PhenoStore {
    pub fn load(data_dir: &Path) -> Result<Self, AppError> {
        let path = data_dir.join("phenotypes.json");
        let raw = std::fs::read_to_string(&path)?;
        let descriptors: Vec<PhenotypeDescriptor> = serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(format!("malformed {}: {}", path.display(), e))
        })?;
        Ok(Self::from_descriptors(descriptors))
    }

    pub fn from_descriptors(descriptors: Vec<PhenotypeDescriptor>) -> Self {
        let mut phenotypes = Vec::new();
        let mut interactions = Vec::new();
        let mut all_phenos: Vec<PhenoSummary> = Vec::new();
        let mut stratifications = BTreeSet::new();
        let mut stratification_categories: Vec<String> = Vec::new();
        let mut categories = BTreeSet::new();
        let mut index = PhenotypeIndex::new();

        for pheno in &descriptors {
            if let Some(strat) = &pheno.stratification {
                if stratification_categories.is_empty() {
                    stratification_categories = strat.keys().cloned().collect();
                }
                if let Some(key) = pheno.stratification_key() {
                    stratifications.insert(key);
                }
                index.insert(
                    (
                        pheno.phenocode.clone(),
                        strat.get("ancestry").cloned().unwrap_or_default(),
                        strat.get("sex").cloned().unwrap_or_default(),
                    ),
                    pheno.clone(),
                );
            }
            if !pheno.category.is_empty() {
                categories.insert(pheno.category.clone());
            }
            let summary = PhenoSummary {
                phenocode: pheno.phenocode.clone(),
                category: pheno.category.clone(),
                phenostring: pheno.phenostring.clone(),
            };
            if !all_phenos.contains(&summary) {
                all_phenos.push(summary);
            }
        }

        for pheno in descriptors {
            if pheno.is_interaction() {
                interactions.push(pheno);
            } else {
                phenotypes.push(pheno);
            }
        }

        Self {
            phenotypes,
            interactions,
            all_phenos,
            stratifications: stratifications.into_iter().collect(),
            stratification_categories,
            categories: categories.into_iter().collect(),
            index,
        }
    }

    /// Regular phenotypes, optionally narrowed to one phenocode.
    pub fn list(&self, phenocode: Option<&str>) -> Vec<&PhenotypeDescriptor> {
        match phenocode {
            None => self.phenotypes.iter().collect(),
            Some(code) => self
                .phenotypes
                .iter()
                .filter(|p| p.phenocode == code)
                .collect(),
        }
    }

    pub fn interaction_list(&self, phenocode: Option<&str>) -> Vec<&PhenotypeDescriptor> {
        match phenocode {
            None => self.interactions.iter().collect(),
            Some(code) => self
                .interactions
                .iter()
                .filter(|p| p.phenocode == code)
                .collect(),
        }
    }

    pub fn all_phenos(&self) -> &[PhenoSummary] {
        &self.all_phenos
    }

    pub fn stratifications(&self) -> &[String] {
        &self.stratifications
    }

    pub fn stratification_categories(&self) -> &[String] {
        &self.stratification_categories
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn index(&self) -> &PhenotypeIndex {
        &self.index
    }
}

/// Pre-computed top-1000 hits, served as loaded.
pub struct TophitsStore {
    data: Value,
}

impl TophitsStore {
    pub fn load(data_dir: &Path) -> Result<Self, AppError> {
        let path = data_dir.join("top_hits_1k.json");
        let raw = std::fs::read_to_string(&path)?;
        let data = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("malformed {}: {}", path.display(), e)))?;
        Ok(Self { data })
    }

    pub fn tophits(&self) -> &Value {
        &self.data
    }
}

/// Gene coordinates from the BED-like reference table plus the
/// best-phenos-by-gene SQLite lookup.
pub struct GeneStore {
    region_by_gene: BTreeMap<String, (String, u64, u64)>,
    best_phenos: SqlitePool,
}

impl GeneStore {
    pub async fn load(bed_path: &Path, sqlite_path: &Path) -> Result<Self, AppError> {
        let region_by_gene = read_gene_bed(bed_path)?;

        let options = SqliteConnectOptions::new()
            .filename(sqlite_path)
            .read_only(true);
        let best_phenos = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            region_by_gene,
            best_phenos,
        })
    }

    /// Best phenotypes for one gene, as stored by the loading pipeline.
    pub async fn best_phenos_table(&self, gene: &str) -> Result<Option<Value>, AppError> {
        let row = sqlx::query("SELECT json FROM best_phenos_for_each_gene WHERE gene = ?")
            .bind(gene)
            .fetch_optional(&self.best_phenos)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let raw: String = row.get("json");
                let data: Value = serde_json::from_str(&raw).map_err(|e| {
                    AppError::Config(format!("malformed best-phenos json for {}: {}", gene, e))
                })?;
                Ok(Some(data))
            }
        }
    }

    pub async fn gene_names(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT gene FROM best_phenos_for_each_gene")
            .fetch_all(&self.best_phenos)
            .await?;
        Ok(rows.iter().map(|row| row.get("gene")).collect())
    }

    pub fn gene_position(&self, gene: &str) -> Option<&(String, u64, u64)> {
        self.region_by_gene.get(gene)
    }

    /// Genes known to both the best-phenos table and the region map; the
    /// autocomplete build seeds from this.
    pub async fn all_genes(&self) -> Result<Vec<(String, String, u64, u64)>, AppError> {
        let mut genes = Vec::new();
        for name in self.gene_names().await? {
            if let Some((chrom, start, stop)) = self.region_by_gene.get(&name) {
                genes.push((name, chrom.clone(), *start, *stop));
            }
        }
        Ok(genes)
    }
}

/// Parse the (chrom, start, end, symbol, ensg) gene table. Chromosomes
/// must already be canonical.
fn read_gene_bed(path: &Path) -> Result<BTreeMap<String, (String, u64, u64)>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| AppError::Config(format!("cannot open {}: {}", path.display(), e)))?;

    let mut region_by_gene = BTreeMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            AppError::Config(format!("malformed gene table {}: {}", path.display(), e))
        })?;
        let chrom = record.get(0).unwrap_or_default();
        genome::normalize_chrom(chrom)?;
        let start: u64 = record
            .get(1)
            .unwrap_or_default()
            .parse()
            .map_err(|_| AppError::Config(format!("bad start in {}", path.display())))?;
        let end: u64 = record
            .get(2)
            .unwrap_or_default()
            .parse()
            .map_err(|_| AppError::Config(format!("bad end in {}", path.display())))?;
        let symbol = record.get(3).unwrap_or_default();
        region_by_gene.insert(symbol.to_string(), (chrom.to_string(), start, end));
    }
    Ok(region_by_gene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn descriptors() -> Vec<PhenotypeDescriptor> {
        serde_json::from_value(json!([
            {
                "phenocode": "A",
                "phenostring": "Asthma",
                "category": "Respiratory",
                "stratification": {"ancestry": "european", "sex": "male"},
            },
            {
                "phenocode": "A",
                "phenostring": "Asthma",
                "category": "Respiratory",
                "stratification": {"ancestry": "european", "sex": "female"},
            },
            {
                "phenocode": "B",
                "phenostring": "BMI x smoking",
                "category": "Anthropometric",
                "interaction": "smoking",
            },
        ]))
        .unwrap()
    }

    #[test]
    fn test_pheno_store_splits_interactions() {
        let store = PhenoStore::from_descriptors(descriptors());
        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.interaction_list(None).len(), 1);
        assert_eq!(store.interaction_list(Some("B")).len(), 1);
        assert_eq!(store.list(Some("B")).len(), 0);
    }

    #[test]
    fn test_pheno_store_derives_stratifications() {
        let store = PhenoStore::from_descriptors(descriptors());
        assert_eq!(
            store.stratifications(),
            &["european.female".to_string(), "european.male".to_string()]
        );
        assert_eq!(
            store.stratification_categories(),
            &["ancestry".to_string(), "sex".to_string()]
        );
        assert_eq!(store.all_phenos().len(), 2);
        assert!(store
            .index()
            .contains_key(&("A".to_string(), "european".to_string(), "male".to_string())));
    }

    #[test]
    fn test_gene_bed_rejects_unknown_chromosome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.bed");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "1\t100\t200\tBRCA2\tENSG0001").unwrap();
        writeln!(f, "Z\t100\t200\tBAD\tENSG0002").unwrap();
        drop(f);
        assert!(matches!(
            read_gene_bed(&path),
            Err(AppError::UnknownChromosome(_))
        ));
    }

    #[test]
    fn test_gene_bed_parses_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.bed");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "13\t32315000\t32400000\tBRCA2\tENSG00000139618").unwrap();
        drop(f);
        let regions = read_gene_bed(&path).unwrap();
        assert_eq!(
            regions["BRCA2"],
            ("13".to_string(), 32_315_000, 32_400_000)
        );
    }

    #[tokio::test]
    async fn test_best_phenos_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("best-phenos-by-gene.sqlite3");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE best_phenos_for_each_gene (gene TEXT, json TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO best_phenos_for_each_gene VALUES ('BRCA2', '[{\"phenocode\": \"A\"}]')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let bed_path = dir.path().join("genes.bed");
        std::fs::write(&bed_path, "13\t32315000\t32400000\tBRCA2\tENSG00000139618\n").unwrap();

        let store = GeneStore::load(&bed_path, &db_path).await.unwrap();
        let table = store.best_phenos_table("BRCA2").await.unwrap().unwrap();
        assert_eq!(table[0]["phenocode"], json!("A"));
        assert!(store.best_phenos_table("NOPE").await.unwrap().is_none());
        assert_eq!(store.gene_names().await.unwrap(), vec!["BRCA2"]);
        assert_eq!(
            store.all_genes().await.unwrap(),
            vec![("BRCA2".to_string(), "13".to_string(), 32_315_000, 32_400_000)]
        );
    }
}
