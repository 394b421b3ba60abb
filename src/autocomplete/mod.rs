//! Unified autocomplete over phenotypes, genes, and variants
//!
//! Backed by an embedded SQLite database built once from the site table,
//! the gene store, and the phenotype list. The on-disk database is
//! cloned into a memory-resident replica at startup so query latency is
//! independent of the page cache; phenotype strings additionally get an
//! FTS5 index for word-level matching.

pub mod routes;

use crate::error::AppError;
use crate::stores::{GeneStore, PhenoStore};
use regex::Regex;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

const INSERT_BATCH_SIZE: usize = 1_000_000;
/// Rows per INSERT statement, bounded by SQLite's bind-parameter limit.
const ROWS_PER_STATEMENT: usize = 500;
const MAX_RESULTS: i64 = 4;

/// One row of the site master table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRow {
    pub rsid: Option<String>,
    pub variant_id: String,
    pub chrom: String,
    pub pos: u64,
    pub nearest_genes: Option<String>,
}

/// Streaming reader over `sites.tsv.gz`, yielding rows in batches so the
/// bulk load never holds the whole site table in memory. Only the first
/// rsid of the comma-joined list is kept.
pub struct SiteReader {
    reader: csv::Reader<flate2::read::MultiGzDecoder<std::fs::File>>,
    file: String,
    chrom_idx: usize,
    pos_idx: usize,
    ref_idx: usize,
    alt_idx: usize,
    rsids_idx: Option<usize>,
    genes_idx: Option<usize>,
    ncols: usize,
    row: u64,
}

impl SiteReader {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let file = std::fs::File::open(path)?;
        let decoder = flate2::read::MultiGzDecoder::new(file);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(decoder);
        let headers = reader
            .headers()
            .map_err(|e| AppError::MalformedHeader(format!("{}: {}", path.display(), e)))?
            .clone();
        let col = |name: &str| headers.iter().position(|h| h == name);
        let (Some(chrom_idx), Some(pos_idx), Some(ref_idx), Some(alt_idx)) =
            (col("chrom"), col("pos"), col("ref"), col("alt"))
        else {
            return Err(AppError::MissingRequiredField {
                missing: ["chrom", "pos", "ref", "alt"]
                    .iter()
                    .filter(|&&name| col(name).is_none())
                    .map(|name| name.to_string())
                    .collect(),
                header: headers.iter().map(str::to_string).collect(),
                aliases: Vec::new(),
            });
        };
        Ok(Self {
            rsids_idx: col("rsids"),
            genes_idx: col("nearest_genes"),
            ncols: headers.len(),
            reader,
            file: path.display().to_string(),
            chrom_idx,
            pos_idx,
            ref_idx,
            alt_idx,
            row: 0,
        })
    }

    /// Up to `max` further rows; an empty vec means end of file.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<SiteRow>, AppError> {
        let mut rows = Vec::new();
        let mut record = csv::StringRecord::new();
        while rows.len() < max {
            let more = self.reader.read_record(&mut record).map_err(|_| {
                AppError::MalformedRow {
                    file: self.file.clone(),
                    got: record.len(),
                    expected: self.ncols,
                }
            })?;
            if !more {
                break;
            }
            self.row += 1;
            let chrom = record.get(self.chrom_idx).unwrap_or_default().to_string();
            let pos: u64 = record
                .get(self.pos_idx)
                .unwrap_or_default()
                .parse()
                .map_err(|_| AppError::FieldParse {
                    field: "pos".to_string(),
                    value: record.get(self.pos_idx).unwrap_or_default().to_string(),
                    file: self.file.clone(),
                    row: self.row,
                })?;
            let ref_allele = record.get(self.ref_idx).unwrap_or_default();
            let alt = record.get(self.alt_idx).unwrap_or_default();
            let rsid = self
                .rsids_idx
                .and_then(|idx| record.get(idx))
                .and_then(|rsids| rsids.split(',').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let nearest_genes = self
                .genes_idx
                .and_then(|idx| record.get(idx))
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            rows.push(SiteRow {
                rsid,
                variant_id: format!("{}-{}-{}-{}", chrom, pos, ref_allele, alt),
                chrom,
                pos,
                nearest_genes,
            });
        }
        Ok(rows)
    }
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, AppError> {
    let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn insert_variant_rows(pool: &SqlitePool, batch: &[SiteRow]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for chunk in batch.chunks(ROWS_PER_STATEMENT) {
        let mut builder = QueryBuilder::new(
            "INSERT INTO variants (rsid, variant_id, chrom, pos, nearest_genes) ",
        );
        builder.push_values(chunk, |mut b, site| {
            b.push_bind(&site.rsid)
                .push_bind(&site.variant_id)
                .push_bind(&site.chrom)
                .push_bind(site.pos as i64)
                .push_bind(&site.nearest_genes);
        });
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn create_variants_table(pool: &SqlitePool, sites: &mut SiteReader) -> Result<(), AppError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS variants (
            id INTEGER PRIMARY KEY,
            rsid TEXT,
            variant_id TEXT,
            chrom TEXT,
            pos INTEGER,
            nearest_genes TEXT
        )",
    )
    .execute(pool)
    .await?;

    loop {
        let batch = sites.next_batch(INSERT_BATCH_SIZE)?;
        if batch.is_empty() {
            break;
        }
        debug!("inserting {} variant rows", batch.len());
        insert_variant_rows(pool, &batch).await?;
    }

    // indexes after bulk insert
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_variant_id ON variants(variant_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rsid ON variants(rsid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chrom ON variants(chrom)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pos ON variants(pos)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_genes_table(
    pool: &SqlitePool,
    genes: &[(String, String, u64, u64)],
) -> Result<(), AppError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS genes (
            gene_id TEXT PRIMARY KEY,
            chrom TEXT,
            start INTEGER,
            stop INTEGER
        )",
    )
    .execute(pool)
    .await?;
    let mut tx = pool.begin().await?;
    for chunk in genes.chunks(ROWS_PER_STATEMENT) {
        let mut builder =
            QueryBuilder::new("INSERT OR REPLACE INTO genes (gene_id, chrom, start, stop) ");
        builder.push_values(chunk, |mut b, (gene, chrom, start, stop)| {
            b.push_bind(gene)
                .push_bind(chrom)
                .push_bind(*start as i64)
                .push_bind(*stop as i64);
        });
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn create_phenotypes_table(
    pool: &SqlitePool,
    phenotypes: &BTreeMap<String, String>,
) -> Result<(), AppError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS phenotypes (
            phenocode TEXT PRIMARY KEY,
            phenostring TEXT
        )",
    )
    .execute(pool)
    .await?;
    let rows: Vec<(&String, &String)> = phenotypes.iter().collect();
    let mut tx = pool.begin().await?;
    for chunk in rows.chunks(ROWS_PER_STATEMENT) {
        let mut builder =
            QueryBuilder::new("INSERT OR REPLACE INTO phenotypes (phenocode, phenostring) ");
        builder.push_values(chunk, |mut b, (code, name)| {
            b.push_bind(*code).push_bind(*name);
        });
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_phenostring ON phenotypes(phenostring)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_phenotypes_fts(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        "CREATE VIRTUAL TABLE IF NOT EXISTS phenotypes_fts USING fts5(
            phenocode,
            phenostring,
            content='phenotypes',
            content_rowid='rowid'
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO phenotypes_fts(phenotypes_fts) VALUES ('rebuild')")
        .execute(pool)
        .await?;
    Ok(())
}

/// In-memory autocomplete replica shared read-only across handlers.
pub struct Autocomplete {
    pool: SqlitePool,
}

impl Autocomplete {
    /// Open the on-disk database (building it first if absent or
    /// incomplete), then clone it into memory. Must finish before the
    /// server starts accepting requests.
    pub async fn open_or_build(
        data_dir: &Path,
        genes: &GeneStore,
        phenos: &PhenoStore,
    ) -> Result<Self, AppError> {
        let sites_dir = data_dir.join("sites");
        let db_path = sites_dir.join("autocomplete.db");
        Self::build_disk_db(&db_path, &sites_dir, genes, phenos).await?;

        let pool = memory_pool().await?;
        clone_into(&pool, &db_path).await?;

        let autocomplete = Self { pool };
        for table in ["variants", "genes", "phenotypes"] {
            let count = autocomplete.count(table).await?;
            info!("{} {} records loaded into memory", count, table);
        }
        Ok(autocomplete)
    }

    /// Create any missing tables of the on-disk database. An existing
    /// complete database is reopened untouched.
    async fn build_disk_db(
        db_path: &Path,
        sites_dir: &Path,
        genes: &GeneStore,
        phenos: &PhenoStore,
    ) -> Result<(), AppError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA journal_mode = OFF").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = OFF").execute(&pool).await?;
        sqlx::query("PRAGMA cache_size = 1000000").execute(&pool).await?;

        if !table_exists(&pool, "variants").await? {
            info!("building autocomplete variants table");
            let mut sites = SiteReader::open(&sites_dir.join("sites.tsv.gz"))?;
            create_variants_table(&pool, &mut sites).await?;
        }
        if !table_exists(&pool, "genes").await? {
            info!("building autocomplete genes table");
            create_genes_table(&pool, &genes.all_genes().await?).await?;
        }
        if !table_exists(&pool, "phenotypes").await? {
            info!("building autocomplete phenotypes table");
            let names: BTreeMap<String, String> = phenos
                .list(None)
                .iter()
                .map(|p| (p.phenocode.clone(), p.phenostring.clone()))
                .collect();
            create_phenotypes_table(&pool, &names).await?;
        }
        if !table_exists(&pool, "phenotypes_fts").await? {
            create_phenotypes_fts(&pool).await?;
        }
        pool.close().await;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn count(&self, table: &str) -> Result<i64, AppError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Exact rsid/variant-id match first; otherwise prefix matches,
    /// excluding the exact term. With a (chrom, pos) scope the search is
    /// restricted to that chromosome's variant ids.
    pub async fn query_variants(
        &self,
        prefix: &str,
        scope: Option<(&str, u64)>,
        max_results: i64,
    ) -> Result<Vec<(Option<String>, String)>, AppError> {
        let rows = match scope {
            Some((chrom, _pos)) => {
                let exact = sqlx::query(
                    "SELECT rsid, variant_id FROM variants WHERE chrom = ? AND variant_id = ?",
                )
                .bind(chrom)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
                if !exact.is_empty() {
                    exact
                } else {
                    sqlx::query(
                        "SELECT rsid, variant_id FROM variants
                         WHERE chrom = ? AND variant_id LIKE ? AND variant_id != ?
                         LIMIT ?",
                    )
                    .bind(chrom)
                    .bind(format!("{}%", prefix))
                    .bind(prefix)
                    .bind(max_results)
                    .fetch_all(&self.pool)
                    .await?
                }
            }
            None => {
                let exact = sqlx::query(
                    "SELECT rsid, variant_id FROM variants WHERE rsid = ? OR variant_id = ?",
                )
                .bind(prefix)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
                if !exact.is_empty() {
                    exact
                } else {
                    sqlx::query(
                        "SELECT rsid, variant_id FROM variants
                         WHERE (rsid LIKE ? OR variant_id LIKE ?)
                           AND rsid != ? AND variant_id != ?
                         LIMIT ?",
                    )
                    .bind(format!("{}%", prefix))
                    .bind(format!("{}%", prefix))
                    .bind(prefix)
                    .bind(prefix)
                    .bind(max_results)
                    .fetch_all(&self.pool)
                    .await?
                }
            }
        };
        Ok(rows
            .iter()
            .map(|row| (row.get("rsid"), row.get("variant_id")))
            .collect())
    }

    pub async fn query_genes(
        &self,
        prefix: &str,
        max_results: i64,
    ) -> Result<Vec<(String, String, i64, i64)>, AppError> {
        let exact = sqlx::query("SELECT gene_id, chrom, start, stop FROM genes WHERE gene_id = ?")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
        let rows = if !exact.is_empty() {
            exact
        } else {
            sqlx::query(
                "SELECT gene_id, chrom, start, stop FROM genes
                 WHERE gene_id LIKE ? AND gene_id != ?
                 LIMIT ?",
            )
            .bind(format!("{}%", prefix))
            .bind(prefix)
            .bind(max_results)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("gene_id"),
                    row.get("chrom"),
                    row.get("start"),
                    row.get("stop"),
                )
            })
            .collect())
    }

    /// Exact phenostring match first; otherwise the union of substring
    /// matches and FTS word matches, de-duplicated in result order.
    pub async fn query_phenotypes(
        &self,
        query: &str,
        max_results: i64,
    ) -> Result<Vec<(String, String)>, AppError> {
        let exact = sqlx::query("SELECT phenocode, phenostring FROM phenotypes WHERE phenostring = ?")
            .bind(query)
            .fetch_all(&self.pool)
            .await?;
        let rows = if !exact.is_empty() {
            exact
        } else {
            let mut rows = sqlx::query(
                "SELECT phenocode, phenostring FROM phenotypes
                 WHERE (phenocode LIKE ? OR phenostring LIKE ?)
                   AND phenocode != ? AND phenostring != ?
                 LIMIT ?",
            )
            .bind(format!("%{}%", query))
            .bind(format!("%{}%", query))
            .bind(query)
            .bind(query)
            .bind(max_results)
            .fetch_all(&self.pool)
            .await?;

            let term = query.trim().replace('"', "");
            if !term.is_empty() {
                let fts = sqlx::query(
                    "SELECT phenocode, phenostring FROM phenotypes_fts
                     WHERE phenotypes_fts MATCH ?
                     LIMIT ?",
                )
                .bind(format!("phenocode:\"{}\" OR phenostring:\"{}\"", term, term))
                .bind(max_results)
                .fetch_all(&self.pool)
                .await?;
                rows.extend(fts);
            }
            rows
        };

        let mut seen = Vec::new();
        for row in &rows {
            let pair: (String, String) = (row.get("phenocode"), row.get("phenostring"));
            if !seen.contains(&pair) {
                seen.push(pair);
            }
        }
        Ok(seen)
    }

    /// rsid stored for a canonical variant id.
    pub async fn rsid_for_variant(&self, variant_id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT rsid FROM variants WHERE variant_id = ?")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get("rsid")))
    }

    /// Comma-joined nearest genes stored for a canonical variant id.
    pub async fn nearest_genes_for_variant(
        &self,
        variant_id: &str,
    ) -> Result<Option<Vec<String>>, AppError> {
        let row = sqlx::query("SELECT nearest_genes FROM variants WHERE variant_id = ?")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;
        let genes: Option<String> = row.and_then(|r| r.get("nearest_genes"));
        Ok(genes.map(|g| g.split(',').map(str::to_string).collect()))
    }

    /// Route a raw search query to the right table(s).
    /// Returns `None` when a variant-shaped query fails to parse.
    pub async fn aggregate(&self, raw_query: &str) -> Result<Option<Value>, AppError> {
        let query = raw_query.trim_start();
        if query.contains('-') || query.contains(':') {
            let Some((prefix, chrom, pos)) = extract_standard_variant_id(query) else {
                return Ok(None);
            };
            let variants = self
                .query_variants(&prefix, Some((&chrom, pos)), MAX_RESULTS)
                .await?;
            return Ok(Some(suggestions(
                variants.iter().map(variant_suggestion).collect(),
            )));
        }
        if query.to_lowercase().starts_with("rs") {
            let variants = self
                .query_variants(&query.to_lowercase(), None, MAX_RESULTS)
                .await?;
            return Ok(Some(suggestions(
                variants.iter().map(variant_suggestion).collect(),
            )));
        }
        if query.is_empty() {
            return Ok(Some(suggestions(Vec::new())));
        }

        let mut results: Vec<Value> = self
            .query_phenotypes(query, MAX_RESULTS)
            .await?
            .iter()
            .map(|(phenocode, phenostring)| {
                json!({
                    "phenocode": phenocode,
                    "phenostring": phenostring,
                    "feature": "pheno",
                })
            })
            .collect();
        results.extend(self.query_genes(query, MAX_RESULTS).await?.iter().map(
            |(gene, chrom, start, stop)| {
                json!({
                    "gene": gene,
                    "chrom": chrom,
                    "start": start,
                    "stop": stop,
                    "feature": "gene",
                })
            },
        ));
        Ok(Some(suggestions(results)))
    }
}

fn suggestions(items: Vec<Value>) -> Value {
    json!({ "suggestions": items })
}

fn variant_suggestion((rsid, variant_id): &(Option<String>, String)) -> Value {
    json!({
        "rsid": rsid,
        "variant_id": variant_id,
        "feature": "variant",
    })
}

async fn memory_pool() -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::new().filename(":memory:");
    // one connection owns the in-memory database; it must never be
    // recycled or the replica vanishes
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Copy the on-disk database into the memory replica and re-create the
/// indexes and FTS table on the clone.
async fn clone_into(pool: &SqlitePool, db_path: &Path) -> Result<(), AppError> {
    sqlx::query("ATTACH DATABASE ? AS disk")
        .bind(db_path.display().to_string())
        .execute(pool)
        .await?;
    for table in ["variants", "genes", "phenotypes"] {
        sqlx::query(&format!(
            "CREATE TABLE {table} AS SELECT * FROM disk.{table}"
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query("DETACH DATABASE disk").execute(pool).await?;

    sqlx::query("CREATE INDEX idx_variant_id ON variants(variant_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_rsid ON variants(rsid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_chrom ON variants(chrom)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_pos ON variants(pos)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX idx_phenostring ON phenotypes(phenostring)")
        .execute(pool)
        .await?;
    create_phenotypes_fts(pool).await?;
    Ok(())
}

fn variant_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(CHR)?(?P<chrom>\d+|X|Y|MT)[:\-](?P<pos>\d+)([:\-](?P<ref>[ACGT]+)([:\-](?P<alt>[ACGT]+))?)?$",
        )
        .expect("static regex")
    })
}

/// Parse a (possibly partial) variant query: "chrom:pos", "chrom:pos:ref"
/// or "chrom:pos:ref:alt", with ':' or '-' separators and an optional CHR
/// prefix. Returns the dash-joined canonical prefix plus (chrom, pos) for
/// scoping the search.
pub fn extract_standard_variant_id(query: &str) -> Option<(String, String, u64)> {
    let query = query.trim().to_uppercase();
    let caps = variant_id_regex().captures(&query)?;
    let chrom = caps.name("chrom")?.as_str().to_string();
    let pos: u64 = caps.name("pos")?.as_str().parse().ok()?;
    let mut id = format!("{}-{}", chrom, pos);
    if let Some(ref_allele) = caps.name("ref") {
        id.push('-');
        id.push_str(ref_allele.as_str());
        if let Some(alt) = caps.name("alt") {
            id.push('-');
            id.push_str(alt.as_str());
        }
    }
    Some((id, chrom, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_standard_variant_id() {
        assert_eq!(
            extract_standard_variant_id("CHR1:196698298:A:T"),
            Some(("1-196698298-A-T".to_string(), "1".to_string(), 196698298))
        );
        assert_eq!(
            extract_standard_variant_id("1-196698298-a-t"),
            Some(("1-196698298-A-T".to_string(), "1".to_string(), 196698298))
        );
        assert_eq!(
            extract_standard_variant_id("x:123"),
            Some(("X-123".to_string(), "X".to_string(), 123))
        );
        assert_eq!(
            extract_standard_variant_id("1:123:AC"),
            Some(("1-123-AC".to_string(), "1".to_string(), 123))
        );
        assert_eq!(extract_standard_variant_id("BRCA2"), None);
        assert_eq!(extract_standard_variant_id("1:xyz"), None);
    }

    fn site_rows() -> Vec<SiteRow> {
        vec![
            SiteRow {
                rsid: Some("rs111".to_string()),
                variant_id: "1-196698298-A-T".to_string(),
                chrom: "1".to_string(),
                pos: 196698298,
                nearest_genes: Some("CFH,CFHR3".to_string()),
            },
            SiteRow {
                rsid: Some("rs222".to_string()),
                variant_id: "1-196698300-G-C".to_string(),
                chrom: "1".to_string(),
                pos: 196698300,
                nearest_genes: None,
            },
        ]
    }

    async fn fixture() -> Autocomplete {
        let pool = memory_pool().await.unwrap();
        sqlx::query(
            "CREATE TABLE variants (
                id INTEGER PRIMARY KEY, rsid TEXT, variant_id TEXT,
                chrom TEXT, pos INTEGER, nearest_genes TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        insert_variant_rows(&pool, &site_rows()).await.unwrap();
        create_genes_table(
            &pool,
            &[("BRCA2".to_string(), "13".to_string(), 100, 200)],
        )
        .await
        .unwrap();
        let mut phenos = BTreeMap::new();
        phenos.insert("E4_DM2".to_string(), "Type 2 diabetes".to_string());
        phenos.insert("I9_HYP".to_string(), "Hypertension".to_string());
        create_phenotypes_table(&pool, &phenos).await.unwrap();
        create_phenotypes_fts(&pool).await.unwrap();
        Autocomplete::from_pool(pool)
    }

    #[tokio::test]
    async fn test_variant_exact_beats_prefix() {
        let ac = fixture().await;
        let hits = ac
            .query_variants("1-196698298-A-T", Some(("1", 196698298)), 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "1-196698298-A-T");

        let hits = ac
            .query_variants("1-19669", Some(("1", 19669)), 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_rsid_lookup() {
        let ac = fixture().await;
        let hits = ac.query_variants("rs111", None, 4).await.unwrap();
        assert_eq!(hits, vec![(Some("rs111".to_string()), "1-196698298-A-T".to_string())]);
        assert_eq!(
            ac.rsid_for_variant("1-196698298-A-T").await.unwrap(),
            Some("rs111".to_string())
        );
        assert_eq!(
            ac.nearest_genes_for_variant("1-196698298-A-T").await.unwrap(),
            Some(vec!["CFH".to_string(), "CFHR3".to_string()])
        );
        assert_eq!(
            ac.nearest_genes_for_variant("1-196698300-G-C").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_phenotype_fts_and_like_union_dedups() {
        let ac = fixture().await;
        let hits = ac.query_phenotypes("diabetes", 4).await.unwrap();
        assert_eq!(
            hits,
            vec![("E4_DM2".to_string(), "Type 2 diabetes".to_string())]
        );
        // exact phenostring short-circuits
        let hits = ac.query_phenotypes("Hypertension", 4).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_routing() {
        let ac = fixture().await;

        let out = ac.aggregate("CHR1:196698298:A:T").await.unwrap().unwrap();
        assert_eq!(out["suggestions"][0]["variant_id"], json!("1-196698298-A-T"));
        assert_eq!(out["suggestions"][0]["feature"], json!("variant"));

        let out = ac.aggregate("rs222").await.unwrap().unwrap();
        assert_eq!(out["suggestions"][0]["variant_id"], json!("1-196698300-G-C"));

        let out = ac.aggregate("").await.unwrap().unwrap();
        assert_eq!(out["suggestions"], json!([]));

        let out = ac.aggregate("BRCA").await.unwrap().unwrap();
        let features: Vec<&str> = out["suggestions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["feature"].as_str().unwrap())
            .collect();
        assert_eq!(features, vec!["gene"]);

        // variant-shaped but unparseable
        assert!(ac.aggregate("1:-bad-").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aggregate_idempotent() {
        let ac = fixture().await;
        let first = ac.aggregate("diabetes").await.unwrap();
        let second = ac.aggregate("diabetes").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_site_reader_batches() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.tsv.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        writeln!(gz, "chrom\tpos\tref\talt\trsids\tnearest_genes").unwrap();
        writeln!(gz, "1\t100\tA\tT\trs1,rs99\tCFH").unwrap();
        writeln!(gz, "1\t200\tG\tC\t\t").unwrap();
        writeln!(gz, "X\t300\tAC\tA\trs2\tF8").unwrap();
        gz.finish().unwrap();

        let mut reader = SiteReader::open(&path).unwrap();
        let first = reader.next_batch(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].variant_id, "1-100-A-T");
        assert_eq!(first[0].rsid, Some("rs1".to_string()));
        assert_eq!(first[1].rsid, None);
        assert_eq!(first[1].nearest_genes, None);
        let second = reader.next_batch(2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].variant_id, "X-300-AC-A");
        assert!(reader.next_batch(2).unwrap().is_empty());
    }
}
