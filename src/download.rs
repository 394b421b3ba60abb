//! Filtered sumstats export
//!
//! Two consumers share the MAF/indel predicate: the streaming download
//! (decompress, filter, re-emit as chunked text without ever holding the
//! file in memory) and `extract_variants`, which funnels the filtered
//! rows of a best-of file through the Manhattan binner.

use crate::error::AppError;
use crate::fields::{AliasMap, FieldParser};
use crate::manhattan::{Binner, BinnerConfig};
use crate::models::ManhattanResult;
use crate::tsv::{HeaderMap, RowReader};
use async_compression::tokio::bufread::GzipDecoder;
use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Indel selector for the download filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndelMode {
    /// Keep everything.
    #[default]
    Both,
    /// Keep only indels (ref or alt longer than one base).
    True,
    /// Keep only SNVs.
    False,
}

impl IndelMode {
    pub fn accepts(&self, ref_allele: &str, alt: &str) -> bool {
        match self {
            IndelMode::Both => true,
            IndelMode::True => ref_allele.len() != 1 || alt.len() != 1,
            IndelMode::False => ref_allele.len() == 1 && alt.len() == 1,
        }
    }
}

/// MAF window plus indel selector, as supplied by the query string.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FilterOptions {
    #[serde(default)]
    pub min_maf: f64,
    #[serde(default = "FilterOptions::default_max_maf")]
    pub max_maf: f64,
    #[serde(default)]
    pub indel: IndelMode,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            min_maf: 0.0,
            max_maf: 0.5,
            indel: IndelMode::Both,
        }
    }
}

impl FilterOptions {
    fn default_max_maf() -> f64 {
        0.5
    }

    /// The no-op filter streams the file through unchanged.
    pub fn is_active(&self) -> bool {
        self.indel != IndelMode::Both || self.min_maf != 0.0 || self.max_maf != 0.5
    }

    pub fn accepts(&self, maf: f64, ref_allele: &str, alt: &str) -> bool {
        maf > self.min_maf && maf < self.max_maf && self.indel.accepts(ref_allele, alt)
    }
}

/// Column positions needed to evaluate the filter on a raw row.
struct RowFilterPlan {
    ncols: usize,
    af_idx: usize,
    ref_idx: usize,
    alt_idx: usize,
    filter: FilterOptions,
    file: String,
}

impl RowFilterPlan {
    fn from_header(header_line: &str, filter: FilterOptions, file: &str) -> Result<Self, AppError> {
        let colnames: Vec<&str> = header_line.trim_end_matches(['\n', '\r']).split('\t').collect();
        let find = |name: &str| {
            colnames
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| AppError::MissingRequiredField {
                    missing: vec![name.to_string()],
                    header: colnames.iter().map(|s| s.to_string()).collect(),
                    aliases: Vec::new(),
                })
        };
        Ok(Self {
            ncols: colnames.len(),
            af_idx: find("af")?,
            ref_idx: find("ref")?,
            alt_idx: find("alt")?,
            filter,
            file: file.to_string(),
        })
    }

    /// Append maf to a row that passes the filter; `None` for filtered-out
    /// rows. Malformed rows abort the stream.
    fn evaluate(&self, line: &str, row: u64) -> Result<Option<String>, AppError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Ok(None);
        }
        let values: Vec<&str> = line.split('\t').collect();
        if values.len() != self.ncols {
            return Err(AppError::MalformedRow {
                file: self.file.clone(),
                got: values.len(),
                expected: self.ncols,
            });
        }
        let af: f64 = values[self.af_idx]
            .parse()
            .map_err(|_| AppError::FieldParse {
                field: "af".to_string(),
                value: values[self.af_idx].to_string(),
                file: self.file.clone(),
                row,
            })?;
        let maf = af.min(1.0 - af);
        if self.filter.is_active() && !self.filter.accepts(maf, values[self.ref_idx], values[self.alt_idx])
        {
            return Ok(None);
        }
        Ok(Some(format!("{}\t{}\n", line, maf)))
    }
}

struct StreamState {
    lines: Lines<BufReader<GzipDecoder<BufReader<tokio::fs::File>>>>,
    plan: RowFilterPlan,
    pending_header: Option<String>,
    row: u64,
}

const CHUNK_BYTES: usize = 64 * 1024;

/// Build the chunked download response for one sumstats file. The body is
/// produced lazily so the HTTP layer gets backpressure; dropping the
/// response mid-stream drops the decoder and file handle with it.
pub async fn sumstats_response(
    path: &Path,
    filter: FilterOptions,
    filename_base: &str,
) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("no sumstats for {:?}", filename_base))
        } else {
            AppError::Io(e)
        }
    })?;
    let mut decoder = GzipDecoder::new(BufReader::new(file));
    // bgzip files are concatenated gzip members
    decoder.multiple_members(true);
    let mut lines = BufReader::new(decoder).lines();

    let header_line = lines
        .next_line()
        .await?
        .ok_or_else(|| AppError::MalformedHeader(format!("{} is empty", path.display())))?;
    let plan = RowFilterPlan::from_header(&header_line, filter, &path.display().to_string())?;

    let disposition = if filter.is_active() {
        format!("attachment; filename=filtered-{}.txt", filename_base)
    } else {
        format!("attachment; filename={}.txt", filename_base)
    };
    let pending_header = format!("{}\tmaf\n", header_line.trim_end_matches(['\n', '\r']));

    let state = StreamState {
        lines,
        plan,
        pending_header: Some(pending_header),
        row: 0,
    };
    let stream = futures::stream::try_unfold(state, |mut state| async move {
        if let Some(header) = state.pending_header.take() {
            return Ok::<_, AppError>(Some((Bytes::from(header), state)));
        }
        let mut chunk = String::new();
        while chunk.len() < CHUNK_BYTES {
            match state.lines.next_line().await? {
                None => break,
                Some(line) => {
                    state.row += 1;
                    if let Some(out) = state.plan.evaluate(&line, state.row)? {
                        chunk.push_str(&out);
                    }
                }
            }
        }
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some((Bytes::from(chunk), state)))
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Config(format!("failed to build response: {}", e)))
}

/// Read a best-of file, filter, and bin. `weakest_pval` spans every row
/// of the file, filtered or not, so the plot's y-axis range is stable
/// across filter settings.
pub fn extract_variants(
    path: &Path,
    filter: FilterOptions,
    cfg: BinnerConfig,
    aliases: &AliasMap,
    parser: FieldParser,
) -> Result<ManhattanResult, AppError> {
    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("no best-of data at {}", path.display()))
        } else {
            AppError::Io(e)
        }
    })?;
    let mut reader = std::io::BufReader::new(file);
    let mut header_line = String::new();
    reader.read_line(&mut header_line)?;
    let file_name = path.display().to_string();
    let header = HeaderMap::parse(&header_line, aliases, &file_name)?;
    let rows = RowReader::new(header, parser, file_name.as_str());

    let mut binner = Binner::new(cfg)?;
    let mut weakest_pval: Option<f64> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = rows.parse_line(&line, idx as u64 + 1)?;
        let Some(pval) = record.pval() else {
            continue;
        };
        weakest_pval = Some(weakest_pval.map_or(pval, |w: f64| w.max(pval)));

        let Some(maf) = record.maf() else {
            continue;
        };
        if !filter.accepts(maf, &record.ref_allele, &record.alt) {
            continue;
        }
        let mut payload = record.fields.clone();
        payload.insert(
            "maf".to_string(),
            serde_json::Number::from_f64(maf)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        );
        binner.process_variant(&record.chrom, record.pos, pval, payload)?;
    }

    let mut result = binner.finish();
    result.weakest_pval = weakest_pval;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_indel_modes() {
        assert!(IndelMode::Both.accepts("A", "T"));
        assert!(IndelMode::Both.accepts("AC", "T"));
        assert!(IndelMode::True.accepts("AC", "T"));
        assert!(!IndelMode::True.accepts("A", "T"));
        assert!(IndelMode::False.accepts("A", "T"));
        assert!(!IndelMode::False.accepts("A", "TG"));
    }

    #[test]
    fn test_filter_window_is_exclusive() {
        let filter = FilterOptions {
            min_maf: 0.01,
            max_maf: 0.5,
            indel: IndelMode::Both,
        };
        assert!(!filter.accepts(0.01, "A", "T"));
        assert!(!filter.accepts(0.5, "A", "T"));
        assert!(filter.accepts(0.49, "A", "T"));
    }

    #[test]
    fn test_row_plan_appends_maf() {
        let plan = RowFilterPlan::from_header(
            "chrom\tpos\tref\talt\trsids\tnearest_genes\tpval\tbeta\tsebeta\taf",
            FilterOptions::default(),
            "x.gz",
        )
        .unwrap();
        let out = plan
            .evaluate("1\t10\tA\tT\t.\t.\t0.5\t0\t0\t0.51", 1)
            .unwrap()
            .unwrap();
        assert!(out.ends_with("\t0.49\n"));

        // inactive filter keeps every row
        let out = plan.evaluate("1\t10\tA\tT\t.\t.\t0.5\t0\t0\t0.001", 2).unwrap();
        assert!(out.is_some());
    }

    #[test]
    fn test_row_plan_filters() {
        let plan = RowFilterPlan::from_header(
            "chrom\tpos\tref\talt\taf",
            FilterOptions {
                min_maf: 0.01,
                max_maf: 0.5,
                indel: IndelMode::False,
            },
            "x.gz",
        )
        .unwrap();
        // af 0.49 and 0.51 both give maf 0.49 -> pass
        assert!(plan.evaluate("1\t10\tA\tT\t0.49", 1).unwrap().is_some());
        assert!(plan.evaluate("1\t10\tA\tT\t0.51", 2).unwrap().is_some());
        // rare variant fails the window, indel fails the mode
        assert!(plan.evaluate("1\t10\tA\tT\t0.001", 3).unwrap().is_none());
        assert!(plan.evaluate("1\t10\tAC\tT\t0.49", 4).unwrap().is_none());
    }

    #[test]
    fn test_row_plan_rejects_ragged_rows() {
        let plan = RowFilterPlan::from_header(
            "chrom\tpos\tref\talt\taf",
            FilterOptions::default(),
            "x.gz",
        )
        .unwrap();
        assert!(matches!(
            plan.evaluate("1\t10\tA", 1),
            Err(AppError::MalformedRow { .. })
        ));
    }

    #[test]
    fn test_extract_variants_bins_and_tracks_weakest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HEIGHT.european.male");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "chrom\tpos\tref\talt\trsids\tnearest_genes\tpval\tbeta\tsebeta\taf").unwrap();
        writeln!(f, "1\t1000\tA\tT\trs1\tG1\t1e-9\t0.1\t0.01\t0.3").unwrap();
        writeln!(f, "1\t2000\tAC\tT\trs2\tG2\t1e-8\t0.1\t0.01\t0.3").unwrap();
        writeln!(f, "2\t5000\tA\tT\trs3\tG3\t0.9\t0.0\t0.01\t0.001").unwrap();
        drop(f);

        let filter = FilterOptions {
            min_maf: 0.01,
            max_maf: 0.5,
            indel: IndelMode::False,
        };
        let result = extract_variants(
            &path,
            filter,
            BinnerConfig::default(),
            &AliasMap::default(),
            FieldParser::default(),
        )
        .unwrap();

        // only the chr1 SNV passes the filter; weakest spans all rows
        assert_eq!(result.unbinned_variants.len(), 1);
        assert_eq!(
            result.unbinned_variants[0]["pos"],
            serde_json::json!(1000)
        );
        assert!(result.unbinned_variants[0].contains_key("maf"));
        assert_eq!(result.weakest_pval, Some(0.9));
    }
}
