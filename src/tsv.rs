//! Typed delimited-row reader
//!
//! Association files are TSV, space- or comma-separated; the delimiter is
//! detected from the header line. A header is mapped to canonical field
//! names through the alias table, after which each row decodes into a
//! [`VariantRecord`]: the four coordinate fields typed, everything else
//! kept as JSON values in header-mapped order.

use crate::error::AppError;
use crate::fields::{field_def, AliasMap, FieldParser};
use serde_json::{Map, Value};

/// Detect the delimiter by counting separators in the header line.
/// Tab wins over space over comma; at least 4 separators are needed to
/// cover the required columns.
pub fn detect_delimiter(header_line: &str) -> Result<u8, AppError> {
    for delim in [b'\t', b' ', b','] {
        if header_line.bytes().filter(|&b| b == delim).count() >= 4 {
            return Ok(delim);
        }
    }
    Err(AppError::MalformedHeader(header_line.to_string()))
}

/// A header mapped onto canonical fields.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    pub delimiter: u8,
    pub colnames: Vec<String>,
    /// (canonical field name, column index), in column order.
    pub columns: Vec<(&'static str, usize)>,
}

impl HeaderMap {
    /// Parse and map a header line. The leading '#' of a commented header
    /// is stripped. Fails if any required field is unmapped, or if two
    /// columns map to the same canonical field.
    pub fn parse(header_line: &str, aliases: &AliasMap, file: &str) -> Result<Self, AppError> {
        let delimiter = detect_delimiter(header_line)?;
        let mut colnames: Vec<String> = header_line
            .trim_end_matches(['\n', '\r'])
            .split(delimiter as char)
            .map(|name| name.trim_matches(['"', '\'', ' ']).to_string())
            .collect();
        if let Some(first) = colnames.first_mut() {
            if let Some(stripped) = first.strip_prefix('#') {
                *first = stripped.to_string();
            }
        }

        let mut columns: Vec<(&'static str, usize)> = Vec::new();
        for (idx, colname) in colnames.iter().enumerate() {
            let Some(field_name) = aliases.resolve(colname) else {
                continue;
            };
            let Some(def) = field_def(field_name) else {
                continue;
            };
            if columns.iter().any(|(name, _)| *name == def.name) {
                return Err(AppError::MalformedHeader(format!(
                    "two columns of {} map to the field {:?}",
                    file, def.name
                )));
            }
            columns.push((def.name, idx));
        }

        let missing: Vec<String> = crate::fields::FIELDS
            .iter()
            .filter(|def| def.required)
            .filter(|def| !columns.iter().any(|(name, _)| *name == def.name))
            .map(|def| def.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::MissingRequiredField {
                missing,
                header: colnames,
                aliases: aliases.alias_names(),
            });
        }

        Ok(Self {
            delimiter,
            colnames,
            columns,
        })
    }
}

/// One decoded association row.
#[derive(Debug, Clone)]
pub struct VariantRecord {
    pub chrom: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt: String,
    /// All mapped fields (coordinates included) keyed by canonical name.
    pub fields: Map<String, Value>,
}

impl VariantRecord {
    pub fn pval(&self) -> Option<f64> {
        self.fields.get("pval").and_then(Value::as_f64)
    }

    pub fn af(&self) -> Option<f64> {
        self.fields.get("af").and_then(Value::as_f64)
    }

    /// Minor allele frequency, derived from af on demand.
    pub fn maf(&self) -> Option<f64> {
        self.af().map(|af| af.min(1.0 - af))
    }

    pub fn is_indel(&self) -> bool {
        self.ref_allele.len() != 1 || self.alt.len() != 1
    }

    pub fn variant_id(&self) -> String {
        format!("{}-{}-{}-{}", self.chrom, self.pos, self.ref_allele, self.alt)
    }
}

/// Decodes rows against a mapped header.
#[derive(Debug, Clone)]
pub struct RowReader {
    pub header: HeaderMap,
    parser: FieldParser,
    file: String,
}

impl RowReader {
    pub fn new(header: HeaderMap, parser: FieldParser, file: impl Into<String>) -> Self {
        Self {
            header,
            parser,
            file: file.into(),
        }
    }

    /// Decode one line. `row` is the 1-based data-row index used in error
    /// context.
    pub fn parse_line(&self, line: &str, row: u64) -> Result<VariantRecord, AppError> {
        let values: Vec<&str> = line
            .trim_end_matches(['\n', '\r'])
            .split(self.header.delimiter as char)
            .collect();
        if values.len() != self.header.colnames.len() {
            return Err(AppError::MalformedRow {
                file: self.file.clone(),
                got: values.len(),
                expected: self.header.colnames.len(),
            });
        }

        let mut fields = Map::new();
        for (name, idx) in &self.header.columns {
            let def = field_def(name).unwrap_or(&crate::fields::FIELDS[0]);
            let value =
                self.parser
                    .parse(def, values[*idx])
                    .map_err(|_| AppError::FieldParse {
                        field: name.to_string(),
                        value: values[*idx].to_string(),
                        file: self.file.clone(),
                        row,
                    })?;
            fields.insert(name.to_string(), value);
        }

        let chrom = fields
            .get("chrom")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let pos = fields.get("pos").and_then(Value::as_u64).unwrap_or(0);
        let ref_allele = fields
            .get("ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let alt = fields
            .get("alt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(VariantRecord {
            chrom,
            pos,
            ref_allele,
            alt,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "chrom\tpos\tref\talt\trsids\tnearest_genes\tpval\tbeta\tsebeta\taf";

    fn reader() -> RowReader {
        let header = HeaderMap::parse(HEADER, &AliasMap::default(), "test.tsv").unwrap();
        RowReader::new(header, FieldParser::default(), "test.tsv")
    }

    #[test]
    fn test_detect_delimiter_prefers_tab() {
        assert_eq!(detect_delimiter(HEADER).unwrap(), b'\t');
        assert_eq!(
            detect_delimiter("chrom pos ref alt pval").unwrap(),
            b' '
        );
        assert_eq!(
            detect_delimiter("chrom,pos,ref,alt,pval").unwrap(),
            b','
        );
        assert!(detect_delimiter("chrom;pos;ref").is_err());
    }

    #[test]
    fn test_header_strips_comment_marker_and_maps_aliases() {
        let header = HeaderMap::parse(
            "#chrom\tbp\treference\talternate\tpvalue",
            &AliasMap::default(),
            "x.tsv",
        )
        .unwrap();
        assert_eq!(header.colnames[0], "chrom");
        let mapped: Vec<&str> = header.columns.iter().map(|(name, _)| *name).collect();
        assert_eq!(mapped, vec!["chrom", "pos", "ref", "alt", "pval"]);
    }

    #[test]
    fn test_missing_required_field_lists_context() {
        let err = HeaderMap::parse(
            "chrom\tpos\tref\talt\tbeta",
            &AliasMap::default(),
            "x.tsv",
        )
        .unwrap_err();
        match err {
            AppError::MissingRequiredField { missing, header, .. } => {
                assert_eq!(missing, vec!["pval".to_string()]);
                assert_eq!(header.len(), 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_line_types_and_nulls() {
        let record = reader()
            .parse_line("1\t1000\tA\tT\trs1,rs2\tBRCA2\t1e-8\tNA\t0.1\t0.75", 1)
            .unwrap();
        assert_eq!(record.chrom, "1");
        assert_eq!(record.pos, 1000);
        assert_eq!(record.ref_allele, "A");
        assert_eq!(record.alt, "T");
        assert_eq!(record.pval(), Some(1e-8));
        assert_eq!(record.fields["beta"], Value::Null);
        assert_eq!(record.maf(), Some(0.25));
        assert!(!record.is_indel());
        assert_eq!(record.variant_id(), "1-1000-A-T");
    }

    #[test]
    fn test_row_width_mismatch() {
        let err = reader().parse_line("1\t1000\tA\tT", 3).unwrap_err();
        match err {
            AppError::MalformedRow { got, expected, .. } => {
                assert_eq!(got, 4);
                assert_eq!(expected, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_field_parse_error_carries_context() {
        let err = reader()
            .parse_line("1\t1000\tA\tT\t.\t.\tnot-a-pval\t0\t0\t0.5", 7)
            .unwrap_err();
        match err {
            AppError::FieldParse { field, value, row, .. } => {
                assert_eq!(field, "pval");
                assert_eq!(value, "not-a-pval");
                assert_eq!(row, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
