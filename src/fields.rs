//! Field registry for association-file columns
//!
//! Every column we understand is declared here with its parser and
//! whether it is required. Files map their own header names onto these
//! canonical names through a (case-insensitive) alias table; the parsers
//! treat "NA"/"." as null and invert neg-log10 p-values at the file
//! boundary so the rest of the server only ever sees probabilities.

use crate::error::AppError;
use crate::genome;
use serde_json::Value;
use std::collections::BTreeMap;

/// How a field's raw string value is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Chrom,
    Pos,
    Allele,
    Str,
    Pval,
    Float,
    Int,
}

/// One canonical column.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// All fields an association file may carry, in output order.
pub const FIELDS: [FieldDef; 14] = [
    FieldDef { name: "chrom", kind: FieldKind::Chrom, required: true },
    FieldDef { name: "pos", kind: FieldKind::Pos, required: true },
    FieldDef { name: "ref", kind: FieldKind::Allele, required: true },
    FieldDef { name: "alt", kind: FieldKind::Allele, required: true },
    FieldDef { name: "rsids", kind: FieldKind::Str, required: false },
    FieldDef { name: "nearest_genes", kind: FieldKind::Str, required: false },
    FieldDef { name: "pval", kind: FieldKind::Pval, required: true },
    FieldDef { name: "beta", kind: FieldKind::Float, required: false },
    FieldDef { name: "sebeta", kind: FieldKind::Float, required: false },
    FieldDef { name: "af", kind: FieldKind::Float, required: false },
    FieldDef { name: "maf", kind: FieldKind::Float, required: false },
    FieldDef { name: "test", kind: FieldKind::Str, required: false },
    FieldDef { name: "imp_quality", kind: FieldKind::Float, required: false },
    FieldDef { name: "n_samples", kind: FieldKind::Int, required: false },
];

/// Look up a field definition by canonical name.
pub fn field_def(name: &str) -> Option<&'static FieldDef> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Header spellings accepted out of the box, before user aliases.
pub fn default_aliases() -> BTreeMap<String, String> {
    let pairs = [
        ("#chrom", "chrom"),
        ("chr", "chrom"),
        ("chromosome", "chrom"),
        ("bp", "pos"),
        ("position", "pos"),
        ("beg", "pos"),
        ("begin", "pos"),
        ("reference", "ref"),
        ("allele0", "ref"),
        ("alternate", "alt"),
        ("allele1", "alt"),
        ("rsid", "rsids"),
        ("pvalue", "pval"),
        ("p.value", "pval"),
        ("p", "pval"),
        ("effect_size", "beta"),
        ("se", "sebeta"),
        ("stderr", "sebeta"),
        ("a1freq", "af"),
        ("frequency", "af"),
        ("info", "imp_quality"),
        ("r2", "imp_quality"),
        ("ns", "n_samples"),
        ("samples", "n_samples"),
    ];
    let mut aliases: BTreeMap<String, String> = pairs
        .iter()
        .map(|(a, f)| (a.to_string(), f.to_string()))
        .collect();
    for field in &FIELDS {
        aliases.insert(field.name.to_string(), field.name.to_string());
    }
    aliases
}

/// Alias table resolved from the defaults plus user configuration.
///
/// Aliases beginning with `file://` designate an external R2 source for
/// `imp_quality`; they never match a header column, and their presence
/// suppresses mapping `imp_quality` from the file itself.
#[derive(Debug, Clone)]
pub struct AliasMap {
    map: BTreeMap<String, String>,
    external_imp_quality: bool,
}

impl AliasMap {
    pub fn new(user_aliases: &BTreeMap<String, String>) -> Self {
        let mut map = default_aliases();
        let mut external_imp_quality = false;
        for (alias, field) in user_aliases {
            if alias.starts_with("file://") {
                if field == "imp_quality" {
                    external_imp_quality = true;
                }
                continue;
            }
            map.insert(alias.to_lowercase(), field.to_lowercase());
        }
        Self {
            map,
            external_imp_quality,
        }
    }

    /// Canonical field for a header column, if any.
    pub fn resolve(&self, colname: &str) -> Option<&str> {
        let field = self.map.get(&colname.to_lowercase())?;
        if field == "imp_quality" && self.external_imp_quality {
            return None;
        }
        Some(field)
    }

    pub fn alias_names(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }
}

impl Default for AliasMap {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

const NULL_VALUES: [&str; 4] = ["", ".", "NA", "nan"];

/// Decodes raw column values. Carries the one piece of file-format state
/// that changes parsing: whether the pval column stores -log10(p).
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldParser {
    pub pval_is_neglog10: bool,
}

impl FieldParser {
    /// Parse one raw value. Returns `Value::Null` for the recognized null
    /// spellings of nullable kinds; the error string describes the
    /// constraint that failed (the caller attaches file/row context).
    pub fn parse(&self, def: &FieldDef, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        match def.kind {
            FieldKind::Chrom => {
                let chrom = genome::normalize_chrom(raw)
                    .map_err(|_| format!("{:?} is not a recognized chromosome", raw))?;
                Ok(Value::String(chrom.to_string()))
            }
            FieldKind::Pos => raw
                .parse::<u64>()
                .map(|pos| Value::Number(pos.into()))
                .map_err(|_| "expected a positive integer position".to_string()),
            FieldKind::Allele => {
                if raw.is_empty() {
                    return Err("allele must be non-empty".to_string());
                }
                Ok(Value::String(raw.to_uppercase()))
            }
            FieldKind::Str => Ok(Value::String(raw.to_string())),
            FieldKind::Pval => {
                if NULL_VALUES.contains(&raw) {
                    return Ok(Value::Null);
                }
                let parsed: f64 = raw
                    .parse()
                    .map_err(|_| "expected a floating-point p-value".to_string())?;
                let pval = if self.pval_is_neglog10 {
                    10f64.powf(-parsed)
                } else {
                    parsed
                };
                if !(0.0..=1.0).contains(&pval) {
                    return Err(format!("p-value {} is outside [0, 1]", pval));
                }
                Ok(float_value(pval))
            }
            FieldKind::Float => {
                if NULL_VALUES.contains(&raw) {
                    return Ok(Value::Null);
                }
                raw.parse::<f64>()
                    .map(float_value)
                    .map_err(|_| "expected a floating-point number".to_string())
            }
            FieldKind::Int => {
                if NULL_VALUES.contains(&raw) {
                    return Ok(Value::Null);
                }
                raw.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| "expected an integer".to_string())
            }
        }
    }
}

fn float_value(x: f64) -> Value {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FieldParser {
        FieldParser::default()
    }

    #[test]
    fn test_null_spellings() {
        let def = field_def("beta").unwrap();
        assert_eq!(parser().parse(def, "NA").unwrap(), Value::Null);
        assert_eq!(parser().parse(def, ".").unwrap(), Value::Null);
        assert_eq!(parser().parse(def, "").unwrap(), Value::Null);
        assert_eq!(parser().parse(def, "0.5").unwrap(), float_value(0.5));
    }

    #[test]
    fn test_pval_bounds() {
        let def = field_def("pval").unwrap();
        assert!(parser().parse(def, "1.5").is_err());
        assert!(parser().parse(def, "-0.1").is_err());
        assert_eq!(parser().parse(def, "0.25").unwrap(), float_value(0.25));
    }

    #[test]
    fn test_pval_neglog10_inverted_at_parse() {
        let parser = FieldParser {
            pval_is_neglog10: true,
        };
        let def = field_def("pval").unwrap();
        let parsed = parser.parse(def, "3").unwrap();
        let pval = parsed.as_f64().unwrap();
        assert!((pval - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_chrom_normalized() {
        let def = field_def("chrom").unwrap();
        assert_eq!(
            parser().parse(def, "chr23").unwrap(),
            Value::String("X".to_string())
        );
        assert!(parser().parse(def, "Z").is_err());
    }

    #[test]
    fn test_alias_map_resolution() {
        let map = AliasMap::default();
        assert_eq!(map.resolve("PVALUE"), Some("pval"));
        assert_eq!(map.resolve("#chrom"), Some("chrom"));
        assert_eq!(map.resolve("unmapped_column"), None);
    }

    #[test]
    fn test_file_alias_suppresses_imp_quality_column() {
        let mut user = BTreeMap::new();
        user.insert(
            "file:///data/r2.tsv,R2".to_string(),
            "imp_quality".to_string(),
        );
        let map = AliasMap::new(&user);
        assert_eq!(map.resolve("imp_quality"), None);
        assert_eq!(map.resolve("info"), None);
        assert_eq!(map.resolve("pval"), Some("pval"));
    }
}
