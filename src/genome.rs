//! Genomic coordinate utilities
//!
//! Chromosomes have a fixed total order: 1..22, X, Y, MT. Alias forms
//! ("chr1", "23", "M", ...) are normalized to the canonical name before
//! any comparison; anything outside the canonical set is rejected.

use crate::error::AppError;

/// Canonical chromosome names, in plotting order.
pub const CHROM_ORDER: [&str; 25] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

/// Normalize a chromosome name to its canonical form.
///
/// Strips any number of "chr" prefixes and maps the numeric and
/// mitochondrial aliases: 23 -> X, 24 -> Y, 25 -> MT, M -> MT.
pub fn normalize_chrom(chrom: &str) -> Result<&'static str, AppError> {
    let mut name = chrom;
    while let Some(stripped) = name
        .strip_prefix("chr")
        .or_else(|| name.strip_prefix("CHR"))
    {
        name = stripped;
    }
    let name = match name {
        "23" => "X",
        "24" => "Y",
        "25" | "M" => "MT",
        other => other,
    };
    CHROM_ORDER
        .iter()
        .find(|&&canonical| canonical == name)
        .copied()
        .ok_or_else(|| AppError::UnknownChromosome(chrom.to_string()))
}

/// Index of a chromosome within the fixed order.
pub fn chrom_index(chrom: &str) -> Result<usize, AppError> {
    let canonical = normalize_chrom(chrom)?;
    Ok(CHROM_ORDER
        .iter()
        .position(|&c| c == canonical)
        .unwrap_or(usize::MAX))
}

/// A variant coordinate parsed from a canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantCoord {
    pub chrom: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt: String,
}

impl VariantCoord {
    /// Canonical dash-joined id, e.g. "1-196698298-A-T".
    pub fn id(&self) -> String {
        format!("{}-{}-{}-{}", self.chrom, self.pos, self.ref_allele, self.alt)
    }
}

/// Parse a variant id "chrom-pos-ref-alt" (also accepts a "chr" prefix).
/// Alleles are uppercased.
pub fn parse_variant_id(variant_id: &str) -> Result<VariantCoord, AppError> {
    let parts: Vec<&str> = variant_id.split('-').collect();
    if parts.len() != 4 {
        return Err(AppError::BadRequest(format!(
            "Invalid variant id {:?}. Expected chrom-pos-ref-alt",
            variant_id
        )));
    }
    let chrom = normalize_chrom(parts[0])?;
    let pos: u64 = parts[1].parse().map_err(|_| {
        AppError::BadRequest(format!("Invalid position in variant id: {:?}", parts[1]))
    })?;
    Ok(VariantCoord {
        chrom: chrom.to_string(),
        pos,
        ref_allele: parts[2].to_uppercase(),
        alt: parts[3].to_uppercase(),
    })
}

/// Parse a region string "chrom:start-end" (strict form).
pub fn parse_region(region: &str) -> Result<(String, u64, u64), AppError> {
    let (chrom_part, range_part) = region.split_once(':').ok_or_else(|| {
        AppError::BadRequest(format!(
            "Invalid region {:?}. Expected chrom:start-end",
            region
        ))
    })?;
    let (start_part, end_part) = range_part.split_once('-').ok_or_else(|| {
        AppError::BadRequest(format!(
            "Invalid range in region {:?}. Expected start-end",
            region
        ))
    })?;
    let chrom = normalize_chrom(chrom_part)?;
    let start: u64 = start_part
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid start position: {:?}", start_part)))?;
    let end: u64 = end_part
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid end position: {:?}", end_part)))?;
    Ok((chrom.to_string(), start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_chrom() {
        assert_eq!(normalize_chrom("1").unwrap(), "1");
        assert_eq!(normalize_chrom("chr22").unwrap(), "22");
        assert_eq!(normalize_chrom("23").unwrap(), "X");
        assert_eq!(normalize_chrom("chr23").unwrap(), "X");
        assert_eq!(normalize_chrom("M").unwrap(), "MT");
        assert_eq!(normalize_chrom("chrchrX").unwrap(), "X");
        assert!(normalize_chrom("Z").is_err());
        assert!(normalize_chrom("26").is_err());
    }

    #[test]
    fn test_chrom_index_orders_after_autosomes() {
        assert_eq!(chrom_index("1").unwrap(), 0);
        assert_eq!(chrom_index("22").unwrap(), 21);
        assert_eq!(chrom_index("X").unwrap(), 22);
        assert_eq!(chrom_index("MT").unwrap(), 24);
        assert!(chrom_index("2").unwrap() < chrom_index("10").unwrap());
    }

    #[test]
    fn test_parse_variant_id_roundtrip() {
        let coord = parse_variant_id("1-196698298-A-T").unwrap();
        assert_eq!(coord.id(), "1-196698298-A-T");

        let coord = parse_variant_id("chr22-1000-acgt-g").unwrap();
        assert_eq!(coord.id(), "22-1000-ACGT-G");
    }

    #[test]
    fn test_parse_variant_id_rejects_bad_forms() {
        assert!(parse_variant_id("1-196698298-A").is_err());
        assert!(parse_variant_id("Z-5-A-T").is_err());
        assert!(parse_variant_id("1-xyz-A-T").is_err());
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(
            parse_region("1:100-200").unwrap(),
            ("1".to_string(), 100, 200)
        );
        assert_eq!(
            parse_region("chrX:5-10").unwrap(),
            ("X".to_string(), 5, 10)
        );
        assert!(parse_region("1:100").is_err());
        assert!(parse_region("100-200").is_err());
    }
}
