//! Indexed region reads over block-compressed TSV files
//!
//! Sumstats files are bgzip-compressed and position-sorted with an
//! adjacent tabix index (`<file>.tbi`). A reader resolves a region to
//! index chunks, seeks each chunk's virtual start, and scans lines until
//! the chunk's virtual end, so a region fetch never touches more than a
//! few compressed blocks regardless of file size.

use crate::error::AppError;
use crate::fields::{AliasMap, FieldParser};
use crate::tsv::{HeaderMap, RowReader, VariantRecord};
use noodles_bgzf as bgzf;
use noodles_core::region::Interval;
use noodles_core::Position;
use noodles_csi::BinningIndex;
use noodles_tabix as tabix;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Low-level line access: bgzf reader + tabix index, no column typing.
pub struct TabixLineReader {
    path: PathBuf,
    reader: bgzf::Reader<File>,
    index: tabix::Index,
}

impl std::fmt::Debug for TabixLineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabixLineReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TabixLineReader {
    /// Open `<path>` and its `<path>.tbi` index. The first line of the
    /// file (the header) is left for the caller to read via
    /// [`read_header_line`](Self::read_header_line).
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let reader = bgzf::Reader::new(file);
        let index_path = PathBuf::from(format!("{}.tbi", path.display()));
        let index = tabix::read(&index_path)
            .map_err(|e| AppError::IndexRead(format!("{}: {}", index_path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            index,
        })
    }

    /// Read the first line of the file (seeks to the start).
    pub fn read_header_line(&mut self) -> Result<String, AppError> {
        self.reader
            .seek(bgzf::VirtualPosition::default())
            .map_err(AppError::Io)?;
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        Ok(line)
    }

    /// All data lines overlapping the 1-based half-open interval
    /// [start, end) on `chrom`. Unknown chromosomes and empty intervals
    /// yield an empty vec; `start` is clamped to 1.
    pub fn region_lines(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<String>, AppError> {
        let start = start.max(1);
        if start >= end {
            return Ok(Vec::new());
        }

        let Some(header) = self.index.header() else {
            return Err(AppError::IndexRead(format!(
                "{}.tbi has no tabix header",
                self.path.display()
            )));
        };
        let Some(ref_id) = header.reference_sequence_names().get_index_of(chrom) else {
            return Ok(Vec::new());
        };

        let region_err = |chrom: &str| AppError::RegionRead {
            chrom: chrom.to_string(),
            start,
            end,
            file: self.path.display().to_string(),
        };

        let interval_start =
            Position::try_from(start as usize).map_err(|_| region_err(chrom))?;
        let interval_end =
            Position::try_from((end - 1) as usize).map_err(|_| region_err(chrom))?;
        let interval = Interval::from(interval_start..=interval_end);
        let chunks = self
            .index
            .query(ref_id, interval)
            .map_err(|_| region_err(chrom))?;

        let mut lines = Vec::new();
        for chunk in chunks {
            self.reader.seek(chunk.start()).map_err(AppError::Io)?;
            while self.reader.virtual_position() < chunk.end() {
                let mut line = String::new();
                if self.reader.read_line(&mut line)? == 0 {
                    break;
                }
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                lines.push(trimmed.to_string());
            }
        }
        Ok(lines)
    }
}

/// Typed region reads: a [`TabixLineReader`] whose rows decode through
/// the column registry.
pub struct IndexedVariantReader {
    lines: TabixLineReader,
    rows: RowReader,
}

impl IndexedVariantReader {
    pub fn open(path: &Path, aliases: &AliasMap, parser: FieldParser) -> Result<Self, AppError> {
        let mut lines = TabixLineReader::open(path)?;
        let header_line = lines.read_header_line()?;
        let file = path.display().to_string();
        let header = HeaderMap::parse(&header_line, aliases, &file)?;
        let rows = RowReader::new(header, parser, file);
        Ok(Self { lines, rows })
    }

    /// Variants in [start, end) on `chrom`, in file order. Rows from
    /// block edges that fall outside the interval are dropped; a row
    /// that fails to parse aborts the fetch.
    pub fn get_region(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<VariantRecord>, AppError> {
        let mut records = Vec::new();
        for (idx, line) in self
            .lines
            .region_lines(chrom, start, end)?
            .iter()
            .enumerate()
        {
            let record = self.rows.parse_line(line, idx as u64 + 1)?;
            if record.chrom == chrom && record.pos >= start.max(1) && record.pos < end {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Exact (chrom, pos, ref, alt) lookup.
    pub fn get_variant(
        &mut self,
        chrom: &str,
        pos: u64,
        ref_allele: &str,
        alt: &str,
    ) -> Result<Option<VariantRecord>, AppError> {
        let records = self.get_region(chrom, pos, pos + 1)?;
        Ok(records
            .into_iter()
            .find(|r| r.pos == pos && r.ref_allele == ref_allele && r.alt == alt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_index_is_an_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.gz");
        std::fs::write(&path, b"").unwrap();
        let err = TabixLineReader::open(&path).unwrap_err();
        assert!(matches!(err, AppError::IndexRead(_)));
    }

    #[test]
    fn test_missing_file_is_io() {
        let err = TabixLineReader::open(Path::new("/nonexistent/pheno.gz")).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
