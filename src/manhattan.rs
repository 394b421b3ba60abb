//! Manhattan binner
//!
//! Consumes one phenotype's variants in (chromosome, position) order and
//! produces a bounded, plot-ready payload: a small set of individually
//! drawn variants (peak leads plus the strongest of the rest) and dense
//! per-3Mb bins of quantized -log10(p) values for everything else.
//!
//! Variants stronger than the peak threshold open or extend a peak; each
//! peak contributes its lead variant to a capped peak queue and demotes
//! the rest. Overflow cascades: peak queue -> unbinned queue -> bins.

use crate::error::AppError;
use crate::genome;
use crate::models::{Bin, ManhattanResult};
use crate::pq::BoundedMaxHeap;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Window width for density bins.
pub const BIN_LENGTH: u64 = 3_000_000;

/// Tuning knobs for peak detection and payload size.
#[derive(Debug, Clone)]
pub struct BinnerConfig {
    /// Variants below this p-value open or extend a peak.
    pub peak_pval_threshold: f64,
    /// Variants below this (stricter) p-value count toward a peak's size.
    pub peak_counting_pval_threshold: f64,
    /// Maximum gap (bp) between successive variants of one peak.
    pub peak_sprawl_dist: u64,
    /// Cap on the number of peak lead variants kept.
    pub peak_max_count: usize,
    /// Cap on individually drawn non-peak variants.
    pub num_unbinned: usize,
}

impl Default for BinnerConfig {
    fn default() -> Self {
        Self {
            peak_pval_threshold: 1e-6,
            peak_counting_pval_threshold: 5e-8,
            peak_sprawl_dist: 200_000,
            peak_max_count: 500,
            num_unbinned: 500,
        }
    }
}

impl BinnerConfig {
    /// Counting must be stricter than peak-extending.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.peak_counting_pval_threshold >= self.peak_pval_threshold {
            return Err(AppError::Config(format!(
                "peak_counting_pval_threshold ({}) must be below peak_pval_threshold ({})",
                self.peak_counting_pval_threshold, self.peak_pval_threshold
            )));
        }
        Ok(())
    }
}

/// Quantized -log10(p), kept as an exact integer key so bins can dedup
/// and sort without comparing floats. `Inf` marks pval == 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Qval {
    Millis(u64),
    Inf,
}

impl Qval {
    fn as_f64(self) -> f64 {
        match self {
            Qval::Millis(m) => m as f64 / 1000.0,
            Qval::Inf => f64::INFINITY,
        }
    }
}

struct BinAccum {
    chrom: String,
    qvals: BTreeSet<Qval>,
}

pub struct Binner {
    cfg: BinnerConfig,
    qval_bin_size: f64,
    peak_best: Option<Map<String, Value>>,
    peak_last_chrpos: Option<(usize, u64)>,
    num_significant_in_current_peak: u64,
    peak_pq: BoundedMaxHeap<Map<String, Value>>,
    unbinned_pq: BoundedMaxHeap<Map<String, Value>>,
    bins: BTreeMap<usize, BTreeMap<u64, BinAccum>>,
    prev_chrpos: Option<(usize, u64)>,
}

impl Binner {
    pub fn new(cfg: BinnerConfig) -> Result<Self, AppError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            // 200 bins for the minimum y-axis covering 0-10
            qval_bin_size: 0.05,
            peak_best: None,
            peak_last_chrpos: None,
            num_significant_in_current_peak: 0,
            peak_pq: BoundedMaxHeap::new(),
            unbinned_pq: BoundedMaxHeap::new(),
            bins: BTreeMap::new(),
            prev_chrpos: None,
        })
    }

    /// Feed one variant. `payload` is the full row (it must include the
    /// "pval" key) and is what reappears in the output; `chrom`/`pos`/
    /// `pval` are passed typed so the caller decides how rows decode.
    pub fn process_variant(
        &mut self,
        chrom: &str,
        pos: u64,
        pval: f64,
        payload: Map<String, Value>,
    ) -> Result<(), AppError> {
        let chrom_idx = genome::chrom_index(chrom)?;
        if let Some((prev_idx, prev_pos)) = self.prev_chrpos {
            if chrom_idx < prev_idx || (chrom_idx == prev_idx && pos < prev_pos) {
                return Err(AppError::InputOrderViolation {
                    prev: format!("{}:{}", genome::CHROM_ORDER[prev_idx], prev_pos),
                    next: format!("{}:{}", chrom, pos),
                });
            }
        }
        self.prev_chrpos = Some((chrom_idx, pos));

        if pval != 0.0 {
            let qval = -pval.log10();
            // widen (never shrink) so the y-axis keeps ~200-400 bins
            if qval > 40.0 {
                self.qval_bin_size = self.qval_bin_size.max(0.2);
            } else if qval > 20.0 {
                self.qval_bin_size = self.qval_bin_size.max(0.1);
            }
        }

        if pval < self.cfg.peak_pval_threshold {
            let extends = matches!(
                self.peak_last_chrpos,
                Some((last_idx, last_pos))
                    if last_idx == chrom_idx && pos <= last_pos + self.cfg.peak_sprawl_dist
            );
            if self.peak_best.is_none() {
                self.open_peak(chrom_idx, pos, pval, payload);
            } else if extends {
                if pval < self.cfg.peak_counting_pval_threshold {
                    self.num_significant_in_current_peak += 1;
                }
                self.peak_last_chrpos = Some((chrom_idx, pos));
                let best_pval = self
                    .peak_best
                    .as_ref()
                    .map(payload_pval)
                    .unwrap_or(f64::INFINITY);
                if pval < best_pval {
                    let old_best = self.peak_best.replace(payload).unwrap_or_default();
                    self.push_unbinned(old_best, best_pval);
                } else {
                    self.push_unbinned(payload, pval);
                }
            } else {
                self.close_peak();
                self.open_peak(chrom_idx, pos, pval, payload);
            }
        } else {
            self.push_unbinned(payload, pval);
        }
        Ok(())
    }

    fn open_peak(&mut self, chrom_idx: usize, pos: u64, pval: f64, payload: Map<String, Value>) {
        self.peak_best = Some(payload);
        self.peak_last_chrpos = Some((chrom_idx, pos));
        self.num_significant_in_current_peak =
            u64::from(pval < self.cfg.peak_counting_pval_threshold);
    }

    fn close_peak(&mut self) {
        let Some(mut best) = self.peak_best.take() else {
            return;
        };
        best.insert(
            "num_significant_in_peak".to_string(),
            Value::Number(self.num_significant_in_current_peak.into()),
        );
        let pval = payload_pval(&best);
        let mut evicted = None;
        self.peak_pq
            .add_capped(best, pval, self.cfg.peak_max_count, |v| evicted = Some(v));
        if let Some(payload) = evicted {
            let pval = payload_pval(&payload);
            self.push_unbinned(payload, pval);
        }
    }

    fn push_unbinned(&mut self, payload: Map<String, Value>, pval: f64) {
        let mut evicted = None;
        self.unbinned_pq
            .add_capped(payload, pval, self.cfg.num_unbinned, |v| evicted = Some(v));
        if let Some(payload) = evicted {
            self.bin_variant(&payload);
        }
    }

    fn bin_variant(&mut self, payload: &Map<String, Value>) {
        let chrom = payload
            .get("chrom")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Ok(chrom_idx) = genome::chrom_index(&chrom) else {
            return;
        };
        let pos = payload.get("pos").and_then(Value::as_u64).unwrap_or(0);
        let pval = payload_pval(payload);

        let qval = if pval == 0.0 {
            Qval::Inf
        } else {
            self.quantize(-pval.log10())
        };
        self.bins
            .entry(chrom_idx)
            .or_default()
            .entry(pos / BIN_LENGTH)
            .or_insert_with(|| BinAccum {
                chrom,
                qvals: BTreeSet::new(),
            })
            .qvals
            .insert(qval);
    }

    /// Round down to the current qval bin, then center within it; 3
    /// decimals keeps the payload compact.
    fn quantize(&self, qval: f64) -> Qval {
        if !qval.is_finite() {
            return Qval::Inf;
        }
        let centered =
            (qval / self.qval_bin_size).floor() * self.qval_bin_size + self.qval_bin_size / 2.0;
        Qval::Millis((centered * 1000.0).round() as u64)
    }

    /// Close any open peak and assemble the result. Consumes the binner.
    pub fn finish(mut self) -> ManhattanResult {
        self.close_peak();

        let mut unbinned: Vec<Map<String, Value>> = Vec::new();
        let mut peaks: Vec<Map<String, Value>> = self.peak_pq.drain().collect();
        for peak in &mut peaks {
            peak.insert("peak".to_string(), Value::Bool(true));
        }
        unbinned.extend(self.unbinned_pq.drain());
        unbinned.extend(peaks);
        unbinned.sort_by(|a, b| payload_pval(a).total_cmp(&payload_pval(b)));

        let mut variant_bins = Vec::new();
        for chrom_bins in self.bins.values() {
            for (bin_id, accum) in chrom_bins {
                let (qvals, qval_extents) = compress_qvals(&accum.qvals, self.qval_bin_size);
                variant_bins.push(Bin {
                    chrom: accum.chrom.clone(),
                    pos: bin_id * BIN_LENGTH + BIN_LENGTH / 2,
                    qvals,
                    qval_extents,
                });
            }
        }

        ManhattanResult {
            variant_bins,
            unbinned_variants: unbinned,
            weakest_pval: None,
        }
    }
}

fn payload_pval(payload: &Map<String, Value>) -> f64 {
    payload
        .get("pval")
        .and_then(Value::as_f64)
        .unwrap_or(f64::NAN)
}

/// Re-round stored qvals with the final bin size, then collapse runs of
/// near-adjacent values (gap within 1.1 bins) into (low, high) extents;
/// singletons stay in the plain list.
fn compress_qvals(qvals: &BTreeSet<Qval>, bin_size: f64) -> (Vec<f64>, Vec<(f64, f64)>) {
    let rounded: BTreeSet<Qval> = qvals
        .iter()
        .map(|q| match q {
            Qval::Inf => Qval::Inf,
            Qval::Millis(m) => {
                let centered =
                    (*m as f64 / 1000.0 / bin_size).floor() * bin_size + bin_size / 2.0;
                Qval::Millis((centered * 1000.0).round() as u64)
            }
        })
        .collect();

    let mut extents: Vec<(f64, f64)> = Vec::new();
    for q in rounded {
        let q = q.as_f64();
        match extents.last_mut() {
            Some((_, high)) if q <= *high + bin_size * 1.1 => *high = q,
            _ => extents.push((q, q)),
        }
    }

    let mut singles = Vec::new();
    let mut ranges = Vec::new();
    for (low, high) in extents {
        if low == high {
            singles.push(low);
        } else {
            ranges.push((low, high));
        }
    }
    (singles, ranges)
}
