//! Server configuration
//!
//! Loaded once at startup from an optional TOML file plus environment
//! overrides, validated, and then injected immutably into the app state.
//! Changing configuration requires a restart.

use crate::error::AppError;
use crate::fields::{AliasMap, FieldParser};
use crate::manhattan::BinnerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Manhattan binner tuning (see [`BinnerConfig`] for semantics).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManhattanSettings {
    pub peak_pval_threshold: f64,
    pub peak_counting_pval_threshold: f64,
    pub peak_sprawl_dist: u64,
    pub peak_max_count: usize,
    pub num_unbinned: usize,
}

impl Default for ManhattanSettings {
    fn default() -> Self {
        let cfg = BinnerConfig::default();
        Self {
            peak_pval_threshold: cfg.peak_pval_threshold,
            peak_counting_pval_threshold: cfg.peak_counting_pval_threshold,
            peak_sprawl_dist: cfg.peak_sprawl_dist,
            peak_max_count: cfg.peak_max_count,
            num_unbinned: cfg.num_unbinned,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Installation root; resources live under it.
    pub base_dir: PathBuf,
    /// Generated data root; defaults to `<base_dir>/generated-by-pheweb`.
    pub data_dir: Option<PathBuf>,
    pub hg_build_number: u32,
    pub dbsnp_version: Option<String>,
    pub gencode_version: u32,
    /// Acceptable values of the `test` column in regular association rows.
    pub assoc_test_name: Vec<String>,
    /// Test value marking interaction rows; disjoint from the regular set.
    pub interaction_test_name: Option<String>,
    pub assoc_min_maf: f64,
    pub interaction_min_mac: Option<u64>,
    pub interaction_min_maf: Option<f64>,
    /// Input pval columns store -log10(p); inverted at the file boundary.
    pub pval_is_neglog10: bool,
    pub min_imp_quality: f64,
    pub enable_stratifications: bool,
    pub cors_origins: Vec<String>,
    pub host: String,
    pub port: u16,
    pub enable_debug: bool,
    pub manhattan: ManhattanSettings,
    /// Extra header-name aliases, case-insensitive. Keys starting with
    /// `file://PATH,FIELD` map an external quality file to imp_quality.
    pub field_aliases: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            data_dir: None,
            hg_build_number: 38,
            dbsnp_version: None,
            gencode_version: 37,
            assoc_test_name: vec!["ADD".to_string()],
            interaction_test_name: None,
            assoc_min_maf: 0.0,
            interaction_min_mac: None,
            interaction_min_maf: None,
            pval_is_neglog10: false,
            min_imp_quality: 0.3,
            enable_stratifications: true,
            cors_origins: Vec::new(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_debug: false,
            manhattan: ManhattanSettings::default(),
            field_aliases: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from the given TOML file (or defaults), then apply
    /// environment overrides and validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    AppError::Config(format!("cannot parse {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };

        if let Ok(base_dir) = env::var("PHEWEB_BASE_DIR") {
            config.base_dir = PathBuf::from(base_dir);
        }
        if let Ok(data_dir) = env::var("PHEWEB_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| AppError::Config(format!("invalid PORT {:?}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !matches!(self.hg_build_number, 19 | 38) {
            return Err(AppError::Config(format!(
                "hg_build_number must be 19 or 38, got {}",
                self.hg_build_number
            )));
        }
        if self.interaction_min_mac.is_some() && self.interaction_min_maf.is_some() {
            return Err(AppError::Config(
                "interaction_min_mac and interaction_min_maf are mutually exclusive; set only one"
                    .to_string(),
            ));
        }
        if let Some(interaction) = &self.interaction_test_name {
            if self.assoc_test_name.iter().any(|t| t == interaction) {
                return Err(AppError::Config(format!(
                    "interaction_test_name {:?} collides with assoc_test_name",
                    interaction
                )));
            }
        }
        self.binner_config().validate()?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("generated-by-pheweb"))
    }

    pub fn manhattan_dir(&self) -> PathBuf {
        self.data_dir().join("manhattan")
    }

    pub fn qq_dir(&self) -> PathBuf {
        self.data_dir().join("qq")
    }

    pub fn pheno_gz_dir(&self) -> PathBuf {
        self.data_dir().join("pheno_gz")
    }

    pub fn interaction_dir(&self) -> PathBuf {
        self.data_dir().join("interaction")
    }

    pub fn best_of_pheno_dir(&self) -> PathBuf {
        self.data_dir().join("best_of_pheno")
    }

    pub fn matrix_dir(&self) -> PathBuf {
        self.data_dir().join("matrix-stratified")
    }

    pub fn best_phenos_db_path(&self) -> PathBuf {
        self.data_dir().join("best-phenos-by-gene.sqlite3")
    }

    pub fn gene_bed_path(&self) -> PathBuf {
        self.base_dir.join("resources").join(format!(
            "genes-v{}-hg{}.bed",
            self.gencode_version, self.hg_build_number
        ))
    }

    /// Sumstats file for (phenocode, stratification). Interaction result
    /// suffixes select the interaction directory.
    pub fn sumstats_path(&self, phenocode: &str, stratification: Option<&str>) -> PathBuf {
        match stratification {
            Some(strat) if strat.contains("interaction-") => self
                .interaction_dir()
                .join(format!("{}{}.gz", phenocode, strat)),
            _ => self
                .pheno_gz_dir()
                .join(format!("{}.gz", pheno_file_id(phenocode, stratification))),
        }
    }

    pub fn binner_config(&self) -> BinnerConfig {
        BinnerConfig {
            peak_pval_threshold: self.manhattan.peak_pval_threshold,
            peak_counting_pval_threshold: self.manhattan.peak_counting_pval_threshold,
            peak_sprawl_dist: self.manhattan.peak_sprawl_dist,
            peak_max_count: self.manhattan.peak_max_count,
            num_unbinned: self.manhattan.num_unbinned,
        }
    }

    pub fn field_parser(&self) -> FieldParser {
        FieldParser {
            pval_is_neglog10: self.pval_is_neglog10,
        }
    }

    pub fn alias_map(&self) -> AliasMap {
        AliasMap::new(&self.field_aliases)
    }
}

/// Dot-joined file id for (phenocode, stratification), tolerating a
/// leading '.' on the stratification suffix.
pub fn pheno_file_id(phenocode: &str, stratification: Option<&str>) -> String {
    match stratification {
        None | Some("") => phenocode.to_string(),
        Some(strat) => format!("{}.{}", phenocode, strat.trim_start_matches('.')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hg_build_number, 38);
        assert_eq!(config.assoc_test_name, vec!["ADD".to_string()]);
        assert_eq!(config.min_imp_quality, 0.3);
        assert!(config.validate().is_ok());
        assert!(config
            .data_dir()
            .ends_with("generated-by-pheweb"));
    }

    #[test]
    fn test_interaction_thresholds_mutually_exclusive() {
        let config = Config {
            interaction_min_mac: Some(10),
            interaction_min_maf: Some(0.01),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = Config {
            interaction_min_mac: Some(10),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_build() {
        let config = Config {
            hg_build_number: 36,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            base_dir = "/srv/pheweb"
            pval_is_neglog10 = true
            cors_origins = ["http://localhost:8099"]

            [manhattan]
            num_unbinned = 200

            [field_aliases]
            "p_bolt_lmm" = "pval"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/pheweb"));
        assert!(config.pval_is_neglog10);
        assert_eq!(config.manhattan.num_unbinned, 200);
        assert_eq!(config.manhattan.peak_max_count, 500);
        assert_eq!(config.field_aliases["p_bolt_lmm"], "pval");
        assert!(config.field_parser().pval_is_neglog10);
    }

    #[test]
    fn test_pheno_file_id() {
        assert_eq!(pheno_file_id("HEIGHT", None), "HEIGHT");
        assert_eq!(
            pheno_file_id("HEIGHT", Some("european.male")),
            "HEIGHT.european.male"
        );
        assert_eq!(
            pheno_file_id("HEIGHT", Some(".european.male")),
            "HEIGHT.european.male"
        );
    }

    #[test]
    fn test_sumstats_path_routes_interactions() {
        let config = Config::default();
        assert!(config
            .sumstats_path("BMI", Some("interaction-smoking"))
            .starts_with(config.interaction_dir()));
        assert!(config
            .sumstats_path("BMI", Some("european.male"))
            .starts_with(config.pheno_gz_dir()));
    }
}
