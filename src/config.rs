use crate::error::{ChurnError, ChurnResult};
use crate::gain::{GainContext, DEFAULT_PROBABILITY_THRESHOLD};
use crate::models::{month_index, MonthSpec, SearchSpace, TrialConfigSnapshot};
use crate::trainer::{BoostSettings, DEFAULT_EARLY_STOPPING_ROUNDS, DEFAULT_NUM_BOOST_ROUND};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "conf.yaml";
pub const CONFIG_ENV_VAR: &str = "CHURN_CONFIG";

fn default_study_name() -> String {
    "Wednesday".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/competencia_01_crudo.csv")
}

fn default_seeds() -> Vec<u64> {
    vec![42]
}

fn default_train_months() -> MonthSpec {
    MonthSpec::Single(202102)
}

fn default_validation_month() -> i64 {
    202103
}

fn default_test_month() -> i64 {
    202104
}

fn default_threshold() -> f64 {
    DEFAULT_PROBABILITY_THRESHOLD
}

fn default_trials() -> usize {
    50
}

fn default_lag_depth() -> usize {
    1
}

fn default_num_boost_round() -> usize {
    DEFAULT_NUM_BOOST_ROUND
}

fn default_early_stopping_rounds() -> usize {
    DEFAULT_EARLY_STOPPING_ROUNDS
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_predict_dir() -> PathBuf {
    PathBuf::from("predict")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Top level of `conf.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChurnConfig {
    #[serde(rename = "STUDY_NAME", default = "default_study_name")]
    pub study_name: String,
    pub competencia01: CompetitionSettings,
    /// Directory relative paths are resolved against; not part of the file.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// The `competencia01` block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CompetitionSettings {
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_seeds")]
    pub semilla: Vec<u64>,
    #[serde(default = "default_train_months")]
    pub mes_train: MonthSpec,
    #[serde(default = "default_validation_month")]
    pub mes_validacion: i64,
    #[serde(default = "default_test_month")]
    pub mes_test: i64,
    pub ganancia_acierto: f64,
    pub costo_estimulo: f64,
    pub final_train: MonthSpec,
    pub final_predict: MonthSpec,
    #[serde(default = "default_threshold")]
    pub umbral: f64,
    #[serde(default = "default_trials")]
    pub n_trials: usize,
    #[serde(default)]
    pub lag_attributes: Vec<String>,
    #[serde(default = "default_lag_depth")]
    pub cant_lag: usize,
    #[serde(default = "default_num_boost_round")]
    pub num_boost_round: usize,
    #[serde(default = "default_early_stopping_rounds")]
    pub early_stopping_rounds: usize,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_predict_dir")]
    pub predict_dir: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub parametros_lgb: BTreeMap<String, (f64, f64)>,
}

/// `--config` wins, then `CHURN_CONFIG`, then `conf.yaml` in the working
/// directory.
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl ChurnConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ChurnConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChurnResult<()> {
        let settings = &self.competencia01;
        if self.study_name.trim().is_empty() {
            return Err(invalid("STUDY_NAME must not be empty"));
        }
        if settings.semilla.is_empty() {
            return Err(invalid("SEMILLA must list at least one seed"));
        }
        if !settings.ganancia_acierto.is_finite() || settings.ganancia_acierto < 0.0 {
            return Err(invalid(format!(
                "GANANCIA_ACIERTO must be a non-negative number (value: {})",
                settings.ganancia_acierto
            )));
        }
        if !settings.costo_estimulo.is_finite() || settings.costo_estimulo < 0.0 {
            return Err(invalid(format!(
                "COSTO_ESTIMULO must be a non-negative number (value: {})",
                settings.costo_estimulo
            )));
        }
        if !(settings.umbral > 0.0 && settings.umbral < 1.0) {
            return Err(invalid(format!(
                "UMBRAL must be inside (0, 1) (value: {})",
                settings.umbral
            )));
        }
        for (key, months) in [
            ("MES_TRAIN", &settings.mes_train),
            ("FINAL_TRAIN", &settings.final_train),
            ("FINAL_PREDICT", &settings.final_predict),
        ] {
            if months.is_empty() {
                return Err(invalid(format!("{key} must list at least one month")));
            }
            for month in months.months() {
                month_index(month)?;
            }
        }
        month_index(settings.mes_validacion)?;
        month_index(settings.mes_test)?;
        if !settings.lag_attributes.is_empty() && settings.cant_lag == 0 {
            return Err(ChurnError::InvalidLagDepth(settings.cant_lag));
        }
        if settings.num_boost_round == 0 {
            return Err(invalid("NUM_BOOST_ROUND must be at least 1"));
        }
        SearchSpace::from_bounds(&settings.parametros_lgb)?;
        Ok(())
    }

    pub fn settings(&self) -> &CompetitionSettings {
        &self.competencia01
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.resolve(&self.competencia01.data_path)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.resolve(&self.competencia01.results_dir)
    }

    pub fn predict_dir(&self) -> PathBuf {
        self.resolve(&self.competencia01.predict_dir)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.resolve(&self.competencia01.models_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.competencia01.log_dir)
    }

    pub fn primary_seed(&self) -> u64 {
        self.competencia01.semilla.first().copied().unwrap_or(42)
    }

    pub fn gain_context(&self) -> GainContext {
        GainContext::new(
            self.competencia01.ganancia_acierto,
            self.competencia01.costo_estimulo,
        )
        .with_threshold(self.competencia01.umbral)
    }

    pub fn search_space(&self) -> ChurnResult<SearchSpace> {
        SearchSpace::from_bounds(&self.competencia01.parametros_lgb)
    }

    pub fn boost_settings(&self) -> BoostSettings {
        BoostSettings {
            num_boost_round: self.competencia01.num_boost_round,
            early_stopping_rounds: self.competencia01.early_stopping_rounds,
            seed: self.primary_seed(),
        }
    }

    pub fn trial_snapshot(&self) -> TrialConfigSnapshot {
        TrialConfigSnapshot {
            semilla: self.competencia01.semilla.clone(),
            mes_train: self.competencia01.mes_train.clone(),
            mes_validacion: self.competencia01.mes_validacion,
        }
    }
}

fn invalid(message: impl Into<String>) -> ChurnError {
    ChurnError::InvalidConfig(message.into())
}
