use crate::config::ChurnConfig;
use crate::dataset::Dataset;
use crate::features::add_lag_features;
use crate::labels::{add_binary_target, add_ternary_labels};
use crate::trial_log::TrialLog;
use anyhow::{Context, Result};
use log::{error, info};
use std::path::{Path, PathBuf};

/// Shared state for every command: the validated configuration and where it
/// was loaded from.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: ChurnConfig,
    config_path: PathBuf,
}

impl AppContext {
    pub fn initialize(config_path: &Path) -> Result<Self> {
        let config = ChurnConfig::load(config_path)?;
        Ok(Self::from_config(config, config_path.to_path_buf()))
    }

    pub fn from_config(config: ChurnConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &ChurnConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn study_name(&self) -> &str {
        &self.config.study_name
    }

    pub fn trial_log(&self) -> TrialLog {
        TrialLog::for_study(&self.config.results_dir(), &self.config.study_name)
    }

    /// Raw snapshot table from `DATA_PATH`.
    pub fn load_dataset(&self) -> Result<Dataset> {
        let path = self.config.data_path();
        info!("Loading dataset from {}", path.display());
        match Dataset::load_csv(&path) {
            Ok(dataset) => {
                info!(
                    "Dataset loaded with {} rows and {} columns",
                    dataset.row_count(),
                    dataset.column_count()
                );
                Ok(dataset)
            }
            Err(err) => {
                error!("Failed to load dataset {}: {err}", path.display());
                Err(err).with_context(|| format!("Failed to load dataset {}", path.display()))
            }
        }
    }

    /// Labels, lag features and binary target, in that order.
    pub fn prepare_dataset(&self, mut dataset: Dataset) -> Result<Dataset> {
        let settings = self.config.settings();
        add_ternary_labels(&mut dataset).context("Failed to build clase_ternaria")?;
        add_lag_features(&mut dataset, &settings.lag_attributes, settings.cant_lag)
            .context("Failed to build lag features")?;
        add_binary_target(&mut dataset).context("Failed to build clase_binaria")?;
        Ok(dataset)
    }

    pub fn load_prepared_dataset(&self) -> Result<Dataset> {
        let dataset = self.load_dataset()?;
        self.prepare_dataset(dataset)
    }
}
