use crate::config::ChurnConfig;
use crate::dataset::{Dataset, CUSTOMER_COLUMN};
use crate::models::{format_params, TrialRecord};
use crate::param_utils::rounded_param;
use crate::trainer::{TrainRequest, TrainedModel, Trainer, TrainingData};
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use csv::WriterBuilder;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

pub const PREDICTION_COLUMN: &str = "Predicted";
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub customer: i64,
    pub predicted: u8,
}

pub struct FinalRun {
    pub model: TrainedModel,
    pub predictions: Vec<Prediction>,
    pub boost_rounds: usize,
}

impl FinalRun {
    pub fn positives(&self) -> usize {
        self.predictions
            .iter()
            .filter(|prediction| prediction.predicted == 1)
            .count()
    }
}

pub fn default_predictions_file_name() -> String {
    format!("predicciones_{}.csv", Local::now().format(FILE_TIMESTAMP_FORMAT))
}

pub fn default_model_file_name() -> String {
    format!("modelo_{}.txt", Local::now().format(FILE_TIMESTAMP_FORMAT))
}

/// `num_boost_round` from the parameters, else the trial's early-stopping
/// iteration, else the configured default.
pub fn resolve_boost_rounds(best: &TrialRecord, default_rounds: usize) -> usize {
    rounded_param(&best.params, "num_boost_round")
        .filter(|&rounds| rounds > 0)
        .map(|rounds| rounds as usize)
        .or(best.best_iteration.filter(|&iteration| iteration > 0))
        .unwrap_or(default_rounds)
}

/// Retrains on `FINAL_TRAIN` with the best trial's parameters and scores every
/// `FINAL_PREDICT` row.
pub fn train_final<T: Trainer>(
    trainer: &T,
    dataset: &Dataset,
    config: &ChurnConfig,
    best: &TrialRecord,
) -> Result<FinalRun> {
    let settings = config.settings();
    info!("Preparing final training data from months {}", settings.final_train);
    info!("Preparing prediction data from months {}", settings.final_predict);

    let train_rows = dataset.filter_months(&settings.final_train.months())?;
    let predict_rows = dataset.filter_months(&settings.final_predict.months())?;
    if train_rows.row_count() == 0 {
        return Err(anyhow!(
            "No rows found for final training months {}",
            settings.final_train
        ));
    }
    if predict_rows.row_count() == 0 {
        return Err(anyhow!(
            "No rows found for prediction months {}",
            settings.final_predict
        ));
    }

    let train = TrainingData::from_dataset(&train_rows)?;
    let predict = TrainingData::from_dataset(&predict_rows)?;
    let customers = predict_rows.integer_column(CUSTOMER_COLUMN)?;

    let mut boost = config.boost_settings();
    boost.num_boost_round = resolve_boost_rounds(best, boost.num_boost_round);
    info!(
        "Training final model on {} rows for {} rounds with {}",
        train.len(),
        boost.num_boost_round,
        format_params(&best.params)
    );

    let gain = config.gain_context();
    let request = TrainRequest {
        train: &train,
        valid: None,
        params: &best.params,
        settings: boost,
        gain,
    };
    let model = trainer.train(&request).context("Final training failed")?;

    let probabilities = model.predict_proba(&predict.features)?;
    let predictions: Vec<Prediction> = customers
        .into_iter()
        .zip(gain.binarize(&probabilities))
        .map(|(customer, predicted)| Prediction {
            customer,
            predicted,
        })
        .collect();

    let run = FinalRun {
        model,
        predictions,
        boost_rounds: boost.num_boost_round,
    };
    let positives = run.positives();
    info!("Predictions generated for {} rows", run.predictions.len());
    info!("Positive predictions: {}", positives);
    info!("Negative predictions: {}", run.predictions.len() - positives);
    info!("Probability threshold: {}", gain.threshold);
    Ok(run)
}

/// Writes `numero_de_cliente,Predicted`.
pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([CUSTOMER_COLUMN, PREDICTION_COLUMN])?;
    for prediction in predictions {
        writer.write_record([
            prediction.customer.to_string(),
            prediction.predicted.to_string(),
        ])?;
    }
    writer.flush()?;
    info!("Predictions saved to {}", path.display());
    Ok(())
}

pub fn output_path(dir: PathBuf, file_name: Option<String>, default_name: fn() -> String) -> PathBuf {
    dir.join(file_name.unwrap_or_else(default_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HyperparameterSet, MonthSpec, ParamValue, TrialConfigSnapshot};

    fn record(params: HyperparameterSet, best_iteration: Option<usize>) -> TrialRecord {
        TrialRecord::completed(
            0,
            params,
            1.0,
            TrialConfigSnapshot {
                semilla: vec![42],
                mes_train: MonthSpec::Single(202101),
                mes_validacion: 202102,
            },
            best_iteration,
        )
    }

    #[test]
    fn boost_rounds_prefer_explicit_parameter() {
        let mut params = HyperparameterSet::new();
        params.insert("num_boost_round".to_string(), ParamValue::Float(250.4));
        assert_eq!(resolve_boost_rounds(&record(params, Some(80)), 1000), 250);
        assert_eq!(
            resolve_boost_rounds(&record(HyperparameterSet::new(), Some(80)), 1000),
            80
        );
        assert_eq!(
            resolve_boost_rounds(&record(HyperparameterSet::new(), None), 1000),
            1000
        );
    }

    #[test]
    fn predictions_csv_has_two_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predict").join("out.csv");
        let predictions = vec![
            Prediction {
                customer: 11,
                predicted: 1,
            },
            Prediction {
                customer: 12,
                predicted: 0,
            },
        ];
        write_predictions(&path, &predictions).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "numero_de_cliente,Predicted\n11,1\n12,0\n"
        );
    }

    #[test]
    fn default_names_are_timestamped() {
        assert!(default_predictions_file_name().starts_with("predicciones_"));
        assert!(default_model_file_name().ends_with(".txt"));
        let path = output_path(PathBuf::from("models"), None, default_model_file_name);
        assert!(path.starts_with("models"));
    }
}
