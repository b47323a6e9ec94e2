use crate::booster::Booster;
use crate::dataset::{Dataset, FeatureMatrix};
use crate::error::ChurnResult;
use crate::gain::GainContext;
use crate::labels::{read_target, LABEL_COLUMN, TARGET_COLUMN};
use crate::models::HyperparameterSet;
use crate::param_utils::lightgbm_parameter_args;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

pub const DEFAULT_NUM_BOOST_ROUND: usize = 1000;
pub const DEFAULT_EARLY_STOPPING_ROUNDS: usize = 50;
const STDERR_TAIL_CHARS: usize = 2048;

/// Features and 0/1 target for one slice of months.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingData {
    pub features: FeatureMatrix,
    pub labels: Vec<u8>,
}

impl TrainingData {
    /// Every numeric column except the label columns becomes a feature.
    pub fn from_dataset(dataset: &Dataset) -> ChurnResult<Self> {
        let labels = read_target(dataset)?;
        let features = dataset.feature_matrix(&[LABEL_COLUMN, TARGET_COLUMN]);
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 1).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostSettings {
    pub num_boost_round: usize,
    pub early_stopping_rounds: usize,
    pub seed: u64,
}

impl Default for BoostSettings {
    fn default() -> Self {
        Self {
            num_boost_round: DEFAULT_NUM_BOOST_ROUND,
            early_stopping_rounds: DEFAULT_EARLY_STOPPING_ROUNDS,
            seed: 42,
        }
    }
}

pub struct TrainRequest<'a> {
    pub train: &'a TrainingData,
    pub valid: Option<&'a TrainingData>,
    pub params: &'a HyperparameterSet,
    pub settings: BoostSettings,
    pub gain: GainContext,
}

/// A trained booster plus the iteration count chosen for prediction.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    booster: Booster,
    model_text: String,
    feature_names: Vec<String>,
    best_iteration: usize,
    best_gain: Option<f64>,
}

impl TrainedModel {
    pub fn from_model_text(model_text: String, feature_names: Vec<String>) -> Result<Self> {
        let booster = Booster::from_model_text(&model_text)?;
        if booster.num_features() > feature_names.len() {
            return Err(anyhow!(
                "Model expects {} features but training data has {}",
                booster.num_features(),
                feature_names.len()
            ));
        }
        let best_iteration = booster.num_iterations();
        Ok(Self {
            booster,
            model_text,
            feature_names,
            best_iteration,
            best_gain: None,
        })
    }

    /// Scores the validation set after every iteration and keeps the one
    /// with the highest gain, stopping once `patience` iterations pass
    /// without improvement.
    pub fn early_stop(
        mut self,
        valid: &TrainingData,
        gain: &GainContext,
        patience: usize,
    ) -> Result<Self> {
        self.check_features(&valid.features)?;
        let stages = self.booster.staged_probabilities(&valid.features.rows);
        let mut gains = Vec::with_capacity(stages.len());
        for probabilities in &stages {
            gains.push(gain.gain_from_probabilities(&valid.labels, probabilities)?);
        }
        let (best_iteration, best_gain) = select_best_iteration(&gains, patience)
            .ok_or_else(|| anyhow!("Model produced no iterations to evaluate"))?;
        debug!(
            "Gain by iteration (first 10): {:?}",
            gains.iter().take(10).collect::<Vec<_>>()
        );
        info!(
            "Early stopping on gain: best iteration {} of {} (gain {:.0})",
            best_iteration,
            gains.len(),
            best_gain
        );
        self.best_iteration = best_iteration;
        self.best_gain = Some(best_gain);
        Ok(self)
    }

    fn check_features(&self, features: &FeatureMatrix) -> Result<()> {
        if features.feature_names != self.feature_names {
            return Err(anyhow!(
                "Feature columns differ from training ({} vs {} columns)",
                features.feature_count(),
                self.feature_names.len()
            ));
        }
        Ok(())
    }

    pub fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        self.check_features(features)?;
        Ok(self
            .booster
            .predict_batch(&features.rows, Some(self.best_iteration)))
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn best_gain(&self) -> Option<f64> {
        self.best_gain
    }

    pub fn num_iterations(&self) -> usize {
        self.booster.num_iterations()
    }

    pub fn model_text(&self) -> &str {
        &self.model_text
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, &self.model_text)
            .with_context(|| format!("Failed to write model to {}", path.display()))?;
        info!("Saved model to {}", path.display());
        Ok(())
    }
}

/// Applies profit-based early stopping when a validation set is present.
pub fn finish_training(model_text: String, request: &TrainRequest<'_>) -> Result<TrainedModel> {
    let model =
        TrainedModel::from_model_text(model_text, request.train.features.feature_names.clone())?;
    match request.valid {
        Some(valid) => model.early_stop(
            valid,
            &request.gain,
            request.settings.early_stopping_rounds,
        ),
        None => Ok(model),
    }
}

/// Returns the 1-based iteration with the highest gain and that gain. The
/// first iteration reaching the maximum wins; the scan stops after `patience`
/// iterations without a strict improvement (`0` disables stopping).
pub fn select_best_iteration(gains: &[f64], patience: usize) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &gain) in gains.iter().enumerate() {
        match best {
            Some((best_idx, best_gain)) => {
                if gain > best_gain {
                    best = Some((idx, gain));
                } else if patience > 0 && idx - best_idx >= patience {
                    break;
                }
            }
            None => best = Some((idx, gain)),
        }
    }
    best.map(|(idx, gain)| (idx + 1, gain))
}

/// Gradient-boosting capability used by the trial objective and the final fit.
pub trait Trainer {
    fn train(&self, request: &TrainRequest<'_>) -> Result<TrainedModel>;
}

/// Trains through the LightGBM command-line executable.
pub struct LightgbmCliTrainer {
    executable: PathBuf,
    scratch_dir: PathBuf,
}

impl LightgbmCliTrainer {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn locate() -> Result<Self> {
        let executable = resolve_lightgbm_executable()?;
        info!("Using LightGBM executable at {}", executable.display());
        Ok(Self::new(executable))
    }

    fn scratch_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{stem}_{}.{extension}", Uuid::new_v4()))
    }

    fn build_args(
        request: &TrainRequest<'_>,
        train_path: &Path,
        model_path: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            String::from("task=train"),
            String::from("objective=binary"),
            String::from("boosting=gbdt"),
            String::from("header=true"),
            String::from("label_column=0"),
            format!("num_iterations={}", request.settings.num_boost_round),
            format!("seed={}", request.settings.seed),
            format!("data={}", train_path.to_string_lossy()),
            String::from("metric=none"),
        ];
        if !request.params.contains_key("min_gain_to_split") {
            args.push(String::from("min_gain_to_split=0.0"));
        }
        args.extend(lightgbm_parameter_args(request.params));
        args.push(format!("output_model={}", model_path.to_string_lossy()));
        args.push(String::from("verbosity=-1"));
        args
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.executable)
            .args(args)
            .output()
            .with_context(|| {
                format!(
                    "Failed to spawn {} for training",
                    self.executable.display()
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(anyhow!(
                "LightGBM training failed with status {}: {}",
                output.status,
                tail.trim()
            ));
        }
        Ok(())
    }
}

impl Trainer for LightgbmCliTrainer {
    fn train(&self, request: &TrainRequest<'_>) -> Result<TrainedModel> {
        if request.train.is_empty() {
            return Err(anyhow!("Training set is empty"));
        }
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("Failed to create {}", self.scratch_dir.display()))?;

        let train_path = self.scratch_path("lightgbm_train", "csv");
        let model_path = self.scratch_path("lightgbm_model", "txt");
        let args = Self::build_args(request, &train_path, &model_path);

        info!(
            "Launching LightGBM: {} training rows ({} positive), {} validation rows, {} features, {} rounds",
            request.train.len(),
            request.train.positives(),
            request.valid.map(TrainingData::len).unwrap_or(0),
            request.train.features.feature_count(),
            request.settings.num_boost_round
        );
        debug!("LightGBM arguments: {}", args.join(" "));

        let outcome = (|| -> Result<String> {
            write_dataset_csv(request.train, &train_path)?;
            self.run(&args)?;
            fs::read_to_string(&model_path)
                .with_context(|| format!("Failed to read model {}", model_path.display()))
        })();

        for path in [&train_path, &model_path] {
            if let Err(err) = fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove scratch file {}: {err}", path.display());
                }
            }
        }

        finish_training(outcome?, request)
    }
}

fn write_dataset_csv(data: &TrainingData, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    let mut header = String::from(TARGET_COLUMN);
    for name in &data.features.feature_names {
        header.push(',');
        header.push_str(name);
    }
    header.push('\n');
    writer.write_all(header.as_bytes())?;

    for (label, row) in data.labels.iter().zip(&data.features.rows) {
        let mut line = label.to_string();
        for value in row {
            line.push(',');
            if value.is_nan() {
                line.push_str("nan");
            } else {
                line.push_str(&format!("{value}"));
            }
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn resolve_lightgbm_executable() -> Result<PathBuf> {
    if let Some(configured) = std::env::var_os("LIGHTGBM_EXE") {
        let path = PathBuf::from(configured);
        if path.exists() {
            return Ok(path);
        }
        return Err(anyhow!(
            "LIGHTGBM_EXE points to {}, which does not exist",
            path.display()
        ));
    }

    let binary = if cfg!(windows) {
        "lightgbm.exe"
    } else {
        "lightgbm"
    };
    let vendor_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("vendor")
        .join(binary);
    if vendor_path.exists() {
        return Ok(vendor_path);
    }

    if let Some(path) = find_in_path(binary) {
        return Ok(path);
    }

    Err(anyhow!(
        "lightgbm executable not found in LIGHTGBM_EXE, vendor/ or PATH; install the LightGBM CLI to train models"
    ))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamValue;

    #[test]
    fn best_iteration_prefers_first_maximum() {
        let gains = [10.0, 30.0, 30.0, 20.0];
        assert_eq!(select_best_iteration(&gains, 0), Some((2, 30.0)));
    }

    #[test]
    fn best_iteration_stops_after_patience() {
        let gains = [5.0, 4.0, 3.0, 50.0];
        assert_eq!(select_best_iteration(&gains, 2), Some((1, 5.0)));
        assert_eq!(select_best_iteration(&gains, 3), Some((4, 50.0)));
        assert_eq!(select_best_iteration(&[], 3), None);
    }

    #[test]
    fn cli_args_include_data_and_parameters() {
        let train = TrainingData {
            features: FeatureMatrix {
                feature_names: vec!["a".to_string()],
                rows: vec![vec![1.0]],
            },
            labels: vec![1],
        };
        let mut params = HyperparameterSet::new();
        params.insert("num_leaves".to_string(), ParamValue::Int(31));
        params.insert("num_boost_round".to_string(), ParamValue::Int(10));
        let request = TrainRequest {
            train: &train,
            valid: Some(&train),
            params: &params,
            settings: BoostSettings::default(),
            gain: GainContext::new(1.0, 1.0),
        };
        let args = LightgbmCliTrainer::build_args(
            &request,
            Path::new("train.csv"),
            Path::new("model.txt"),
        );
        assert!(args.contains(&"objective=binary".to_string()));
        assert!(args.contains(&"data=train.csv".to_string()));
        assert!(args.contains(&"metric=none".to_string()));
        assert!(args.contains(&"output_model=model.txt".to_string()));
        assert!(args.contains(&"num_leaves=31".to_string()));
        assert!(args.contains(&"num_iterations=1000".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("num_boost_round")));
    }

    #[test]
    fn dataset_csv_writes_header_and_nan() {
        let data = TrainingData {
            features: FeatureMatrix {
                feature_names: vec!["a".to_string(), "b".to_string()],
                rows: vec![vec![1.5, f64::NAN], vec![2.0, 3.0]],
            },
            labels: vec![0, 1],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.csv");
        write_dataset_csv(&data, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "clase_binaria,a,b\n0,1.5,nan\n1,2,3\n");
    }

    #[test]
    fn early_stop_picks_most_profitable_iteration() {
        // Tree 1 pushes everything to ~0.5 (stimulate all), tree 2 pulls the
        // negative row back below the threshold.
        let text = "objective=binary sigmoid:1\nmax_feature_idx=0\n\
                    Tree=0\nnum_leaves=1\nleaf_value=0\n\
                    Tree=1\nnum_leaves=2\nsplit_feature=0\nthreshold=0.5\ndecision_type=0\n\
                    left_child=-1\nright_child=-2\nleaf_value=-10 0\n";
        let model = TrainedModel::from_model_text(text.to_string(), vec!["x".to_string()])
            .unwrap();
        let valid = TrainingData {
            features: FeatureMatrix {
                feature_names: vec!["x".to_string()],
                rows: vec![vec![0.0], vec![1.0]],
            },
            labels: vec![0, 1],
        };
        let gain = GainContext::new(100.0, 30.0);
        let model = model.early_stop(&valid, &gain, 50).unwrap();
        assert_eq!(model.best_iteration(), 2);
        assert_eq!(model.best_gain(), Some(100.0));
        assert_eq!(model.num_iterations(), 2);
    }
}
