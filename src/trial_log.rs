use crate::error::{ChurnError, ChurnResult};
use crate::models::{format_params, TrialRecord};
use log::{info, warn};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const TOP_TRIALS: usize = 5;

pub fn trial_log_file_name(study_name: &str) -> String {
    format!("resultados_{study_name}_iteraciones.json")
}

/// The per-study JSON array of trial records. Every append rewrites the whole
/// file; a single writer is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialLog {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialStatistics {
    pub total_trials: usize,
    pub best_value: f64,
    pub worst_value: f64,
    pub mean_value: f64,
    pub top_trials: Vec<TrialRecord>,
}

impl TrialLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_study(results_dir: &Path, study_name: &str) -> Self {
        Self::new(results_dir.join(trial_log_file_name(study_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Existing entries as raw JSON. A missing file is an empty log; an
    /// unreadable or non-array file is reported and treated as empty, which
    /// means the next append overwrites it.
    fn read_for_append(&self) -> ChurnResult<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(_) => {
                warn!(
                    "Trial log {} is not a JSON array; starting a new one",
                    self.path.display()
                );
                Ok(Vec::new())
            }
            Err(err) => {
                warn!(
                    "Trial log {} could not be parsed ({err}); starting a new one",
                    self.path.display()
                );
                Ok(Vec::new())
            }
        }
    }

    /// Appends one record and returns the new number of entries.
    pub fn append(&self, record: &TrialRecord) -> ChurnResult<usize> {
        let mut entries = self.read_for_append()?;
        entries.push(serde_json::to_value(record)?);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        info!(
            "Trial {} saved to {}",
            record.trial_number,
            self.path.display()
        );
        info!(
            "Gain: {:.0} --- Parameters: {}",
            record.value,
            format_params(&record.params)
        );
        Ok(entries.len())
    }

    /// Strict read: a missing file or malformed content is an error.
    pub fn load(&self) -> ChurnResult<Vec<TrialRecord>> {
        if !self.path.exists() {
            return Err(ChurnError::TrialLogNotFound {
                path: self.path.display().to_string(),
            });
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Records for warm starts and trial numbering; absent or unreadable logs
    /// yield nothing.
    pub fn load_or_empty(&self) -> Vec<TrialRecord> {
        if !self.path.exists() {
            return Vec::new();
        }
        match self.load() {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    "Ignoring existing trial log {}: {err}",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }

    fn load_non_empty(&self) -> ChurnResult<Vec<TrialRecord>> {
        let records = self.load()?;
        if records.is_empty() {
            return Err(ChurnError::EmptyTrialLog {
                path: self.path.display().to_string(),
            });
        }
        Ok(records)
    }

    pub fn best_trial(&self) -> ChurnResult<TrialRecord> {
        let records = self.load_non_empty()?;
        let best = best_record(&records)
            .cloned()
            .ok_or_else(|| ChurnError::EmptyTrialLog {
                path: self.path.display().to_string(),
            })?;
        info!("Best hyperparameters loaded from {}", self.path.display());
        info!("Best gain: {:.0}", best.value);
        info!("Trial number: {}", best.trial_number);
        info!("Hyperparameters: {}", format_params(&best.params));
        Ok(best)
    }

    pub fn statistics(&self) -> ChurnResult<TrialStatistics> {
        let records = self.load_non_empty()?;
        let stats = summarize(&records);
        info!("Optimization statistics for {}:", self.path.display());
        info!("Total trials: {}", stats.total_trials);
        info!("Best gain: {:.0}", stats.best_value);
        info!("Worst gain: {:.0}", stats.worst_value);
        info!("Mean gain: {:.2}", stats.mean_value);
        Ok(stats)
    }
}

/// First record holding the maximum value, in log order.
pub fn best_record(records: &[TrialRecord]) -> Option<&TrialRecord> {
    records.iter().fold(None, |best: Option<&TrialRecord>, record| match best {
        Some(current) if record.value <= current.value => Some(current),
        _ => Some(record),
    })
}

fn summarize(records: &[TrialRecord]) -> TrialStatistics {
    let values: Vec<f64> = records.iter().map(|record| record.value).collect();
    let best_value = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let worst_value = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mean_value = values.iter().sum::<f64>() / values.len() as f64;

    let mut ranked: Vec<&TrialRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    TrialStatistics {
        total_trials: records.len(),
        best_value,
        worst_value,
        mean_value,
        top_trials: ranked.into_iter().take(TOP_TRIALS).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HyperparameterSet, MonthSpec, ParamValue, TrialConfigSnapshot};

    fn record(trial_number: usize, value: f64) -> TrialRecord {
        let mut params = HyperparameterSet::new();
        params.insert(
            "num_leaves".to_string(),
            ParamValue::Int(10 + trial_number as i64),
        );
        TrialRecord::completed(
            trial_number,
            params,
            value,
            TrialConfigSnapshot {
                semilla: vec![42],
                mes_train: MonthSpec::Many(vec![202101, 202102]),
                mes_validacion: 202103,
            },
            Some(100),
        )
    }

    fn log_in(dir: &tempfile::TempDir) -> TrialLog {
        TrialLog::for_study(dir.path(), "test")
    }

    #[test]
    fn file_name_follows_study() {
        let log = TrialLog::for_study(Path::new("results"), "Wednesday");
        assert_eq!(
            log.path(),
            Path::new("results/resultados_Wednesday_iteraciones.json")
        );
    }

    #[test]
    fn append_preserves_order_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let records = vec![record(0, 10.0), record(1, 30.0), record(2, 20.0)];
        for (idx, r) in records.iter().enumerate() {
            assert_eq!(log.append(r).unwrap(), idx + 1);
        }
        assert_eq!(log.load().unwrap(), records);
    }

    #[test]
    fn append_replaces_unparseable_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        fs::write(log.path(), "{not json").unwrap();
        assert_eq!(log.append(&record(0, 1.0)).unwrap(), 1);

        fs::write(log.path(), "{\"value\": 3}").unwrap();
        assert_eq!(log.append(&record(1, 2.0)).unwrap(), 1);
        assert_eq!(log.load().unwrap()[0].trial_number, 1);
    }

    #[test]
    fn best_trial_prefers_first_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        for r in [record(0, 5.0), record(1, 9.0), record(2, 9.0), record(3, 1.0)] {
            log.append(&r).unwrap();
        }
        assert_eq!(log.best_trial().unwrap().trial_number, 1);
    }

    #[test]
    fn missing_and_empty_logs_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        assert!(matches!(
            log.best_trial(),
            Err(ChurnError::TrialLogNotFound { .. })
        ));
        fs::write(log.path(), "[]").unwrap();
        assert!(matches!(
            log.statistics(),
            Err(ChurnError::EmptyTrialLog { .. })
        ));
        fs::write(log.path(), "[{").unwrap();
        assert!(matches!(
            log.best_trial(),
            Err(ChurnError::Serialization(_))
        ));
        assert!(log.load_or_empty().is_empty());
    }

    #[test]
    fn statistics_summarize_values() {
        let records: Vec<TrialRecord> = [4.0, 8.0, 2.0, 8.0, 6.0, 1.0, 7.0]
            .iter()
            .enumerate()
            .map(|(idx, &value)| record(idx, value))
            .collect();
        let stats = summarize(&records);
        assert_eq!(stats.total_trials, 7);
        assert_eq!(stats.best_value, 8.0);
        assert_eq!(stats.worst_value, 1.0);
        assert!((stats.mean_value - 36.0 / 7.0).abs() < 1e-12);
        let top: Vec<usize> = stats.top_trials.iter().map(|r| r.trial_number).collect();
        assert_eq!(top, vec![1, 3, 6, 4, 0]);
    }
}
