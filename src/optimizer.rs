use crate::config::ChurnConfig;
use crate::dataset::Dataset;
use crate::gain::GainContext;
use crate::models::{format_params, HyperparameterSet, SearchSpace, TrialConfigSnapshot, TrialRecord};
use crate::param_utils::{clamp_to_bounds, get_param_usize_rounded_clamped};
use crate::tpe::Sampler;
use crate::trainer::{BoostSettings, TrainRequest, Trainer, TrainingData};
use crate::trial_log::{best_record, TrialLog};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::time::Instant;

const MAX_BOOST_ROUNDS: usize = 100_000;

/// One trial: train on the training months, score profit on the validation
/// month, persist the record.
pub struct TrialObjective<'a, T: Trainer> {
    trainer: &'a T,
    train: TrainingData,
    valid: TrainingData,
    settings: BoostSettings,
    gain: GainContext,
    snapshot: TrialConfigSnapshot,
    log: TrialLog,
}

impl<'a, T: Trainer> TrialObjective<'a, T> {
    pub fn new(
        trainer: &'a T,
        train: TrainingData,
        valid: TrainingData,
        config: &ChurnConfig,
        log: TrialLog,
    ) -> Self {
        Self {
            trainer,
            train,
            valid,
            settings: config.boost_settings(),
            gain: config.gain_context(),
            snapshot: config.trial_snapshot(),
            log,
        }
    }

    /// Splits a prepared dataset into the configured training months and the
    /// validation month.
    pub fn from_dataset(
        trainer: &'a T,
        dataset: &Dataset,
        config: &ChurnConfig,
        log: TrialLog,
    ) -> Result<Self> {
        let settings = config.settings();
        let train_months = settings.mes_train.months();
        let train_rows = dataset.filter_months(&train_months)?;
        let valid_rows = dataset.filter_months(&[settings.mes_validacion])?;
        if train_rows.row_count() == 0 {
            return Err(anyhow!(
                "No rows found for training months {}",
                settings.mes_train
            ));
        }
        if valid_rows.row_count() == 0 {
            return Err(anyhow!(
                "No rows found for validation month {}",
                settings.mes_validacion
            ));
        }
        let train = TrainingData::from_dataset(&train_rows)?;
        let valid = TrainingData::from_dataset(&valid_rows)?;
        info!(
            "Train months {}: {} rows ({} positive); validation month {}: {} rows ({} positive)",
            settings.mes_train,
            train.len(),
            train.positives(),
            settings.mes_validacion,
            valid.len(),
            valid.positives()
        );
        Ok(Self::new(trainer, train, valid, config, log))
    }

    pub fn evaluate(&self, trial_number: usize, params: HyperparameterSet) -> Result<TrialRecord> {
        let mut settings = self.settings;
        settings.num_boost_round = get_param_usize_rounded_clamped(
            &params,
            "num_boost_round",
            settings.num_boost_round,
            1,
            MAX_BOOST_ROUNDS,
        );
        let request = TrainRequest {
            train: &self.train,
            valid: Some(&self.valid),
            params: &params,
            settings,
            gain: self.gain,
        };
        let model = self
            .trainer
            .train(&request)
            .with_context(|| format!("Training failed for trial {trial_number}"))?;
        let probabilities = model.predict_proba(&self.valid.features)?;
        let gain = self
            .gain
            .gain_from_probabilities(&self.valid.labels, &probabilities)?;

        let record = TrialRecord::completed(
            trial_number,
            params,
            gain,
            self.snapshot.clone(),
            Some(model.best_iteration()),
        );
        self.log
            .append(&record)
            .with_context(|| format!("Failed to save trial {trial_number}"))?;
        info!("Trial {}: gain = {:.0}", trial_number, gain);
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudyOutcome {
    pub trials: Vec<TrialRecord>,
    pub best: Option<TrialRecord>,
}

/// Drives the sampler through `n_trials` evaluations, maximizing profit.
pub struct Study<'a, T: Trainer, S: Sampler> {
    objective: TrialObjective<'a, T>,
    sampler: S,
    space: SearchSpace,
    show_progress: bool,
}

impl<'a, T: Trainer, S: Sampler> Study<'a, T, S> {
    pub fn new(objective: TrialObjective<'a, T>, sampler: S, space: SearchSpace) -> Self {
        Self {
            objective,
            sampler,
            space,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Feeds earlier trials of this study to the sampler and returns the next
    /// free trial number.
    fn warm_start(&mut self) -> usize {
        let previous = self.objective.log.load_or_empty();
        let mut reused = 0;
        for record in &previous {
            if self.space.admits(&record.params) && record.value.is_finite() {
                self.sampler.observe(&record.params, record.value);
                reused += 1;
            }
        }
        if !previous.is_empty() {
            info!(
                "Warm start: {} of {} logged trial(s) fed to the sampler",
                reused,
                previous.len()
            );
        }
        previous
            .iter()
            .map(|record| record.trial_number + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn optimize(&mut self, n_trials: usize) -> Result<StudyOutcome> {
        if self.space.is_empty() {
            return Err(anyhow!("PARAMETROS_LGB defines no parameters to search"));
        }
        let first_trial = self.warm_start();
        info!(
            "Starting optimization with {} trial(s), first trial number {}",
            n_trials, first_trial
        );

        let pb = if self.show_progress {
            ProgressBar::new(n_trials as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let started = Instant::now();
        let mut trials = Vec::with_capacity(n_trials);
        for offset in 0..n_trials {
            let trial_number = first_trial + offset;
            let mut params = self.sampler.suggest(&self.space);
            clamp_to_bounds(&mut params, &self.space);
            info!("Trial {} parameters: {}", trial_number, format_params(&params));

            let record = match self.objective.evaluate(trial_number, params) {
                Ok(record) => record,
                Err(err) => {
                    pb.abandon_with_message("Optimization aborted");
                    return Err(err);
                }
            };
            self.sampler.observe(&record.params, record.value);
            trials.push(record);

            if let Some(best) = best_record(&trials) {
                pb.set_message(format!("best {:.0}", best.value));
            }
            pb.inc(1);
        }
        pb.finish_with_message("Optimization completed");

        let best = best_record(&trials).cloned();
        match &best {
            Some(best) => {
                info!(
                    "Optimization finished in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
                info!("Best gain: {:.0} (trial {})", best.value, best.trial_number);
                info!("Best hyperparameters: {}", format_params(&best.params));
            }
            None => warn!("No trials were run"),
        }
        Ok(StudyOutcome { trials, best })
    }
}
