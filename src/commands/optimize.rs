use crate::context::AppContext;
use crate::optimizer::{Study, StudyOutcome, TrialObjective};
use crate::tpe::TpeSampler;
use crate::trainer::Trainer;
use anyhow::Result;
use log::info;

pub fn run<T: Trainer>(
    app: &AppContext,
    trainer: &T,
    n_trials: Option<usize>,
    show_progress: bool,
) -> Result<StudyOutcome> {
    let config = app.config();
    let settings = config.settings();
    let n_trials = n_trials.unwrap_or(settings.n_trials);
    info!(
        "Study {}: {} trial(s), TRAIN = {}, VALID = {}, SEMILLA = {:?}",
        app.study_name(),
        n_trials,
        settings.mes_train,
        settings.mes_validacion,
        settings.semilla
    );

    let dataset = app.load_prepared_dataset()?;
    let log = app.trial_log();
    info!("Trial log: {}", log.path().display());

    let objective = TrialObjective::from_dataset(trainer, &dataset, config, log)?;
    let sampler = TpeSampler::new(config.primary_seed());
    let mut study =
        Study::new(objective, sampler, config.search_space()?).with_progress(show_progress);
    study.optimize(n_trials)
}
