use crate::context::AppContext;
use crate::final_training::{
    default_model_file_name, default_predictions_file_name, output_path, train_final,
    write_predictions,
};
use crate::trainer::Trainer;
use anyhow::Result;
use log::info;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutputs {
    pub predictions_path: PathBuf,
    pub model_path: PathBuf,
}

pub fn run<T: Trainer>(
    app: &AppContext,
    trainer: &T,
    predictions_file: Option<String>,
    model_file: Option<String>,
) -> Result<FinalOutputs> {
    let config = app.config();
    let best = app.trial_log().best_trial()?;
    let dataset = app.load_prepared_dataset()?;

    let run = train_final(trainer, &dataset, config, &best)?;

    let predictions_path = output_path(
        config.predict_dir(),
        predictions_file,
        default_predictions_file_name,
    );
    write_predictions(&predictions_path, &run.predictions)?;

    let model_path = output_path(config.models_dir(), model_file, default_model_file_name);
    run.model.save(&model_path)?;

    info!(
        "Final model trained for {} rounds from trial {} (validation gain {:.0})",
        run.boost_rounds, best.trial_number, best.value
    );
    Ok(FinalOutputs {
        predictions_path,
        model_path,
    })
}
