use anyhow::Result;
use churn_engine::{
    commands::{inspect, optimize, prepare, stats, train_final},
    config::{resolve_config_path, ChurnConfig},
    context::AppContext,
    logging,
    trainer::LightgbmCliTrainer,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "churn-engine")]
#[command(about = "Churn (BAJA) label construction, profit-driven tuning and final training")]
struct Cli {
    /// Configuration file (defaults to $CHURN_CONFIG, then conf.yaml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the first rows, shape and month histogram of the raw dataset
    Inspect {
        /// Number of rows to print
        #[arg(long, default_value_t = inspect::DEFAULT_HEAD_ROWS)]
        rows: usize,
    },
    /// Build labels, lag features and the binary target and write them to CSV
    Prepare {
        /// Destination CSV file
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Run the Bayesian hyperparameter search against the profit objective
    Optimize {
        /// Number of trials (defaults to N_TRIALS from the configuration)
        #[arg(long)]
        trials: Option<usize>,
    },
    /// Summarize the trial log of the configured study
    Stats,
    /// Retrain with the best logged parameters and write predictions and the model
    TrainFinal {
        /// Prediction file name inside PREDICT_DIR (defaults to a timestamped name)
        #[arg(long, value_name = "FILE")]
        predictions_file: Option<String>,
        /// Model file name inside MODELS_DIR (defaults to a timestamped name)
        #[arg(long, value_name = "FILE")]
        model_file: Option<String>,
    },
}

fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    let config_path = resolve_config_path(config.as_deref());
    let config = match ChurnConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::init_stderr_only();
            error!("{err:#}");
            return Err(err);
        }
    };
    let log_path = logging::init(&config.log_dir(), &config.study_name)?;
    info!(
        "Starting churn-engine with {} (log file {})",
        config_path.display(),
        log_path.display()
    );
    let app = AppContext::from_config(config, config_path);

    let outcome = dispatch(&app, command);
    if let Err(err) = &outcome {
        error!("{err:#}");
    }
    outcome
}

fn dispatch(app: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Inspect { rows } => inspect::run(app, rows)?,
        Commands::Prepare { output } => prepare::run(app, &output)?,
        Commands::Optimize { trials } => {
            let trainer = LightgbmCliTrainer::locate()?;
            optimize::run(app, &trainer, trials, true)?;
        }
        Commands::Stats => {
            stats::run(app)?;
        }
        Commands::TrainFinal {
            predictions_file,
            model_file,
        } => {
            let trainer = LightgbmCliTrainer::locate()?;
            let outputs = train_final::run(app, &trainer, predictions_file, model_file)?;
            println!("Predictions: {}", outputs.predictions_path.display());
            println!("Model: {}", outputs.model_path.display());
        }
    }
    Ok(())
}
