use crate::context::AppContext;
use crate::models::format_params;
use crate::trial_log::TrialStatistics;
use anyhow::Result;

pub fn run(app: &AppContext) -> Result<TrialStatistics> {
    let stats = app.trial_log().statistics()?;
    print_statistics(&stats);
    Ok(stats)
}

fn print_statistics(stats: &TrialStatistics) {
    println!("\n=== OPTIMIZATION STATISTICS ===\n");
    println!("Total trials: {}", stats.total_trials);
    println!("Best gain: {:.0}", stats.best_value);
    println!("Worst gain: {:.0}", stats.worst_value);
    println!("Mean gain: {:.2}", stats.mean_value);

    println!("\n=== TOP {} TRIALS ===\n", stats.top_trials.len());
    for (rank, trial) in stats.top_trials.iter().enumerate() {
        println!("Rank {}:", rank + 1);
        println!("  Trial: {}", trial.trial_number);
        println!("  Gain: {:.0}", trial.value);
        if let Some(iteration) = trial.best_iteration {
            println!("  Best iteration: {}", iteration);
        }
        println!("  Finished: {}", trial.datetime);
        println!("  Parameters: {}", format_params(&trial.params));
        println!();
    }
}
