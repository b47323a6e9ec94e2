use crate::context::AppContext;
use crate::labels::{label_histogram, read_labels};
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Writes the labelled, lag-enriched dataset to `output`.
pub fn run(app: &AppContext, output: &Path) -> Result<()> {
    let dataset = app.load_prepared_dataset()?;
    let histogram = label_histogram(&read_labels(&dataset)?);

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    dataset
        .write_csv(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Label counts:");
    for (label, count) in &histogram {
        println!("  {label}: {count}");
    }
    info!(
        "Prepared dataset with {} rows and {} columns written to {}",
        dataset.row_count(),
        dataset.column_count(),
        output.display()
    );
    Ok(())
}
