use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub const DEFAULT_HEAD_ROWS: usize = 5;

pub fn run(app: &AppContext, rows: usize) -> Result<()> {
    let dataset = app.load_dataset()?;
    let settings = app.config().settings();

    println!("{}", dataset.format_head(rows));
    println!("Rows: {}", dataset.row_count());
    println!("Columns: {}", dataset.column_count());

    let text_columns = dataset.text_columns();
    if !text_columns.is_empty() {
        println!("Non-numeric columns: {}", text_columns.join(", "));
    }

    let histogram = dataset.month_histogram()?;
    println!("\nRows per snapshot month:");
    for (month, count) in &histogram {
        println!("  {month}: {count}");
    }

    let train_months = settings.mes_train.months();
    for (role, months) in [
        ("train", train_months),
        ("validation", vec![settings.mes_validacion]),
        ("test", vec![settings.mes_test]),
        ("final train", settings.final_train.months()),
        ("final predict", settings.final_predict.months()),
    ] {
        let rows: usize = months
            .iter()
            .map(|month| histogram.get(month).copied().unwrap_or(0))
            .sum();
        info!("{} months {:?}: {} rows", role, months, rows);
    }
    Ok(())
}
