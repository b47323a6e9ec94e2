use crate::dataset::{customer_month_groups, Dataset, CUSTOMER_COLUMN, MONTH_COLUMN};
use crate::error::{ChurnError, ChurnResult};
use log::{debug, info, warn};

pub fn lag_column_name(attribute: &str, step: usize) -> String {
    format!("{attribute}_lag_{step}")
}

/// For each step `1..=depth`, the row index holding the value `step` rows
/// earlier in the same customer's month-ordered history.
fn lag_sources(dataset: &Dataset, depth: usize) -> ChurnResult<Vec<Vec<Option<usize>>>> {
    let customers = dataset.integer_column(CUSTOMER_COLUMN)?;
    let months = dataset.integer_column(MONTH_COLUMN)?;
    let groups = customer_month_groups(&customers, &months);

    let mut sources = vec![vec![None; dataset.row_count()]; depth];
    for group in &groups {
        for (pos, &row) in group.iter().enumerate() {
            for step in 1..=depth.min(pos) {
                sources[step - 1][row] = Some(group[pos - step]);
            }
        }
    }
    Ok(sources)
}

/// Appends `<attr>_lag_<i>` columns for every requested attribute present in
/// the dataset, partitioned by customer and ordered by month. Returns the
/// number of columns added.
pub fn add_lag_features(
    dataset: &mut Dataset,
    attributes: &[String],
    depth: usize,
) -> ChurnResult<usize> {
    info!(
        "Building {} lag(s) for {} attribute(s)",
        depth,
        attributes.len()
    );
    if attributes.is_empty() {
        warn!("No attributes were given for lag generation");
        return Ok(0);
    }
    if depth == 0 {
        return Err(ChurnError::InvalidLagDepth(depth));
    }
    dataset.require_columns(&[CUSTOMER_COLUMN, MONTH_COLUMN])?;

    let present: Vec<&String> = attributes
        .iter()
        .filter(|attribute| {
            let found = dataset.has_column(attribute);
            if !found {
                warn!("Attribute {} was not found in the dataset", attribute);
            }
            found
        })
        .collect();
    if present.is_empty() {
        return Ok(0);
    }

    debug!("Equivalent window query: {}", window_query(&present, depth));

    let sources = lag_sources(dataset, depth)?;
    let mut added = 0;
    for attribute in present {
        let Some(column) = dataset.column(attribute).cloned() else {
            continue;
        };
        for (idx, source) in sources.iter().enumerate() {
            dataset.push_column(lag_column_name(attribute, idx + 1), column.gather(source))?;
            added += 1;
        }
    }

    info!(
        "Lag generation finished: {} column(s) added, dataset now has {} columns",
        added,
        dataset.column_count()
    );
    Ok(added)
}

fn window_query(attributes: &[&String], depth: usize) -> String {
    let mut sql = String::from("SELECT *");
    for attribute in attributes {
        for step in 1..=depth {
            sql.push_str(&format!(
                ", lag({attribute}, {step}) OVER (PARTITION BY {CUSTOMER_COLUMN} ORDER BY {MONTH_COLUMN}) AS {}",
                lag_column_name(attribute, step)
            ));
        }
    }
    sql.push_str(" FROM df");
    sql
}
