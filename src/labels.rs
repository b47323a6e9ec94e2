//! Temporal churn labels derived from each customer's snapshot history.

use crate::dataset::{customer_month_groups, Column, Dataset, CUSTOMER_COLUMN, MONTH_COLUMN};
use crate::error::{ChurnError, ChurnResult};
use crate::models::month_index;
use log::info;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const LABEL_COLUMN: &str = "clase_ternaria";
pub const TARGET_COLUMN: &str = "clase_binaria";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TernaryLabel {
    Continua,
    BajaMas1,
    BajaMas2,
}

impl TernaryLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            TernaryLabel::Continua => "CONTINUA",
            TernaryLabel::BajaMas1 => "BAJA+1",
            TernaryLabel::BajaMas2 => "BAJA+2",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "CONTINUA" => Some(TernaryLabel::Continua),
            "BAJA+1" => Some(TernaryLabel::BajaMas1),
            "BAJA+2" => Some(TernaryLabel::BajaMas2),
            _ => None,
        }
    }

    /// Both churn horizons count as the positive class.
    pub fn binary(self) -> u8 {
        match self {
            TernaryLabel::Continua => 0,
            TernaryLabel::BajaMas1 | TernaryLabel::BajaMas2 => 1,
        }
    }
}

impl fmt::Display for TernaryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `observed` holds every month index present in the dataset. A missing row
/// two months ahead only counts as churn when that month was observed at all.
fn classify(
    current: i64,
    next: Option<i64>,
    after_next: Option<i64>,
    observed: &HashSet<i64>,
) -> TernaryLabel {
    let Some(next) = next else {
        return TernaryLabel::BajaMas1;
    };
    if next - current > 1 {
        return TernaryLabel::BajaMas1;
    }
    match after_next {
        Some(after) if after - current > 2 => TernaryLabel::BajaMas2,
        Some(_) => TernaryLabel::Continua,
        None if observed.contains(&(current + 2)) => TernaryLabel::BajaMas2,
        None => TernaryLabel::Continua,
    }
}

/// Assigns one label per row. `customers` and `months` are parallel slices in
/// the caller's row order; the result uses the same order.
pub fn assign_labels(customers: &[i64], months: &[i64]) -> ChurnResult<Vec<TernaryLabel>> {
    if customers.len() != months.len() {
        return Err(ChurnError::LengthMismatch {
            left: customers.len(),
            right: months.len(),
        });
    }
    let indices = months
        .iter()
        .map(|&month| month_index(month))
        .collect::<ChurnResult<Vec<i64>>>()?;
    let observed: HashSet<i64> = indices.iter().copied().collect();

    let mut labels = vec![TernaryLabel::BajaMas1; customers.len()];
    for group in customer_month_groups(customers, months) {
        for (pos, &row) in group.iter().enumerate() {
            let next = group.get(pos + 1).map(|&r| indices[r]);
            if next == Some(indices[row]) {
                return Err(ChurnError::DuplicateSnapshot {
                    customer: customers[row],
                    month: months[row],
                });
            }
            let after_next = group.get(pos + 2).map(|&r| indices[r]);
            labels[row] = classify(indices[row], next, after_next, &observed);
        }
    }
    Ok(labels)
}

/// Adds (or replaces) the `clase_ternaria` column.
pub fn add_ternary_labels(dataset: &mut Dataset) -> ChurnResult<()> {
    dataset.require_columns(&[CUSTOMER_COLUMN, MONTH_COLUMN])?;
    let customers = dataset.integer_column(CUSTOMER_COLUMN)?;
    let months = dataset.integer_column(MONTH_COLUMN)?;
    let labels = assign_labels(&customers, &months)?;

    let histogram = label_histogram(&labels);
    info!(
        "Built {} over {} rows: {}",
        LABEL_COLUMN,
        labels.len(),
        format_histogram(&histogram)
    );

    let column = Column::Text(
        labels
            .iter()
            .map(|label| Some(label.as_str().to_string()))
            .collect(),
    );
    dataset.push_column(LABEL_COLUMN, column)
}

pub fn binarize_labels(labels: &[TernaryLabel]) -> Vec<u8> {
    labels.iter().map(|label| label.binary()).collect()
}

/// Reads `clase_ternaria` back from a dataset.
pub fn read_labels(dataset: &Dataset) -> ChurnResult<Vec<TernaryLabel>> {
    match dataset.column(LABEL_COLUMN) {
        None => Err(ChurnError::MissingColumns {
            columns: vec![LABEL_COLUMN.to_string()],
        }),
        Some(Column::Numeric(values)) => Err(ChurnError::InvalidLabel {
            column: LABEL_COLUMN.to_string(),
            value: values
                .iter()
                .flatten()
                .next()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }),
        Some(Column::Text(values)) => values
            .iter()
            .map(|value| {
                let raw = value.as_deref().unwrap_or("");
                TernaryLabel::parse(raw).ok_or_else(|| ChurnError::InvalidLabel {
                    column: LABEL_COLUMN.to_string(),
                    value: raw.to_string(),
                })
            })
            .collect(),
    }
}

/// Adds (or replaces) the numeric `clase_binaria` column from `clase_ternaria`.
pub fn add_binary_target(dataset: &mut Dataset) -> ChurnResult<()> {
    let labels = read_labels(dataset)?;
    let target = binarize_labels(&labels);
    let positives = target.iter().filter(|&&value| value == 1).count();
    info!(
        "Built {}: {} positive / {} negative",
        TARGET_COLUMN,
        positives,
        target.len() - positives
    );
    dataset.push_column(
        TARGET_COLUMN,
        Column::Numeric(target.iter().map(|&v| Some(f64::from(v))).collect()),
    )
}

/// Reads `clase_binaria` as 0/1 labels.
pub fn read_target(dataset: &Dataset) -> ChurnResult<Vec<u8>> {
    Ok(dataset
        .integer_column(TARGET_COLUMN)?
        .into_iter()
        .map(|value| u8::from(value != 0))
        .collect())
}

pub fn label_histogram(labels: &[TernaryLabel]) -> BTreeMap<TernaryLabel, usize> {
    let mut histogram = BTreeMap::new();
    for label in labels {
        *histogram.entry(*label).or_insert(0) += 1;
    }
    histogram
}

fn format_histogram(histogram: &BTreeMap<TernaryLabel, usize>) -> String {
    histogram
        .iter()
        .map(|(label, count)| format!("{label}={count}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::TernaryLabel::{BajaMas1, BajaMas2, Continua};

    fn snapshot(rows: &[(i64, i64)]) -> Dataset {
        Dataset::from_columns(vec![
            (
                CUSTOMER_COLUMN.to_string(),
                Column::Numeric(rows.iter().map(|(c, _)| Some(*c as f64)).collect()),
            ),
            (
                MONTH_COLUMN.to_string(),
                Column::Numeric(rows.iter().map(|(_, m)| Some(*m as f64)).collect()),
            ),
            (
                "mcuentas_saldo".to_string(),
                Column::Numeric(rows.iter().map(|_| Some(1.0)).collect()),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn contiguous_history_is_continua_until_last_month() {
        let customers = [7, 7, 7, 7];
        let months = [202101, 202102, 202103, 202104];
        let labels = assign_labels(&customers, &months).unwrap();
        assert_eq!(labels, vec![Continua, Continua, Continua, BajaMas1]);
    }

    #[test]
    fn one_month_gap_marks_both_horizons() {
        let customers = [1, 1, 1, 1, 1];
        let months = [202101, 202102, 202103, 202105, 202106];
        let labels = assign_labels(&customers, &months).unwrap();
        assert_eq!(
            labels,
            vec![Continua, BajaMas2, BajaMas1, Continua, BajaMas1]
        );
    }

    #[test]
    fn year_boundary_counts_as_contiguous() {
        let labels = assign_labels(&[5, 5, 5], &[202011, 202012, 202101]).unwrap();
        assert_eq!(labels, vec![Continua, Continua, BajaMas1]);
    }

    #[test]
    fn labels_follow_original_row_order() {
        let customers = [2, 1, 2, 1, 2];
        let months = [202103, 202102, 202101, 202101, 202102];
        let labels = assign_labels(&customers, &months).unwrap();
        assert_eq!(labels, vec![BajaMas1, BajaMas1, Continua, BajaMas2, Continua]);
    }

    #[test]
    fn customer_leaving_mid_window_gets_both_horizons() {
        let customers = [1, 1, 1, 1, 1, 1, 7, 7, 7];
        let months = [
            202101, 202102, 202103, 202104, 202105, 202106, 202101, 202102, 202103,
        ];
        let labels = assign_labels(&customers, &months).unwrap();
        assert_eq!(&labels[6..], &[Continua, BajaMas2, BajaMas1]);
        assert_eq!(
            &labels[..6],
            &[Continua, Continua, Continua, Continua, Continua, BajaMas1]
        );
    }

    #[test]
    fn unobserved_future_month_is_not_churn() {
        let labels = assign_labels(&[3, 3, 4], &[202103, 202104, 202104]).unwrap();
        assert_eq!(labels, vec![Continua, BajaMas1, BajaMas1]);
    }

    #[test]
    fn single_snapshot_customer_is_baja_mas_1() {
        let labels = assign_labels(&[9], &[202104]).unwrap();
        assert_eq!(labels, vec![BajaMas1]);
    }

    #[test]
    fn duplicate_snapshot_is_rejected() {
        let err = assign_labels(&[1, 1], &[202101, 202101]).unwrap_err();
        assert!(matches!(
            err,
            ChurnError::DuplicateSnapshot {
                customer: 1,
                month: 202101
            }
        ));
    }

    #[test]
    fn missing_key_column_fails_validation() {
        let mut dataset = Dataset::from_columns(vec![(
            CUSTOMER_COLUMN.to_string(),
            Column::Numeric(vec![Some(1.0)]),
        )])
        .unwrap();
        let err = add_ternary_labels(&mut dataset).unwrap_err();
        match err {
            ChurnError::MissingColumns { columns } => {
                assert_eq!(columns, vec![MONTH_COLUMN.to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn binary_target_preserves_row_count() {
        let mut dataset = snapshot(&[
            (1, 202101),
            (1, 202102),
            (1, 202103),
            (2, 202101),
            (2, 202102),
            (2, 202104),
        ]);
        add_ternary_labels(&mut dataset).unwrap();
        let labels = read_labels(&dataset).unwrap();
        let histogram = label_histogram(&labels);
        assert_eq!(histogram.len(), 3, "all three classes present");

        add_binary_target(&mut dataset).unwrap();
        let target = read_target(&dataset).unwrap();
        assert_eq!(target.len(), dataset.row_count());
        let ones = target.iter().filter(|&&v| v == 1).count();
        let zeros = target.iter().filter(|&&v| v == 0).count();
        assert_eq!(ones + zeros, dataset.row_count());
        assert_eq!(dataset.column_count(), 5);
    }
}
