use crate::error::{ChurnError, ChurnResult};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as FmtWrite;
use std::path::Path;

pub const CUSTOMER_COLUMN: &str = "numero_de_cliente";
pub const MONTH_COLUMN: &str = "foto_mes";

const MISSING_TOKENS: [&str; 6] = ["", "NA", "NaN", "nan", "null", "NULL"];

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a new column whose row `i` holds the value at `source[i]`, or a
    /// missing value when the source index is absent.
    pub fn gather(&self, source: &[Option<usize>]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(
                source
                    .iter()
                    .map(|idx| idx.and_then(|i| values[i]))
                    .collect(),
            ),
            Column::Text(values) => Column::Text(
                source
                    .iter()
                    .map(|idx| idx.and_then(|i| values[i].clone()))
                    .collect(),
            ),
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            Column::Numeric(values) => values[row].map(format_number).unwrap_or_default(),
            Column::Text(values) => values[row].clone().unwrap_or_default(),
        }
    }

    fn from_raw(raw: Vec<Option<String>>) -> Column {
        let numeric = raw
            .iter()
            .flatten()
            .all(|value| value.trim().parse::<f64>().is_ok());
        if numeric {
            Column::Numeric(
                raw.iter()
                    .map(|value| value.as_ref().and_then(|v| v.trim().parse::<f64>().ok()))
                    .collect(),
            )
        } else {
            Column::Text(raw)
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Row-major numeric features with `NaN` for missing cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }
}

/// Columnar snapshot table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    pub fn from_columns(columns: Vec<(String, Column)>) -> ChurnResult<Self> {
        let mut dataset = Dataset::default();
        if let Some((_, first)) = columns.first() {
            dataset.row_count = first.len();
        }
        for (name, column) in columns {
            dataset.push_column(name, column)?;
        }
        Ok(dataset)
    }

    pub fn load_csv(path: impl AsRef<Path>) -> ChurnResult<Self> {
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            for (idx, slot) in raw.iter_mut().enumerate() {
                let value = record.get(idx).unwrap_or("");
                if MISSING_TOKENS.contains(&value.trim()) {
                    slot.push(None);
                } else {
                    slot.push(Some(value.to_string()));
                }
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, values)| (name, Column::from_raw(values)))
            .collect();
        let dataset = Self::from_columns(columns)?;
        debug!(
            "Parsed {} rows x {} columns from {}",
            dataset.row_count(),
            dataset.column_count(),
            path.display()
        );
        Ok(dataset)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> ChurnResult<()> {
        let path = path.as_ref();
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record(&self.names)?;
        for row in 0..self.row_count {
            writer.write_record(self.columns.iter().map(|column| column.cell(row)))?;
        }
        writer.flush()?;
        info!(
            "Wrote {} rows x {} columns to {}",
            self.row_count,
            self.column_count(),
            path.display()
        );
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Appends a column, replacing any existing column with the same name.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> ChurnResult<()> {
        let name = name.into();
        if !self.names.is_empty() && column.len() != self.row_count {
            return Err(ChurnError::ColumnLength {
                column: name,
                expected: self.row_count,
                actual: column.len(),
            });
        }
        if self.names.is_empty() {
            self.row_count = column.len();
        }
        match self.position(&name) {
            Some(idx) => self.columns[idx] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(())
    }

    pub fn require_columns(&self, required: &[&str]) -> ChurnResult<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !self.has_column(name))
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChurnError::MissingColumns { columns: missing })
        }
    }

    /// Reads a fully populated numeric column as integers.
    pub fn integer_column(&self, name: &str) -> ChurnResult<Vec<i64>> {
        match self.column(name) {
            None => Err(ChurnError::MissingColumns {
                columns: vec![name.to_string()],
            }),
            Some(Column::Text(values)) => {
                let sample = values.iter().flatten().next().cloned().unwrap_or_default();
                Err(ChurnError::NonNumericColumn {
                    column: name.to_string(),
                    value: sample,
                })
            }
            Some(Column::Numeric(values)) => values
                .iter()
                .enumerate()
                .map(|(row, value)| {
                    value
                        .map(|v| v as i64)
                        .ok_or_else(|| ChurnError::MissingKeyValue {
                            column: name.to_string(),
                            row,
                        })
                })
                .collect(),
        }
    }

    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        let source: Vec<Option<usize>> = rows.iter().map(|&row| Some(row)).collect();
        Dataset {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.gather(&source)).collect(),
            row_count: rows.len(),
        }
    }

    pub fn filter_months(&self, months: &[i64]) -> ChurnResult<Dataset> {
        let foto_mes = self.integer_column(MONTH_COLUMN)?;
        let wanted: HashSet<i64> = months.iter().copied().collect();
        let rows: Vec<usize> = foto_mes
            .iter()
            .enumerate()
            .filter(|(_, month)| wanted.contains(month))
            .map(|(row, _)| row)
            .collect();
        Ok(self.select_rows(&rows))
    }

    pub fn month_histogram(&self) -> ChurnResult<BTreeMap<i64, usize>> {
        let mut histogram = BTreeMap::new();
        for month in self.integer_column(MONTH_COLUMN)? {
            *histogram.entry(month).or_insert(0) += 1;
        }
        Ok(histogram)
    }

    /// Numeric columns, minus `exclude`, as a row-major matrix.
    pub fn feature_matrix(&self, exclude: &[&str]) -> FeatureMatrix {
        let selected: Vec<(&String, &Vec<Option<f64>>)> = self
            .names
            .iter()
            .zip(&self.columns)
            .filter(|(name, _)| !exclude.contains(&name.as_str()))
            .filter_map(|(name, column)| match column {
                Column::Numeric(values) => Some((name, values)),
                Column::Text(_) => None,
            })
            .collect();

        let rows = (0..self.row_count)
            .map(|row| {
                selected
                    .iter()
                    .map(|(_, values)| values[row].unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();

        FeatureMatrix {
            feature_names: selected.iter().map(|(name, _)| (*name).clone()).collect(),
            rows,
        }
    }

    /// Text columns that `feature_matrix` leaves out.
    pub fn text_columns(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(&self.columns)
            .filter(|(_, column)| matches!(column, Column::Text(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn format_head(&self, rows: usize) -> String {
        let shown = rows.min(self.row_count);
        let mut widths: Vec<usize> = self.names.iter().map(String::len).collect();
        let cells: Vec<Vec<String>> = (0..shown)
            .map(|row| self.columns.iter().map(|c| c.cell(row)).collect())
            .collect();
        for row in &cells {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.len());
            }
        }

        let mut out = String::new();
        for (name, width) in self.names.iter().zip(widths.iter().copied()) {
            let _ = write!(out, "{name:>width$} ");
        }
        out.push('\n');
        for row in cells {
            for (cell, width) in row.iter().zip(widths.iter().copied()) {
                let _ = write!(out, "{cell:>width$} ");
            }
            out.push('\n');
        }
        out
    }
}

/// Row indices of every customer, each group ordered by month ascending.
/// The dataset itself is left in its original order.
pub fn customer_month_groups(customers: &[i64], months: &[i64]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..customers.len()).collect();
    order.sort_by_key(|&row| (customers[row], months[row]));

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for row in order {
        match groups.last_mut() {
            Some(group) if customers[group[0]] == customers[row] => group.push(row),
            _ => groups.push(vec![row]),
        }
    }
    groups
}
