use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("Dataset is missing required column(s): {}", columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("Column '{column}' must be numeric; found non-numeric value '{value}'")]
    NonNumericColumn { column: String, value: String },

    #[error("Column '{column}' has a missing value at row {row}")]
    MissingKeyValue { column: String, row: usize },

    #[error("Column '{column}' has {actual} rows; dataset has {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Customer {customer} appears more than once in snapshot month {month}")]
    DuplicateSnapshot { customer: i64, month: i64 },

    #[error("Unrecognized value '{value}' in column '{column}'")]
    InvalidLabel { column: String, value: String },

    #[error("Invalid snapshot month {0}; expected YYYYMM")]
    InvalidMonth(i64),

    #[error("Lag depth must be at least 1 (got {0})")]
    InvalidLagDepth(usize),

    #[error("Length mismatch: {left} true labels vs {right} predictions")]
    LengthMismatch { left: usize, right: usize },

    #[error("Trial log {path} does not exist; run the optimization first")]
    TrialLogNotFound { path: String },

    #[error("Trial log {path} contains no trials")]
    EmptyTrialLog { path: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid search range for {name}: min {min} > max {max}")]
    InvalidRange { name: String, min: f64, max: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ChurnResult<T> = Result<T, ChurnError>;
