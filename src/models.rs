use crate::error::{ChurnError, ChurnResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// LightGBM parameters that only accept integer values.
pub const INTEGER_PARAMETERS: [&str; 6] = [
    "num_leaves",
    "min_data_in_leaf",
    "max_depth",
    "bagging_freq",
    "num_boost_round",
    "max_bin",
];

/// One or many snapshot months, as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MonthSpec {
    Single(i64),
    Many(Vec<i64>),
}

impl MonthSpec {
    pub fn months(&self) -> Vec<i64> {
        match self {
            MonthSpec::Single(month) => vec![*month],
            MonthSpec::Many(months) => months.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MonthSpec::Many(months) if months.is_empty())
    }
}

impl fmt::Display for MonthSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthSpec::Single(month) => write!(f, "{month}"),
            MonthSpec::Many(months) => write!(f, "{months:?}"),
        }
    }
}

/// Converts a `YYYYMM` snapshot month into a running month count so that
/// December to January is a distance of one.
pub fn month_index(foto_mes: i64) -> ChurnResult<i64> {
    let year = foto_mes / 100;
    let month = foto_mes % 100;
    if !(1..=12).contains(&month) || year <= 0 {
        return Err(ChurnError::InvalidMonth(foto_mes));
    }
    Ok(year * 12 + (month - 1))
}

/// A sampled hyperparameter value. Integers and floats are kept apart so the
/// trial log reads back exactly as it was written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Int(value) => value as f64,
            ParamValue::Float(value) => value,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Float(value) => write!(f, "{value}"),
        }
    }
}

pub type HyperparameterSet = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

impl ParameterRange {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min - 1e-9 && value <= self.max + 1e-9
    }

    pub fn value(&self, raw: f64) -> ParamValue {
        let clamped = raw.clamp(self.min, self.max);
        if self.integer {
            ParamValue::Int(clamped.round() as i64)
        } else {
            ParamValue::Float(clamped)
        }
    }
}

/// Named parameter ranges, iterated in name order so that seeded searches are
/// reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    ranges: BTreeMap<String, ParameterRange>,
}

impl SearchSpace {
    pub fn from_bounds(bounds: &BTreeMap<String, (f64, f64)>) -> ChurnResult<Self> {
        let mut ranges = BTreeMap::new();
        for (name, &(min, max)) in bounds {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(ChurnError::InvalidRange {
                    name: name.clone(),
                    min,
                    max,
                });
            }
            let integer = INTEGER_PARAMETERS.contains(&name.as_str());
            ranges.insert(name.clone(), ParameterRange { min, max, integer });
        }
        Ok(Self { ranges })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterRange> {
        self.ranges.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterRange)> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True when every parameter of the space is present and inside its range.
    pub fn admits(&self, params: &HyperparameterSet) -> bool {
        self.ranges.iter().all(|(name, range)| {
            params
                .get(name)
                .map(|value| range.contains(value.as_f64()))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialState {
    Complete,
    Pruned,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfigSnapshot {
    pub semilla: Vec<u64>,
    pub mes_train: MonthSpec,
    #[serde(rename = "mes_validación")]
    pub mes_validacion: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_number: usize,
    pub params: HyperparameterSet,
    pub value: f64,
    pub datetime: String,
    pub state: TrialState,
    #[serde(rename = "configuración")]
    pub configuracion: TrialConfigSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_iteration: Option<usize>,
}

impl TrialRecord {
    pub fn completed(
        trial_number: usize,
        params: HyperparameterSet,
        value: f64,
        configuracion: TrialConfigSnapshot,
        best_iteration: Option<usize>,
    ) -> Self {
        let now: DateTime<Local> = Local::now();
        Self {
            trial_number,
            params,
            value,
            datetime: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            state: TrialState::Complete,
            configuracion,
            best_iteration,
        }
    }
}

pub fn format_params(params: &HyperparameterSet) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_index_wraps_year_boundary() {
        let dec = month_index(202012).unwrap();
        let jan = month_index(202101).unwrap();
        assert_eq!(jan - dec, 1);
        assert!(month_index(202113).is_err());
        assert!(month_index(202100).is_err());
    }

    #[test]
    fn month_spec_accepts_scalar_or_list() {
        let single: MonthSpec = serde_yaml::from_str("202102").unwrap();
        let many: MonthSpec = serde_yaml::from_str("[202101, 202102]").unwrap();
        assert_eq!(single.months(), vec![202102]);
        assert_eq!(many.months(), vec![202101, 202102]);
    }

    #[test]
    fn trial_record_uses_log_field_names() {
        let mut params = HyperparameterSet::new();
        params.insert("num_leaves".to_string(), ParamValue::Int(31));
        params.insert("learning_rate".to_string(), ParamValue::Float(0.05));
        let record = TrialRecord::completed(
            3,
            params,
            1250.0,
            TrialConfigSnapshot {
                semilla: vec![42],
                mes_train: MonthSpec::Single(202102),
                mes_validacion: 202103,
            },
            None,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "COMPLETE");
        assert_eq!(json["params"]["num_leaves"], 31);
        assert_eq!(json["configuración"]["mes_validación"], 202103);
        assert!(json.get("best_iteration").is_none());

        let back: TrialRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn search_space_marks_integer_parameters() {
        let mut bounds = BTreeMap::new();
        bounds.insert("num_leaves".to_string(), (8.0, 64.0));
        bounds.insert("learning_rate".to_string(), (0.01, 0.1));
        let space = SearchSpace::from_bounds(&bounds).unwrap();
        assert!(space.get("num_leaves").unwrap().integer);
        assert!(!space.get("learning_rate").unwrap().integer);
        assert_eq!(
            space.get("num_leaves").unwrap().value(31.6),
            ParamValue::Int(32)
        );

        bounds.insert("lambda_l1".to_string(), (2.0, 1.0));
        assert!(SearchSpace::from_bounds(&bounds).is_err());
    }
}
