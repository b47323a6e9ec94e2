use crate::models::{HyperparameterSet, ParamValue, SearchSpace, INTEGER_PARAMETERS};

/// Parameters the trainer consumes itself instead of passing to LightGBM.
pub const CONTROL_PARAMETERS: [&str; 1] = ["num_boost_round"];

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HyperparameterSet, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .map(|value| value.as_f64())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as usize, rounded and clamped to a range with finite checks
pub fn get_param_usize_rounded_clamped(
    params: &HyperparameterSet,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> usize {
    let raw = get_param_f64(params, key, default as f64);
    raw.round().clamp(min as f64, max as f64) as usize
}

/// Get a parameter rounded to an i64, returns None if not found or not finite
pub fn rounded_param(params: &HyperparameterSet, key: &str) -> Option<i64> {
    params
        .get(key)
        .map(|value| value.as_f64())
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
}

/// Clamp parameter values to their defined bounds, rounding integer parameters
pub fn clamp_to_bounds(params: &mut HyperparameterSet, space: &SearchSpace) {
    for (key, range) in space.iter() {
        if let Some(value) = params.get_mut(key) {
            *value = range.value(value.as_f64());
        }
    }
}

/// Render a parameter set as LightGBM `key=value` arguments.
pub fn lightgbm_parameter_args(params: &HyperparameterSet) -> Vec<String> {
    params
        .iter()
        .filter(|(key, _)| !CONTROL_PARAMETERS.contains(&key.as_str()))
        .map(|(key, value)| {
            if INTEGER_PARAMETERS.contains(&key.as_str()) {
                format!("{key}={}", rounded_param(params, key).unwrap_or_default())
            } else {
                match value {
                    ParamValue::Int(v) => format!("{key}={v}"),
                    ParamValue::Float(v) => format!("{key}={v}"),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params() -> HyperparameterSet {
        let mut params = HyperparameterSet::new();
        params.insert("num_leaves".to_string(), ParamValue::Float(30.7));
        params.insert("learning_rate".to_string(), ParamValue::Float(0.05));
        params.insert("num_boost_round".to_string(), ParamValue::Int(400));
        params
    }

    #[test]
    fn lightgbm_args_round_integers_and_skip_controls() {
        let args = lightgbm_parameter_args(&params());
        assert_eq!(
            args,
            vec!["learning_rate=0.05".to_string(), "num_leaves=31".to_string()]
        );
    }

    #[test]
    fn clamp_to_bounds_respects_space() {
        let mut bounds = BTreeMap::new();
        bounds.insert("num_leaves".to_string(), (8.0, 16.0));
        bounds.insert("learning_rate".to_string(), (0.1, 0.2));
        let space = SearchSpace::from_bounds(&bounds).unwrap();
        let mut params = params();
        clamp_to_bounds(&mut params, &space);
        assert_eq!(params["num_leaves"], ParamValue::Int(16));
        assert_eq!(params["learning_rate"], ParamValue::Float(0.1));
        assert_eq!(params["num_boost_round"], ParamValue::Int(400));
    }

    #[test]
    fn usize_params_fall_back_to_default() {
        let params = params();
        assert_eq!(
            get_param_usize_rounded_clamped(&params, "num_boost_round", 1000, 1, 500),
            400
        );
        assert_eq!(
            get_param_usize_rounded_clamped(&params, "bagging_freq", 0, 0, 10),
            0
        );
    }
}
