//! In-process scoring of LightGBM text models.

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use std::str::FromStr;

const DEFAULT_LEFT_MASK: i32 = 1 << 1;
const MISSING_TYPE_SHIFT: i32 = 2;
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: i32) -> Self {
        match (decision_type >> MISSING_TYPE_SHIFT) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

#[derive(Debug, Clone)]
struct BoosterTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    decision_types: Vec<i32>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl BoosterTree {
    fn from_lines(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Result<Self> {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut decision_types = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();

        while let Some(peeked) = lines.peek() {
            let peeked = peeked.trim();
            if peeked.starts_with("Tree=") || peeked == "end of trees" {
                break;
            }
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.trim();

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("decision_type=") {
                decision_types = parse_array(line, "decision_type=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(anyhow!(
                "LightGBM tree definition invalid: split/child/threshold length mismatch"
            ));
        }
        if decision_types.is_empty() {
            decision_types = vec![0; internal_nodes];
        } else if decision_types.len() != internal_nodes {
            return Err(anyhow!(
                "LightGBM tree definition invalid: {} decision types for {} splits",
                decision_types.len(),
                internal_nodes
            ));
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves != leaf_values.len() {
            return Err(anyhow!(
                "LightGBM tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            ));
        }

        Ok(Self {
            split_features,
            thresholds,
            decision_types,
            left_child,
            right_child,
            leaf_values,
        })
    }

    fn go_left(&self, node_idx: usize, raw_value: f64) -> bool {
        let decision_type = self.decision_types[node_idx];
        let missing_type = MissingType::from_decision_type(decision_type);
        let mut value = raw_value;
        if value.is_nan() && missing_type != MissingType::NaN {
            value = 0.0;
        }
        let is_missing = match missing_type {
            MissingType::Zero => value.abs() <= ZERO_THRESHOLD,
            MissingType::NaN => value.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            decision_type & DEFAULT_LEFT_MASK != 0
        } else {
            value <= self.thresholds[node_idx]
        }
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or_default();
        }
        let mut node_idx = 0usize;
        loop {
            let feature_idx = self.split_features[node_idx];
            let feature_value = features.get(feature_idx).copied().unwrap_or(f64::NAN);
            let child = if self.go_left(node_idx, feature_value) {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default();
            }

            node_idx = child as usize;
        }
    }
}

/// A binary-objective LightGBM model loaded from its text dump.
#[derive(Debug, Clone)]
pub struct Booster {
    trees: Vec<BoosterTree>,
    feature_count: usize,
    feature_names: Vec<String>,
    sigmoid: f64,
}

impl Booster {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut feature_names = Vec::new();
        let mut sigmoid = 1.0;
        let mut num_tree_per_iteration: usize = 1;

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "end of trees" {
                break;
            }

            if trimmed.starts_with("objective=") {
                if !trimmed.contains("binary") {
                    return Err(anyhow!(
                        "Only binary LightGBM models are supported (found \"{trimmed}\")"
                    ));
                }
                sigmoid = extract_sigmoid(trimmed);
            } else if trimmed.starts_with("num_tree_per_iteration=") {
                num_tree_per_iteration = parse_value(trimmed, "num_tree_per_iteration=")?;
            } else if trimmed.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed, "max_feature_idx=")?);
            } else if trimmed.starts_with("feature_names=") {
                feature_names = trimmed
                    .trim_start_matches("feature_names=")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            } else if trimmed.starts_with("Tree=") {
                trees.push(BoosterTree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            return Err(anyhow!("LightGBM model contained no trees"));
        }
        if num_tree_per_iteration != 1 {
            return Err(anyhow!(
                "Expected one tree per iteration for a binary model, found {num_tree_per_iteration}"
            ));
        }

        let inferred_max_feature = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_max_feature + 1);

        Ok(Self {
            trees,
            feature_count,
            feature_names,
            sigmoid,
        })
    }

    pub fn num_iterations(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.feature_count
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Raw margin using the first `iterations` trees (all when `None`).
    pub fn predict_raw(&self, features: &[f64], iterations: Option<usize>) -> f64 {
        let limit = iterations
            .unwrap_or(self.trees.len())
            .min(self.trees.len());
        self.trees[..limit]
            .iter()
            .map(|tree| tree.predict(features))
            .sum()
    }

    pub fn probability_from_raw(&self, raw: f64) -> f64 {
        let logit = raw * self.sigmoid;
        (1.0 / (1.0 + (-logit).exp())).clamp(0.0, 1.0)
    }

    pub fn predict_probability(&self, features: &[f64], iterations: Option<usize>) -> f64 {
        self.probability_from_raw(self.predict_raw(features, iterations))
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>], iterations: Option<usize>) -> Vec<f64> {
        rows.par_iter()
            .map(|row| self.predict_probability(row, iterations))
            .collect()
    }

    /// Probabilities after every boosting iteration, computed incrementally:
    /// `result[k][row]` uses the first `k + 1` trees.
    pub fn staged_probabilities(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut margins = vec![0.0; rows.len()];
        let mut stages = Vec::with_capacity(self.trees.len());
        for tree in &self.trees {
            margins
                .par_iter_mut()
                .zip(rows.par_iter())
                .for_each(|(margin, row)| *margin += tree.predict(row));
            stages.push(
                margins
                    .iter()
                    .map(|&raw| self.probability_from_raw(raw))
                    .collect(),
            );
        }
        stages
    }
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.trim().parse::<T>().map_err(|err| {
        anyhow!(
            "Failed to parse value for {prefix} from \"{line}\" while loading LightGBM model: {err}"
        )
    })
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("Failed to parse value {token} for {prefix}: {err}"))
        })
        .collect()
}

fn extract_sigmoid(objective_line: &str) -> f64 {
    objective_line
        .split_whitespace()
        .find_map(|token| token.strip_prefix("sigmoid:"))
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two stumps on feature 0. Tree 0 sends NaN left (decision_type 10 =
    // default_left | missing NaN); tree 1 has no missing handling.
    fn two_tree_model() -> &'static str {
        "tree\nversion=v4\nnum_class=1\nnum_tree_per_iteration=1\nlabel_index=0\nmax_feature_idx=1\n\
         objective=binary sigmoid:1\nfeature_names=mpayroll ctrx_quarter\n\n\
         Tree=0\nnum_leaves=2\nnum_cat=0\nsplit_feature=0\nsplit_gain=1\nthreshold=0.5\ndecision_type=10\n\
         left_child=-1\nright_child=-2\nleaf_value=-1 1\nshrinkage=1\n\n\
         Tree=1\nnum_leaves=2\nnum_cat=0\nsplit_feature=0\nsplit_gain=1\nthreshold=0.5\ndecision_type=0\n\
         left_child=-1\nright_child=-2\nleaf_value=-0.5 0.5\nshrinkage=0.1\n\n\
         end of trees\n\nfeature_importances:\nmpayroll=2\n\nparameters:\n[num_leaves: 2]\nend of parameters\n"
    }

    #[test]
    fn parses_header_and_trees() {
        let booster = Booster::from_model_text(two_tree_model()).unwrap();
        assert_eq!(booster.num_iterations(), 2);
        assert_eq!(booster.num_features(), 2);
        assert_eq!(booster.feature_names(), ["mpayroll", "ctrx_quarter"]);
    }

    #[test]
    fn predicts_sigmoid_of_summed_leaves() {
        let booster = Booster::from_model_text(two_tree_model()).unwrap();
        let p = booster.predict_probability(&[1.0, 0.0], None);
        let expected = 1.0 / (1.0 + (-1.5f64).exp());
        assert!((p - expected).abs() < 1e-12, "p={p}");

        let first_only = booster.predict_probability(&[1.0, 0.0], Some(1));
        let expected_first = 1.0 / (1.0 + (-1.0f64).exp());
        assert!((first_only - expected_first).abs() < 1e-12);
    }

    #[test]
    fn missing_values_follow_default_direction() {
        let booster = Booster::from_model_text(two_tree_model()).unwrap();
        // Tree 0: NaN goes left (-1). Tree 1: NaN is treated as 0.0 -> left (-0.5).
        let raw = booster.predict_raw(&[f64::NAN, 0.0], None);
        assert!((raw + 1.5).abs() < 1e-12, "raw={raw}");
    }

    #[test]
    fn staged_probabilities_match_truncated_predictions() {
        let booster = Booster::from_model_text(two_tree_model()).unwrap();
        let rows = vec![vec![0.0, 0.0], vec![2.0, 0.0]];
        let stages = booster.staged_probabilities(&rows);
        assert_eq!(stages.len(), 2);
        for (k, stage) in stages.iter().enumerate() {
            let direct = booster.predict_batch(&rows, Some(k + 1));
            for (a, b) in stage.iter().zip(&direct) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rejects_multiclass_models() {
        let text = "objective=multiclass num_class:3\nTree=0\nnum_leaves=1\nleaf_value=0\n";
        assert!(Booster::from_model_text(text).is_err());
    }
}
