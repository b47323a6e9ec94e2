//! Tree-structured Parzen Estimator sampling over a [`SearchSpace`].
//!
//! Completed trials are split at the `gamma` quantile into a "good" set (the
//! highest scores) and a "bad" set. Candidates are drawn from a Gaussian KDE
//! around the good values and the one maximizing `l(x) / g(x)` is kept.

use crate::models::{HyperparameterSet, ParameterRange, SearchSpace};
use log::debug;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::{Continuous, Normal};

const DEFAULT_GAMMA: f64 = 0.25;
const DEFAULT_STARTUP_TRIALS: usize = 10;
const DEFAULT_CANDIDATES: usize = 24;
const MIN_BANDWIDTH_FRACTION: f64 = 1e-3;

/// Proposes hyperparameters and learns from their scores. Scores are
/// maximized.
pub trait Sampler {
    fn suggest(&mut self, space: &SearchSpace) -> HyperparameterSet;
    fn observe(&mut self, params: &HyperparameterSet, score: f64);
}

#[derive(Debug, Clone)]
pub struct TpeSampler {
    rng: StdRng,
    gamma: f64,
    n_startup: usize,
    n_candidates: usize,
    history: Vec<(HyperparameterSet, f64)>,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            gamma: DEFAULT_GAMMA,
            n_startup: DEFAULT_STARTUP_TRIALS,
            n_candidates: DEFAULT_CANDIDATES,
            history: Vec::new(),
        }
    }

    pub fn with_startup(mut self, n_startup: usize) -> Self {
        self.n_startup = n_startup.max(1);
        self
    }

    pub fn observed(&self) -> usize {
        self.history.len()
    }

    fn sample_uniform(&mut self, range: &ParameterRange) -> f64 {
        if range.max <= range.min {
            return range.min;
        }
        if range.integer {
            let (low, high) = sampling_bounds(range);
            return Uniform::new(low, high).sample(&mut self.rng);
        }
        Uniform::new_inclusive(range.min, range.max).sample(&mut self.rng)
    }

    /// Highest-scoring `gamma` share first, the rest second.
    fn split_history(&self) -> (Vec<HyperparameterSet>, Vec<HyperparameterSet>) {
        let mut ranked: Vec<&(HyperparameterSet, f64)> = self.history.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let n_good = ((ranked.len() as f64) * self.gamma).ceil() as usize;
        let n_good = n_good.max(1).min(ranked.len() - 1);
        let (good, bad) = ranked.split_at(n_good);
        (
            good.iter().map(|(params, _)| params.clone()).collect(),
            bad.iter().map(|(params, _)| params.clone()).collect(),
        )
    }

    fn sample_tpe(
        &mut self,
        name: &str,
        range: &ParameterRange,
        good: &[&HyperparameterSet],
        bad: &[&HyperparameterSet],
    ) -> f64 {
        let values = |sets: &[&HyperparameterSet]| -> Vec<f64> {
            sets.iter()
                .filter_map(|params| params.get(name))
                .map(|value| value.as_f64())
                .filter(|value| range.contains(*value))
                .collect()
        };
        let good_values = values(good);
        let bad_values = values(bad);
        if good_values.is_empty() {
            return self.sample_uniform(range);
        }

        let width = range.max - range.min;
        if width <= 0.0 {
            return range.min;
        }
        let bandwidth = bandwidth(good_values.len(), width);
        let (low, high) = sampling_bounds(range);
        let pick = Uniform::new(0, good_values.len());

        let mut best_value = good_values[0];
        let mut best_ratio = f64::NEG_INFINITY;
        for _ in 0..self.n_candidates {
            let center = good_values[pick.sample(&mut self.rng)];
            let candidate = match Normal::new(center, bandwidth) {
                Ok(kernel) => kernel.sample(&mut self.rng).clamp(low, high),
                Err(_) => center,
            };
            let l = kde_density(candidate, &good_values, bandwidth);
            let g = kde_density(candidate, &bad_values, bandwidth);
            let ratio = l / (g + 1e-12);
            if ratio > best_ratio {
                best_ratio = ratio;
                best_value = candidate;
            }
        }
        best_value
    }
}

impl Sampler for TpeSampler {
    fn suggest(&mut self, space: &SearchSpace) -> HyperparameterSet {
        let guided = self.history.len() >= self.n_startup.max(2);
        let (good, bad) = if guided {
            self.split_history()
        } else {
            (Vec::new(), Vec::new())
        };
        let good_refs: Vec<&HyperparameterSet> = good.iter().collect();
        let bad_refs: Vec<&HyperparameterSet> = bad.iter().collect();

        let mut params = HyperparameterSet::new();
        for (name, range) in space.iter() {
            let raw = if guided {
                self.sample_tpe(name, range, &good_refs, &bad_refs)
            } else {
                self.sample_uniform(range)
            };
            params.insert(name.clone(), range.value(raw));
        }
        debug!(
            "{} sample after {} observation(s)",
            if guided { "TPE" } else { "Random" },
            self.history.len()
        );
        params
    }

    fn observe(&mut self, params: &HyperparameterSet, score: f64) {
        if score.is_finite() {
            self.history.push((params.clone(), score));
        }
    }
}

/// Integer ranges are widened by half a step on each side so that rounding
/// gives the endpoints the same mass as interior values.
fn sampling_bounds(range: &ParameterRange) -> (f64, f64) {
    if range.integer {
        (range.min - 0.5, range.max + 0.5)
    } else {
        (range.min, range.max)
    }
}

/// Scott-style bandwidth on the parameter's range, never collapsing to zero.
fn bandwidth(n: usize, width: f64) -> f64 {
    let scale = (n as f64).powf(-0.2);
    (width * 0.2 * scale).max(width * MIN_BANDWIDTH_FRACTION)
}

fn kde_density(x: f64, values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let total: f64 = values
        .iter()
        .filter_map(|&center| Normal::new(center, bandwidth).ok())
        .map(|kernel| kernel.pdf(x))
        .sum();
    total / values.len() as f64
}
