use crate::error::{ChurnError, ChurnResult};
use log::debug;

pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.025;

/// Unit economics of a retention campaign plus the fixed probability cutoff
/// used to decide who receives the stimulus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainContext {
    pub reward_per_hit: f64,
    pub cost_per_stimulus: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GainBreakdown {
    pub true_positives: usize,
    pub false_positives: usize,
    pub gain: f64,
}

impl GainContext {
    pub fn new(reward_per_hit: f64, cost_per_stimulus: f64) -> Self {
        Self {
            reward_per_hit,
            cost_per_stimulus,
            threshold: DEFAULT_PROBABILITY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn binarize(&self, probabilities: &[f64]) -> Vec<u8> {
        probabilities
            .iter()
            .map(|&p| u8::from(p >= self.threshold))
            .collect()
    }

    pub fn breakdown(&self, y_true: &[u8], y_pred: &[u8]) -> ChurnResult<GainBreakdown> {
        if y_true.len() != y_pred.len() {
            return Err(ChurnError::LengthMismatch {
                left: y_true.len(),
                right: y_pred.len(),
            });
        }
        let mut breakdown = GainBreakdown::default();
        for (&truth, &pred) in y_true.iter().zip(y_pred) {
            match (truth, pred) {
                (1, 1) => breakdown.true_positives += 1,
                (0, 1) => breakdown.false_positives += 1,
                _ => {}
            }
        }
        breakdown.gain = breakdown.true_positives as f64 * self.reward_per_hit
            - breakdown.false_positives as f64 * self.cost_per_stimulus;
        debug!(
            "Gain {:.0} (tp={}, fp={}, reward={}, cost={})",
            breakdown.gain,
            breakdown.true_positives,
            breakdown.false_positives,
            self.reward_per_hit,
            self.cost_per_stimulus
        );
        Ok(breakdown)
    }

    /// `TP * reward - FP * cost`; true and false negatives are free.
    pub fn gain(&self, y_true: &[u8], y_pred: &[u8]) -> ChurnResult<f64> {
        Ok(self.breakdown(y_true, y_pred)?.gain)
    }

    pub fn gain_from_probabilities(&self, y_true: &[u8], probabilities: &[f64]) -> ChurnResult<f64> {
        self.gain(y_true, &self.binarize(probabilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_counts_hits_and_stimulus_cost() {
        let context = GainContext::new(100.0, 20.0);
        let gain = context.gain(&[1, 0, 1, 0], &[1, 1, 0, 0]).unwrap();
        assert_eq!(gain, 80.0);
    }

    #[test]
    fn negatives_contribute_nothing() {
        let context = GainContext::new(780_000.0, 20_000.0);
        assert_eq!(context.gain(&[0, 1, 0], &[0, 0, 0]).unwrap(), 0.0);
    }

    #[test]
    fn binarize_uses_inclusive_cutoff() {
        let context = GainContext::new(1.0, 1.0);
        assert_eq!(context.binarize(&[0.01, 0.025, 0.9]), vec![0, 1, 1]);
        let strict = context.with_threshold(0.5);
        assert_eq!(strict.binarize(&[0.49, 0.5]), vec![0, 1]);
    }

    #[test]
    fn gain_from_probabilities_applies_threshold() {
        let context = GainContext::new(100.0, 20.0);
        let gain = context
            .gain_from_probabilities(&[1, 0, 1, 0], &[0.30, 0.03, 0.02, 0.0])
            .unwrap();
        assert_eq!(gain, 80.0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let context = GainContext::new(1.0, 1.0);
        assert!(matches!(
            context.gain(&[1, 0], &[1]),
            Err(ChurnError::LengthMismatch { left: 2, right: 1 })
        ));
    }
}
