//! Episode models and the model registry.
//!
//! Every model consumes a materialized episode and produces per-query
//! log-probabilities plus scalar accuracy and loss. Adapted models
//! specialize a declared parameter subset on the support set first;
//! metric models compare embeddings directly.

pub mod ataml;
pub mod distance;
pub mod encoder;
pub mod matching;
pub mod registry;
pub mod sequence_learner;

pub use ataml::{AtamlConfig, PerStepAtaml};
pub use distance::DistanceMetric;
pub use matching::{MatchingConfig, MatchingNet};
pub use registry::{build_model, ModelKind};
pub use sequence_learner::{LearnerConfig, SequenceLearner};

use ndarray::{Array2, ArrayD};

use crate::adapt::params::ParamMap;
use crate::sampling::episode::EpisodeTensors;
use crate::Result;

/// Result of one episode: predictions and the scalars fed to external
/// statistics recording.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    /// Log-probability rows for the query set
    pub predictions: Array2<f64>,
    /// Fraction of query examples classified correctly
    pub accuracy: f64,
    /// Scalar query loss
    pub loss: f64,
}

/// A few-shot model that can be trained and evaluated episodically.
pub trait EpisodeModel {
    /// Score one episode without updating any persistent state.
    fn run_episode(&self, tensors: &EpisodeTensors) -> Result<EpisodeOutcome>;

    /// One outer training step over a batch of episodes; returns the mean
    /// query loss before the update.
    fn train_step(&mut self, batch: &[EpisodeTensors]) -> Result<f64>;

    /// Pooled embedding rows for a flat batch, used by visualization.
    fn embed(&self, batch: &ArrayD<f64>, lengths: &[usize]) -> Result<Array2<f64>>;

    /// Snapshot of every persistent parameter.
    fn parameter_snapshot(&self) -> ParamMap;

    /// Restore a snapshot; names must match exactly.
    fn load_snapshot(&mut self, snapshot: &ParamMap) -> Result<()>;

    /// Update the outer learning rate (driven by the scheduler).
    fn set_outer_lr(&mut self, lr: f64);
}

/// Fraction of rows whose argmax matches the label.
pub fn accuracy(log_probs: &Array2<f64>, labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .enumerate()
        .filter(|(i, &label)| {
            log_probs
                .row(*i)
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(c, _)| c == label)
                .unwrap_or(false)
        })
        .count();
    correct as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy() {
        let lp = array![[-0.1, -2.0], [-3.0, -0.2], [-0.5, -0.4]];
        let acc = accuracy(&lp, &[0, 1, 0]);
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(accuracy(&lp, &[]), 0.0);
    }
}
