//! Run configuration.
//!
//! A single JSON file drives a run: task shape, model selection, training
//! hyperparameters and the dataset base path. Binaries load it with
//! [`RunConfig::load`] and pass the pieces down to the library.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::distance::DistanceMetric;
use crate::{MetaError, Result};

/// Loss function applied to log-probability outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Negative log-likelihood over log-softmax outputs
    Nll,
    /// Mean squared error between probabilities and one-hot targets
    Mse,
}

impl LossKind {
    /// Compute the scalar loss for a batch of log-probability rows.
    pub fn loss(&self, log_probs: &Array2<f64>, labels: &[usize]) -> Result<f64> {
        let (rows, classes) = log_probs.dim();
        if labels.len() != rows {
            return Err(MetaError::ShapeMismatch(format!(
                "{} labels for {} prediction rows",
                labels.len(),
                rows
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
            return Err(MetaError::ShapeMismatch(format!(
                "label {} out of range for {} classes",
                bad, classes
            )));
        }

        let total = match self {
            LossKind::Nll => labels
                .iter()
                .enumerate()
                .map(|(i, &l)| -log_probs[[i, l]])
                .sum::<f64>(),
            LossKind::Mse => {
                let mut sum = 0.0;
                for (i, &l) in labels.iter().enumerate() {
                    for c in 0..classes {
                        let target = if c == l { 1.0 } else { 0.0 };
                        let p = log_probs[[i, c]].exp();
                        sum += (p - target).powi(2);
                    }
                }
                sum / classes as f64
            }
        };

        Ok(total / rows as f64)
    }
}

impl Default for LossKind {
    fn default() -> Self {
        Self::Nll
    }
}

/// Episode shape parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParams {
    /// Classes per episode (N-way)
    pub n: usize,
    /// Support examples per class (K-shot)
    pub k: usize,
    /// Query examples per class
    pub qk: usize,
    /// Examples stored per class in the dataset files
    pub examples_per_class: usize,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            n: 5,
            k: 5,
            qk: 15,
            examples_per_class: 20,
        }
    }
}

/// Model hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Token vocabulary size (id 0 is padding)
    pub vocab_size: usize,
    /// Embedding dimension
    pub embed_dim: usize,
    /// Encoder hidden dimension
    pub hidden_dim: usize,
    /// Keep the embedding matrix fixed during outer training
    pub freeze_embedding: bool,
    /// Distance used by metric-based models
    pub distance: DistanceMetric,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            vocab_size: 1000,
            embed_dim: 64,
            hidden_dim: 64,
            freeze_embedding: false,
            distance: DistanceMetric::SqEuclidean,
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Number of training episodes
    pub episodes: usize,
    /// Outer (meta) learning rate
    pub outer_lr: f64,
    /// Inner-loop adaptation steps per episode
    pub adapt_iterations: usize,
    /// Initial per-step adaptation learning rate
    pub adapt_lr: f64,
    /// Meta-batches drawn from each episode's support pool
    pub task_batch_count: usize,
    /// Support examples per class within one meta-batch
    pub support_sample_per_class: usize,
    /// L2 weight decay applied by the outer step
    pub weight_decay: f64,
    /// Loss function
    pub loss: LossKind,
    /// Episodes between validation passes
    pub val_cycle: usize,
    /// Episodes per validation pass
    pub val_episodes: usize,
    /// Episodes between learning rate decay steps
    pub lr_decay_iters: usize,
    /// Multiplicative decay factor
    pub lr_decay_gamma: f64,
    /// Episodes between progress reports
    pub log_interval: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            episodes: 10_000,
            outer_lr: 1e-3,
            adapt_iterations: 3,
            adapt_lr: 1e-2,
            task_batch_count: 1,
            support_sample_per_class: 5,
            weight_decay: 1e-4,
            loss: LossKind::Nll,
            val_cycle: 100,
            val_episodes: 50,
            lr_decay_iters: 2000,
            lr_decay_gamma: 0.5,
            log_interval: 100,
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunConfig {
    /// Dataset folder name under the base path
    pub dataset: String,
    /// Registered model name, e.g. `"per_step_ataml"`
    pub model_name: String,
    /// Run version, used in model and doc paths
    pub version: u32,
    /// Dataset base directory
    pub base_path: PathBuf,
    pub task: TaskParams,
    pub model: ModelParams,
    pub training: TrainingParams,
}

impl RunConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let cfg = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(cfg)
    }

    /// Write the configuration as JSON, used to archive the exact
    /// settings of a run next to its results.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}
