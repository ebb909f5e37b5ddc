//! Matching network.
//!
//! A metric-based episode model: support and query sequences are embedded
//! with live weights only, each query is compared against every support
//! example, and per-class similarity sums feed a log-softmax over the
//! episode's classes. No parameters are adapted per episode; outer
//! training uses stochastic coordinate gradients on the query loss.

use ndarray::{Array1, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::adapt::params::{ParamMap, Parameter};
use crate::config::LossKind;
use crate::models::distance::DistanceMetric;
use crate::models::encoder;
use crate::models::{accuracy, EpisodeModel, EpisodeOutcome};
use crate::sampling::episode::EpisodeTensors;
use crate::sampling::structure::{TaskStructure, TensorLayout};
use crate::{MetaError, Result};

/// Configuration for the matching network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Token vocabulary size (id 0 is padding)
    pub vocab_size: usize,
    /// Embedding dimension
    pub embed_dim: usize,
    /// Encoder hidden dimension
    pub hidden_dim: usize,
    /// Similarity measure between embeddings
    pub distance: DistanceMetric,
    /// Episode loss
    pub loss: LossKind,
    /// Outer learning rate
    pub outer_lr: f64,
    /// Coordinates sampled per tensor in one outer step
    pub stochastic_coords: usize,
    /// Finite-difference step for outer gradients
    pub meta_epsilon: f64,
    /// L2 weight decay applied by the outer step
    pub weight_decay: f64,
    /// Keep the embedding matrix out of outer updates
    pub freeze_embedding: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            vocab_size: 1000,
            embed_dim: 64,
            hidden_dim: 64,
            distance: DistanceMetric::SqEuclidean,
            loss: LossKind::Nll,
            outer_lr: 1e-3,
            stochastic_coords: 10,
            meta_epsilon: 1e-4,
            weight_decay: 1e-4,
            freeze_embedding: false,
        }
    }
}

/// Metric-based few-shot classifier comparing queries to support examples.
#[derive(Debug, Clone)]
pub struct MatchingNet {
    config: MatchingConfig,
    params: ParamMap,
    outer_lr: f64,
    rng: StdRng,
}

impl MatchingNet {
    /// Create a matching network with entropy-seeded initialization
    pub fn new(config: MatchingConfig) -> Result<Self> {
        let seed = rand::random();
        Self::with_seed(config, seed)
    }

    /// Create a matching network with deterministic initialization
    pub fn with_seed(config: MatchingConfig, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let embed_std = (2.0 / (config.vocab_size + config.embed_dim) as f64).sqrt();
        let enc_std = (2.0 / (config.embed_dim + config.hidden_dim) as f64).sqrt();
        let embed_normal =
            Normal::new(0.0, embed_std).map_err(|e| MetaError::InvalidParameter(e.to_string()))?;
        let enc_normal =
            Normal::new(0.0, enc_std).map_err(|e| MetaError::InvalidParameter(e.to_string()))?;

        let mut embedding = Array2::from_shape_fn((config.vocab_size, config.embed_dim), |_| {
            embed_normal.sample(&mut rng)
        });
        for d in 0..config.embed_dim {
            embedding[[encoder::PADDING_ID, d]] = 0.0;
        }
        let encoder_weight = Array2::from_shape_fn((config.embed_dim, config.hidden_dim), |_| {
            enc_normal.sample(&mut rng)
        });
        let encoder_bias = Array1::<f64>::zeros(config.hidden_dim);

        let mut params = ParamMap::new();
        let embedding_param = if config.freeze_embedding {
            Parameter::frozen(embedding.into_dyn())
        } else {
            Parameter::new(embedding.into_dyn())
        };
        params.insert("embedding.weight", embedding_param);
        params.insert("encoder.weight", Parameter::new(encoder_weight.into_dyn()));
        params.insert("encoder.bias", Parameter::new(encoder_bias.into_dyn()));

        let outer_lr = config.outer_lr;
        Ok(Self {
            config,
            params,
            outer_lr,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        })
    }

    /// Mean-pooled embedding rows for a flat batch
    fn pooled(&self, batch: &ArrayD<f64>, lengths: &[usize]) -> Result<Array2<f64>> {
        let embedded = encoder::embed_sequences(batch, self.params.value("embedding.weight")?)?;
        let hidden = encoder::encode_positions(
            &embedded,
            self.params.value("encoder.weight")?,
            self.params.value("encoder.bias")?,
        )?;
        encoder::masked_mean(&hidden, lengths)
    }

    /// Log-probabilities of the query rows against the support set
    fn episode_log_probs(&self, tensors: &EpisodeTensors) -> Result<Array2<f64>> {
        let structure =
            TaskStructure::infer(&tensors.support, &tensors.query, TensorLayout::Flat)?;
        let support = tensors.support_flat()?;
        let support_pooled = self.pooled(&support, &tensors.support_lengths)?;
        let query_pooled = self.pooled(&tensors.query, &tensors.query_lengths)?;

        let (n, k) = (structure.n, structure.k);
        let mut scores = Array2::zeros((query_pooled.nrows(), n));
        for (q, query_row) in query_pooled.rows().into_iter().enumerate() {
            for class in 0..n {
                let mut sum = 0.0;
                for shot in 0..k {
                    let support_row = support_pooled.row(class * k + shot);
                    sum += self.config.distance.similarity(query_row, support_row);
                }
                scores[[q, class]] = sum;
            }
        }
        encoder::log_softmax_rows(&mut scores);
        Ok(scores)
    }

    fn coord(&self, name: &str, idx: usize) -> Result<f64> {
        self.params.value(name)?.iter().nth(idx).copied().ok_or_else(|| {
            MetaError::ShapeMismatch(format!("element {} out of range for {}", idx, name))
        })
    }

    fn set_coord(&mut self, name: &str, idx: usize, value: f64) -> Result<()> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| MetaError::MissingParameter(name.to_string()))?;
        match param.value.iter_mut().nth(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MetaError::ShapeMismatch(format!(
                "element {} out of range for {}",
                idx, name
            ))),
        }
    }
}

impl EpisodeModel for MatchingNet {
    fn run_episode(&self, tensors: &EpisodeTensors) -> Result<EpisodeOutcome> {
        let predictions = self.episode_log_probs(tensors)?;
        let loss = self.config.loss.loss(&predictions, &tensors.query_labels)?;
        let acc = accuracy(&predictions, &tensors.query_labels);
        Ok(EpisodeOutcome {
            predictions,
            accuracy: acc,
            loss,
        })
    }

    fn train_step(&mut self, batch: &[EpisodeTensors]) -> Result<f64> {
        if batch.is_empty() {
            return Ok(0.0);
        }

        let eps = self.config.meta_epsilon;
        let trainable: Vec<String> = self
            .params
            .iter()
            .filter(|(_, p)| p.trainable)
            .map(|(name, _)| name.to_string())
            .collect();

        let mut grads: Vec<(String, usize, f64)> = Vec::new();
        let mut total_loss = 0.0;

        for tensors in batch {
            let outcome = self.run_episode(tensors)?;
            if !outcome.loss.is_finite() {
                return Err(MetaError::NonFiniteLoss {
                    step: 0,
                    value: outcome.loss,
                });
            }
            total_loss += outcome.loss;

            for name in &trainable {
                let len = self.params.value(name)?.len();
                let picks = rand::seq::index::sample(
                    &mut self.rng,
                    len,
                    self.config.stochastic_coords.min(len),
                );
                for idx in picks.iter() {
                    let center = self.coord(name, idx)?;
                    self.set_coord(name, idx, center + eps)?;
                    let lp = {
                        let p = self.episode_log_probs(tensors)?;
                        self.config.loss.loss(&p, &tensors.query_labels)?
                    };
                    self.set_coord(name, idx, center - eps)?;
                    let lm = {
                        let p = self.episode_log_probs(tensors)?;
                        self.config.loss.loss(&p, &tensors.query_labels)?
                    };
                    self.set_coord(name, idx, center)?;
                    grads.push((name.clone(), idx, (lp - lm) / (2.0 * eps)));
                }
            }
        }

        let scale = self.outer_lr / batch.len() as f64;
        for (name, idx, g) in &grads {
            let center = self.coord(name, *idx)?;
            self.set_coord(name, *idx, center - scale * g)?;
        }

        let decay = 1.0 - self.config.weight_decay * self.outer_lr;
        for (name, param) in self.params.iter_mut() {
            if param.trainable && name.ends_with(".weight") {
                param.value.mapv_inplace(|w| w * decay);
            }
        }

        Ok(total_loss / batch.len() as f64)
    }

    fn embed(&self, batch: &ArrayD<f64>, lengths: &[usize]) -> Result<Array2<f64>> {
        self.pooled(batch, lengths)
    }

    fn parameter_snapshot(&self) -> ParamMap {
        self.params.clone()
    }

    fn load_snapshot(&mut self, snapshot: &ParamMap) -> Result<()> {
        self.params.restore_from(snapshot)
    }

    fn set_outer_lr(&mut self, lr: f64) {
        self.outer_lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn tiny_config() -> MatchingConfig {
        MatchingConfig {
            vocab_size: 10,
            embed_dim: 3,
            hidden_dim: 3,
            distance: DistanceMetric::SqEuclidean,
            loss: LossKind::Nll,
            outer_lr: 0.05,
            stochastic_coords: 4,
            meta_epsilon: 1e-4,
            weight_decay: 0.0,
            freeze_embedding: false,
        }
    }

    fn episode() -> EpisodeTensors {
        let support = ArrayD::from_shape_vec(
            vec![2, 2, 4],
            vec![
                1.0, 2.0, 3.0, 0.0, 2.0, 1.0, 3.0, 0.0, 7.0, 8.0, 9.0, 0.0, 8.0, 9.0, 7.0, 0.0,
            ],
        )
        .unwrap();
        let query = ArrayD::from_shape_vec(
            vec![4, 4],
            vec![
                1.0, 2.0, 2.0, 0.0, 3.0, 1.0, 2.0, 0.0, 9.0, 8.0, 7.0, 0.0, 7.0, 9.0, 8.0, 0.0,
            ],
        )
        .unwrap();
        EpisodeTensors {
            support,
            support_lengths: vec![3, 3, 3, 3],
            support_labels: vec![0, 0, 1, 1],
            query,
            query_lengths: vec![3, 3, 3, 3],
            query_labels: vec![0, 0, 1, 1],
        }
    }

    #[test]
    fn test_run_episode_shapes() {
        let model = MatchingNet::with_seed(tiny_config(), 3).unwrap();
        let outcome = model.run_episode(&episode()).unwrap();

        assert_eq!(outcome.predictions.dim(), (4, 2));
        assert!(outcome.loss.is_finite());
        for row in outcome.predictions.rows() {
            let total: f64 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_well_separated_classes_classify_correctly() {
        // token groups {1,2,3} and {7,8,9} embed far apart for most
        // initializations; verify against the fixed seed
        let model = MatchingNet::with_seed(tiny_config(), 11).unwrap();
        let outcome = model.run_episode(&episode()).unwrap();
        assert!(outcome.accuracy >= 0.5);
    }

    #[test]
    fn test_train_step_reduces_loss() {
        // enough sampled coordinates to cover every tensor, making the
        // stochastic update an exact gradient step
        let mut config = tiny_config();
        config.stochastic_coords = 64;
        let mut model = MatchingNet::with_seed(config, 7).unwrap();
        let tensors = episode();

        let before = model.run_episode(&tensors).unwrap().loss;
        for _ in 0..20 {
            model.train_step(std::slice::from_ref(&tensors)).unwrap();
        }
        let after = model.run_episode(&tensors).unwrap().loss;
        assert!(
            after < before,
            "loss went from {} to {} after training",
            before,
            after
        );
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut model = MatchingNet::with_seed(tiny_config(), 5).unwrap();
        let snapshot = model.parameter_snapshot();

        model.train_step(&[episode()]).unwrap();
        model.load_snapshot(&snapshot).unwrap();

        for (name, param) in snapshot.iter() {
            assert_eq!(
                &param.value,
                model.parameter_snapshot().value(name).unwrap()
            );
        }
    }

    #[test]
    fn test_frozen_embedding_stays_put() {
        let mut config = tiny_config();
        config.freeze_embedding = true;
        let mut model = MatchingNet::with_seed(config, 9).unwrap();

        let before = model.params.value("embedding.weight").unwrap().clone();
        model.train_step(&[episode()]).unwrap();
        let after = model.params.value("embedding.weight").unwrap();

        assert_eq!(&before, after);
    }
}
