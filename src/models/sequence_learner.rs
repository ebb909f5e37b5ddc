//! The base sequence learner.
//!
//! Token embedding, position-wise encoder, dot-product attention pooling
//! and a linear classifier over log-softmax. The attention vector and the
//! classifier are the adaptable subset: with an override mapping supplied
//! those two layers read from it while embedding and encoder always use
//! live weights.

use ndarray::{Array1, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::adapt::learner::AdaptableLearner;
use crate::adapt::params::{ParamMap, Parameter};
use crate::models::encoder;
use crate::{MetaError, Result};

/// Configuration for the sequence learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Token vocabulary size (id 0 is padding)
    pub vocab_size: usize,
    /// Embedding dimension
    pub embed_dim: usize,
    /// Encoder hidden dimension
    pub hidden_dim: usize,
    /// Output class count (the episode's N)
    pub n_classes: usize,
    /// Keep the embedding matrix out of outer updates
    pub freeze_embedding: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 1000,
            embed_dim: 64,
            hidden_dim: 64,
            n_classes: 5,
            freeze_embedding: false,
        }
    }
}

/// Sequence classifier with an adaptable attention/classifier head.
#[derive(Debug, Clone)]
pub struct SequenceLearner {
    config: LearnerConfig,
    params: ParamMap,
    adaptable: Vec<String>,
}

impl SequenceLearner {
    /// Create a learner with entropy-seeded initialization
    pub fn new(config: LearnerConfig) -> Result<Self> {
        let seed = rand::random();
        Self::with_seed(config, seed)
    }

    /// Create a learner with deterministic initialization
    pub fn with_seed(config: LearnerConfig, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut embedding = random_matrix(&mut rng, config.vocab_size, config.embed_dim)?;
        // padding row stays zero
        for d in 0..config.embed_dim {
            embedding[[encoder::PADDING_ID, d]] = 0.0;
        }

        let encoder_weight = random_matrix(&mut rng, config.embed_dim, config.hidden_dim)?;
        let encoder_bias = Array1::<f64>::zeros(config.hidden_dim);
        let attention_weight = random_vector(&mut rng, config.hidden_dim)?;
        let classifier_weight = random_matrix(&mut rng, config.hidden_dim, config.n_classes)?;
        let classifier_bias = Array1::<f64>::zeros(config.n_classes);

        let mut params = ParamMap::new();
        let embedding_param = if config.freeze_embedding {
            Parameter::frozen(embedding.into_dyn())
        } else {
            Parameter::new(embedding.into_dyn())
        };
        params.insert("embedding.weight", embedding_param);
        params.insert("encoder.weight", Parameter::new(encoder_weight.into_dyn()));
        params.insert("encoder.bias", Parameter::new(encoder_bias.into_dyn()));
        params.insert("attention.weight", Parameter::new(attention_weight.into_dyn()));
        params.insert("classifier.weight", Parameter::new(classifier_weight.into_dyn()));
        params.insert("classifier.bias", Parameter::new(classifier_bias.into_dyn()));

        Ok(Self {
            config,
            params,
            adaptable: vec![
                "attention.weight".to_string(),
                "classifier.weight".to_string(),
                "classifier.bias".to_string(),
            ],
        })
    }

    /// Replace the embedding matrix with a pretrained one
    pub fn with_pretrained_embedding(mut self, matrix: Array2<f64>) -> Result<Self> {
        if matrix.dim() != (self.config.vocab_size, self.config.embed_dim) {
            return Err(MetaError::ShapeMismatch(format!(
                "pretrained embedding {:?} for configured ({}, {})",
                matrix.dim(),
                self.config.vocab_size,
                self.config.embed_dim
            )));
        }
        let trainable = !self.config.freeze_embedding;
        self.params.insert(
            "embedding.weight",
            Parameter {
                value: matrix.into_dyn(),
                trainable,
            },
        );
        Ok(self)
    }

    /// Learner configuration
    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Mutable access to the live mapping, used by the outer optimizer
    pub fn params_mut(&mut self) -> &mut ParamMap {
        &mut self.params
    }

    /// Attention-pooled feature rows before the classifier, the embedding
    /// surface exported for visualization.
    pub fn pooled_embedding(
        &self,
        batch: &ArrayD<f64>,
        lengths: &[usize],
        params: Option<&ParamMap>,
    ) -> Result<Array2<f64>> {
        let embedded = encoder::embed_sequences(batch, self.params.value("embedding.weight")?)?;
        let hidden = encoder::encode_positions(
            &embedded,
            self.params.value("encoder.weight")?,
            self.params.value("encoder.bias")?,
        )?;
        encoder::attention_pool(&hidden, self.resolve(params, "attention.weight")?, lengths)
    }

    /// Pick the tensor for `name`: the override mapping when supplied and
    /// the layer is adaptable, the live mapping otherwise.
    fn resolve<'a>(
        &'a self,
        overrides: Option<&'a ParamMap>,
        name: &str,
    ) -> Result<&'a ArrayD<f64>> {
        match overrides {
            Some(map) if self.adaptable.iter().any(|a| a == name) => map.value(name),
            _ => self.params.value(name),
        }
    }
}

impl AdaptableLearner for SequenceLearner {
    fn live_parameters(&self) -> &ParamMap {
        &self.params
    }

    fn adaptable_parameter_names(&self) -> &[String] {
        &self.adaptable
    }

    fn forward(
        &self,
        batch: &ArrayD<f64>,
        lengths: &[usize],
        params: Option<&ParamMap>,
    ) -> Result<Array2<f64>> {
        let pooled = self.pooled_embedding(batch, lengths, params)?;
        let mut logits = encoder::linear(
            &pooled,
            self.resolve(params, "classifier.weight")?,
            self.resolve(params, "classifier.bias")?,
        )?;
        encoder::log_softmax_rows(&mut logits);
        Ok(logits)
    }
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Result<Array2<f64>> {
    let std = (2.0 / (rows + cols) as f64).sqrt();
    let normal = Normal::new(0.0, std)
        .map_err(|e| MetaError::InvalidParameter(e.to_string()))?;
    Ok(Array2::from_shape_fn((rows, cols), |_| rng.sample(normal)))
}

fn random_vector(rng: &mut StdRng, len: usize) -> Result<Array1<f64>> {
    let std = (1.0 / len.max(1) as f64).sqrt();
    let normal = Normal::new(0.0, std)
        .map_err(|e| MetaError::InvalidParameter(e.to_string()))?;
    Ok(Array1::from_shape_fn(len, |_| rng.sample(normal)))
}
