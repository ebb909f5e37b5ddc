//! Model registry.
//!
//! Model selection is a closed enum parsed from the configured name at
//! startup; construction goes through one factory instead of branching at
//! call sites.

use crate::config::RunConfig;
use crate::models::ataml::{AtamlConfig, PerStepAtaml};
use crate::models::matching::{MatchingConfig, MatchingNet};
use crate::models::sequence_learner::{LearnerConfig, SequenceLearner};
use crate::models::EpisodeModel;
use crate::{MetaError, Result};

/// The registered episode model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Attention-adapted meta-learner with per-step learning rates
    PerStepAtaml,
    /// Matching network comparing queries to support examples
    Matching,
}

impl ModelKind {
    /// All registered kinds
    pub fn all() -> &'static [ModelKind] {
        &[ModelKind::PerStepAtaml, ModelKind::Matching]
    }

    /// Canonical configuration name
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::PerStepAtaml => "per_step_ataml",
            ModelKind::Matching => "matching",
        }
    }

    /// Parse a configured model name; unknown names are rejected at
    /// startup rather than deep inside the training loop.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                MetaError::InvalidParameter(format!(
                    "unknown model name {:?}; registered: {}",
                    name,
                    Self::all()
                        .iter()
                        .map(|k| k.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Build a model from the run configuration.
///
/// The seed drives weight initialization and the model's own stochastic
/// sampling; fixing it makes the whole run reproducible.
pub fn build_model(kind: ModelKind, cfg: &RunConfig, seed: u64) -> Result<Box<dyn EpisodeModel>> {
    match kind {
        ModelKind::PerStepAtaml => {
            let learner = SequenceLearner::with_seed(
                LearnerConfig {
                    vocab_size: cfg.model.vocab_size,
                    embed_dim: cfg.model.embed_dim,
                    hidden_dim: cfg.model.hidden_dim,
                    n_classes: cfg.task.n,
                    freeze_embedding: cfg.model.freeze_embedding,
                },
                seed,
            )?;
            let model = PerStepAtaml::with_seed(
                learner,
                AtamlConfig {
                    adapt_iterations: cfg.training.adapt_iterations,
                    adapt_lr: cfg.training.adapt_lr,
                    outer_lr: cfg.training.outer_lr,
                    second_order: false,
                    loss: cfg.training.loss,
                    weight_decay: cfg.training.weight_decay,
                    ..AtamlConfig::default()
                },
                seed.wrapping_add(1),
            )?;
            Ok(Box::new(model))
        }
        ModelKind::Matching => {
            let model = MatchingNet::with_seed(
                MatchingConfig {
                    vocab_size: cfg.model.vocab_size,
                    embed_dim: cfg.model.embed_dim,
                    hidden_dim: cfg.model.hidden_dim,
                    distance: cfg.model.distance,
                    loss: cfg.training.loss,
                    outer_lr: cfg.training.outer_lr,
                    weight_decay: cfg.training.weight_decay,
                    freeze_embedding: cfg.model.freeze_embedding,
                    ..MatchingConfig::default()
                },
                seed,
            )?;
            Ok(Box::new(model))
        }
    }
}
