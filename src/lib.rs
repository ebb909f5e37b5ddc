//! # Episodic Meta-Learning
//!
//! This crate implements episodic few-shot learning for sequence
//! classification: N-way K-shot task sampling from a flat labeled dataset,
//! gradient-based inner-loop adaptation with per-step learning rates, and
//! interchangeable episode models (attention-adapted learner, matching
//! network).
//!
//! ## Overview
//!
//! Few-shot learners are trained on *episodes* rather than on a fixed split:
//! each episode draws `n` classes and `k` labeled support examples plus `qk`
//! query examples per class. Adapted models specialize a small declared
//! subset of their parameters on the support set before scoring the query
//! set; the specialization is ephemeral and only its gradient signal reaches
//! the persistent weights.
//!
//! ## Modules
//!
//! - `data` - labeled example store, dataset files and path layout
//! - `sampling` - seeded episode sampling, meta-batch splitting, task structure
//! - `adapt` - parameter mappings, the adaptable-learner capability and the
//!   inner adaptation loop
//! - `models` - concrete episode models and the model registry
//! - `training` - episodic trainer, statistics and learning rate scheduling
//! - `config` - run configuration files
//! - `visualization` - embedding projection export
//!
//! ## Example
//!
//! ```rust,ignore
//! use episodic_meta_learning::prelude::*;
//!
//! let store = SequenceStore::new(sequences, lengths, labels)?;
//! let sampler = EpisodeSampler::new(EpisodeConfig { n_way: 5, k_shot: 5, n_query: 15 });
//! let episode = sampler.sample(&store, 42)?;
//! let tensors = episode.materialize(&store)?;
//! let outcome = model.run_episode(&tensors)?;
//! ```

pub mod adapt;
pub mod config;
pub mod data;
pub mod models;
pub mod sampling;
pub mod training;
pub mod visualization;

pub use adapt::inner_loop::InnerLoopAdapter;
pub use adapt::learner::AdaptableLearner;
pub use adapt::params::{ParamMap, Parameter};
pub use data::store::{ExampleStore, SequenceStore};
pub use models::registry::{build_model, ModelKind};
pub use models::{EpisodeModel, EpisodeOutcome};
pub use sampling::episode::{Episode, EpisodeConfig, EpisodeSampler};
pub use sampling::seed::SeedSource;
pub use training::trainer::MetaTrainer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapt::inner_loop::InnerLoopAdapter;
    pub use crate::adapt::learner::AdaptableLearner;
    pub use crate::adapt::params::{ParamMap, Parameter};
    pub use crate::config::{LossKind, RunConfig};
    pub use crate::data::dataset::SeqFileDataset;
    pub use crate::data::paths::{DataSplit, DatasetPaths};
    pub use crate::data::store::{ClassGroup, ExampleStore, SequenceStore};
    pub use crate::models::ataml::{AtamlConfig, PerStepAtaml};
    pub use crate::models::distance::DistanceMetric;
    pub use crate::models::matching::{MatchingConfig, MatchingNet};
    pub use crate::models::registry::{build_model, ModelKind};
    pub use crate::models::sequence_learner::{LearnerConfig, SequenceLearner};
    pub use crate::models::{EpisodeModel, EpisodeOutcome};
    pub use crate::sampling::batch::{split_into_meta_batches, MetaBatch};
    pub use crate::sampling::episode::{Episode, EpisodeConfig, EpisodeSampler, EpisodeTensors};
    pub use crate::sampling::seed::SeedSource;
    pub use crate::sampling::structure::{TaskStructure, TensorLayout};
    pub use crate::training::scheduler::LearningRateScheduler;
    pub use crate::training::stats::{Criteria, StatRecorder};
    pub use crate::training::trainer::{MetaTrainer, TrainerConfig, TrainingSummary};
    pub use crate::{MetaError, Result};
}

/// Error types for the crate
#[derive(thiserror::Error, Debug)]
pub enum MetaError {
    #[error("example id {0} not found in store")]
    NotFound(usize),

    #[error("insufficient classes: requested {requested}, available {available}")]
    InsufficientClasses { requested: usize, available: usize },

    #[error("insufficient examples: class {label} has {available}, episode needs {needed}")]
    InsufficientExamples {
        label: usize,
        available: usize,
        needed: usize,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("non-finite loss {value} at adaptation step {step}")]
    NonFiniteLoss { step: usize, value: f64 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, MetaError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
