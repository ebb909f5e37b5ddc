//! Episodic meta-training and evaluation.
//!
//! One training episode: draw a task seed, sample and materialize an
//! episode, optionally split its support pool into re-sampled meta-batches,
//! run the model for statistics and apply one outer update. Validation
//! passes run on a held-out store and the best parameters are kept as a
//! snapshot. A non-finite episode loss skips the episode; every other
//! error aborts the run.

use ndarray::Ix2;
use tracing::warn;

use crate::adapt::params::ParamMap;
use crate::data::store::ExampleStore;
use crate::models::{EpisodeModel, EpisodeOutcome};
use crate::sampling::batch::split_into_meta_batches;
use crate::sampling::episode::{EpisodeSampler, EpisodeTensors};
use crate::sampling::seed::SeedSource;
use crate::training::scheduler::LearningRateScheduler;
use crate::training::stats::{Criteria, StatRecorder};
use crate::{MetaError, Result};

/// Configuration for the episodic trainer
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Number of training episodes
    pub episodes: usize,
    /// Episodes between progress reports
    pub log_interval: usize,
    /// Episodes between validation passes; 0 disables validation
    pub val_cycle: usize,
    /// Episodes per validation pass
    pub val_episodes: usize,
    /// Criterion ranking validation passes
    pub criteria: Criteria,
    /// Meta-batches re-sampled from each episode's support pool;
    /// 1 trains on the full support set directly
    pub task_batch_count: usize,
    /// Support examples per class within one meta-batch
    pub support_sample_per_class: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            episodes: 1000,
            log_interval: 100,
            val_cycle: 100,
            val_episodes: 50,
            criteria: Criteria::Accuracy,
            task_batch_count: 1,
            support_sample_per_class: 5,
        }
    }
}

/// Result of a training run
#[derive(Debug)]
pub struct TrainingSummary {
    /// Episodes completed (including skipped ones)
    pub total_episodes: usize,
    /// Episodes skipped due to non-finite loss
    pub skipped_episodes: usize,
    /// Per-episode training loss
    pub train_loss_history: Vec<f64>,
    /// Per-episode training accuracy
    pub train_accuracy_history: Vec<f64>,
    /// Per-pass validation loss
    pub val_loss_history: Vec<f64>,
    /// Per-pass validation accuracy
    pub val_accuracy_history: Vec<f64>,
    /// Best validation value under the configured criterion
    pub best_validation: f64,
    /// Episode of the best validation pass
    pub best_episode: Option<usize>,
    /// Parameters at the best validation pass
    pub best_snapshot: Option<ParamMap>,
}

/// Drives episodic training and evaluation of one model.
pub struct MetaTrainer {
    config: TrainerConfig,
    seeds: SeedSource,
}

impl MetaTrainer {
    /// Create a trainer; the seed source drives every task draw
    pub fn new(config: TrainerConfig, seeds: SeedSource) -> Self {
        Self { config, seeds }
    }

    /// Train a model on episodes sampled from `train_store`.
    pub fn train(
        &mut self,
        model: &mut dyn EpisodeModel,
        sampler: &EpisodeSampler,
        train_store: &dyn ExampleStore,
        val_store: Option<&dyn ExampleStore>,
        scheduler: Option<&LearningRateScheduler>,
    ) -> Result<TrainingSummary> {
        let mut stats = StatRecorder::new(self.config.criteria, self.config.log_interval);
        let mut skipped = 0;
        let mut best_snapshot = None;

        for episode_idx in 0..self.config.episodes {
            if let Some(schedule) = scheduler {
                model.set_outer_lr(schedule.step(episode_idx));
            }

            let task_seed = self.seeds.next_seed();
            let episode = sampler.sample(train_store, task_seed)?;
            let tensors = episode.materialize(train_store)?;

            let outcome = match self.run_recorded(model, &tensors) {
                Ok(outcome) => outcome,
                Err(MetaError::NonFiniteLoss { step, value }) => {
                    warn!(episode = episode_idx, step, value, "skipping episode with non-finite loss");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let batch = self.episode_batch(&tensors)?;
            let loss = match model.train_step(&batch) {
                Ok(loss) => loss,
                Err(MetaError::NonFiniteLoss { step, value }) => {
                    warn!(episode = episode_idx, step, value, "skipping update with non-finite loss");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            stats.record_training(outcome.accuracy, loss);

            if (episode_idx + 1) % self.config.log_interval.max(1) == 0 {
                stats.report();
            }

            if let Some(store) = val_store {
                if self.config.val_cycle > 0 && (episode_idx + 1) % self.config.val_cycle == 0 {
                    let (val_acc, val_loss) =
                        self.evaluate(model, sampler, store, self.config.val_episodes)?;
                    if stats.record_validation(val_acc, val_loss) {
                        best_snapshot = Some(model.parameter_snapshot());
                    }
                }
            }
        }

        Ok(TrainingSummary {
            total_episodes: self.config.episodes,
            skipped_episodes: skipped,
            train_loss_history: stats.train_loss_history().to_vec(),
            train_accuracy_history: stats.train_accuracy_history().to_vec(),
            val_loss_history: stats.val_loss_history().to_vec(),
            val_accuracy_history: stats.val_accuracy_history().to_vec(),
            best_validation: stats.best_validation(),
            best_episode: stats.best_episode(),
            best_snapshot,
        })
    }

    /// Mean accuracy and loss over freshly sampled evaluation episodes.
    pub fn evaluate(
        &mut self,
        model: &dyn EpisodeModel,
        sampler: &EpisodeSampler,
        store: &dyn ExampleStore,
        episodes: usize,
    ) -> Result<(f64, f64)> {
        if episodes == 0 {
            return Ok((0.0, 0.0));
        }
        let mut total_acc = 0.0;
        let mut total_loss = 0.0;
        for _ in 0..episodes {
            let seed = self.seeds.next_seed();
            let episode = sampler.sample(store, seed)?;
            let tensors = episode.materialize(store)?;
            let outcome = model.run_episode(&tensors)?;
            total_acc += outcome.accuracy;
            total_loss += outcome.loss;
        }
        Ok((total_acc / episodes as f64, total_loss / episodes as f64))
    }

    fn run_recorded(
        &self,
        model: &dyn EpisodeModel,
        tensors: &EpisodeTensors,
    ) -> Result<EpisodeOutcome> {
        let outcome = model.run_episode(tensors)?;
        if !outcome.loss.is_finite() {
            return Err(MetaError::NonFiniteLoss {
                step: 0,
                value: outcome.loss,
            });
        }
        Ok(outcome)
    }

    /// The training batch for one episode: either the episode itself or
    /// `task_batch_count` re-sampled support sub-batches sharing its query
    /// set.
    fn episode_batch(&mut self, tensors: &EpisodeTensors) -> Result<Vec<EpisodeTensors>> {
        if self.config.task_batch_count <= 1 {
            return Ok(vec![tensors.clone()]);
        }

        let pool = tensors
            .support_flat()?
            .into_dimensionality::<Ix2>()
            .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;
        let shape = tensors.support.shape();
        let (n, k, seq_len) = (shape[0], shape[1], shape[2]);
        let sample = self.config.support_sample_per_class;

        let batch_seeds = SeedSource::fixed(self.seeds.next_seed());
        let mut batches = Vec::with_capacity(self.config.task_batch_count);
        for meta_batch in split_into_meta_batches(
            &pool,
            &tensors.support_labels,
            &tensors.support_lengths,
            self.config.task_batch_count,
            k,
            sample,
            batch_seeds,
        )? {
            let rows = meta_batch.data.nrows();
            let support = meta_batch
                .data
                .into_shape(ndarray::IxDyn(&[n, sample, seq_len]))
                .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;
            let support_labels = (0..rows).map(|pos| pos / sample).collect();

            batches.push(EpisodeTensors {
                support,
                support_lengths: meta_batch.lengths,
                support_labels,
                query: tensors.query.clone(),
                query_lengths: tensors.query_lengths.clone(),
                query_labels: tensors.query_labels.clone(),
            });
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossKind;
    use crate::data::store::SequenceStore;
    use crate::models::matching::{MatchingConfig, MatchingNet};
    use crate::models::DistanceMetric;
    use crate::sampling::episode::EpisodeConfig;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic_store(classes: usize, per_class: usize, seq_len: usize, vocab: usize) -> SequenceStore {
        let mut rng = StdRng::seed_from_u64(100);
        let rows = classes * per_class;
        // class c draws tokens from its own slice of the vocabulary
        let band = (vocab - 1) / classes;
        let sequences = Array2::from_shape_fn((rows, seq_len), |(i, _)| {
            let class = i / per_class;
            (1 + class * band + rng.gen_range(0..band.max(1))) as f64
        });
        let lengths = vec![seq_len; rows];
        let labels = (0..rows).map(|i| i / per_class).collect();
        SequenceStore::new(sequences, lengths, labels).unwrap()
    }

    fn tiny_model() -> MatchingNet {
        MatchingNet::with_seed(
            MatchingConfig {
                vocab_size: 16,
                embed_dim: 3,
                hidden_dim: 3,
                distance: DistanceMetric::SqEuclidean,
                loss: LossKind::Nll,
                outer_lr: 0.02,
                stochastic_coords: 4,
                meta_epsilon: 1e-4,
                weight_decay: 0.0,
                freeze_embedding: false,
            },
            8,
        )
        .unwrap()
    }

    #[test]
    fn test_training_run_completes() {
        let store = synthetic_store(4, 8, 5, 16);
        let sampler = EpisodeSampler::new(EpisodeConfig {
            n_way: 2,
            k_shot: 3,
            n_query: 2,
        });
        let mut model = tiny_model();
        let mut trainer = MetaTrainer::new(
            TrainerConfig {
                episodes: 6,
                log_interval: 3,
                val_cycle: 3,
                val_episodes: 2,
                criteria: Criteria::Accuracy,
                task_batch_count: 1,
                support_sample_per_class: 2,
            },
            SeedSource::fixed(55),
        );

        let summary = trainer
            .train(&mut model, &sampler, &store, Some(&store), None)
            .unwrap();

        assert_eq!(summary.total_episodes, 6);
        assert_eq!(summary.train_loss_history.len(), 6);
        assert_eq!(summary.val_accuracy_history.len(), 2);
        assert!(summary.best_snapshot.is_some());
    }

    #[test]
    fn test_meta_batch_training_path() {
        let store = synthetic_store(4, 10, 5, 16);
        let sampler = EpisodeSampler::new(EpisodeConfig {
            n_way: 2,
            k_shot: 4,
            n_query: 2,
        });
        let mut model = tiny_model();
        let mut trainer = MetaTrainer::new(
            TrainerConfig {
                episodes: 3,
                log_interval: 10,
                val_cycle: 0,
                val_episodes: 0,
                criteria: Criteria::Loss,
                task_batch_count: 2,
                support_sample_per_class: 2,
            },
            SeedSource::fixed(7),
        );

        let summary = trainer.train(&mut model, &sampler, &store, None, None).unwrap();
        assert_eq!(summary.total_episodes, 3);
        assert_eq!(summary.skipped_episodes, 0);
        assert!(summary.best_snapshot.is_none());
    }

    #[test]
    fn test_sub_batches_keep_episode_shape() {
        let store = synthetic_store(3, 8, 5, 16);
        let sampler = EpisodeSampler::new(EpisodeConfig {
            n_way: 3,
            k_shot: 4,
            n_query: 2,
        });
        let episode = sampler.sample(&store, 9).unwrap();
        let tensors = episode.materialize(&store).unwrap();

        let mut trainer = MetaTrainer::new(
            TrainerConfig {
                task_batch_count: 3,
                support_sample_per_class: 2,
                ..TrainerConfig::default()
            },
            SeedSource::fixed(1),
        );

        let batches = trainer.episode_batch(&tensors).unwrap();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.support.shape(), &[3, 2, 5]);
            assert_eq!(batch.support_labels, vec![0, 0, 1, 1, 2, 2]);
            assert_eq!(batch.query, tensors.query);
        }
    }

    #[test]
    fn test_evaluate_reports_means() {
        let store = synthetic_store(4, 8, 5, 16);
        let sampler = EpisodeSampler::new(EpisodeConfig {
            n_way: 2,
            k_shot: 3,
            n_query: 2,
        });
        let model = tiny_model();
        let mut trainer = MetaTrainer::new(TrainerConfig::default(), SeedSource::fixed(2));

        let (acc, loss) = trainer.evaluate(&model, &sampler, &store, 4).unwrap();
        assert!((0.0..=1.0).contains(&acc));
        assert!(loss.is_finite());
    }
}
