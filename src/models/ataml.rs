//! Attention-adapted meta-learner with per-step learning rates.
//!
//! Owns a [`SequenceLearner`] and a vector of per-step inner learning
//! rates, itself a trainable parameter. An episode runs as: adapt the
//! attention/classifier head on the support set through the
//! [`InnerLoopAdapter`], then score the query set with the adapted mapping.
//! The adapted mapping is never written back; only its gradient signal
//! reaches the live weights through the outer step.
//!
//! Outer gradients are numerical. Per-step learning rates are always
//! differentiated through the unrolled adaptation. The head uses
//! first-order gradients at the adapted point by default and full
//! unrolled differentiation when `second_order` is set; the body
//! (embedding, encoder) uses stochastic coordinate gradients.

use ndarray::{Array1, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::adapt::inner_loop::InnerLoopAdapter;
use crate::adapt::learner::AdaptableLearner;
use crate::adapt::params::{ParamMap, Parameter};
use crate::config::LossKind;
use crate::models::sequence_learner::SequenceLearner;
use crate::models::{accuracy, EpisodeModel, EpisodeOutcome};
use crate::sampling::episode::EpisodeTensors;
use crate::sampling::structure::{TaskStructure, TensorLayout};
use crate::{MetaError, Result};

/// Name of the per-step learning rate entry in parameter snapshots.
const STEP_LR_NAME: &str = "adapt.step_lrs";

/// Configuration for the per-step adapted meta-learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtamlConfig {
    /// Inner-loop adaptation steps per episode
    pub adapt_iterations: usize,
    /// Initial value of every per-step learning rate
    pub adapt_lr: f64,
    /// Outer (meta) learning rate
    pub outer_lr: f64,
    /// Differentiate head gradients through the unrolled inner loop
    pub second_order: bool,
    /// Episode loss
    pub loss: LossKind,
    /// Finite-difference step for outer gradients
    pub meta_epsilon: f64,
    /// Coordinates sampled per body tensor in one outer step
    pub stochastic_coords: usize,
    /// L2 weight decay applied by the outer step
    pub weight_decay: f64,
}

impl Default for AtamlConfig {
    fn default() -> Self {
        Self {
            adapt_iterations: 3,
            adapt_lr: 1e-2,
            outer_lr: 1e-3,
            second_order: false,
            loss: LossKind::Nll,
            meta_epsilon: 1e-4,
            stochastic_coords: 10,
            weight_decay: 1e-4,
        }
    }
}

/// Meta-learner that specializes its attention/classifier head per episode.
#[derive(Debug, Clone)]
pub struct PerStepAtaml {
    learner: SequenceLearner,
    step_lrs: Array1<f64>,
    adapter: InnerLoopAdapter,
    config: AtamlConfig,
    outer_lr: f64,
    rng: StdRng,
}

impl PerStepAtaml {
    /// Create a meta-learner with entropy-seeded coordinate sampling
    pub fn new(learner: SequenceLearner, config: AtamlConfig) -> Result<Self> {
        let seed = rand::random();
        Self::with_seed(learner, config, seed)
    }

    /// Create a meta-learner with deterministic coordinate sampling
    pub fn with_seed(learner: SequenceLearner, config: AtamlConfig, seed: u64) -> Result<Self> {
        if config.adapt_lr < 0.0 {
            return Err(MetaError::InvalidParameter(format!(
                "negative adaptation learning rate {}",
                config.adapt_lr
            )));
        }
        let adapter = InnerLoopAdapter::new(config.meta_epsilon)?;
        let step_lrs = Array1::from_elem(config.adapt_iterations, config.adapt_lr);
        let outer_lr = config.outer_lr;
        Ok(Self {
            learner,
            step_lrs,
            adapter,
            config,
            outer_lr,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// The wrapped base learner
    pub fn learner(&self) -> &SequenceLearner {
        &self.learner
    }

    /// Current per-step learning rates
    pub fn step_learning_rates(&self) -> &Array1<f64> {
        &self.step_lrs
    }

    /// Adapt the head on one episode's support set with explicit rates
    fn adapt_with_lrs(&self, tensors: &EpisodeTensors, lrs: &[f64]) -> Result<ParamMap> {
        TaskStructure::infer(&tensors.support, &tensors.query, TensorLayout::Flat)?;
        let support = tensors.support_flat()?;
        let kind = self.config.loss;
        let loss_fn = move |p: &Array2<f64>, y: &[usize]| kind.loss(p, y);
        self.adapter.adapt(
            &self.learner,
            &support,
            &tensors.support_lengths,
            &tensors.support_labels,
            &loss_fn,
            lrs,
            self.config.adapt_iterations,
        )
    }

    /// Query loss of one episode under explicit per-step rates
    fn query_loss_with_lrs(&self, tensors: &EpisodeTensors, lrs: &[f64]) -> Result<f64> {
        let adapted = self.adapt_with_lrs(tensors, lrs)?;
        let prediction =
            self.learner
                .forward(&tensors.query, &tensors.query_lengths, Some(&adapted))?;
        self.config.loss.loss(&prediction, &tensors.query_labels)
    }

    fn live_coord(&self, name: &str, idx: usize) -> Result<f64> {
        self.learner
            .live_parameters()
            .value(name)?
            .iter()
            .nth(idx)
            .copied()
            .ok_or_else(|| {
                MetaError::ShapeMismatch(format!("element {} out of range for {}", idx, name))
            })
    }

    fn set_live_coord(&mut self, name: &str, idx: usize, value: f64) -> Result<()> {
        let param = self
            .learner
            .params_mut()
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

impl EpisodeModel for PerStepAtaml {
    fn run_episode(&self, tensors: &EpisodeTensors) -> Result<EpisodeOutcome> {
        let lrs = self.step_lrs.to_vec();
        let adapted = self.adapt_with_lrs(tensors, &lrs)?;
        let predictions =
            self.learner
                .forward(&tensors.query, &tensors.query_lengths, Some(&adapted))?;
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

        let iters = self.config.adapt_iterations;
        let eps = self.config.meta_epsilon;
        let kind = self.config.loss;

        let head_names: Vec<String> = self.learner.adaptable_parameter_names().to_vec();
        let body_names: Vec<String> = self
            .learner
            .live_parameters()
            .iter()
            .filter(|(name, p)| p.trainable && !head_names.iter().any(|h| h == *name))
            .map(|(name, _)| name.to_string())
            .collect();

        let mut lr_grads = vec![0.0; iters];
        let mut head_grads: Vec<(String, ArrayD<f64>)> = head_names
            .iter()
            .map(|name| -> Result<(String, ArrayD<f64>)> {
                let shape = self.learner.live_parameters().value(name)?.raw_dim();
                Ok((name.clone(), ArrayD::zeros(shape)))
            })
            .collect::<Result<_>>()?;
        let mut body_grads: Vec<(String, usize, f64)> = Vec::new();
        let mut total_loss = 0.0;

        for tensors in batch {
            let base_lrs = self.step_lrs.to_vec();
            let adapted = self.adapt_with_lrs(tensors, &base_lrs)?;
            let prediction =
                self.learner
                    .forward(&tensors.query, &tensors.query_lengths, Some(&adapted))?;
            let base_loss = kind.loss(&prediction, &tensors.query_labels)?;
            if !base_loss.is_finite() {
                return Err(MetaError::NonFiniteLoss {
                    step: iters,
                    value: base_loss,
                });
            }
            total_loss += base_loss;

            // per-step learning rates, differentiated through the unrolled loop
            for i in 0..iters {
                let mut plus = base_lrs.clone();
                plus[i] += eps;
                let mut minus = base_lrs.clone();
                minus[i] -= eps;
                let lp = self.query_loss_with_lrs(tensors, &plus)?;
                let lm = self.query_loss_with_lrs(tensors, &minus)?;
                lr_grads[i] += (lp - lm) / (2.0 * eps);
            }

            // adaptable head
            if self.config.second_order {
                for (name, grad) in head_grads.iter_mut() {
                    for idx in 0..grad.len() {
                        let center = self.live_coord(name, idx)?;
                        self.set_live_coord(name, idx, center + eps)?;
                        let lp = self.query_loss_with_lrs(tensors, &base_lrs)?;
                        self.set_live_coord(name, idx, center - eps)?;
                        let lm = self.query_loss_with_lrs(tensors, &base_lrs)?;
                        self.set_live_coord(name, idx, center)?;
                        if let Some(slot) = grad.iter_mut().nth(idx) {
                            *slot += (lp - lm) / (2.0 * eps);
                        }
                    }
                }
            } else {
                // first-order: query gradients at the adapted point
                let loss_fn = move |p: &Array2<f64>, y: &[usize]| kind.loss(p, y);
                let grads = self.adapter.gradients(
                    &self.learner,
                    &tensors.query,
                    &tensors.query_lengths,
                    &tensors.query_labels,
                    &loss_fn,
                    &adapted,
                    iters,
                )?;
                for ((name, _), grad) in adapted.iter().zip(grads) {
                    if let Some((_, acc)) = head_grads.iter_mut().find(|(n, _)| n == name) {
                        *acc += &grad;
                    }
                }
            }

            // body: stochastic coordinate gradients with the adapted head fixed
            for name in &body_names {
                let len = self.learner.live_parameters().value(name)?.len();
                let picks = rand::seq::index::sample(
                    &mut self.rng,
                    len,
                    self.config.stochastic_coords.min(len),
                );
                for idx in picks.iter() {
                    let center = self.live_coord(name, idx)?;
                    self.set_live_coord(name, idx, center + eps)?;
                    let lp = {
                        let p = self.learner.forward(
                            &tensors.query,
                            &tensors.query_lengths,
                            Some(&adapted),
                        )?;
                        kind.loss(&p, &tensors.query_labels)?
                    };
                    self.set_live_coord(name, idx, center - eps)?;
                    let lm = {
                        let p = self.learner.forward(
                            &tensors.query,
                            &tensors.query_lengths,
                            Some(&adapted),
                        )?;
                        kind.loss(&p, &tensors.query_labels)?
                    };
                    self.set_live_coord(name, idx, center)?;
                    body_grads.push((name.clone(), idx, (lp - lm) / (2.0 * eps)));
                }
            }
        }

        // apply the averaged meta-update
        let scale = self.outer_lr / batch.len() as f64;
        for (i, g) in lr_grads.iter().enumerate() {
            self.step_lrs[i] -= scale * g;
        }
        for (name, grad) in &head_grads {
            let param = self
                .learner
                .params_mut()
                .get_mut(name)
                .ok_or_else(|| MetaError::MissingParameter(name.clone()))?;
            param.value = &param.value - &(grad * scale);
        }
        for (name, idx, g) in &body_grads {
            let center = self.live_coord(name, *idx)?;
            self.set_live_coord(name, *idx, center - scale * g)?;
        }

        let decay = 1.0 - self.config.weight_decay * self.outer_lr;
        for (name, param) in self.learner.params_mut().iter_mut() {
            if param.trainable && name.ends_with(".weight") {
                param.value.mapv_inplace(|w| w * decay);
            }
        }

        Ok(total_loss / batch.len() as f64)
    }

    fn embed(&self, batch: &ArrayD<f64>, lengths: &[usize]) -> Result<Array2<f64>> {
        self.learner.pooled_embedding(batch, lengths, None)
    }

    fn parameter_snapshot(&self) -> ParamMap {
        let mut snapshot = self.learner.live_parameters().clone();
        snapshot.insert(
            STEP_LR_NAME,
            Parameter::new(self.step_lrs.clone().into_dyn()),
        );
        snapshot
    }

    fn load_snapshot(&mut self, snapshot: &ParamMap) -> Result<()> {
        let expected = self.parameter_snapshot();
        expected.check_name_contract(snapshot)?;

        let lrs = snapshot.value(STEP_LR_NAME)?;
        if lrs.len() != self.step_lrs.len() {
            return Err(MetaError::ShapeMismatch(format!(
                "{} step learning rates in snapshot, {} configured",
                lrs.len(),
                self.step_lrs.len()
            )));
        }
        for (slot, v) in self.step_lrs.iter_mut().zip(lrs.iter()) {
            *slot = *v;
        }

        for (name, param) in self.learner.params_mut().iter_mut() {
            let incoming = snapshot
                .get(name)
                .ok_or_else(|| MetaError::MissingParameter(name.to_string()))?;
            if incoming.value.shape() != param.value.shape() {
                return Err(MetaError::ShapeMismatch(format!(
                    "parameter {} has shape {:?} in snapshot, {:?} live",
                    name,
                    incoming.value.shape(),
                    param.value.shape()
                )));
            }
            param.value = incoming.value.clone();
        }
        Ok(())
    }

    fn set_outer_lr(&mut self, lr: f64) {
        self.outer_lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sequence_learner::LearnerConfig;
    use ndarray::ArrayD;

    fn learner() -> SequenceLearner {
        SequenceLearner::with_seed(
            LearnerConfig {
                vocab_size: 10,
                embed_dim: 3,
                hidden_dim: 3,
                n_classes: 2,
                freeze_embedding: false,
            },
            42,
        )
        .unwrap()
    }

    fn tiny_config() -> AtamlConfig {
        AtamlConfig {
            adapt_iterations: 2,
            adapt_lr: 0.05,
            outer_lr: 0.01,
            second_order: false,
            loss: LossKind::Nll,
            meta_epsilon: 1e-4,
            stochastic_coords: 3,
            weight_decay: 0.0,
        }
    }

    fn episode() -> EpisodeTensors {
        // n=2, k=2, qk=2, seq_len=4; ids within the vocabulary
        let support = ArrayD::from_shape_vec(
            vec![2, 2, 4],
            vec![
                1.0, 2.0, 3.0, 0.0, 2.0, 1.0, 4.0, 0.0, 7.0, 8.0, 9.0, 0.0, 8.0, 7.0, 6.0, 0.0,
            ],
        )
        .unwrap();
        let query = ArrayD::from_shape_vec(
            vec![4, 4],
            vec![
                1.0, 3.0, 2.0, 0.0, 2.0, 4.0, 1.0, 0.0, 9.0, 7.0, 8.0, 0.0, 6.0, 8.0, 9.0, 0.0,
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
    fn test_run_episode_outcome() {
        let model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let outcome = model.run_episode(&episode()).unwrap();

        assert_eq!(outcome.predictions.dim(), (4, 2));
        assert!(outcome.loss.is_finite());
        assert!((0.0..=1.0).contains(&outcome.accuracy));
    }

    #[test]
    fn test_adaptation_moves_predictions() {
        let model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let tensors = episode();

        let adapted = model.run_episode(&tensors).unwrap().predictions;
        let unadapted = model
            .learner()
            .forward(&tensors.query, &tensors.query_lengths, None)
            .unwrap();

        let max_diff = (&adapted - &unadapted)
            .iter()
            .map(|d| d.abs())
            .fold(0.0, f64::max);
        assert!(max_diff > 1e-9, "adaptation left predictions unchanged");
    }

    #[test]
    fn test_live_parameters_untouched_by_run_episode() {
        let model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let before = model.parameter_snapshot();
        model.run_episode(&episode()).unwrap();
        let after = model.parameter_snapshot();

        for (name, param) in before.iter() {
            assert_eq!(&param.value, after.value(name).unwrap(), "{} moved", name);
        }
    }

    #[test]
    fn test_train_step_updates_rates_and_head() {
        let mut model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let lrs_before = model.step_learning_rates().clone();
        let head_before = model
            .learner()
            .live_parameters()
            .value("classifier.weight")
            .unwrap()
            .clone();

        let loss = model.train_step(&[episode()]).unwrap();
        assert!(loss.is_finite());

        let lrs_moved = (&lrs_before - model.step_learning_rates())
            .iter()
            .map(|d| d.abs())
            .fold(0.0, f64::max);
        let head_moved = (&head_before
            - model
                .learner()
                .live_parameters()
                .value("classifier.weight")
                .unwrap())
            .iter()
            .map(|d| d.abs())
            .fold(0.0, f64::max);

        assert!(lrs_moved > 0.0, "per-step learning rates did not move");
        assert!(head_moved > 0.0, "classifier weights did not move");
    }

    #[test]
    fn test_second_order_train_step() {
        let mut config = tiny_config();
        config.second_order = true;
        config.adapt_iterations = 1;
        let mut model = PerStepAtaml::with_seed(learner(), config, 1).unwrap();

        let loss = model.train_step(&[episode()]).unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let snapshot = model.parameter_snapshot();

        model.train_step(&[episode()]).unwrap();
        model.load_snapshot(&snapshot).unwrap();

        let restored = model.parameter_snapshot();
        for (name, param) in snapshot.iter() {
            assert_eq!(&param.value, restored.value(name).unwrap());
        }
    }

    #[test]
    fn test_snapshot_name_contract() {
        let mut model = PerStepAtaml::with_seed(learner(), tiny_config(), 1).unwrap();
        let mut foreign = ParamMap::new();
        foreign.insert("other.weight", Parameter::new(ArrayD::zeros(vec![1])));

        assert!(matches!(
            model.load_snapshot(&foreign),
            Err(MetaError::MissingParameter(_))
        ));
    }
}
