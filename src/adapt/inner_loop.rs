//! Inner-loop gradient adaptation.
//!
//! Runs the fixed-iteration adaptation loop over a learner's adaptable
//! parameters: forward on the support set, differentiate the support loss,
//! update each parameter with that step's learning rate, repeat. The
//! adapted mapping is replaced wholesale every iteration: step `i+1`
//! always starts from step `i`'s output with a freshly recomputed parameter
//! list, never from a stale snapshot and never from the live weights.
//!
//! Gradients are estimated by central finite differences, one coordinate at
//! a time. Parameters and gradients are paired positionally over the
//! mapping's stable iteration order.

use ndarray::{Array2, ArrayD};

use crate::adapt::learner::AdaptableLearner;
use crate::adapt::params::{ParamMap, Parameter};
use crate::{MetaError, Result};

/// Episode loss over a batch of prediction rows and their labels.
pub type LossFn = dyn Fn(&Array2<f64>, &[usize]) -> Result<f64>;

/// Fixed-iteration differentiable adaptation over a learner's adaptable
/// parameter subset.
#[derive(Debug, Clone)]
pub struct InnerLoopAdapter {
    epsilon: f64,
}

impl Default for InnerLoopAdapter {
    fn default() -> Self {
        Self { epsilon: 1e-4 }
    }
}

impl InnerLoopAdapter {
    /// Create an adapter with a custom finite-difference step
    pub fn new(epsilon: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(MetaError::InvalidParameter(format!(
                "finite-difference epsilon must be positive, got {}",
                epsilon
            )));
        }
        Ok(Self { epsilon })
    }

    /// Finite-difference step size
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Adapt the learner's adaptable parameters on one support set.
    ///
    /// Returns the task-specialized parameter mapping. The live mapping is
    /// untouched; the caller consumes the result in a final query-set
    /// forward and then discards it. With `iterations == 0` the result is
    /// numerically identical to [`AdaptableLearner::clone_adaptable_parameters`].
    ///
    /// `step_lrs` must supply at least one learning rate per iteration.
    pub fn adapt(
        &self,
        learner: &dyn AdaptableLearner,
        support: &ArrayD<f64>,
        lengths: &[usize],
        labels: &[usize],
        loss_fn: &LossFn,
        step_lrs: &[f64],
        iterations: usize,
    ) -> Result<ParamMap> {
        if step_lrs.len() < iterations {
            return Err(MetaError::InvalidParameter(format!(
                "{} step learning rates for {} adaptation iterations",
                step_lrs.len(),
                iterations
            )));
        }

        let mut adapted = learner.clone_adaptable_parameters()?;

        for step in 0..iterations {
            // parameter list recomputed from the current mapping every step
            let names: Vec<String> = adapted.names().map(String::from).collect();

            let prediction = learner.forward(support, lengths, Some(&adapted))?;
            let loss = loss_fn(&prediction, labels)?;
            if !loss.is_finite() {
                return Err(MetaError::NonFiniteLoss { step, value: loss });
            }

            let grads =
                self.gradients(learner, support, lengths, labels, loss_fn, &adapted, step)?;
            if grads.len() != names.len() {
                return Err(MetaError::ShapeMismatch(format!(
                    "{} gradients for {} adaptable parameters",
                    grads.len(),
                    names.len()
                )));
            }

            let lr = step_lrs[step];
            let mut next = ParamMap::new();
            for ((name, param), grad) in adapted.iter().zip(grads) {
                let updated = &param.value - &(grad * lr);
                next.insert(name, Parameter::new(updated));
            }
            adapted = next;
        }

        Ok(adapted)
    }

    /// Central-difference gradients of the support loss with respect to
    /// every adaptable parameter, in the mapping's iteration order.
    pub(crate) fn gradients(
        &self,
        learner: &dyn AdaptableLearner,
        support: &ArrayD<f64>,
        lengths: &[usize],
        labels: &[usize],
        loss_fn: &LossFn,
        adapted: &ParamMap,
        step: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        let names: Vec<String> = adapted.names().map(String::from).collect();
        let mut work = adapted.clone();
        let mut grads = Vec::with_capacity(names.len());

        for name in &names {
            let base = adapted.value(name)?.clone();
            let flat: Vec<f64> = base.iter().copied().collect();
            let mut grad = Vec::with_capacity(flat.len());

            for (idx, &center) in flat.iter().enumerate() {
                set_element(&mut work, name, idx, center + self.epsilon)?;
                let plus = self.probe_loss(learner, support, lengths, labels, loss_fn, &work)?;

                set_element(&mut work, name, idx, center - self.epsilon)?;
                let minus = self.probe_loss(learner, support, lengths, labels, loss_fn, &work)?;

                set_element(&mut work, name, idx, center)?;

                if !plus.is_finite() || !minus.is_finite() {
                    return Err(MetaError::NonFiniteLoss {
                        step,
                        value: if plus.is_finite() { minus } else { plus },
                    });
                }
                grad.push((plus - minus) / (2.0 * self.epsilon));
            }

            let grad = ArrayD::from_shape_vec(base.raw_dim(), grad)
                .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;
            grads.push(grad);
        }

        Ok(grads)
    }

    fn probe_loss(
        &self,
        learner: &dyn AdaptableLearner,
        support: &ArrayD<f64>,
        lengths: &[usize],
        labels: &[usize],
        loss_fn: &LossFn,
        params: &ParamMap,
    ) -> Result<f64> {
        let prediction = learner.forward(support, lengths, Some(params))?;
        loss_fn(&prediction, labels)
    }
}

fn set_element(map: &mut ParamMap, name: &str, idx: usize, value: f64) -> Result<()> {
    let param = map
        .get_mut(name)
        .ok_or_else(|| MetaError::MissingParameter(name.to_string()))?;
    match param.value.iter_mut().nth(idx) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(MetaError::ShapeMismatch(format!(
            "element {} out of range for parameter {}",
            idx, name
        ))),
    }
}
