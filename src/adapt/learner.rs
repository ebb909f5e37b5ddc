//! The adaptable-learner capability.
//!
//! An adaptable learner exposes a named-parameter surface and a forward pass
//! that can run either from its own live weights or from an externally
//! supplied parameter mapping. The dual-mode forward is what makes
//! inner-loop adaptation possible: the adapted mapping is threaded through
//! the layers that declared themselves adaptable while every other layer
//! keeps reading its live weights.

use ndarray::{Array2, ArrayD};

use crate::adapt::params::ParamMap;
use crate::Result;

/// Capability contract for models whose parameters can be specialized
/// per episode.
pub trait AdaptableLearner {
    /// Read-only view of the persistent parameter mapping.
    fn live_parameters(&self) -> &ParamMap;

    /// Names of the parameters that participate in inner-loop adaptation.
    /// Declared once at construction; never changes afterwards.
    fn adaptable_parameter_names(&self) -> &[String];

    /// Deep-copy the adaptable subset into a fresh mapping.
    ///
    /// Every entry is trainable and numerically equal to its live
    /// counterpart, but independent of it: updating the clone never touches
    /// the live mapping. Fails with `MissingParameter` when a declared
    /// adaptable name is absent from the live mapping.
    fn clone_adaptable_parameters(&self) -> Result<ParamMap> {
        let live = self.live_parameters();
        let mut cloned = ParamMap::new();
        for name in self.adaptable_parameter_names() {
            let param = live
                .value(name)
                .map_err(|_| crate::MetaError::MissingParameter(name.clone()))?;
            cloned.insert(name.clone(), crate::adapt::params::Parameter::new(param.clone()));
        }
        Ok(cloned)
    }

    /// Forward pass over a batch of sequences, returning one row of
    /// log-probabilities per example.
    ///
    /// `batch` is rank-2 `[batch, seq_len]`; `lengths` carries the true
    /// length of each row. When `params` is `None` every layer uses live
    /// weights. When `params` is supplied, each layer whose parameter names
    /// appear in [`adaptable_parameter_names`](Self::adaptable_parameter_names)
    /// reads from the supplied mapping instead; supplying a mapping that
    /// lacks an adaptable name is a `MissingParameter` error. The call never
    /// mutates live parameters.
    fn forward(
        &self,
        batch: &ArrayD<f64>,
        lengths: &[usize],
        params: Option<&ParamMap>,
    ) -> Result<Array2<f64>>;
}
