//! Learning rate scheduling for the outer loop.

use serde::{Deserialize, Serialize};

/// Outer learning rate schedule evaluated per episode index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearningRateScheduler {
    /// Fixed learning rate
    Constant { lr: f64 },
    /// Multiply by `gamma` every `step_size` episodes, never below `min_lr`
    StepDecay {
        initial_lr: f64,
        step_size: usize,
        gamma: f64,
        min_lr: f64,
    },
}

impl LearningRateScheduler {
    /// Constant schedule
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Step decay schedule
    pub fn step_decay(initial_lr: f64, step_size: usize, gamma: f64, min_lr: f64) -> Self {
        Self::StepDecay {
            initial_lr,
            step_size,
            gamma,
            min_lr,
        }
    }

    /// Learning rate at a given episode index
    pub fn step(&self, episode: usize) -> f64 {
        match *self {
            LearningRateScheduler::Constant { lr } => lr,
            LearningRateScheduler::StepDecay {
                initial_lr,
                step_size,
                gamma,
                min_lr,
            } => {
                let exponent = if step_size == 0 {
                    0
                } else {
                    episode / step_size
                };
                (initial_lr * gamma.powi(exponent as i32)).max(min_lr)
            }
        }
    }
}
