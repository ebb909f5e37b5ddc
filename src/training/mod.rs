//! Episodic trainer, statistics recording and learning rate scheduling.

pub mod scheduler;
pub mod stats;
pub mod trainer;

pub use scheduler::LearningRateScheduler;
pub use stats::{Criteria, StatRecorder};
pub use trainer::{MetaTrainer, TrainerConfig, TrainingSummary};
