//! Training statistics.
//!
//! Records per-episode training and validation metrics, tracks the best
//! validation result under a chosen criterion and reports progress through
//! `tracing`. The recorder never owns model state; the trainer snapshots
//! parameters when a validation pass sets a new best.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Criterion used to rank validation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criteria {
    /// Lower validation loss is better
    Loss,
    /// Higher validation accuracy is better
    Accuracy,
}

/// Accumulates training/validation history for one run.
#[derive(Debug)]
pub struct StatRecorder {
    train_accuracy: Vec<f64>,
    train_loss: Vec<f64>,
    val_accuracy: Vec<f64>,
    val_loss: Vec<f64>,
    criteria: Criteria,
    best_val: f64,
    best_episode: Option<usize>,
    report_interval: usize,
    episodes_recorded: usize,
    last_report: Instant,
}

impl StatRecorder {
    /// Create a recorder reporting every `report_interval` episodes
    pub fn new(criteria: Criteria, report_interval: usize) -> Self {
        Self {
            train_accuracy: Vec::new(),
            train_loss: Vec::new(),
            val_accuracy: Vec::new(),
            val_loss: Vec::new(),
            criteria,
            best_val: match criteria {
                Criteria::Loss => f64::INFINITY,
                Criteria::Accuracy => -1.0,
            },
            best_episode: None,
            report_interval: report_interval.max(1),
            episodes_recorded: 0,
            last_report: Instant::now(),
        }
    }

    /// Record one training episode
    pub fn record_training(&mut self, accuracy: f64, loss: f64) {
        self.train_accuracy.push(accuracy);
        self.train_loss.push(loss);
        self.episodes_recorded += 1;
    }

    /// Record one validation pass; returns whether it set a new best.
    pub fn record_validation(&mut self, accuracy: f64, loss: f64) -> bool {
        self.val_accuracy.push(accuracy);
        self.val_loss.push(loss);

        let improved = match self.criteria {
            Criteria::Loss => loss < self.best_val,
            Criteria::Accuracy => accuracy > self.best_val,
        };
        if improved {
            self.best_val = match self.criteria {
                Criteria::Loss => loss,
                Criteria::Accuracy => accuracy,
            };
            self.best_episode = Some(self.episodes_recorded);
        }
        improved
    }

    /// Mean training accuracy and loss over the last report window
    pub fn recent_training(&self) -> (f64, f64) {
        let window = self.report_interval.min(self.train_loss.len());
        if window == 0 {
            return (0.0, 0.0);
        }
        let acc = self.train_accuracy[self.train_accuracy.len() - window..]
            .iter()
            .sum::<f64>()
            / window as f64;
        let loss = self.train_loss[self.train_loss.len() - window..]
            .iter()
            .sum::<f64>()
            / window as f64;
        (acc, loss)
    }

    /// Log a progress report and reset the report timer.
    pub fn report(&mut self) {
        let (acc, loss) = self.recent_training();
        let elapsed = self.last_report.elapsed();
        self.last_report = Instant::now();

        info!(
            "episode {}: train_acc={:.4}, train_loss={:.4}, elapsed={:.1}s",
            self.episodes_recorded,
            acc,
            loss,
            elapsed.as_secs_f64()
        );
        if let (Some(&val_acc), Some(&val_loss)) =
            (self.val_accuracy.last(), self.val_loss.last())
        {
            info!(
                "validation: acc={:.4}, loss={:.4}, best={:.4} at episode {}",
                val_acc,
                val_loss,
                self.best_val,
                self.best_episode.unwrap_or(0)
            );
        }
    }

    /// Best validation value under the configured criterion
    pub fn best_validation(&self) -> f64 {
        self.best_val
    }

    /// Episode index of the best validation pass
    pub fn best_episode(&self) -> Option<usize> {
        self.best_episode
    }

    /// Full training loss history
    pub fn train_loss_history(&self) -> &[f64] {
        &self.train_loss
    }

    /// Full training accuracy history
    pub fn train_accuracy_history(&self) -> &[f64] {
        &self.train_accuracy
    }

    /// Full validation loss history
    pub fn val_loss_history(&self) -> &[f64] {
        &self.val_loss
    }

    /// Full validation accuracy history
    pub fn val_accuracy_history(&self) -> &[f64] {
        &self.val_accuracy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_by_loss() {
        let mut stats = StatRecorder::new(Criteria::Loss, 10);
        stats.record_training(0.5, 1.0);
        assert!(stats.record_validation(0.5, 0.9));
        assert!(!stats.record_validation(0.9, 1.2));
        assert!(stats.record_validation(0.6, 0.4));
        assert!((stats.best_validation() - 0.4).abs() < 1e-12);
        assert_eq!(stats.best_episode(), Some(1));
    }

    #[test]
    fn test_best_by_accuracy() {
        let mut stats = StatRecorder::new(Criteria::Accuracy, 10);
        assert!(stats.record_validation(0.4, 1.0));
        assert!(stats.record_validation(0.7, 2.0));
        assert!(!stats.record_validation(0.6, 0.1));
        assert!((stats.best_validation() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_recent_training_window() {
        let mut stats = StatRecorder::new(Criteria::Loss, 2);
        stats.record_training(0.0, 4.0);
        stats.record_training(1.0, 2.0);
        stats.record_training(0.5, 1.0);
        let (acc, loss) = stats.recent_training();
        assert!((acc - 0.75).abs() < 1e-12);
        assert!((loss - 1.5).abs() < 1e-12);
    }
}
