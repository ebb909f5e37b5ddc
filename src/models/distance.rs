//! Distance and similarity measures for metric-based models.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Cosine similarity amplification, matching the scaled-cosine scoring of
/// the matching model.
const COSINE_SCALE: f64 = 10.0;

/// Similarity measure between embedding vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Negative squared Euclidean distance
    SqEuclidean,
    /// Scaled cosine similarity
    Cosine,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        Self::SqEuclidean
    }
}

impl DistanceMetric {
    /// Similarity score between two vectors; larger means closer.
    pub fn similarity(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        match self {
            DistanceMetric::SqEuclidean => {
                -a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>()
            }
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                if na < 1e-12 || nb < 1e-12 {
                    return 0.0;
                }
                COSINE_SCALE * dot / (na * nb)
            }
        }
    }
}
