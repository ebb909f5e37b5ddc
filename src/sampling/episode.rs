//! N-way K-shot episode sampling.
//!
//! An episode draws `n` classes and, per class, `k` support plus `qk` query
//! examples from an [`ExampleStore`]. Sampling is driven entirely by the
//! task seed: the seed picks the classes, and each chosen class draws its
//! examples from a second RNG seeded by a value derived from the task RNG,
//! so a class's support/query partition can be replayed in isolation.
//!
//! Support and query index lists are concatenations of per-class blocks in
//! class draw order; episode-local labels are the class ranks `0..n-1` in
//! that same order.

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::store::ExampleStore;
use crate::{MetaError, Result};

/// Configuration for episode sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Number of classes per episode (N-way)
    pub n_way: usize,
    /// Number of support examples per class (K-shot)
    pub k_shot: usize,
    /// Number of query examples per class
    pub n_query: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            n_way: 5,
            k_shot: 5,
            n_query: 15,
        }
    }
}

/// One sampled few-shot task: raw index sets plus shape metadata.
///
/// `support_indices.len() == n * k` and `query_indices.len() == n * qk`;
/// both lists hold contiguous per-class blocks in class draw order.
/// Episodes are created per sampling call and discarded after one
/// training or evaluation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    /// Support example ids, `k` per class
    pub support_indices: Vec<usize>,
    /// Query example ids, `qk` per class
    pub query_indices: Vec<usize>,
    /// Class count
    pub n: usize,
    /// Support shots per class
    pub k: usize,
    /// Query examples per class
    pub qk: usize,
}

impl Episode {
    /// Materialize the episode into tensors.
    ///
    /// Support becomes `[n, k, seq_len]`, query `[n*qk, seq_len]`; lengths
    /// and episode-local labels follow the flattened row order.
    pub fn materialize(&self, store: &dyn ExampleStore) -> Result<EpisodeTensors> {
        let seq_len = store.seq_len();

        let mut support_data = Vec::with_capacity(self.n * self.k * seq_len);
        let mut support_lengths = Vec::with_capacity(self.n * self.k);
        let mut support_labels = Vec::with_capacity(self.n * self.k);
        for (pos, &id) in self.support_indices.iter().enumerate() {
            let (seq, len, _) = store.get(id)?;
            support_data.extend(seq.iter().copied());
            support_lengths.push(len);
            support_labels.push(pos / self.k);
        }

        let mut query_data = Vec::with_capacity(self.n * self.qk * seq_len);
        let mut query_lengths = Vec::with_capacity(self.n * self.qk);
        let mut query_labels = Vec::with_capacity(self.n * self.qk);
        for (pos, &id) in self.query_indices.iter().enumerate() {
            let (seq, len, _) = store.get(id)?;
            query_data.extend(seq.iter().copied());
            query_lengths.push(len);
            query_labels.push(pos / self.qk);
        }

        let support = ArrayD::from_shape_vec(vec![self.n, self.k, seq_len], support_data)
            .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;
        let query = ArrayD::from_shape_vec(vec![self.n * self.qk, seq_len], query_data)
            .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;

        Ok(EpisodeTensors {
            support,
            support_lengths,
            support_labels,
            query,
            query_lengths,
            query_labels,
        })
    }
}

/// A materialized episode, ready for a model's forward pass.
#[derive(Debug, Clone)]
pub struct EpisodeTensors {
    /// Support tensor `[n, k, seq_len]`
    pub support: ArrayD<f64>,
    /// True lengths of the flattened support rows
    pub support_lengths: Vec<usize>,
    /// Episode-local labels of the flattened support rows
    pub support_labels: Vec<usize>,
    /// Query tensor `[n*qk, seq_len]`
    pub query: ArrayD<f64>,
    /// True lengths of the query rows
    pub query_lengths: Vec<usize>,
    /// Episode-local labels of the query rows
    pub query_labels: Vec<usize>,
}

impl EpisodeTensors {
    /// Support tensor reshaped to a flat batch `[n*k, seq_len]`
    pub fn support_flat(&self) -> Result<ArrayD<f64>> {
        let shape = self.support.shape();
        if shape.len() != 3 {
            return Err(MetaError::ShapeMismatch(format!(
                "support rank {} where 3 expected",
                shape.len()
            )));
        }
        let (n, k, seq_len) = (shape[0], shape[1], shape[2]);
        self.support
            .clone()
            .into_shape(ndarray::IxDyn(&[n * k, seq_len]))
            .map_err(|e| MetaError::ShapeMismatch(e.to_string()))
    }
}

/// Draws reproducible episodes from a store.
#[derive(Debug, Clone)]
pub struct EpisodeSampler {
    config: EpisodeConfig,
}

impl EpisodeSampler {
    /// Create a sampler for a fixed episode shape
    pub fn new(config: EpisodeConfig) -> Self {
        Self { config }
    }

    /// Episode shape
    pub fn config(&self) -> &EpisodeConfig {
        &self.config
    }

    /// Sample one episode. Identical `(store, task_seed)` pairs always
    /// produce identical index sequences.
    pub fn sample(&self, store: &dyn ExampleStore, task_seed: u64) -> Result<Episode> {
        let EpisodeConfig {
            n_way: n,
            k_shot: k,
            n_query: qk,
        } = self.config;

        let groups = store.class_groups();
        if groups.len() < n {
            return Err(MetaError::InsufficientClasses {
                requested: n,
                available: groups.len(),
            });
        }

        let mut rng = StdRng::seed_from_u64(task_seed);

        // class draw order defines the episode-local label ranks
        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.shuffle(&mut rng);
        order.truncate(n);

        let needed = k + qk;
        let mut support_indices = Vec::with_capacity(n * k);
        let mut query_indices = Vec::with_capacity(n * qk);

        for &group_idx in &order {
            let group = &groups[group_idx];
            if group.ids.len() < needed {
                return Err(MetaError::InsufficientExamples {
                    label: group.label,
                    available: group.ids.len(),
                    needed,
                });
            }

            // per-class draw from an independently derived seed
            let class_seed: u64 = rng.gen();
            let mut class_rng = StdRng::seed_from_u64(class_seed);
            let mut ids = group.ids.clone();
            ids.shuffle(&mut class_rng);

            support_indices.extend_from_slice(&ids[..k]);
            query_indices.extend_from_slice(&ids[k..needed]);
        }

        Ok(Episode {
            support_indices,
            query_indices,
            n,
            k,
            qk,
        })
    }
}
