//! Meta-batch splitting.
//!
//! For meta-batch training a pool of class-blocked rows is re-sampled into
//! several smaller batches: each batch draws `sample_per_class` rows
//! without replacement from every contiguous block of `max_per_class`
//! rows, with a fresh seed per class draw. Rows may repeat across batches
//! but never within one class draw. The iterator is finite and restartable
//! only by calling [`split_into_meta_batches`] again.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::sampling::seed::SeedSource;
use crate::{MetaError, Result};

/// One re-sampled sub-batch of the pool.
#[derive(Debug, Clone)]
pub struct MetaBatch {
    /// Selected rows, `sample_per_class` per class block
    pub data: Array2<f64>,
    /// Labels of the selected rows
    pub labels: Vec<usize>,
    /// True lengths of the selected rows
    pub lengths: Vec<usize>,
}

/// Finite iterator over meta-batches.
pub struct MetaBatchIter<'a> {
    data: &'a Array2<f64>,
    labels: &'a [usize],
    lengths: &'a [usize],
    max_per_class: usize,
    sample_per_class: usize,
    remaining: usize,
    seeds: SeedSource,
}

impl Iterator for MetaBatchIter<'_> {
    type Item = MetaBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let rows = self.data.nrows();
        let mut selected = Vec::with_capacity(rows / self.max_per_class * self.sample_per_class);

        for block_start in (0..rows).step_by(self.max_per_class) {
            // fresh seed per class draw, distinct rows within the draw
            let mut rng = StdRng::seed_from_u64(self.seeds.next_seed());
            let picks =
                rand::seq::index::sample(&mut rng, self.max_per_class, self.sample_per_class);
            selected.extend(picks.iter().map(|offset| block_start + offset));
        }

        let mut data = Array2::zeros((selected.len(), self.data.ncols()));
        let mut labels = Vec::with_capacity(selected.len());
        let mut lengths = Vec::with_capacity(selected.len());
        for (row, &idx) in selected.iter().enumerate() {
            data.row_mut(row).assign(&self.data.row(idx));
            labels.push(self.labels[idx]);
            lengths.push(self.lengths[idx]);
        }

        Some(MetaBatch {
            data,
            labels,
            lengths,
        })
    }
}

/// Split a class-blocked pool into `batch_count` independently re-sampled
/// meta-batches.
///
/// The pool must consist of contiguous class blocks of exactly
/// `max_per_class` rows. Fails with `InvalidParameter` when
/// `sample_per_class` exceeds `max_per_class`, and with `ShapeMismatch`
/// when the metadata lengths do not match the row count or the rows do not
/// divide into whole blocks.
pub fn split_into_meta_batches<'a>(
    data: &'a Array2<f64>,
    labels: &'a [usize],
    lengths: &'a [usize],
    batch_count: usize,
    max_per_class: usize,
    sample_per_class: usize,
    seeds: SeedSource,
) -> Result<MetaBatchIter<'a>> {
    if sample_per_class > max_per_class {
        return Err(MetaError::InvalidParameter(format!(
            "sample_per_class {} exceeds max_per_class {}",
            sample_per_class, max_per_class
        )));
    }
    if max_per_class == 0 {
        return Err(MetaError::InvalidParameter(
            "max_per_class must be positive".to_string(),
        ));
    }

    let rows = data.nrows();
    if labels.len() != rows || lengths.len() != rows {
        return Err(MetaError::ShapeMismatch(format!(
            "{} rows with {} labels and {} lengths",
            rows,
            labels.len(),
            lengths.len()
        )));
    }
    if rows % max_per_class != 0 {
        return Err(MetaError::ShapeMismatch(format!(
            "{} rows do not divide into blocks of {}",
            rows, max_per_class
        )));
    }

    Ok(MetaBatchIter {
        data,
        labels,
        lengths,
        max_per_class,
        sample_per_class,
        remaining: batch_count,
        seeds,
    })
}
