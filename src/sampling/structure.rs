//! Task structure extraction from materialized episode tensors.
//!
//! The episode shape `(n, k, qk, seq_len)` is never passed alongside the
//! tensors; models recover it from tensor rank and shape under a declared
//! layout convention. A rank that does not match the convention is a
//! contract violation and fails loudly.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{MetaError, Result};

/// Structural convention of episode tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// Support `[n, k, seq_len]`, query `[n*qk, seq_len]`
    Flat,
    /// A singleton channel axis before the sequence:
    /// support `[n, k, 1, seq_len]`, query `[n*qk, 1, seq_len]`
    ChannelExpanded,
    /// Matrix-valued sequence steps:
    /// support `[n, k, seq_len, h, w]`, query `[n*qk, seq_len, h, w]`
    MatrixSequence,
}

impl TensorLayout {
    fn support_rank(self) -> usize {
        match self {
            TensorLayout::Flat => 3,
            TensorLayout::ChannelExpanded => 4,
            TensorLayout::MatrixSequence => 5,
        }
    }

    fn query_rank(self) -> usize {
        self.support_rank() - 1
    }

    /// Axis of the query tensor holding sequence length; the support
    /// tensor has the same axis shifted by one for the class dimension.
    fn length_axis(self) -> usize {
        match self {
            TensorLayout::Flat | TensorLayout::MatrixSequence => 1,
            TensorLayout::ChannelExpanded => 2,
        }
    }
}

/// Episode shape recovered from materialized tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStructure {
    /// Class count
    pub n: usize,
    /// Support shots per class
    pub k: usize,
    /// Query examples per class
    pub qk: usize,
    /// Support sequence length
    pub support_seq_len: usize,
    /// Query sequence length
    pub query_seq_len: usize,
}

impl TaskStructure {
    /// Infer the structure of a `(support, query)` pair under a layout.
    ///
    /// Fails with `ShapeMismatch` when either rank deviates from the
    /// layout's convention or when the query row count is not a multiple
    /// of the support's class count.
    pub fn infer(
        support: &ArrayD<f64>,
        query: &ArrayD<f64>,
        layout: TensorLayout,
    ) -> Result<Self> {
        if support.ndim() != layout.support_rank() {
            return Err(MetaError::ShapeMismatch(format!(
                "support rank {} does not satisfy the {:?} layout (expected {})",
                support.ndim(),
                layout,
                layout.support_rank()
            )));
        }
        if query.ndim() != layout.query_rank() {
            return Err(MetaError::ShapeMismatch(format!(
                "query rank {} does not satisfy the {:?} layout (expected {})",
                query.ndim(),
                layout,
                layout.query_rank()
            )));
        }

        let n = support.shape()[0];
        let k = support.shape()[1];
        let support_seq_len = support.shape()[layout.length_axis() + 1];
        let query_rows = query.shape()[0];
        let query_seq_len = query.shape()[layout.length_axis()];

        if n == 0 || query_rows % n != 0 {
            return Err(MetaError::ShapeMismatch(format!(
                "{} query rows cannot split across {} classes",
                query_rows, n
            )));
        }

        Ok(Self {
            n,
            k,
            qk: query_rows / n,
            support_seq_len,
            query_seq_len,
        })
    }
}
