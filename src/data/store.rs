//! Flat labeled example store.
//!
//! The sampling layer consumes datasets through the [`ExampleStore`]
//! contract: rows of `(sequence, length, label)` addressed by id, plus a
//! deterministic class → ids grouping. Grouping order is fixed at
//! construction so that seeded sampling replays identically.

use ndarray::{Array2, ArrayView1};

use crate::{MetaError, Result};

/// One class and the example ids belonging to it, in store order.
#[derive(Debug, Clone)]
pub struct ClassGroup {
    /// Original dataset label
    pub label: usize,
    /// Example ids, in the order they appear in the store
    pub ids: Vec<usize>,
}

/// Read-only access to a flat labeled sequence dataset.
pub trait ExampleStore {
    /// Fetch one example: `(padded sequence, true length, label)`.
    /// Fails with `NotFound` when the id is out of range.
    fn get(&self, id: usize) -> Result<(ArrayView1<'_, f64>, usize, usize)>;

    /// Class groups in deterministic construction order.
    fn class_groups(&self) -> &[ClassGroup];

    /// Total number of examples
    fn len(&self) -> usize;

    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Padded sequence length shared by all rows
    fn seq_len(&self) -> usize;
}

/// In-memory store over padded token-id sequences.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    sequences: Array2<f64>,
    lengths: Vec<usize>,
    labels: Vec<usize>,
    groups: Vec<ClassGroup>,
}

impl SequenceStore {
    /// Build a store from padded rows, true lengths and labels.
    ///
    /// Class groups are formed in order of first label appearance, which
    /// matches the on-disk layout of class-blocked dataset files.
    pub fn new(sequences: Array2<f64>, lengths: Vec<usize>, labels: Vec<usize>) -> Result<Self> {
        let rows = sequences.nrows();
        if lengths.len() != rows || labels.len() != rows {
            return Err(MetaError::ShapeMismatch(format!(
                "{} sequences, {} lengths, {} labels",
                rows,
                lengths.len(),
                labels.len()
            )));
        }
        let seq_len = sequences.ncols();
        if let Some((id, &len)) = lengths.iter().enumerate().find(|(_, &l)| l > seq_len) {
            return Err(MetaError::Data(format!(
                "example {} declares length {} beyond padded width {}",
                id, len, seq_len
            )));
        }

        let mut groups: Vec<ClassGroup> = Vec::new();
        for (id, &label) in labels.iter().enumerate() {
            match groups.iter_mut().find(|g| g.label == label) {
                Some(group) => group.ids.push(id),
                None => groups.push(ClassGroup {
                    label,
                    ids: vec![id],
                }),
            }
        }

        Ok(Self {
            sequences,
            lengths,
            labels,
            groups,
        })
    }

    /// All labels, indexed by example id
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// All true lengths, indexed by example id
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }
}

impl ExampleStore for SequenceStore {
    fn get(&self, id: usize) -> Result<(ArrayView1<'_, f64>, usize, usize)> {
        if id >= self.sequences.nrows() {
            return Err(MetaError::NotFound(id));
        }
        Ok((self.sequences.row(id), self.lengths[id], self.labels[id]))
    }

    fn class_groups(&self) -> &[ClassGroup] {
        &self.groups
    }

    fn len(&self) -> usize {
        self.sequences.nrows()
    }

    fn seq_len(&self) -> usize {
        self.sequences.ncols()
    }
}
