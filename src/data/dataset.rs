//! Sequence dataset files.
//!
//! A split is stored as two JSON files: `data.json` with equal-width rows
//! of padded token ids and `seq_length.json` with the true length of each
//! row. Rows are grouped by class in fixed-size contiguous blocks, so the
//! label of row `i` is `i / examples_per_class`.

use std::path::Path;

use ndarray::Array2;

use crate::data::paths::DatasetPaths;
use crate::data::store::SequenceStore;
use crate::{MetaError, Result};

/// Loader for class-blocked sequence dataset files.
pub struct SeqFileDataset;

impl SeqFileDataset {
    /// Load the split addressed by `paths` into a store.
    pub fn load(paths: &DatasetPaths, examples_per_class: usize) -> Result<SequenceStore> {
        Self::load_files(
            &paths.data_file()?,
            &paths.seq_length_file()?,
            examples_per_class,
        )
    }

    /// Load explicit data and length files into a store.
    pub fn load_files(
        data_path: &Path,
        seq_length_path: &Path,
        examples_per_class: usize,
    ) -> Result<SequenceStore> {
        if examples_per_class == 0 {
            return Err(MetaError::InvalidParameter(
                "examples_per_class must be positive".to_string(),
            ));
        }

        let data_file = std::fs::File::open(data_path)?;
        let rows: Vec<Vec<u64>> = serde_json::from_reader(std::io::BufReader::new(data_file))?;
        let length_file = std::fs::File::open(seq_length_path)?;
        let lengths: Vec<usize> =
            serde_json::from_reader(std::io::BufReader::new(length_file))?;

        if rows.is_empty() {
            return Err(MetaError::Data("dataset holds no sequences".to_string()));
        }
        if lengths.len() != rows.len() {
            return Err(MetaError::ShapeMismatch(format!(
                "{} sequences with {} length entries",
                rows.len(),
                lengths.len()
            )));
        }
        if rows.len() % examples_per_class != 0 {
            return Err(MetaError::Data(format!(
                "{} rows do not divide into classes of {}",
                rows.len(),
                examples_per_class
            )));
        }

        let width = rows[0].len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(MetaError::ShapeMismatch(format!(
                "row {} has width {}, first row has {}",
                i,
                row.len(),
                width
            )));
        }

        let flat: Vec<f64> = rows
            .iter()
            .flat_map(|row| row.iter().map(|&id| id as f64))
            .collect();
        let sequences = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| MetaError::ShapeMismatch(e.to_string()))?;
        let labels = (0..rows.len()).map(|i| i / examples_per_class).collect();

        SequenceStore::new(sequences, lengths, labels)
    }
}
