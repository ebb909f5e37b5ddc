//! Shared numeric pieces of the sequence models: token embedding lookup,
//! position-wise encoding, length-aware pooling and the output projection.
//!
//! All functions take their weights as raw tensors so that callers can
//! route adaptable layers through an override mapping.

use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayView2, Ix1, Ix2};

use crate::{MetaError, Result};

/// Token id reserved for padding; it always embeds to the zero vector.
pub const PADDING_ID: usize = 0;

pub(crate) fn as_matrix<'a>(tensor: &'a ArrayD<f64>, name: &str) -> Result<ArrayView2<'a, f64>> {
    tensor
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| MetaError::ShapeMismatch(format!("parameter {} is not rank 2", name)))
}

pub(crate) fn as_vector<'a>(tensor: &'a ArrayD<f64>, name: &str) -> Result<ArrayView1<'a, f64>> {
    tensor
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| MetaError::ShapeMismatch(format!("parameter {} is not rank 1", name)))
}

/// Look up embeddings for a batch of padded token-id rows.
///
/// `batch` is rank-2 `[b, seq_len]` holding integral ids stored as floats;
/// the result is `[b, seq_len, embed_dim]`. Ids at or beyond the vocabulary
/// size are data errors, padding embeds to zero.
pub fn embed_sequences(batch: &ArrayD<f64>, embedding: &ArrayD<f64>) -> Result<Array3<f64>> {
    let ids = batch
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| MetaError::ShapeMismatch(format!("batch rank {} where 2 expected", batch.ndim())))?;
    let table = as_matrix(embedding, "embedding.weight")?;
    let (vocab, dim) = table.dim();
    let (rows, seq_len) = ids.dim();

    let mut out = Array3::zeros((rows, seq_len, dim));
    for ((i, t), &raw) in ids.indexed_iter() {
        let id = raw.round();
        if id < 0.0 || id as usize >= vocab {
            return Err(MetaError::Data(format!(
                "token id {} out of range for vocabulary of {}",
                raw, vocab
            )));
        }
        let id = id as usize;
        if id == PADDING_ID {
            continue;
        }
        for d in 0..dim {
            out[[i, t, d]] = table[[id, d]];
        }
    }
    Ok(out)
}

/// Position-wise encoder: `tanh(x·W + b)` applied at every sequence step.
pub fn encode_positions(
    embedded: &Array3<f64>,
    weight: &ArrayD<f64>,
    bias: &ArrayD<f64>,
) -> Result<Array3<f64>> {
    let w = as_matrix(weight, "encoder.weight")?;
    let b = as_vector(bias, "encoder.bias")?;
    let (rows, seq_len, in_dim) = embedded.dim();
    if w.nrows() != in_dim || w.ncols() != b.len() {
        return Err(MetaError::ShapeMismatch(format!(
            "encoder weight {:?} incompatible with input dim {} and bias {}",
            w.dim(),
            in_dim,
            b.len()
        )));
    }

    let hidden_dim = w.ncols();
    let mut out = Array3::zeros((rows, seq_len, hidden_dim));
    for i in 0..rows {
        for t in 0..seq_len {
            for h in 0..hidden_dim {
                let mut acc = b[h];
                for d in 0..in_dim {
                    acc += embedded[[i, t, d]] * w[[d, h]];
                }
                out[[i, t, h]] = acc.tanh();
            }
        }
    }
    Ok(out)
}

/// Dot-product attention pooling: every valid position is scored against
/// the attention vector and the scored states are summed and normalized by
/// the true length.
pub fn attention_pool(
    hidden: &Array3<f64>,
    att_weight: &ArrayD<f64>,
    lengths: &[usize],
) -> Result<Array2<f64>> {
    let w = as_vector(att_weight, "attention.weight")?;
    let (rows, seq_len, dim) = hidden.dim();
    check_lengths(lengths, rows, seq_len)?;
    if w.len() != dim {
        return Err(MetaError::ShapeMismatch(format!(
            "attention weight of {} for hidden dim {}",
            w.len(),
            dim
        )));
    }

    let mut out = Array2::zeros((rows, dim));
    for (i, &len) in lengths.iter().enumerate() {
        for t in 0..len {
            let mut score = 0.0;
            for d in 0..dim {
                score += hidden[[i, t, d]] * w[d];
            }
            for d in 0..dim {
                out[[i, d]] += hidden[[i, t, d]] * score;
            }
        }
        for d in 0..dim {
            out[[i, d]] /= len.max(1) as f64;
        }
    }
    Ok(out)
}

/// Mean over the valid positions of each row.
pub fn masked_mean(hidden: &Array3<f64>, lengths: &[usize]) -> Result<Array2<f64>> {
    let (rows, seq_len, dim) = hidden.dim();
    check_lengths(lengths, rows, seq_len)?;

    let mut out = Array2::zeros((rows, dim));
    for (i, &len) in lengths.iter().enumerate() {
        for t in 0..len {
            for d in 0..dim {
                out[[i, d]] += hidden[[i, t, d]];
            }
        }
        for d in 0..dim {
            out[[i, d]] /= len.max(1) as f64;
        }
    }
    Ok(out)
}

/// Output projection `x·W + b`.
pub fn linear(pooled: &Array2<f64>, weight: &ArrayD<f64>, bias: &ArrayD<f64>) -> Result<Array2<f64>> {
    let w = as_matrix(weight, "classifier.weight")?;
    let b = as_vector(bias, "classifier.bias")?;
    let (rows, in_dim) = pooled.dim();
    if w.nrows() != in_dim || w.ncols() != b.len() {
        return Err(MetaError::ShapeMismatch(format!(
            "classifier weight {:?} incompatible with input dim {} and bias {}",
            w.dim(),
            in_dim,
            b.len()
        )));
    }

    let mut out = Array2::zeros((rows, w.ncols()));
    for i in 0..rows {
        for c in 0..w.ncols() {
            let mut acc = b[c];
            for d in 0..in_dim {
                acc += pooled[[i, d]] * w[[d, c]];
            }
            out[[i, c]] = acc;
        }
    }
    Ok(out)
}

/// In-place row-wise log-softmax with max subtraction.
pub fn log_softmax_rows(logits: &mut Array2<f64>) {
    for mut row in logits.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
        for v in row.iter_mut() {
            *v = *v - max - log_sum;
        }
    }
}

fn check_lengths(lengths: &[usize], rows: usize, seq_len: usize) -> Result<()> {
    if lengths.len() != rows {
        return Err(MetaError::ShapeMismatch(format!(
            "{} lengths for {} rows",
            lengths.len(),
            rows
        )));
    }
    if let Some(&bad) = lengths.iter().find(|&&l| l > seq_len) {
        return Err(MetaError::ShapeMismatch(format!(
            "length {} beyond sequence width {}",
            bad, seq_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayD};

    fn dyn2(rows: usize, cols: usize, vals: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(vec![rows, cols], vals).unwrap()
    }

    fn dyn1(vals: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(vec![vals.len()], vals).unwrap()
    }

    #[test]
    fn test_embedding_lookup_and_padding() {
        let batch = dyn2(1, 3, vec![1.0, 0.0, 2.0]);
        let table = dyn2(3, 2, vec![9.0, 9.0, 1.0, 2.0, 3.0, 4.0]);

        let out = embed_sequences(&batch, &table).unwrap();
        assert_eq!(out[[0, 0, 0]], 1.0);
        assert_eq!(out[[0, 0, 1]], 2.0);
        // padding id embeds to zero regardless of table row 0
        assert_eq!(out[[0, 1, 0]], 0.0);
        assert_eq!(out[[0, 2, 1]], 4.0);
    }

    #[test]
    fn test_embedding_rejects_out_of_vocab() {
        let batch = dyn2(1, 1, vec![5.0]);
        let table = dyn2(3, 2, vec![0.0; 6]);
        assert!(matches!(
            embed_sequences(&batch, &table),
            Err(MetaError::Data(_))
        ));
    }

    #[test]
    fn test_masked_mean_ignores_padding_positions() {
        let mut hidden = Array3::zeros((1, 3, 2));
        hidden[[0, 0, 0]] = 2.0;
        hidden[[0, 1, 0]] = 4.0;
        hidden[[0, 2, 0]] = 100.0; // beyond the true length

        let pooled = masked_mean(&hidden, &[2]).unwrap();
        assert!((pooled[[0, 0]] - 3.0).abs() < 1e-12);
        assert_eq!(pooled[[0, 1]], 0.0);
    }

    #[test]
    fn test_attention_pool_weights_by_score() {
        // one row, two valid positions, identity-ish check against a
        // hand-computed weighted sum
        let mut hidden = Array3::zeros((1, 2, 2));
        hidden[[0, 0, 0]] = 1.0;
        hidden[[0, 1, 1]] = 2.0;
        let w = dyn1(vec![1.0, 0.5]);

        let pooled = attention_pool(&hidden, &w, &[2]).unwrap();
        // scores: position 0 -> 1.0, position 1 -> 1.0
        // pooled = (1*[1,0] + 1*[0,2]) / 2
        assert!((pooled[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((pooled[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_validation() {
        let hidden = Array3::zeros((2, 3, 1));
        assert!(matches!(
            masked_mean(&hidden, &[3]),
            Err(MetaError::ShapeMismatch(_))
        ));
        assert!(matches!(
            masked_mean(&hidden, &[3, 4]),
            Err(MetaError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_log_softmax_rows_normalizes() {
        let mut logits = array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]];
        log_softmax_rows(&mut logits);
        for row in logits.rows() {
            let total: f64 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        // uniform logits give uniform probabilities
        assert!((logits[[1, 0]].exp() - 1.0 / 3.0).abs() < 1e-9);
    }
}
