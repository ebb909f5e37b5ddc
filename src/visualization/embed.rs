//! Two-component PCA projection of embedding rows.
//!
//! The crate never plots; it projects pooled embeddings to 2-D and writes
//! labelled points as JSON for an external plotting tool.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{MetaError, Result};

const POWER_ITERATIONS: usize = 64;

/// One projected embedding with its class label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
    pub label: usize,
}

/// Project embedding rows onto their top two principal components.
///
/// Power iteration with deflation on the centered data; deterministic, no
/// randomness involved.
pub fn project_2d(embeddings: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, dims) = embeddings.dim();
    if rows < 2 || dims < 2 {
        return Err(MetaError::InvalidParameter(format!(
            "projection needs at least 2x2 data, got {}x{}",
            rows, dims
        )));
    }

    // center columns
    let mut centered = embeddings.clone();
    for mut col in centered.columns_mut() {
        let mean = col.sum() / rows as f64;
        col.mapv_inplace(|v| v - mean);
    }

    let mut projected = Array2::zeros((rows, 2));
    let mut deflated = centered;
    for component in 0..2 {
        let axis = principal_axis(&deflated);
        let scores = deflated.dot(&axis);
        for (i, &s) in scores.iter().enumerate() {
            projected[[i, component]] = s;
        }
        // deflate: remove the found component
        for ((i, j), v) in deflated.indexed_iter_mut() {
            *v -= scores[i] * axis[j];
        }
    }
    Ok(projected)
}

/// Dominant right singular vector of the centered data.
fn principal_axis(data: &Array2<f64>) -> Array1<f64> {
    let dims = data.ncols();
    let mut v = Array1::from_elem(dims, 1.0 / (dims as f64).sqrt());
    for _ in 0..POWER_ITERATIONS {
        // v <- normalize(Xᵀ(Xv))
        let next = data.t().dot(&data.dot(&v));
        let norm = next.dot(&next).sqrt();
        if norm < 1e-12 {
            break;
        }
        v = next / norm;
    }
    v
}

/// Project embeddings and write labelled points as JSON.
pub fn export_projection(
    path: &Path,
    embeddings: &Array2<f64>,
    labels: &[usize],
) -> Result<Vec<ProjectedPoint>> {
    if labels.len() != embeddings.nrows() {
        return Err(MetaError::ShapeMismatch(format!(
            "{} labels for {} embedding rows",
            labels.len(),
            embeddings.nrows()
        )));
    }

    let projected = project_2d(embeddings)?;
    let points: Vec<ProjectedPoint> = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| ProjectedPoint {
            x: projected[[i, 0]],
            y: projected[[i, 1]],
            label,
        })
        .collect();

    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), &points)?;
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_clusters() -> (Array2<f64>, Vec<usize>) {
        let mut data = Array2::zeros((8, 3));
        for i in 0..4 {
            data[[i, 0]] = 10.0 + i as f64 * 0.1;
            data[[i, 1]] = 0.2 * i as f64;
            data[[i, 2]] = 0.1;
        }
        for i in 4..8 {
            data[[i, 0]] = -10.0 - i as f64 * 0.1;
            data[[i, 1]] = -0.2 * i as f64;
            data[[i, 2]] = -0.1;
        }
        let labels = vec![0, 0, 0, 0, 1, 1, 1, 1];
        (data, labels)
    }

    #[test]
    fn test_projection_separates_clusters() {
        let (data, _) = two_clusters();
        let projected = project_2d(&data).unwrap();
        assert_eq!(projected.dim(), (8, 2));

        // the first component splits the clusters by sign
        let first_sign = projected[[0, 0]].signum();
        for i in 0..4 {
            assert_eq!(projected[[i, 0]].signum(), first_sign);
        }
        for i in 4..8 {
            assert_eq!(projected[[i, 0]].signum(), -first_sign);
        }
    }

    #[test]
    fn test_projection_needs_enough_data() {
        let tiny = Array2::zeros((1, 3));
        assert!(matches!(
            project_2d(&tiny),
            Err(MetaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_export_writes_json() {
        let (data, labels) = two_clusters();
        let path = std::env::temp_dir().join("eml_projection_test.json");

        let points = export_projection(&path, &data, &labels).unwrap();
        assert_eq!(points.len(), 8);

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ProjectedPoint> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 8);
        assert_eq!(parsed[0].label, 0);
    }

    #[test]
    fn test_export_label_mismatch() {
        let (data, _) = two_clusters();
        let path = std::env::temp_dir().join("eml_projection_bad.json");
        assert!(matches!(
            export_projection(&path, &data, &[0, 1]),
            Err(MetaError::ShapeMismatch(_))
        ));
    }
}
