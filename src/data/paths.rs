//! Dataset path layout.
//!
//! All artifacts of a dataset live under one base directory:
//!
//! ```text
//! <base>/<dataset>/data/<split>/data.json        padded token sequences
//! <base>/<dataset>/data/<split>/seq_length.json  true lengths
//! <base>/<dataset>/data/word_map.json            token ↔ id table
//! <base>/<dataset>/models/<model>_v<version>.json parameter snapshots
//! <base>/<dataset>/doc/<version>/                per-run configs and results
//! ```
//!
//! Split-specific paths are refused for the `All` split, which only ever
//! addresses whole-dataset artifacts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{MetaError, Result};

/// Dataset split selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSplit {
    Train,
    Validate,
    Test,
    /// The whole dataset; split-specific paths are unavailable
    All,
}

impl DataSplit {
    /// Directory name of the split
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Validate => "validate",
            DataSplit::Test => "test",
            DataSplit::All => "all",
        }
    }
}

/// Path builder for one dataset and split.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    base: PathBuf,
    dataset: String,
    split: DataSplit,
    model_name: Option<String>,
    version: u32,
}

impl DatasetPaths {
    /// Create a path builder
    pub fn new(base: impl Into<PathBuf>, dataset: &str, split: DataSplit) -> Self {
        Self {
            base: base.into(),
            dataset: dataset.to_string(),
            split,
            model_name: None,
            version: 1,
        }
    }

    /// Attach a model name for model-file paths
    pub fn with_model(mut self, model_name: &str) -> Self {
        self.model_name = Some(model_name.to_string());
        self
    }

    /// Set the run version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Selected split
    pub fn split(&self) -> DataSplit {
        self.split
    }

    /// `<base>/<dataset>`
    pub fn dataset_dir(&self) -> PathBuf {
        self.base.join(&self.dataset)
    }

    fn split_dir(&self) -> Result<PathBuf> {
        if self.split == DataSplit::All {
            return Err(MetaError::InvalidParameter(
                "split-specific data paths are unavailable for the 'all' split".to_string(),
            ));
        }
        Ok(self.dataset_dir().join("data").join(self.split.as_str()))
    }

    /// Sequence data file of the split
    pub fn data_file(&self) -> Result<PathBuf> {
        Ok(self.split_dir()?.join("data.json"))
    }

    /// Length table of the split
    pub fn seq_length_file(&self) -> Result<PathBuf> {
        Ok(self.split_dir()?.join("seq_length.json"))
    }

    /// Token ↔ id table of the dataset
    pub fn word_map_file(&self) -> PathBuf {
        self.dataset_dir().join("data").join("word_map.json")
    }

    /// Parameter snapshot file for the configured model and version
    pub fn model_file(&self) -> Result<PathBuf> {
        let model = self.model_name.as_deref().ok_or_else(|| {
            MetaError::InvalidParameter("no model name configured for model paths".to_string())
        })?;
        Ok(self
            .dataset_dir()
            .join("models")
            .join(format!("{}_v{}.json", model, self.version)))
    }

    /// Per-run documentation directory
    pub fn doc_dir(&self) -> PathBuf {
        self.dataset_dir().join("doc").join(self.version.to_string())
    }
}

/// Ensure the parent directory of a file exists.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
