//! Named parameter mappings.
//!
//! A learner addresses its tensors through a flat mapping built once at
//! construction, using dotted path-like names (`"attention.weight"`). Two
//! mappings exist during an episode: the learner's live mapping, which
//! persists across episodes, and an ephemeral adapted mapping produced by
//! the inner loop and discarded after the query pass.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{MetaError, Result};

/// A single named tensor slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Tensor value
    pub value: ArrayD<f64>,
    /// Whether outer-loop optimization may update this parameter
    pub trainable: bool,
}

impl Parameter {
    /// Create a trainable parameter
    pub fn new(value: ArrayD<f64>) -> Self {
        Self {
            value,
            trainable: true,
        }
    }

    /// Create a frozen parameter
    pub fn frozen(value: ArrayD<f64>) -> Self {
        Self {
            value,
            trainable: false,
        }
    }
}

/// Ordered name → parameter mapping.
///
/// Iteration order is insertion order and is stable across lookups and
/// replacements; the inner loop relies on this when pairing parameters with
/// gradients positionally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamMap {
    entries: Vec<(String, Parameter)>,
}

impl ParamMap {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping holds no parameters
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a parameter. Replacement keeps the original
    /// position so positional iteration stays stable.
    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = param;
        } else {
            self.entries.push((name, param));
        }
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Mutable lookup by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Look up a tensor value, failing with `MissingParameter`
    pub fn value(&self, name: &str) -> Result<&ArrayD<f64>> {
        self.get(name)
            .map(|p| &p.value)
            .ok_or_else(|| MetaError::MissingParameter(name.to_string()))
    }

    /// Whether a name is present
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Parameter names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate `(name, parameter)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Mutable iteration in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Parameter)> {
        self.entries.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    /// Total number of scalar elements across all parameters
    pub fn element_count(&self) -> usize {
        self.entries.iter().map(|(_, p)| p.value.len()).sum()
    }

    /// Verify that `other` carries exactly the names of this mapping.
    ///
    /// Used when restoring persisted snapshots: a snapshot written by a
    /// different architecture must be rejected before any value is copied.
    pub fn check_name_contract(&self, other: &ParamMap) -> Result<()> {
        for name in self.names() {
            if !other.contains(name) {
                return Err(MetaError::MissingParameter(name.to_string()));
            }
        }
        for name in other.names() {
            if !self.contains(name) {
                return Err(MetaError::MissingParameter(name.to_string()));
            }
        }
        Ok(())
    }

    /// Copy values from a snapshot with matching names into this mapping.
    /// Trainability flags are kept from the live side.
    pub fn restore_from(&mut self, snapshot: &ParamMap) -> Result<()> {
        self.check_name_contract(snapshot)?;
        for (name, param) in self.iter_mut() {
            let incoming = snapshot
                .get(name)
                .ok_or_else(|| MetaError::MissingParameter(name.to_string()))?;
            if incoming.value.shape() != param.value.shape() {
                return Err(MetaError::ShapeMismatch(format!(
                    "parameter {} has shape {:?} in snapshot, {:?} live",
                    name,
                    incoming.value.shape(),
                    param.value.shape()
                )));
            }
            param.value = incoming.value.clone();
        }
        Ok(())
    }

    /// Write the mapping as a JSON snapshot
    pub fn save_snapshot(&self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Read a JSON snapshot
    pub fn load_snapshot(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let map = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(map)
    }
}
