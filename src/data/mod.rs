//! Labeled example store, dataset files and path layout.

pub mod dataset;
pub mod paths;
pub mod store;

pub use dataset::SeqFileDataset;
pub use paths::{DataSplit, DatasetPaths};
pub use store::{ClassGroup, ExampleStore, SequenceStore};
