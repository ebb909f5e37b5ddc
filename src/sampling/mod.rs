//! Seeded episode sampling, meta-batch splitting and task structure
//! extraction.

pub mod batch;
pub mod episode;
pub mod seed;
pub mod structure;

pub use batch::{split_into_meta_batches, MetaBatch, MetaBatchIter};
pub use episode::{Episode, EpisodeConfig, EpisodeSampler, EpisodeTensors};
pub use seed::SeedSource;
pub use structure::{TaskStructure, TensorLayout};
