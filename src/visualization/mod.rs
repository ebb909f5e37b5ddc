//! Embedding projection export for external plotting.

pub mod embed;

pub use embed::{export_projection, project_2d, ProjectedPoint};
