//! Parameter mappings, the adaptable-learner capability and the inner
//! adaptation loop.

pub mod inner_loop;
pub mod learner;
pub mod params;

pub use inner_loop::InnerLoopAdapter;
pub use learner::AdaptableLearner;
pub use params::{ParamMap, Parameter};
