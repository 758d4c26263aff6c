//! Model configuration, weight storage and the decode step.

mod config;
pub(crate) mod forward;
mod weights;

pub use config::{ModelConfig, HEADER_BYTES};
pub use forward::{step, ForwardState, KvCache};
pub use weights::ModelStore;
