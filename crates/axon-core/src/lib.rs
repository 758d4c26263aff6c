//! # Axon Core
//!
//! Core engine for multi-tenant, resumable llama2-style text generation.
//!
//! This crate provides:
//! - **Checkpoint loading** into a bounds-checked weight arena
//! - **Single-token transformer forward pass** with grouped-query attention
//! - **Byte-fallback BPE tokenizer** over the llama2 vocabulary blob
//! - **Greedy, multinomial and nucleus sampling** with a seedable PRNG
//! - **Keyed sessions** whose KV cache and cursor persist across calls
//! - **A resumable generation loop** that splits work over many calls

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod generate;
pub mod golden;
pub mod model;
pub mod sampler;
pub mod session;
pub mod tokenizer;

pub use error::{AxonError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{AxonError, Result};
    pub use crate::generate::generate;
    pub use crate::model::{ModelConfig, ModelStore};
    pub use crate::sampler::Sampler;
    pub use crate::session::{ChatRecord, Session, SessionStore};
    pub use crate::tokenizer::{Tokenizer, BOS_TOKEN, EOS_TOKEN};
}
