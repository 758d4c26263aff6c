//! # Axon
//!
//! Multi-tenant, resumable llama2-class text generation.
//!
//! Axon serves many independent callers from one loaded checkpoint. Each
//! caller key owns a session whose KV cache and cursor persist between
//! calls, so long generations can be split across requests and continued
//! exactly where they left off.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use axon::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new();
//!     engine.load_model(&std::fs::read("model.bin")?)?;
//!     engine.load_tokenizer(&std::fs::read("tokenizer.bin")?)?;
//!
//!     engine.start_session("alice")?;
//!     let result = engine.generate(
//!         "alice",
//!         &PromptRequest { text: "Once upon a time".into(), ..Default::default() },
//!     )?;
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use axon_core::*;

mod engine;

pub use engine::{Engine, GenerateResult, PromptRequest};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, GenerateResult, PromptRequest};
    pub use axon_core::{
        error::{AxonError, Result},
        model::{ModelConfig, ModelStore},
        session::ChatRecord,
        tokenizer::{BOS_TOKEN, EOS_TOKEN},
    };
}
