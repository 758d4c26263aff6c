//! Minimal end-to-end demo.
//!
//! Loads a checkpoint and tokenizer (paths from the command line, or the
//! built-in synthetic fixture when omitted), starts two sessions and streams
//! a short generation in chunks.
//!
//! ```text
//! cargo run --example story -- model.bin tokenizer.bin
//! ```

use axon::golden::{tiny_checkpoint, tiny_config, tiny_vocab};
use axon::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let engine = Engine::new();
    match (args.next(), args.next()) {
        (Some(model_path), Some(tokenizer_path)) => {
            engine.load_model(&std::fs::read(model_path)?)?;
            engine.load_tokenizer(&std::fs::read(tokenizer_path)?)?;
        }
        _ => {
            tracing::info!("no paths given; using the built-in synthetic fixture");
            engine.load_model(&tiny_checkpoint(&tiny_config()))?;
            engine.load_tokenizer(&tiny_vocab())?;
        }
    }

    let config = engine.config()?;
    tracing::info!(?config, "engine ready");

    for key in ["alice", "bob"] {
        engine.start_session(key)?;
        engine.generate(
            key,
            &PromptRequest {
                text: " hello".into(),
                ..Default::default()
            },
        )?;
    }

    // Generation resumes across calls; each chunk picks up where the last
    // call's cursor stopped.
    for _ in 0..3 {
        for key in ["alice", "bob"] {
            let chunk = engine.generate(
                key,
                &PromptRequest {
                    steps: 8,
                    temperature: 0.8,
                    top_p: 0.9,
                    seed: 42,
                    ..Default::default()
                },
            )?;
            println!("[{key}] +{} tokens: {:?}", chunk.tokens_produced, chunk.text);
        }
    }

    for key in ["alice", "bob"] {
        println!("[{key}] full story: {:?}", engine.history(key)?);
    }
    Ok(())
}
